// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::{HashMap, HashSet};

use serde_json::json;

use crate::activity::ActivityMonitor;
use crate::test_support::test_zone_store;
use crate::timeline::Timeline;
use crate::treasure::TreasureBox;

use super::{execute, TransferPlanes, TransferRequest};

struct Fixture {
    treasure: TreasureBox,
    timeline: Timeline,
    activity: ActivityMonitor,
    heart_beats: HashMap<String, f64>,
    entity_beats: HashMap<String, f64>,
    transferred: HashSet<String>,
}

fn fixture() -> Fixture {
    let zones = test_zone_store();
    let mut treasure = TreasureBox::new(5_000);
    treasure.reset(0);
    treasure.record_heart_rate("entity_a", "u1", 150.0, 0, &zones);
    let active: HashSet<String> = [("entity_a".to_owned())].into_iter().collect();
    treasure.process_tick(1, &active, 5_000);

    let mut timeline = Timeline::new(0, 5_000);
    let mut payload = indexmap::IndexMap::new();
    payload.insert("user:u1:heart_beats".to_owned(), Some(json!(12.5)));
    payload.insert("user:u1:heart_rate".to_owned(), Some(json!(150)));
    payload.insert("entity:entity_a:coins_total".to_owned(), Some(json!(5)));
    timeline.tick(payload, 5_000);

    let mut activity = ActivityMonitor::default();
    activity.record_tick(0, ["u1".to_owned()].into_iter().collect());

    Fixture {
        treasure,
        timeline,
        activity,
        heart_beats: HashMap::from([("u1".to_owned(), 12.5)]),
        entity_beats: HashMap::from([("entity_a".to_owned(), 12.5)]),
        transferred: HashSet::new(),
    }
}

fn request() -> TransferRequest {
    TransferRequest {
        device_id: "strap_1".to_owned(),
        from_user: "u1".to_owned(),
        to_user: "jin".to_owned(),
        from_entity: Some("entity_a".to_owned()),
        to_entity: Some("entity_b".to_owned()),
    }
}

fn run(fixture: &mut Fixture) -> super::TransferSummary {
    execute(
        &request(),
        TransferPlanes {
            treasure: &mut fixture.treasure,
            timeline: &mut fixture.timeline,
            activity: &mut fixture.activity,
            heart_beats: &mut fixture.heart_beats,
            entity_beats: &mut fixture.entity_beats,
            transferred_users: &mut fixture.transferred,
        },
    )
}

#[test]
fn all_four_planes_move_together() {
    let mut fixture = fixture();
    let summary = run(&mut fixture);

    // Plane 1: coin accumulator.
    assert!(fixture.treasure.accumulator("entity_a").is_none());
    assert_eq!(fixture.treasure.accumulator("entity_b").map(|a| a.total_coins), Some(5));
    assert_eq!(summary.coins_moved, 5);

    // Plane 2: timeline series.
    assert!(fixture.timeline.get_series("user:u1:heart_beats").is_none());
    assert!(fixture.timeline.get_series("user:jin:heart_beats").is_some());
    assert!(fixture.timeline.get_entity_series("entity_b", "coins_total").is_some());

    // Plane 3: activity history.
    assert!(fixture.activity.is_active("jin"));
    assert!(!fixture.activity.is_active("u1"));

    // Plane 4: cumulative counters.
    assert_eq!(fixture.heart_beats.get("u1"), None);
    assert_eq!(fixture.heart_beats.get("jin"), Some(&12.5));
    assert_eq!(fixture.entity_beats.get("entity_b"), Some(&12.5));
    assert_eq!(summary.beats_moved, 12.5);

    assert!(fixture.transferred.contains("u1"));
}

#[test]
fn destination_totals_sum_with_existing_state() {
    let mut fixture = fixture();
    fixture.heart_beats.insert("jin".to_owned(), 2.5);
    run(&mut fixture);
    assert_eq!(fixture.heart_beats.get("jin"), Some(&15.0));
}

#[test]
fn repeat_transfer_is_idempotent() {
    let mut fixture = fixture();
    run(&mut fixture);
    let coins_after_first = fixture.treasure.accumulator("entity_b").map(|a| a.total_coins);
    let beats_after_first = fixture.heart_beats.get("jin").copied();

    run(&mut fixture);
    assert_eq!(fixture.treasure.accumulator("entity_b").map(|a| a.total_coins), coins_after_first);
    assert_eq!(fixture.heart_beats.get("jin").copied(), beats_after_first);
}
