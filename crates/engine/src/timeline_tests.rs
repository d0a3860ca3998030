// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use indexmap::IndexMap;
use serde_json::{json, Value};

use super::{valid_series_key, TickPayload, Timeline};

fn payload(entries: &[(&str, Option<Value>)]) -> TickPayload {
    entries.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

#[yare::parameterized(
    user_metric = { "user:u1:heart_rate", true },
    entity_metric = { "entity:entity_ab12:coins_total", true },
    global = { "global:coins_total", true },
    two_segments = { "user:u1", false },
    four_segments = { "user:u1:a:b", false },
    empty_segment = { "user::heart_rate", false },
    bad_chars = { "user:u-1:heart_rate", false },
    spaces = { "user:u 1:hr", false },
)]
fn key_shape(key: &str, expected: bool) {
    assert_eq!(valid_series_key(key), expected);
}

#[test]
fn every_series_tracks_tick_count() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(payload(&[("user:u1:heart_rate", Some(json!(120)))]), 5_000);
    timeline.tick(payload(&[("user:u2:heart_rate", Some(json!(110)))]), 10_000);
    timeline.tick(payload(&[]), 15_000);

    let summary = timeline.summary();
    assert_eq!(summary.timebase.tick_count, 3);
    for column in summary.series.values() {
        assert_eq!(column.len(), 3);
    }
    // u1 was only written at tick 0; later cells are holes.
    let u1 = timeline.get_series("user:u1:heart_rate");
    assert!(u1.is_some_and(|c| c[0] == Some(json!(120)) && c[1].is_none() && c[2].is_none()));
    // u2 joined at tick 1: the column back-fills the missed tick.
    let u2 = timeline.get_series("user:u2:heart_rate");
    assert!(u2.is_some_and(|c| c[0].is_none() && c[1] == Some(json!(110))));
}

#[test]
fn invalid_keys_are_stripped_but_the_tick_commits() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(
        payload(&[
            ("user:u1:heart_rate", Some(json!(120))),
            ("bogus key", Some(json!(1))),
            ("user:u-1:hr", Some(json!(2))),
        ]),
        5_000,
    );
    assert_eq!(timeline.tick_count(), 1);
    assert_eq!(timeline.summary().series.len(), 1);
}

#[test]
fn explicit_null_marks_a_dropout_hole_for_heart_rate() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(payload(&[("user:u1:heart_rate", Some(json!(120)))]), 5_000);
    timeline.tick(payload(&[("user:u1:heart_rate", None)]), 10_000);

    let column = timeline.get_series("user:u1:heart_rate");
    assert!(column.is_some_and(|c| c.len() == 2 && c[1].is_none()));
}

#[test]
fn null_on_non_hr_keys_is_dropped_silently() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(payload(&[("user:u1:power", None)]), 5_000);
    assert!(timeline.get_series("user:u1:power").is_none());
    assert_eq!(timeline.tick_count(), 1);
}

#[test]
fn transfer_moves_user_series() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(
        payload(&[
            ("user:u1:heart_rate", Some(json!(120))),
            ("user:u1:heart_beats", Some(json!(10.0))),
        ]),
        5_000,
    );
    timeline.transfer_user_series("u1", "jin");

    assert!(timeline.get_series("user:u1:heart_rate").is_none());
    let hr = timeline.get_series("user:jin:heart_rate");
    assert!(hr.is_some_and(|c| c[0] == Some(json!(120))));
}

#[test]
fn transfer_merges_cumulative_by_summing() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(
        payload(&[
            ("user:u1:heart_beats", Some(json!(10.0))),
            ("user:jin:heart_beats", Some(json!(4.0))),
            ("user:u1:heart_rate", Some(json!(120))),
            ("user:jin:heart_rate", Some(json!(110))),
        ]),
        5_000,
    );
    timeline.transfer_user_series("u1", "jin");

    let beats = timeline.get_series("user:jin:heart_beats");
    assert!(beats.is_some_and(|c| c[0].as_ref().and_then(Value::as_f64) == Some(14.0)));
    // Non-cumulative conflicts prefer the existing destination value.
    let hr = timeline.get_series("user:jin:heart_rate");
    assert!(hr.is_some_and(|c| c[0] == Some(json!(110))));
}

#[test]
fn transfer_prefers_non_null_cells() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(payload(&[("user:u1:heart_rate", Some(json!(120)))]), 5_000);
    timeline.tick(payload(&[("user:jin:heart_rate", Some(json!(111)))]), 10_000);
    timeline.transfer_user_series("u1", "jin");

    let hr = timeline.get_series("user:jin:heart_rate");
    assert!(hr.is_some_and(|c| c[0] == Some(json!(120)) && c[1] == Some(json!(111))));
}

#[test]
fn second_transfer_is_a_no_op() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(payload(&[("user:u1:heart_beats", Some(json!(10.0)))]), 5_000);
    timeline.transfer_user_series("u1", "jin");
    let first = timeline.summary().series;
    timeline.transfer_user_series("u1", "jin");
    assert_eq!(timeline.summary().series, first);
}

#[test]
fn entity_transfer_is_scoped() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(
        payload(&[
            ("entity:entity_a:coins_total", Some(json!(5))),
            ("user:u1:coins_total", Some(json!(5))),
        ]),
        5_000,
    );
    timeline.transfer_entity_series("entity_a", "entity_b");
    assert!(timeline.get_series("entity:entity_b:coins_total").is_some());
    // User-scoped series are untouched by the entity variant.
    assert!(timeline.get_series("user:u1:coins_total").is_some());
}

#[test]
fn participant_ids_come_from_user_scope() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(
        payload(&[
            ("user:u1:heart_rate", Some(json!(120))),
            ("user:u1:heart_beats", Some(json!(10.0))),
            ("user:u2:heart_rate", Some(json!(100))),
            ("device:strap_1:heart_rate", Some(json!(120))),
        ]),
        5_000,
    );
    assert_eq!(timeline.all_participant_ids(), vec!["u1".to_owned(), "u2".to_owned()]);
}

#[test]
fn events_are_recorded_in_order() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.log_event("session_started", json!({ "session_id": "fs_1" }), 0);
    timeline.log_event("challenge_started", json!({ "challenge_id": "c1" }), 9_000);
    let events = timeline.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].kind, "session_started");
    assert_eq!(events[1].at, 9_000);
}

#[test]
fn validate_series_lengths_flags_mismatches() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(payload(&[("user:u1:heart_rate", Some(json!(120)))]), 5_000);
    let summary = timeline.summary();
    assert!(Timeline::validate_series_lengths(&summary.timebase, &summary.series).is_ok());

    let mut broken: IndexMap<String, Vec<Option<Value>>> = summary.series;
    if let Some(column) = broken.get_mut("user:u1:heart_rate") {
        column.push(None);
    }
    assert!(Timeline::validate_series_lengths(&summary.timebase, &broken).is_err());
}

#[test]
fn reset_rebases_the_timebase() {
    let mut timeline = Timeline::new(0, 5_000);
    timeline.tick(payload(&[("user:u1:heart_rate", Some(json!(120)))]), 5_000);
    timeline.reset(50_000);
    let timebase = timeline.timebase();
    assert_eq!(timebase.tick_count, 0);
    assert_eq!(timebase.start_ms, 50_000);
    assert!(timeline.summary().series.is_empty());
}
