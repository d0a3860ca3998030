// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;

use crate::test_support::test_zone_store;

use super::{TreasureBox, NO_ZONE};

fn active(keys: &[&str]) -> HashSet<String> {
    keys.iter().map(|s| (*s).to_owned()).collect()
}

fn boxed() -> TreasureBox {
    let mut treasure = TreasureBox::new(5_000);
    treasure.reset(0);
    treasure
}

#[test]
fn zone_ceiling_awards_the_highest_zone_reached() {
    let zones = test_zone_store();
    let mut treasure = boxed();

    // 70 → no zone, 150 → warm, 90 → cool. The interval pays warm.
    treasure.record_heart_rate("u1", "u1", 70.0, 0, &zones);
    treasure.record_heart_rate("u1", "u1", 150.0, 1_000, &zones);
    treasure.record_heart_rate("u1", "u1", 90.0, 2_000, &zones);

    let awards = treasure.process_tick(1, &active(&["u1"]), 5_000);
    assert_eq!(awards.len(), 1);
    assert_eq!(awards[0].zone_id, "warm");
    assert_eq!(awards[0].coins, 5);
    assert_eq!(awards[0].total, 5);
}

#[test]
fn award_waits_for_a_full_interval() {
    let zones = test_zone_store();
    let mut treasure = boxed();
    treasure.record_heart_rate("u1", "u1", 150.0, 0, &zones);

    // 4 s in: interval not yet closed.
    let awards = treasure.process_tick(0, &active(&["u1"]), 4_000);
    assert!(awards.is_empty());
    // 5 s in: closed and paid.
    let awards = treasure.process_tick(1, &active(&["u1"]), 5_000);
    assert_eq!(awards.len(), 1);
}

#[test]
fn inactive_user_loses_the_ceiling_instead_of_banking_it() {
    let zones = test_zone_store();
    let mut treasure = boxed();
    treasure.record_heart_rate("u1", "u1", 150.0, 0, &zones);

    // Absent from the active set at the closing edge: no award, ceiling
    // cleared.
    let awards = treasure.process_tick(1, &active(&[]), 5_000);
    assert!(awards.is_empty());
    let acc = treasure.accumulator("u1");
    assert!(acc.is_some_and(|a| a.highest_zone.is_none() && a.total_coins == 0));

    // Reappearing later does not resurrect the lost interval.
    let awards = treasure.process_tick(2, &active(&["u1"]), 10_000);
    assert!(awards.is_empty());
}

#[test]
fn invalid_hr_resets_the_interval() {
    let zones = test_zone_store();
    let mut treasure = boxed();
    treasure.record_heart_rate("u1", "u1", 150.0, 0, &zones);
    treasure.record_heart_rate("u1", "u1", 0.0, 3_000, &zones);

    let acc = treasure.accumulator("u1");
    assert!(acc.is_some_and(|a| {
        a.highest_zone.is_none()
            && a.interval_start_ms == 3_000
            && a.last_color.as_deref() == Some(NO_ZONE)
    }));
}

#[test]
fn nan_hr_is_treated_as_invalid() {
    let zones = test_zone_store();
    let mut treasure = boxed();
    treasure.record_heart_rate("u1", "u1", f64::NAN, 1_000, &zones);
    let acc = treasure.accumulator("u1");
    assert!(acc.is_some_and(|a| a.highest_zone.is_none() && a.interval_start_ms == 1_000));
}

#[test]
fn cumulative_timeline_extends_forward() {
    let zones = test_zone_store();
    let mut treasure = boxed();

    treasure.record_heart_rate("u1", "u1", 150.0, 0, &zones);
    treasure.process_tick(1, &active(&["u1"]), 5_000);

    // Quiet stretch, then another award three intervals later.
    treasure.record_heart_rate("u1", "u1", 150.0, 15_000, &zones);
    treasure.process_tick(4, &active(&["u1"]), 20_000);

    let timeline = treasure.cumulative_timeline();
    // Index 1 (first close) = 5, gap carried forward, index 4 = 10.
    assert_eq!(timeline.cumulative, vec![0, 5, 5, 5, 10]);
    let warm = timeline.per_color.get("orange");
    assert!(warm.is_some_and(|series| series == &vec![0, 5, 5, 5, 10]));
}

#[test]
fn transfer_moves_totals_destructively() {
    let zones = test_zone_store();
    let mut treasure = boxed();
    treasure.record_heart_rate("u1", "u1", 150.0, 0, &zones);
    treasure.process_tick(1, &active(&["u1"]), 5_000);
    treasure.record_heart_rate("jin", "jin", 125.0, 5_000, &zones);
    treasure.process_tick(2, &active(&["jin"]), 10_000);

    let before: u64 = treasure.per_user_totals().values().sum();
    treasure.transfer_accumulator("u1", "jin");

    assert!(treasure.accumulator("u1").is_none());
    let jin_total = treasure.accumulator("jin").map(|a| a.total_coins);
    assert_eq!(jin_total, Some(before));

    // A second transfer is a no-op: the source is already gone.
    treasure.transfer_accumulator("u1", "jin");
    assert_eq!(treasure.accumulator("jin").map(|a| a.total_coins), Some(before));
}

#[test]
fn transfer_into_empty_key_moves_the_accumulator() {
    let zones = test_zone_store();
    let mut treasure = boxed();
    treasure.record_heart_rate("u1", "u1", 150.0, 0, &zones);
    treasure.process_tick(1, &active(&["u1"]), 5_000);

    treasure.transfer_accumulator("u1", "entity_abc");
    assert!(treasure.accumulator("u1").is_none());
    assert_eq!(treasure.accumulator("entity_abc").map(|a| a.total_coins), Some(5));
}

#[test]
fn summary_totals_line_up() {
    let zones = test_zone_store();
    let mut treasure = boxed();
    treasure.record_heart_rate("u1", "u1", 170.0, 0, &zones);
    treasure.process_tick(1, &active(&["u1"]), 5_000);

    let summary = treasure.summary();
    assert_eq!(summary.total_coins, 10);
    assert_eq!(summary.per_user_totals.get("u1"), Some(&10));
    assert_eq!(summary.color_totals.get("red"), Some(&10));
}

#[test]
fn reset_clears_everything() {
    let zones = test_zone_store();
    let mut treasure = boxed();
    treasure.record_heart_rate("u1", "u1", 150.0, 0, &zones);
    treasure.process_tick(1, &active(&["u1"]), 5_000);

    treasure.reset(100_000);
    assert!(treasure.accumulator("u1").is_none());
    assert_eq!(treasure.total_coins(), 0);
    assert!(treasure.cumulative_timeline().cumulative.is_empty());
}
