// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use crate::test_support::{test_zone_store, test_zones};

use super::ZoneProfileStore;

#[yare::parameterized(
    below_all = { 80.0, Some("cool") },
    cool_floor = { 90.0, Some("cool") },
    active = { 125.0, Some("active") },
    warm = { 150.0, Some("warm") },
    hot = { 170.0, Some("hot") },
    zero = { 0.0, None },
    negative = { -10.0, None },
)]
fn resolve_picks_highest_matching_zone(hr: f64, expected: Option<&str>) {
    let store = test_zone_store();
    let resolved = store.resolve_zone("u1", hr).map(|z| z.id.as_str());
    assert_eq!(resolved, expected);
}

#[test]
fn hr_below_lowest_zone_resolves_nothing() {
    let store = test_zone_store();
    assert!(store.resolve_zone("u1", 50.0).is_none());
}

#[test]
fn unconfigured_store_resolves_nothing() {
    let store = ZoneProfileStore::default();
    assert!(store.resolve_zone("u1", 150.0).is_none());
}

#[test]
fn override_by_zone_id_changes_threshold_only() {
    let mut store = ZoneProfileStore::default();
    let mut per_user = HashMap::new();
    per_user.insert("u1".to_owned(), HashMap::from([("hot".to_owned(), 150.0)]));
    store.configure(test_zones(), per_user);

    // u1's hot floor drops to 150; everyone else keeps 160.
    let resolved = store.resolve_zone("u1", 152.0).map(|z| z.id.as_str());
    assert_eq!(resolved, Some("hot"));
    let other = store.resolve_zone("u2", 152.0).map(|z| z.id.as_str());
    assert_eq!(other, Some("warm"));

    // Identity and color never change under an override.
    let zone = store.resolve_zone("u1", 152.0);
    assert_eq!(zone.map(|z| z.color.as_str()), Some("red"));
}

#[test]
fn override_by_lowercased_name() {
    let mut store = ZoneProfileStore::default();
    let mut per_user = HashMap::new();
    per_user.insert("u1".to_owned(), HashMap::from([("warm".to_owned(), 130.0)]));
    store.configure(test_zones(), per_user);
    let resolved = store.resolve_zone("u1", 132.0).map(|z| z.id.as_str());
    assert_eq!(resolved, Some("warm"));
}

#[test]
fn zones_sort_by_min_ascending() {
    let mut store = ZoneProfileStore::default();
    let mut zones = test_zones();
    zones.reverse();
    store.configure(zones, HashMap::new());
    let mins: Vec<f64> = store.all().iter().map(|z| z.min).collect();
    assert_eq!(mins, vec![90.0, 120.0, 140.0, 160.0]);
    assert_eq!(store.rank("cool"), Some(0));
    assert_eq!(store.rank("hot"), Some(3));
}

#[test]
fn resolve_ref_accepts_id_or_name() {
    let store = test_zone_store();
    assert_eq!(store.resolve_ref("warm").map(|z| z.id.as_str()), Some("warm"));
    assert_eq!(store.resolve_ref("Warm").map(|z| z.id.as_str()), Some("warm"));
    assert!(store.resolve_ref("nope").is_none());
}
