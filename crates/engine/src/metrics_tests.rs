// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{CurrentMetrics, MetricsRecorder};

fn sample(hr: f64, coins: u64, at_ms: u64) -> CurrentMetrics {
    CurrentMetrics {
        heart_rate: Some(hr),
        zone_id: Some("active".to_owned()),
        rpm: None,
        power: None,
        distance: None,
        coins_total: coins,
        active: true,
        updated_at_ms: at_ms,
    }
}

#[test]
fn record_replaces_previous_readings() {
    let mut recorder = MetricsRecorder::default();
    recorder.record("u1", sample(120.0, 0, 1_000));
    recorder.record("u1", sample(135.0, 5, 2_000));

    let current = recorder.current("u1");
    assert!(current.is_some_and(|m| m.heart_rate == Some(135.0) && m.coins_total == 5));
}

#[test]
fn mark_inactive_keeps_totals_but_clears_hr() {
    let mut recorder = MetricsRecorder::default();
    recorder.record("u1", sample(120.0, 7, 1_000));
    recorder.mark_inactive("u1", 2_000);

    let current = recorder.current("u1");
    assert!(current.is_some_and(|m| {
        !m.active && m.heart_rate.is_none() && m.coins_total == 7 && m.updated_at_ms == 2_000
    }));
}

#[test]
fn transfer_moves_the_cache_entry() {
    let mut recorder = MetricsRecorder::default();
    recorder.record("u1", sample(120.0, 7, 1_000));
    recorder.transfer("u1", "jin");

    assert!(recorder.current("u1").is_none());
    assert!(recorder.current("jin").is_some_and(|m| m.coins_total == 7));

    // Second transfer finds nothing to move.
    recorder.transfer("u1", "jin");
    assert!(recorder.current("jin").is_some());
}

#[test]
fn reset_clears_everything() {
    let mut recorder = MetricsRecorder::default();
    recorder.record("u1", sample(120.0, 0, 1_000));
    recorder.reset();
    assert_eq!(recorder.user_ids().count(), 0);
}
