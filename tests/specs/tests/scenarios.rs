// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driven through the public session surface with
//! explicit timestamps, so every run is deterministic.

use serde_json::Value;

use sweatbox::event::SessionEvent;
use sweatbox::governance::Phase;
use sweatbox::roster::{GuestAssignment, RosterEntry, DeviceAssignment};
use sweatbox::session::{EndReason, FitnessSession};
use sweatbox::test_support::{governed_media, hr_frame, majority_active_config, test_session};

const T0: u64 = 1_754_000_000_000;

fn roster_of(n: usize) -> (Vec<RosterEntry>, Vec<DeviceAssignment>) {
    let mut roster = Vec::new();
    let mut assignments = Vec::new();
    for i in 1..=n {
        roster.push(RosterEntry {
            id: Some(format!("u{i}")),
            name: format!("User {i}"),
            group_label: None,
            hr_device_id: Some(format!("strap-{i}")),
            zones: None,
        });
        assignments.push(DeviceAssignment {
            device_id: format!("strap-{i}"),
            profile_id: format!("u{i}"),
            name: None,
            zones: None,
            allow_while_assigned: false,
        });
    }
    (roster, assignments)
}

/// Start a rostered session at exactly T0.
fn started(n_users: usize) -> anyhow::Result<FitnessSession> {
    let mut session = test_session();
    let (roster, assignments) = roster_of(n_users);
    session.set_roster(roster, assignments, T0 - 1_000)?;
    for offset in (0..3u64).rev() {
        session.ingest(&hr_frame("strap-1", 120.0), T0 - offset)?;
    }
    Ok(session)
}

fn series_f64(session: &FitnessSession, key: &str) -> Vec<Option<f64>> {
    session
        .timeline()
        .get_series(key)
        .map(|column| {
            column.iter().map(|c| c.as_ref().and_then(Value::as_f64)).collect()
        })
        .unwrap_or_default()
}

#[test]
fn steady_effort_accrues_coins() -> anyhow::Result<()> {
    let mut session = started(1)?;
    for i in 1..=3u64 {
        session.ingest(&hr_frame("strap-1", 150.0), T0 + i * 5_000)?;
        session.tick(T0 + i * 5_000);
    }

    let coins = series_f64(&session, "user:u1:coins_total");
    assert_eq!(coins, vec![Some(0.0), Some(5.0), Some(10.0), Some(15.0)]);
    let global = series_f64(&session, "global:coins_total");
    assert_eq!(global.last().copied().flatten(), Some(15.0));
    Ok(())
}

#[test]
fn dropout_marks_a_hole_and_freezes_cumulatives() -> anyhow::Result<()> {
    let mut session = started(1)?;
    for i in 1..=4u64 {
        session.ingest(&hr_frame("strap-1", 150.0), T0 + i * 5_000)?;
        session.tick(T0 + i * 5_000);
    }
    // Tick 5: the strap goes silent.
    session.tick(T0 + 25_000);

    let hr = series_f64(&session, "user:u1:heart_rate");
    assert!(hr[4].is_some());
    assert_eq!(hr[5], None);

    let beats = series_f64(&session, "user:u1:heart_beats");
    assert_eq!(beats[5], beats[4]);
    let coins = series_f64(&session, "user:u1:coins_total");
    assert_eq!(coins[5], coins[4]);
    Ok(())
}

#[test]
fn grace_period_handoff_transfers_session_state() -> anyhow::Result<()> {
    let mut session = test_session();
    let (roster, assignments) = roster_of(1);
    // u1 was assigned 30 s before the session starts (< 60 s grace).
    session.set_roster(roster, assignments, T0 - 30_000)?;
    for offset in (0..3u64).rev() {
        session.ingest(&hr_frame("strap-1", 150.0), T0 - offset)?;
    }
    for i in 1..=2u64 {
        session.ingest(&hr_frame("strap-1", 150.0), T0 + i * 5_000)?;
        session.tick(T0 + i * 5_000);
    }
    let u1_total: u64 = session.treasure().per_user_totals().values().sum();
    assert!(u1_total > 0);

    let events = session.assign_guest(
        "strap-1",
        GuestAssignment {
            name: "Jin".to_owned(),
            profile_id: Some("jin".to_owned()),
            base_user_name: Some("User 1".to_owned()),
            zones: None,
            allow_while_assigned: false,
        },
        T0 + 11_000,
    )?;

    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::GracePeriodTransfer { .. })));
    assert!(session.transferred_users().contains("u1"));

    let jin_total: u64 = session.treasure().per_user_totals().values().sum();
    assert!(jin_total >= u1_total);
    assert!(!session.historical_participants().contains(&"u1".to_owned()));
    Ok(())
}

#[test]
fn governance_warning_then_locked() -> anyhow::Result<()> {
    let mut session = test_session();
    session.configure_governance(majority_active_config(30.0), None);
    let (roster, assignments) = roster_of(3);
    session.set_roster(roster, assignments, T0 - 1_000)?;
    session.set_media(Some(governed_media()), T0 - 500);
    for offset in (0..3u64).rev() {
        session.ingest(&hr_frame("strap-1", 130.0), T0 - offset)?;
    }

    // Two of three in the active zone: requirements satisfied, hysteresis
    // passes across ticks, phase unlocks.
    for i in 1..=2u64 {
        session.ingest(&hr_frame("strap-1", 130.0), T0 + i * 5_000)?;
        session.ingest(&hr_frame("strap-2", 130.0), T0 + i * 5_000)?;
        session.ingest(&hr_frame("strap-3", 100.0), T0 + i * 5_000)?;
        session.tick(T0 + i * 5_000);
    }
    assert_eq!(session.governance().phase(), Some(Phase::Unlocked));

    // Only one of three stays in active: warning with a 30 s deadline.
    session.ingest(&hr_frame("strap-1", 130.0), T0 + 15_000)?;
    session.ingest(&hr_frame("strap-2", 100.0), T0 + 15_000)?;
    session.ingest(&hr_frame("strap-3", 100.0), T0 + 15_000)?;
    session.tick(T0 + 15_000);
    assert_eq!(session.governance().phase(), Some(Phase::Warning));
    assert_eq!(session.governance().deadline_ms(), Some(T0 + 45_000));

    // Nothing changes for 30 s: locked, video gated.
    for i in 4..=9u64 {
        session.ingest(&hr_frame("strap-1", 130.0), T0 + i * 5_000)?;
        session.ingest(&hr_frame("strap-2", 100.0), T0 + i * 5_000)?;
        session.ingest(&hr_frame("strap-3", 100.0), T0 + i * 5_000)?;
        session.tick(T0 + i * 5_000);
    }
    assert_eq!(session.governance().phase(), Some(Phase::Locked));
    assert!(session.governance().video_locked());
    Ok(())
}

#[test]
fn momentary_satisfaction_never_unlocks() -> anyhow::Result<()> {
    let mut session = test_session();
    session.configure_governance(majority_active_config(30.0), None);
    let (roster, assignments) = roster_of(3);
    session.set_roster(roster, assignments, T0 - 1_000)?;
    session.set_media(Some(governed_media()), T0 - 500);
    // Warm-up pings stay in cool so nothing is satisfied at the start tick.
    for offset in (0..3u64).rev() {
        session.ingest(&hr_frame("strap-1", 100.0), T0 - offset)?;
    }

    // Two of three in active: satisfied at one tick...
    session.ingest(&hr_frame("strap-1", 130.0), T0 + 5_000)?;
    session.ingest(&hr_frame("strap-2", 130.0), T0 + 5_000)?;
    session.ingest(&hr_frame("strap-3", 100.0), T0 + 5_000)?;
    session.tick(T0 + 5_000);
    // ...then a zone drop 300 ms in, evaluated by the debounced cycle
    // before the 500 ms hysteresis elapses.
    session.ingest(&hr_frame("strap-2", 100.0), T0 + 5_300)?;
    let _ = session.governance_poll(T0 + 5_400);
    session.ingest(&hr_frame("strap-1", 130.0), T0 + 10_000)?;
    session.ingest(&hr_frame("strap-2", 100.0), T0 + 10_000)?;
    session.ingest(&hr_frame("strap-3", 100.0), T0 + 10_000)?;
    session.tick(T0 + 10_000);

    assert_ne!(session.governance().phase(), Some(Phase::Unlocked));
    assert!(!session.governance().satisfied_once());
    Ok(())
}

#[test]
fn short_sessions_are_rejected_before_persistence() -> anyhow::Result<()> {
    // Only the start tick plus the final tick: two columns, below minimum.
    let mut session = started(1)?;
    let end = session.end_session(&EndReason::Explicit("abort".to_owned()), T0 + 2_000)?;
    assert!(end.payload.is_none());
    assert_eq!(end.rejection.map(|r| r.reason), Some("insufficient-ticks".to_owned()));
    Ok(())
}
