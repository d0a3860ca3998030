// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-tick pipeline, extracted from the actor loop so every step is
//! independently testable against explicit timestamps.
//!
//! Step order is load-bearing: the activity monitor must record the tick
//! before the treasure box closes intervals (so awards are gated on the
//! current tick), and the timeline column commits after the coin fan-out so
//! all writes for the tick land in the same column.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::warn;

use crate::event::SessionEvent;
use crate::governance::{GovernanceEvent, GovernanceInput, ParticipantState};
use crate::timeline::{TickPayload, Timeline};

use super::FitnessSession;

/// Per-user staging record assembled from the device scan.
#[derive(Debug, Default, Clone)]
struct StagedUser {
    entity_id: Option<String>,
    hr: Option<f64>,
    rpm: Option<f64>,
    power: Option<f64>,
    speed: Option<f64>,
    distance: Option<f64>,
    zone_id: Option<String>,
    /// Fresh valid HR from a live device this tick.
    active: bool,
}

/// Run one tick of the pipeline. Returns the events to broadcast.
pub fn run_tick(session: &mut FitnessSession, now_ms: u64) -> Vec<SessionEvent> {
    let tick_index = session.tick_index;
    let thresholds = session.tuning.device_thresholds;
    let interval_s = session.tuning.tick_interval_ms as f64 / 1000.0;
    let mut payload: TickPayload = IndexMap::new();
    let mut events = Vec::new();

    session.devices.prune(now_ms, &thresholds);

    // 1+2: device scan, sanitized device metrics, occupant staging.
    let mut staged: IndexMap<String, StagedUser> = IndexMap::new();
    let mut rotation_deltas: Vec<(String, f64)> = Vec::new();
    for device in session.devices.all() {
        let sample = device.display_sample(now_ms, &thresholds);
        let fresh = device.last_seen_ms >= session.last_tick_at_ms;
        let hr = sample.heart_rate.filter(|v| v.is_finite() && *v > 0.0).map(f64::round);

        if let Some(hr) = hr {
            payload.insert(format!("device:{}:heart_rate", device.id), Some((hr as i64).into()));
        }
        write_metric(&mut payload, "device", &device.id, "rpm", sample.rpm);
        write_metric(&mut payload, "device", &device.id, "power", sample.power);
        write_metric(&mut payload, "device", &device.id, "speed", sample.speed);
        if let Some(distance) = sample.distance.filter(|v| v.is_finite() && *v > 0.0) {
            payload.insert(format!("device:{}:distance", device.id), Some(distance.into()));
        }
        if let Some(battery) = sample.battery {
            payload.insert(format!("device:{}:battery", device.id), Some(battery.into()));
        }

        // Equipment rotations accumulate from rpm over the tick interval.
        if device.kind.is_cadence_like() && fresh {
            if let Some(rpm) = sample.rpm.filter(|v| *v > 0.0) {
                rotation_deltas.push((device.id.clone(), rpm / 60.0 * interval_s));
            }
        }

        let Some(occupant) = session.roster.resolve_user_for_device(&device.id) else {
            continue;
        };
        if device
            .last_occupant_id
            .as_deref()
            .is_some_and(|marked| marked != occupant.user_id)
        {
            warn!(
                code = "ID_MISMATCH",
                device = %device.id,
                marked = ?device.last_occupant_id,
                resolved = %occupant.user_id,
                "device occupant marker disagrees with ledger"
            );
        }

        let entry = staged.entry(occupant.user_id.clone()).or_default();
        if entry.entity_id.is_none() {
            entry.entity_id = occupant.entity_id.clone();
        }
        if hr.is_some() {
            entry.hr = hr;
        }
        if sample.rpm.is_some() {
            entry.rpm = sample.rpm;
        }
        if sample.power.is_some() {
            entry.power = sample.power;
        }
        if sample.speed.is_some() {
            entry.speed = sample.speed;
        }
        if sample.distance.is_some() {
            entry.distance = sample.distance;
        }
        // An inactive device still reports metrics but its occupant does
        // not count as active.
        if fresh && !device.is_inactive() && hr.is_some() {
            entry.active = true;
        }
    }

    for (device_id, delta) in rotation_deltas {
        *session.rotations.entry(device_id).or_insert(0.0) += delta;
    }
    for (device_id, total) in &session.rotations {
        payload.insert(format!("device:{device_id}:rotations"), Some((*total).into()));
    }

    // 3+4: cumulative beats, the active set, instantaneous user metrics,
    // and explicit dropout holes.
    let mut active_users: HashSet<String> = HashSet::new();
    let mut active_keys: HashSet<String> = HashSet::new();
    for (user_id, entry) in staged.iter_mut() {
        if entry.active {
            let hr = entry.hr.unwrap_or(0.0);
            let delta = hr / 60.0 * interval_s;
            *session.heart_beats.entry(user_id.clone()).or_insert(0.0) += delta;
            if let Some(ref entity_id) = entry.entity_id {
                *session.entity_beats.entry(entity_id.clone()).or_insert(0.0) += delta;
            }

            entry.zone_id = session
                .zones
                .resolve_zone(user_id, hr)
                .map(|zone| zone.id.clone());

            payload.insert(format!("user:{user_id}:heart_rate"), Some((hr as i64).into()));
            if let Some(ref zone_id) = entry.zone_id {
                payload
                    .insert(format!("user:{user_id}:zone_id"), Some(zone_id.clone().into()));
            }
            write_metric(&mut payload, "user", user_id, "rpm", entry.rpm);
            write_metric(&mut payload, "user", user_id, "power", entry.power);
            write_metric(&mut payload, "user", user_id, "distance", entry.distance);
            if let Some(ref entity_id) = entry.entity_id {
                payload.insert(format!("entity:{entity_id}:heart_rate"), Some((hr as i64).into()));
                if let Some(ref zone_id) = entry.zone_id {
                    payload.insert(
                        format!("entity:{entity_id}:zone_id"),
                        Some(zone_id.clone().into()),
                    );
                }
                write_metric(&mut payload, "entity", entity_id, "rpm", entry.rpm);
                write_metric(&mut payload, "entity", entity_id, "power", entry.power);
                write_metric(&mut payload, "entity", entity_id, "distance", entry.distance);
            }

            active_users.insert(user_id.clone());
            let key = entry.entity_id.clone().unwrap_or_else(|| user_id.clone());
            session
                .treasure
                .record_heart_rate(&key, user_id, hr, now_ms, &session.zones);
            active_keys.insert(key);
        } else {
            // Explicit dropout hole.
            payload.insert(format!("user:{user_id}:heart_rate"), None);
        }

        // Cumulative beats are written every tick so the series stays flat
        // through dropouts instead of holing.
        if let Some(beats) = session.heart_beats.get(user_id.as_str()) {
            payload.insert(format!("user:{user_id}:heart_beats"), Some((*beats).into()));
        }
        if let Some(ref entity_id) = entry.entity_id {
            if let Some(beats) = session.entity_beats.get(entity_id) {
                payload
                    .insert(format!("entity:{entity_id}:heart_beats"), Some((*beats).into()));
            }
        }
    }

    // 5. Baseline seed: anchor race-chart series at origin the first time a
    // participant appears. The coin fan-out below overwrites it whenever an
    // accumulator already exists.
    for (user_id, entry) in &staged {
        if session.seen_participants.insert(user_id.clone()) {
            payload.insert(format!("user:{user_id}:coins_total"), Some(0.into()));
            if let Some(ref entity_id) = entry.entity_id {
                payload.insert(format!("entity:{entity_id}:coins_total"), Some(0.into()));
            }
        }
    }

    // 6. Activity must record before the treasure box closes intervals.
    session.activity.record_tick(tick_index, active_users.clone());

    // 7. Interval close + coin fan-out.
    let awards = session.treasure.process_tick(tick_index, &active_keys, now_ms);
    if !awards.is_empty() {
        events.push(SessionEvent::CoinsAwarded { awards: awards.clone() });
    }
    let totals: Vec<(String, u64)> = session
        .treasure
        .accumulators()
        .map(|(key, acc)| (key.clone(), acc.total_coins))
        .collect();
    for (key, total) in &totals {
        if key.starts_with("entity_") {
            payload.insert(format!("entity:{key}:coins_total"), Some((*total).into()));
            if let Some(entity) = session.roster.entity(key) {
                // Backward-compat dual write under the profile id.
                payload.insert(
                    format!("user:{}:coins_total", entity.profile_id),
                    Some((*total).into()),
                );
            }
        } else {
            payload.insert(format!("user:{key}:coins_total"), Some((*total).into()));
        }
    }
    for (key, total) in &totals {
        if key.starts_with("entity_") {
            session.roster.set_entity_coins(key, *total);
        }
    }
    payload.insert(
        "global:coins_total".to_owned(),
        Some(session.treasure.total_coins().into()),
    );

    // Refresh the current-metrics cache for the render layer.
    for (user_id, entry) in &staged {
        if entry.active {
            let key = entry.entity_id.as_deref().unwrap_or(user_id.as_str());
            let coins_total = session
                .treasure
                .accumulator(key)
                .map(|acc| acc.total_coins)
                .unwrap_or(0);
            session.metrics.record(
                user_id,
                crate::metrics::CurrentMetrics {
                    heart_rate: entry.hr,
                    zone_id: entry.zone_id.clone(),
                    rpm: entry.rpm,
                    power: entry.power,
                    distance: entry.distance,
                    coins_total,
                    active: true,
                    updated_at_ms: now_ms,
                },
            );
        } else {
            session.metrics.mark_inactive(user_id, now_ms);
        }
    }

    // 8. Pending snapshot ref, then commit the column.
    if let Some(reference) = session.pending_snapshot_ref.take() {
        payload.insert("global:snapshot_ref".to_owned(), Some(reference.into()));
    }
    session.timeline.tick(payload, now_ms);

    // 9. Roster snapshot into governance.
    for (user_id, entry) in &staged {
        if entry.active {
            session.live_zones.insert(user_id.clone(), entry.zone_id.clone());
        }
    }
    session.last_total_count = staged.len();
    let input = GovernanceInput {
        active: staged
            .iter()
            .filter(|(user_id, _)| active_users.contains(user_id.as_str()))
            .map(|(user_id, entry)| ParticipantState {
                user_id: user_id.clone(),
                zone_id: entry.zone_id.clone(),
            })
            .collect(),
        total_count: staged.len(),
    };
    let governance_events = session.governance.evaluate(&input, now_ms);
    log_governance_events(&mut session.timeline, &governance_events, now_ms);
    events.extend(governance_events.into_iter().map(SessionEvent::Governance));

    // Empty-roster countdown bookkeeping.
    if session.roster.users().next().is_none() && session.roster.is_ledger_empty() {
        session.roster_empty_since_ms.get_or_insert(now_ms);
    } else {
        session.roster_empty_since_ms = None;
    }

    session.tick_index += 1;
    session.last_tick_at_ms = now_ms;
    events
}

/// Mirror governance events into the timeline event log.
pub fn log_governance_events(
    timeline: &mut Timeline,
    events: &[GovernanceEvent],
    now_ms: u64,
) {
    for event in events {
        match event {
            GovernanceEvent::PhaseChanged { prev, next } => {
                timeline.log_event(
                    "governance_phase",
                    json!({
                        "prev": prev.map(|p| p.as_str()),
                        "next": next.map(|p| p.as_str()),
                    }),
                    now_ms,
                );
            }
            GovernanceEvent::MediaLocked => {
                timeline.log_event("governance_locked", Value::Null, now_ms);
            }
            GovernanceEvent::MediaUnlocked => {
                timeline.log_event("governance_unlocked", Value::Null, now_ms);
            }
            GovernanceEvent::ChallengeStarted { challenge } => {
                timeline.log_event(
                    "challenge_started",
                    json!({ "challenge_id": challenge.id, "zone": challenge.zone }),
                    now_ms,
                );
            }
            GovernanceEvent::ChallengeSucceeded { challenge }
            | GovernanceEvent::ChallengeRecovered { challenge } => {
                timeline.log_event(
                    "challenge_success",
                    json!({ "challenge_id": challenge.id, "zone": challenge.zone }),
                    now_ms,
                );
            }
            GovernanceEvent::ChallengeFailed { challenge } => {
                timeline.log_event(
                    "challenge_failed",
                    json!({ "challenge_id": challenge.id, "zone": challenge.zone }),
                    now_ms,
                );
            }
        }
    }
}

/// Write a sanitized numeric metric under `scope:id:metric`.
fn write_metric(
    payload: &mut TickPayload,
    scope: &str,
    id: &str,
    metric: &str,
    value: Option<f64>,
) {
    if let Some(value) = value.filter(|v| v.is_finite()) {
        payload.insert(format!("{scope}:{id}:{metric}"), Some(value.into()));
    }
}

#[cfg(test)]
#[path = "tick_tests.rs"]
mod tests;
