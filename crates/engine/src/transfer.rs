// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Grace-period state transfer between identities.
//!
//! When a device changes hands inside the grace window, the previous
//! occupant's accumulated state migrates to the new identity across four
//! planes: the coin accumulator, the timeline series, the activity history,
//! and the cumulative counters. All four move in one synchronous pass on the
//! session actor, so the transfer is never partially observable.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::activity::ActivityMonitor;
use crate::timeline::Timeline;
use crate::treasure::TreasureBox;

/// Identities involved in one transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub device_id: String,
    pub from_user: String,
    pub to_user: String,
    pub from_entity: Option<String>,
    pub to_entity: Option<String>,
}

/// Mutable views over the four state planes, borrowed from the session.
pub struct TransferPlanes<'a> {
    pub treasure: &'a mut TreasureBox,
    pub timeline: &'a mut Timeline,
    pub activity: &'a mut ActivityMonitor,
    pub heart_beats: &'a mut HashMap<String, f64>,
    pub entity_beats: &'a mut HashMap<String, f64>,
    pub transferred_users: &'a mut HashSet<String>,
}

/// What moved, for event fan-out and logging.
#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub coins_moved: u64,
    pub beats_moved: f64,
}

/// Apply a grace-period transfer to every state plane.
pub fn execute(request: &TransferRequest, planes: TransferPlanes<'_>) -> TransferSummary {
    let coins_moved = accumulator_total(planes.treasure, request);
    let beats_moved =
        planes.heart_beats.get(&request.from_user).copied().unwrap_or(0.0);

    // Coin accumulators: entity-keyed when the assignment minted entities,
    // user-keyed otherwise. Both move.
    if let (Some(from), Some(to)) = (&request.from_entity, &request.to_entity) {
        planes.treasure.transfer_accumulator(from, to);
    }
    planes.treasure.transfer_accumulator(&request.from_user, &request.to_user);

    // Timeline columns merge index-wise (sums for cumulative metrics).
    planes.timeline.transfer_user_series(&request.from_user, &request.to_user);
    if let (Some(from), Some(to)) = (&request.from_entity, &request.to_entity) {
        planes.timeline.transfer_entity_series(from, to);
    }

    // Activity history follows so the new identity is not marked as a
    // dropout on the next tick.
    planes.activity.transfer_activity(&request.from_user, &request.to_user);

    // Cumulative counters carry over, summing with anything the new
    // identity already accrued.
    move_summed(planes.heart_beats, &request.from_user, &request.to_user);
    if let (Some(from), Some(to)) = (&request.from_entity, &request.to_entity) {
        move_summed(planes.entity_beats, from, to);
    }

    planes.transferred_users.insert(request.from_user.clone());

    info!(
        code = "GRACE_PERIOD_TRANSFER",
        device = %request.device_id,
        from = %request.from_user,
        to = %request.to_user,
        coins = coins_moved,
        "grace-period transfer applied"
    );
    TransferSummary { coins_moved, beats_moved }
}

fn accumulator_total(treasure: &TreasureBox, request: &TransferRequest) -> u64 {
    let entity_total = request
        .from_entity
        .as_deref()
        .and_then(|key| treasure.accumulator(key))
        .map(|acc| acc.total_coins)
        .unwrap_or(0);
    let user_total = treasure
        .accumulator(&request.from_user)
        .map(|acc| acc.total_coins)
        .unwrap_or(0);
    entity_total + user_total
}

fn move_summed(map: &mut HashMap<String, f64>, from: &str, to: &str) {
    if from == to {
        return;
    }
    if let Some(value) = map.remove(from) {
        *map.entry(to.to_owned()).or_insert(0.0) += value;
    }
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;
