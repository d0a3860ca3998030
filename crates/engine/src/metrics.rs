// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-user current-metrics cache.
//!
//! The tick pipeline records each staged participant's latest readings here
//! so the render layer can show "now" values without walking timeline
//! columns. Cleared on session reset.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Latest readings for one participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    pub coins_total: u64,
    /// Whether the participant produced fresh valid HR on the last tick.
    pub active: bool,
    pub updated_at_ms: u64,
}

/// Session-scoped cache of per-user current metrics.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    users: IndexMap<String, CurrentMetrics>,
}

impl MetricsRecorder {
    /// Record one participant's readings for the tick that just ran.
    pub fn record(&mut self, user_id: &str, metrics: CurrentMetrics) {
        self.users.insert(user_id.to_owned(), metrics);
    }

    /// Mark a participant inactive without discarding their last readings.
    pub fn mark_inactive(&mut self, user_id: &str, now_ms: u64) {
        if let Some(current) = self.users.get_mut(user_id) {
            current.active = false;
            current.heart_rate = None;
            current.updated_at_ms = now_ms;
        }
    }

    pub fn current(&self, user_id: &str) -> Option<&CurrentMetrics> {
        self.users.get(user_id)
    }

    pub fn all(&self) -> impl Iterator<Item = (&String, &CurrentMetrics)> {
        self.users.iter()
    }

    /// Every participant that has ever been recorded this session.
    pub fn user_ids(&self) -> impl Iterator<Item = &String> {
        self.users.keys()
    }

    /// Migrate cached metrics onto a new identity (device handoff).
    pub fn transfer(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if let Some(metrics) = self.users.shift_remove(from) {
            self.users.insert(to.to_owned(), metrics);
        }
    }

    pub fn reset(&mut self) {
        self.users.clear();
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
