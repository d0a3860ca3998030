// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-tick activity tracking.
//!
//! The monitor is driven by the session tick — it does not own time. Each
//! `record_tick` replaces the "current" active set and shifts the prior one
//! into "previous". Dropout detection ("was active last tick, not this
//! tick") must read [`ActivityMonitor::previous_tick_active`] and never the
//! set being composed for the in-progress tick.

use std::collections::{HashMap, HashSet};

/// Tracks which participants produced a fresh valid heart-rate sample on
/// each completed session tick.
#[derive(Debug, Default)]
pub struct ActivityMonitor {
    tick_interval_ms: u64,
    idle_threshold_ticks: u64,
    remove_threshold_ticks: u64,
    /// Set recorded by the most recent completed `record_tick`.
    current: HashSet<String>,
    /// Set recorded by the tick before that.
    previous: HashSet<String>,
    last_tick_index: Option<u64>,
    started_at_ms: u64,
    /// Per-participant count of ticks spent active (session history).
    active_tick_counts: HashMap<String, u64>,
    /// Per-participant index of the last tick they were active on.
    last_active_tick: HashMap<String, u64>,
}

impl ActivityMonitor {
    pub fn configure(
        &mut self,
        tick_interval_ms: u64,
        idle_threshold_ticks: u64,
        remove_threshold_ticks: u64,
    ) {
        self.tick_interval_ms = tick_interval_ms;
        self.idle_threshold_ticks = idle_threshold_ticks;
        self.remove_threshold_ticks = remove_threshold_ticks;
    }

    /// Record the active set for a completed tick.
    pub fn record_tick(&mut self, tick_index: u64, active: HashSet<String>) {
        self.previous = std::mem::replace(&mut self.current, active);
        self.last_tick_index = Some(tick_index);
        for id in &self.current {
            *self.active_tick_counts.entry(id.clone()).or_insert(0) += 1;
            self.last_active_tick.insert(id.clone(), tick_index);
        }
    }

    /// Whether the participant was active on the most recent completed tick.
    pub fn is_active(&self, id: &str) -> bool {
        self.current.contains(id)
    }

    /// The active set from the most recent completed tick.
    pub fn previous_tick_active(&self) -> &HashSet<String> {
        &self.current
    }

    /// The active set from the tick before the most recent one.
    pub fn two_ticks_back(&self) -> &HashSet<String> {
        &self.previous
    }

    /// Participants active last tick but absent from `composing` — the
    /// dropout set for the tick currently being assembled.
    pub fn dropouts<'a>(&'a self, composing: &HashSet<String>) -> Vec<&'a str> {
        self.current
            .iter()
            .filter(|id| !composing.contains(*id))
            .map(String::as_str)
            .collect()
    }

    /// Whether the participant has been idle for at least the configured
    /// idle threshold, measured in ticks since their last active tick.
    pub fn idle_for_threshold(&self, id: &str) -> bool {
        let Some(now) = self.last_tick_index else {
            return false;
        };
        match self.last_active_tick.get(id) {
            Some(last) => now.saturating_sub(*last) >= self.idle_threshold_ticks,
            None => true,
        }
    }

    /// Whether the participant has been gone long enough to drop from the
    /// roster view entirely.
    pub fn removal_due(&self, id: &str) -> bool {
        let Some(now) = self.last_tick_index else {
            return false;
        };
        match self.last_active_tick.get(id) {
            Some(last) => now.saturating_sub(*last) >= self.remove_threshold_ticks,
            None => true,
        }
    }

    /// Number of ticks the participant has spent active this session.
    pub fn active_ticks(&self, id: &str) -> u64 {
        self.active_tick_counts.get(id).copied().unwrap_or(0)
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    /// Migrate one participant's activity history onto another identity.
    ///
    /// Membership in the current/previous sets moves with the history so a
    /// transfer mid-tick does not register as a dropout for the new identity.
    pub fn transfer_activity(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if self.current.remove(from) {
            self.current.insert(to.to_owned());
        }
        if self.previous.remove(from) {
            self.previous.insert(to.to_owned());
        }
        if let Some(count) = self.active_tick_counts.remove(from) {
            *self.active_tick_counts.entry(to.to_owned()).or_insert(0) += count;
        }
        if let Some(tick) = self.last_active_tick.remove(from) {
            let entry = self.last_active_tick.entry(to.to_owned()).or_insert(tick);
            *entry = (*entry).max(tick);
        }
    }

    /// Clear all history for a fresh session.
    pub fn reset(&mut self, start_ms: u64) {
        self.current.clear();
        self.previous.clear();
        self.active_tick_counts.clear();
        self.last_active_tick.clear();
        self.last_tick_index = None;
        self.started_at_ms = start_ms;
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
