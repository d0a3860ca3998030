// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Zone-coin accumulator.
//!
//! Each participant accrues one award per closed coin interval, valued by
//! the **highest** zone they touched inside that interval (zone-ceiling
//! semantics: a push is rewarded without sub-tick sampling). Awards are
//! gated on tick activity — a participant absent from the tick's active set
//! loses the interval's ceiling instead of banking it.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::zones::{ZoneDefinition, ZoneProfileStore};

/// Color label recorded when a participant has no resolvable zone.
pub const NO_ZONE: &str = "No Zone";

/// Default width of one coin interval.
pub const DEFAULT_COIN_TIME_UNIT_MS: u64 = 5_000;

/// Per-participant interval state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accumulator {
    pub interval_start_ms: u64,
    /// The highest zone reached inside the current interval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_zone: Option<ZoneDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hr: Option<f64>,
    pub total_coins: u64,
}

impl Accumulator {
    fn new(now_ms: u64) -> Self {
        Self {
            interval_start_ms: now_ms,
            highest_zone: None,
            current_color: None,
            last_color: None,
            last_zone_id: None,
            last_hr: None,
            total_coins: 0,
        }
    }
}

/// One award produced by `process_tick`, for event fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinAward {
    pub key: String,
    pub coins: u64,
    pub color: String,
    pub zone_id: String,
    pub total: u64,
}

/// Cumulative award timeline, one slot per coin interval since session start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CumulativeTimeline {
    pub per_color: IndexMap<String, Vec<u64>>,
    pub cumulative: Vec<u64>,
}

/// Read-model summary of the box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasureSummary {
    pub per_user_totals: IndexMap<String, u64>,
    pub color_totals: IndexMap<String, u64>,
    pub timeline: CumulativeTimeline,
    pub total_coins: u64,
}

/// The zone-coin accumulator for one session.
#[derive(Debug)]
pub struct TreasureBox {
    accumulators: IndexMap<String, Accumulator>,
    color_totals: IndexMap<String, u64>,
    timeline: CumulativeTimeline,
    coin_time_unit_ms: u64,
    session_start_ms: u64,
}

impl Default for TreasureBox {
    fn default() -> Self {
        Self::new(DEFAULT_COIN_TIME_UNIT_MS)
    }
}

impl TreasureBox {
    pub fn new(coin_time_unit_ms: u64) -> Self {
        Self {
            accumulators: IndexMap::new(),
            color_totals: IndexMap::new(),
            timeline: CumulativeTimeline::default(),
            coin_time_unit_ms: coin_time_unit_ms.max(1),
            session_start_ms: 0,
        }
    }

    /// Clear all state for a fresh session starting at `start_ms`.
    pub fn reset(&mut self, start_ms: u64) {
        self.accumulators.clear();
        self.color_totals.clear();
        self.timeline = CumulativeTimeline::default();
        self.session_start_ms = start_ms;
    }

    /// Record one heart-rate sample for an accumulator key.
    ///
    /// `zone_user_id` is the identity used for per-user threshold overrides
    /// (the profile id, even when the accumulator is keyed by entity).
    pub fn record_heart_rate(
        &mut self,
        key: &str,
        zone_user_id: &str,
        hr: f64,
        now_ms: u64,
        zones: &ZoneProfileStore,
    ) {
        let acc = self
            .accumulators
            .entry(key.to_owned())
            .or_insert_with(|| Accumulator::new(now_ms));

        if hr <= 0.0 || hr.is_nan() {
            acc.interval_start_ms = now_ms;
            acc.highest_zone = None;
            acc.current_color = None;
            acc.last_color = Some(NO_ZONE.to_owned());
            acc.last_zone_id = None;
            acc.last_hr = Some(0.0);
            return;
        }

        acc.last_hr = Some(hr);
        let Some(zone) = zones.resolve_zone(zone_user_id, hr) else {
            acc.last_color = Some(NO_ZONE.to_owned());
            acc.last_zone_id = None;
            acc.current_color = None;
            return;
        };
        acc.current_color = Some(zone.color.clone());
        acc.last_color = Some(zone.color.clone());
        acc.last_zone_id = Some(zone.id.clone());
        // Zone ceiling: only raise, never lower, within an interval.
        let raise = acc
            .highest_zone
            .as_ref()
            .is_none_or(|highest| zone.min > highest.min);
        if raise {
            acc.highest_zone = Some(zone.clone());
        }
    }

    /// Close out coin intervals for every tracked accumulator. Called
    /// exactly once per session tick.
    ///
    /// An accumulator absent from `active` loses its interval ceiling and
    /// earns nothing this tick. One present long enough for the interval to
    /// have elapsed is awarded its ceiling's coin value, then the interval
    /// window rolls.
    pub fn process_tick(
        &mut self,
        _tick_index: u64,
        active: &HashSet<String>,
        now_ms: u64,
    ) -> Vec<CoinAward> {
        let mut awards = Vec::new();
        let interval_index =
            (now_ms.saturating_sub(self.session_start_ms) / self.coin_time_unit_ms) as usize;

        for (key, acc) in &mut self.accumulators {
            if !active.contains(key) {
                acc.highest_zone = None;
                acc.current_color = None;
                continue;
            }
            if now_ms.saturating_sub(acc.interval_start_ms) < self.coin_time_unit_ms {
                continue;
            }
            if let Some(zone) = acc.highest_zone.take() {
                if zone.coins > 0 {
                    acc.total_coins += zone.coins;
                    *self.color_totals.entry(zone.color.clone()).or_insert(0) += zone.coins;
                    extend_forward(&mut self.timeline.cumulative, interval_index, zone.coins);
                    let color_series = self
                        .timeline
                        .per_color
                        .entry(zone.color.clone())
                        .or_default();
                    extend_forward(color_series, interval_index, zone.coins);
                    debug!(key = %key, coins = zone.coins, zone = %zone.id, "coins awarded");
                    awards.push(CoinAward {
                        key: key.clone(),
                        coins: zone.coins,
                        color: zone.color,
                        zone_id: zone.id,
                        total: acc.total_coins,
                    });
                }
            }
            acc.interval_start_ms = now_ms;
            acc.current_color = None;
        }
        awards
    }

    /// Destructively move one accumulator (and its coin total) onto another
    /// key, summing totals when the destination already exists.
    pub fn transfer_accumulator(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        let Some(source) = self.accumulators.shift_remove(from) else {
            return;
        };
        match self.accumulators.get_mut(to) {
            Some(dest) => {
                dest.total_coins += source.total_coins;
                // The in-flight interval state follows the source: the new
                // identity inherits the running ceiling.
                dest.interval_start_ms = source.interval_start_ms;
                if dest.highest_zone.is_none() {
                    dest.highest_zone = source.highest_zone;
                }
                if dest.last_zone_id.is_none() {
                    dest.last_zone_id = source.last_zone_id;
                    dest.last_color = source.last_color;
                    dest.last_hr = source.last_hr;
                }
            }
            None => {
                self.accumulators.insert(to.to_owned(), source);
            }
        }
    }

    // -- Read accessors -------------------------------------------------------

    pub fn accumulator(&self, key: &str) -> Option<&Accumulator> {
        self.accumulators.get(key)
    }

    pub fn accumulators(&self) -> impl Iterator<Item = (&String, &Accumulator)> {
        self.accumulators.iter()
    }

    pub fn per_user_totals(&self) -> IndexMap<String, u64> {
        self.accumulators
            .iter()
            .map(|(key, acc)| (key.clone(), acc.total_coins))
            .collect()
    }

    pub fn cumulative_timeline(&self) -> &CumulativeTimeline {
        &self.timeline
    }

    pub fn coin_time_unit_ms(&self) -> u64 {
        self.coin_time_unit_ms
    }

    pub fn total_coins(&self) -> u64 {
        self.accumulators.values().map(|a| a.total_coins).sum()
    }

    pub fn summary(&self) -> TreasureSummary {
        TreasureSummary {
            per_user_totals: self.per_user_totals(),
            color_totals: self.color_totals.clone(),
            timeline: self.timeline.clone(),
            total_coins: self.total_coins(),
        }
    }
}

/// Extend a cumulative series through `index`, carrying the last value
/// forward, then add `delta` at `index`.
fn extend_forward(series: &mut Vec<u64>, index: usize, delta: u64) {
    let carry = series.last().copied().unwrap_or(0);
    while series.len() <= index {
        series.push(carry);
    }
    series[index] += delta;
}

#[cfg(test)]
#[path = "treasure_tests.rs"]
mod tests;
