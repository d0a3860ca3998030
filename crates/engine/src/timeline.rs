// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dense tick-indexed series store.
//!
//! Every series is a column keyed `scope:id:metric` whose length always
//! equals the tick count — absent readings are stored as explicit holes, not
//! skipped. This keeps downstream consumers (charts, persistence) free of
//! per-series length bookkeeping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Metrics whose values accumulate; merged by summation on series transfer.
pub const CUMULATIVE_METRICS: &[&str] = &["heart_beats", "coins_total", "rotations"];

/// One cell of a column: `None` is an explicit hole.
pub type Cell = Option<Value>;

/// The per-tick write set: key → value (or an explicit null).
pub type TickPayload = IndexMap<String, Cell>;

/// Timebase snapshot included in every summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timebase {
    #[serde(rename = "startTime")]
    pub start_ms: u64,
    #[serde(rename = "intervalMs")]
    pub interval_ms: u64,
    #[serde(rename = "tickCount")]
    pub tick_count: usize,
    #[serde(rename = "lastTickTimestamp")]
    pub last_tick_ms: u64,
}

/// A logged point-in-time event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub at: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// Full read-model snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub series: IndexMap<String, Vec<Cell>>,
    pub events: Vec<TimelineEvent>,
    pub timebase: Timebase,
}

/// Dense columnar store keyed by `scope:id:metric`.
#[derive(Debug)]
pub struct Timeline {
    series: IndexMap<String, Vec<Cell>>,
    events: Vec<TimelineEvent>,
    start_ms: u64,
    interval_ms: u64,
    tick_count: usize,
    last_tick_ms: u64,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(0, 5_000)
    }
}

impl Timeline {
    pub fn new(start_ms: u64, interval_ms: u64) -> Self {
        Self {
            series: IndexMap::new(),
            events: Vec::new(),
            start_ms,
            interval_ms,
            tick_count: 0,
            last_tick_ms: start_ms,
        }
    }

    /// Drop all series and events and rebase on a new start time.
    pub fn reset(&mut self, start_ms: u64) {
        self.series.clear();
        self.events.clear();
        self.start_ms = start_ms;
        self.last_tick_ms = start_ms;
        self.tick_count = 0;
    }

    pub fn set_interval_ms(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms.max(1);
    }

    /// Append one tick column.
    ///
    /// Keys failing the strict `scope:id:metric` shape are stripped and
    /// logged; the tick still commits. An explicit null is meaningful only
    /// for `*:heart_rate` keys (a dropout hole); for any other key it is
    /// dropped silently. Every previously-seen series is padded so its
    /// length equals the new tick count.
    pub fn tick(&mut self, payload: TickPayload, timestamp_ms: u64) {
        self.tick_count += 1;
        self.last_tick_ms = timestamp_ms;
        let index = self.tick_count - 1;

        for (key, cell) in payload {
            if !valid_series_key(&key) {
                warn!(code = "TIMELINE_TICK_INVALID_KEY", key = %key, "dropping invalid series key");
                continue;
            }
            if cell.is_none() && !key.ends_with(":heart_rate") {
                continue;
            }
            let column = self.series.entry(key).or_default();
            pad_to(column, index);
            column.push(cell);
        }

        // Columns not written this tick still advance by one hole.
        for column in self.series.values_mut() {
            pad_to(column, self.tick_count);
        }
    }

    /// Record a point-in-time event.
    pub fn log_event(&mut self, kind: impl Into<String>, data: Value, timestamp_ms: u64) {
        self.events.push(TimelineEvent { at: timestamp_ms, kind: kind.into(), data });
    }

    // -- Read APIs ------------------------------------------------------------

    pub fn get_series(&self, key: &str) -> Option<&[Cell]> {
        self.series.get(key).map(Vec::as_slice)
    }

    pub fn get_entity_series(&self, entity_id: &str, metric: &str) -> Option<&[Cell]> {
        self.get_series(&format!("entity:{entity_id}:{metric}"))
    }

    /// Every user id that has ever contributed a series.
    pub fn all_participant_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for key in self.series.keys() {
            let mut parts = key.splitn(3, ':');
            if parts.next() == Some("user") {
                if let Some(id) = parts.next() {
                    if !ids.iter().any(|existing: &String| existing == id) {
                        ids.push(id.to_owned());
                    }
                }
            }
        }
        ids
    }

    pub fn timebase(&self) -> Timebase {
        Timebase {
            start_ms: self.start_ms,
            interval_ms: self.interval_ms,
            tick_count: self.tick_count,
            last_tick_ms: self.last_tick_ms,
        }
    }

    pub fn tick_count(&self) -> usize {
        self.tick_count
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn summary(&self) -> TimelineSummary {
        TimelineSummary {
            series: self.series.clone(),
            events: self.events.clone(),
            timebase: self.timebase(),
        }
    }

    // -- Series transfer ------------------------------------------------------

    /// Move every `user:<from>:*` series onto `user:<to>:*`.
    ///
    /// When the destination already holds data the columns merge index-wise:
    /// prefer the non-null cell, and sum both when the metric is cumulative.
    /// A repeated call is a no-op — the source is already empty.
    pub fn transfer_user_series(&mut self, from: &str, to: &str) {
        self.transfer_scope_series("user", from, to);
    }

    /// Entity-scoped variant of [`Timeline::transfer_user_series`].
    pub fn transfer_entity_series(&mut self, from: &str, to: &str) {
        self.transfer_scope_series("entity", from, to);
    }

    fn transfer_scope_series(&mut self, scope: &str, from: &str, to: &str) {
        if from == to {
            return;
        }
        let prefix = format!("{scope}:{from}:");
        let moved: Vec<String> =
            self.series.keys().filter(|k| k.starts_with(&prefix)).cloned().collect();
        for key in moved {
            let Some(column) = self.series.shift_remove(&key) else {
                continue;
            };
            let metric = key.rsplitn(2, ':').next().unwrap_or_default().to_owned();
            let dest_key = format!("{scope}:{to}:{metric}");
            let cumulative = CUMULATIVE_METRICS.contains(&metric.as_str());
            match self.series.get_mut(&dest_key) {
                Some(dest) => merge_columns(dest, column, cumulative),
                None => {
                    self.series.insert(dest_key, column);
                }
            }
        }
    }

    /// Check that every series length matches the timebase tick count.
    pub fn validate_series_lengths(
        timebase: &Timebase,
        series: &IndexMap<String, Vec<Cell>>,
    ) -> Result<(), String> {
        for (key, column) in series {
            if column.len() != timebase.tick_count {
                return Err(format!(
                    "series {key} has {} samples, expected {}",
                    column.len(),
                    timebase.tick_count
                ));
            }
        }
        Ok(())
    }
}

/// Strict key shape: three non-empty `[A-Za-z0-9_]` segments.
pub fn valid_series_key(key: &str) -> bool {
    let mut segments = 0;
    for segment in key.split(':') {
        segments += 1;
        if segments > 3
            || segment.is_empty()
            || !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return false;
        }
    }
    segments == 3
}

fn pad_to(column: &mut Vec<Cell>, len: usize) {
    while column.len() < len {
        column.push(None);
    }
}

fn merge_columns(dest: &mut Vec<Cell>, source: Vec<Cell>, cumulative: bool) {
    if source.len() > dest.len() {
        pad_to(dest, source.len());
    }
    for (index, cell) in source.into_iter().enumerate() {
        let Some(value) = cell else { continue };
        let slot = &mut dest[index];
        *slot = match slot.take() {
            None => Some(value),
            Some(existing) => {
                if cumulative {
                    match (existing.as_f64(), value.as_f64()) {
                        (Some(a), Some(b)) => Some(Value::from(a + b)),
                        _ => Some(existing),
                    }
                } else {
                    Some(existing)
                }
            }
        };
    }
}

#[cfg(test)]
#[path = "timeline_tests.rs"]
mod tests;
