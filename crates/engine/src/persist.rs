// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session snapshot persistence: the v2 payload, its compact key mapping,
//! the run-length series encoding, and the pre-flight validation gauntlet.
//!
//! The core never talks to a transport. It builds a validated
//! [`SessionPayload`] and hands it to a [`Persister`] collaborator; failures
//! past that seam are logged and swallowed because retry is an external
//! concern.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use chrono::{Local, TimeZone};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::roster::{SessionEntity, UserRegistry, UserSource};
use crate::timeline::{Cell, Timebase, TimelineSummary};

/// Hard ceiling on total samples across all series.
const SAMPLE_CAP: usize = 200_000;

/// Zone-id alphabet used in persisted `*:zone` series.
const ZONE_SYMBOLS: &[(&str, &str)] =
    &[("cool", "c"), ("active", "a"), ("warm", "w"), ("hot", "h")];

/// Metrics rounded to one decimal in persisted series.
const ONE_DECIMAL_METRICS: &[&str] = &["beats", "rotations", "heart_beats"];

/// Metrics rounded to integers in persisted series.
const INTEGER_METRICS: &[&str] = &["hr", "rpm", "power", "heart_rate"];

/// A structured validation rejection. Logged, never thrown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistRejection {
    pub reason: String,
    pub detail: String,
}

impl PersistRejection {
    fn new(reason: &str, detail: impl Into<String>) -> Self {
        Self { reason: reason.to_owned(), detail: detail.into() }
    }
}

/// The `session` block of the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBlock {
    pub id: String,
    /// Local calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub start: u64,
    pub end: u64,
    pub duration_seconds: u64,
}

/// One participant row in the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParticipantBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_primary: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_guest: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_user: Option<String>,
}

/// One persisted event row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadEvent {
    pub at: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// The `timeline` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineBlock {
    pub interval_seconds: u64,
    pub tick_count: usize,
    /// Always `"rle"`.
    pub encoding: String,
    pub timebase: Timebase,
    /// Mapped key → RLE-encoded JSON string.
    pub series: IndexMap<String, String>,
    pub events: Vec<PayloadEvent>,
}

/// The stable v2 persistence payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    pub version: u32,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub timezone: String,
    pub session: SessionBlock,
    pub participants: IndexMap<String, ParticipantBlock>,
    pub entities: Vec<SessionEntity>,
    pub timeline: TimelineBlock,
}

/// Everything the builder needs from the session.
pub struct SnapshotInput<'a> {
    pub session_id: &'a str,
    pub start_ms: u64,
    pub end_ms: u64,
    pub roster: &'a UserRegistry,
    pub timeline: TimelineSummary,
    pub voice_memo_count: u32,
}

/// Build and validate the v2 payload. On rejection the caller logs the
/// structured record and skips the transport call.
pub fn build_payload(input: SnapshotInput<'_>) -> Result<SessionPayload, PersistRejection> {
    let start_ms = input.start_ms;
    // End must land after start; clamp pathological clocks.
    let end_ms = if input.end_ms > start_ms { input.end_ms } else { start_ms + 1 };
    let duration_ms = end_ms - start_ms;
    let timebase = input.timeline.timebase;

    let has_user_series = input.timeline.series.keys().any(|k| k.starts_with("user:"));
    let roster_count = input.roster.users().count();
    let assignment_count = input.roster.ledger().count();

    if has_user_series && (roster_count == 0 || assignment_count == 0) {
        return Err(PersistRejection::new(
            "roster-missing",
            "user series present but roster or assignments are empty",
        ));
    }

    // Spam guard: a near-empty blip of a session is not worth a write.
    let no_content = !has_user_series
        && input.voice_memo_count == 0
        && input.timeline.events.is_empty();
    if duration_ms < 10_000 && no_content && (roster_count == 0 || duration_ms < 1_000) {
        return Err(PersistRejection::new(
            "spam-guard",
            format!("duration {duration_ms}ms with no content"),
        ));
    }

    if timebase.tick_count < 3 {
        return Err(PersistRejection::new(
            "insufficient-ticks",
            format!("tick_count {} below minimum 3", timebase.tick_count),
        ));
    }

    let mut total_samples = 0usize;
    for (key, column) in &input.timeline.series {
        if column.len() != timebase.tick_count {
            return Err(PersistRejection::new(
                "series-tick-mismatch",
                format!("{key}: {} samples, expected {}", column.len(), timebase.tick_count),
            ));
        }
        total_samples += column.len();
    }
    if total_samples > SAMPLE_CAP {
        return Err(PersistRejection::new(
            "series-size-cap",
            format!("{total_samples} samples exceed cap {SAMPLE_CAP}"),
        ));
    }

    let mut series = IndexMap::new();
    for (key, column) in &input.timeline.series {
        if column.iter().all(Option::is_none) {
            continue;
        }
        let mapped = map_series_key(key);
        let metric = mapped.rsplit(':').next().unwrap_or(&mapped).to_owned();
        let prepared: Vec<Cell> =
            column.iter().map(|cell| prepare_cell(cell.as_ref(), &metric)).collect();
        series.insert(mapped, rle_encode(&prepared));
    }

    let events = dedup_events(&input.timeline.events, start_ms, timebase.interval_ms);

    let participants = build_participants(input.roster);
    let entities: Vec<SessionEntity> = input.roster.entities().cloned().collect();

    let date = Local
        .timestamp_millis_opt(start_ms as i64)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    Ok(SessionPayload {
        version: 2,
        session_id: input.session_id.to_owned(),
        timezone: Local::now().format("%:z").to_string(),
        session: SessionBlock {
            id: input.session_id.to_owned(),
            date,
            start: start_ms,
            end: end_ms,
            duration_seconds: duration_ms / 1000,
        },
        participants,
        entities,
        timeline: TimelineBlock {
            interval_seconds: timebase.interval_ms / 1000,
            tick_count: timebase.tick_count,
            encoding: "rle".to_owned(),
            timebase,
            series,
            events,
        },
    })
}

fn build_participants(roster: &UserRegistry) -> IndexMap<String, ParticipantBlock> {
    let mut participants = IndexMap::new();
    for user in roster.users() {
        participants.insert(
            user.id.clone(),
            ParticipantBlock {
                display_name: Some(user.display_name.clone()),
                hr_device: user.hr_device_id.clone(),
                is_primary: (user.source == UserSource::Roster).then_some(true),
                is_guest: (user.source == UserSource::Guest).then_some(true),
                base_user: None,
            },
        );
    }
    // Ledger rows may carry guests standing in for roster users.
    for entry in roster.ledger() {
        let block = participants.entry(entry.occupant_id.clone()).or_default();
        if block.display_name.is_none() {
            block.display_name = Some(entry.occupant_name.clone());
        }
        if block.hr_device.is_none() {
            block.hr_device = Some(entry.device_id.clone());
        }
        if let Some(ref base) = entry.base_user_name {
            block.base_user = Some(base.clone());
        }
    }
    participants
}

/// Apply the compact series-key mapping used only at persistence.
pub fn map_series_key(key: &str) -> String {
    let parts: Vec<&str> = key.splitn(3, ':').collect();
    let [scope, id, metric] = parts[..] else {
        return key.to_owned();
    };
    match scope {
        "user" => match metric {
            "heart_rate" => format!("{id}:hr"),
            "zone_id" => format!("{id}:zone"),
            "heart_beats" => format!("{id}:beats"),
            "coins_total" => format!("{id}:coins"),
            _ => key.to_owned(),
        },
        "device" => {
            let id = id.strip_prefix("device_").unwrap_or(id);
            match metric {
                "rpm" | "rotations" | "power" | "distance" => format!("bike:{id}:{metric}"),
                _ => format!("device:{id}:{metric}"),
            }
        }
        _ => key.to_owned(),
    }
}

/// Round and symbol-map one cell for its persisted metric name.
fn prepare_cell(cell: Option<&Value>, metric: &str) -> Cell {
    let value = cell?;
    if metric == "zone" || metric == "zone_id" {
        if let Some(zone) = value.as_str() {
            let symbol = ZONE_SYMBOLS
                .iter()
                .find(|(name, _)| *name == zone)
                .map(|(_, s)| *s)
                .unwrap_or(zone);
            return Some(Value::from(symbol));
        }
        return Some(value.clone());
    }
    let Some(number) = value.as_f64() else {
        return Some(value.clone());
    };
    if ONE_DECIMAL_METRICS.contains(&metric) {
        Some(Value::from((number * 10.0).round() / 10.0))
    } else if INTEGER_METRICS.contains(&metric) {
        Some(Value::from(number.round() as i64))
    } else {
        Some(value.clone())
    }
}

/// De-duplicate challenge events by `(type, tick index, challenge id)`.
fn dedup_events(
    events: &[crate::timeline::TimelineEvent],
    start_ms: u64,
    interval_ms: u64,
) -> Vec<PayloadEvent> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for event in events {
        if event.kind.starts_with("challenge") {
            let tick_index = event.at.saturating_sub(start_ms) / interval_ms.max(1);
            let challenge_id = event
                .data
                .get("challenge_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let fingerprint = (event.kind.clone(), tick_index, challenge_id);
            if seen.contains(&fingerprint) {
                continue;
            }
            seen.push(fingerprint);
        }
        out.push(PayloadEvent { at: event.at, kind: event.kind.clone(), data: event.data.clone() });
    }
    out
}

// -- Run-length encoding ------------------------------------------------------

/// Encode a column: a scalar stands for one sample, `[value, count]` for a
/// repeat run. Returns the JSON string form stored in the payload.
pub fn rle_encode(column: &[Cell]) -> String {
    let mut encoded: Vec<Value> = Vec::new();
    let mut index = 0;
    while index < column.len() {
        let value = column[index].clone().unwrap_or(Value::Null);
        let mut count: u64 = 1;
        while column
            .get(index + count as usize)
            .is_some_and(|next| next.as_ref().unwrap_or(&Value::Null) == &value)
        {
            count += 1;
        }
        index += count as usize;
        if count > 1 {
            encoded.push(json!([value, count]));
        } else {
            encoded.push(value);
        }
    }
    serde_json::to_string(&encoded).unwrap_or_else(|_| "[]".to_owned())
}

/// Decode an RLE string back into a dense column.
pub fn rle_decode(encoded: &str) -> Result<Vec<Cell>, serde_json::Error> {
    let values: Vec<Value> = serde_json::from_str(encoded)?;
    let mut column = Vec::new();
    for value in values {
        match value {
            Value::Array(ref run) if run.len() == 2 && run[1].is_u64() => {
                let count = run[1].as_u64().unwrap_or(0);
                let cell = (!run[0].is_null()).then(|| run[0].clone());
                for _ in 0..count {
                    column.push(cell.clone());
                }
            }
            Value::Null => column.push(None),
            other => column.push(Some(other)),
        }
    }
    Ok(column)
}

// -- Persister seam -----------------------------------------------------------

/// Future type returned by [`Persister::persist`].
pub type PersistFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// The transport seam. The engine validates and hands off; delivery,
/// retries, and storage are the host's business.
pub trait Persister: Send + Sync {
    fn persist(&self, payload: SessionPayload) -> PersistFuture;
}

/// Discards payloads. Default when the host wires no transport.
#[derive(Debug, Default)]
pub struct NullPersister;

impl Persister for NullPersister {
    fn persist(&self, _payload: SessionPayload) -> PersistFuture {
        Box::pin(async { Ok(()) })
    }
}

/// Writes each snapshot as pretty JSON into a sessions directory.
#[derive(Debug, Clone)]
pub struct FilePersister {
    dir: PathBuf,
}

impl FilePersister {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl Persister for FilePersister {
    fn persist(&self, payload: SessionPayload) -> PersistFuture {
        let path = self.dir.join(format!("{}.json", payload.session_id));
        let body = serde_json::to_vec_pretty(&payload);
        let dir = self.dir.clone();
        Box::pin(async move {
            let body = body?;
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, body).await?;
            Ok(())
        })
    }
}

/// Log a structured rejection record; persistence is not attempted.
pub fn log_rejection(rejection: &PersistRejection) {
    warn!(
        code = "PERSIST_VALIDATION_FAIL",
        reason = %rejection.reason,
        detail = %rejection.detail,
        "session snapshot rejected"
    );
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
