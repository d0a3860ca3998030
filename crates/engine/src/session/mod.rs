// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session orchestrator: lifecycle, pre-session buffering, and the external
//! method surface. The per-tick pipeline lives in [`tick`], the tokio actor
//! in [`run`].
//!
//! All state here is plain data mutated through `&mut self` with explicit
//! timestamps; only the actor owns a clock. That keeps every lifecycle edge
//! deterministic under test.

use std::collections::{HashMap, HashSet};

use chrono::{Local, TimeZone};
use serde_json::json;
use tracing::{debug, info};

use crate::activity::ActivityMonitor;
use crate::config::SessionTuning;
use crate::device::DeviceRegistry;
use crate::error::EngineError;
use crate::event::SessionEvent;
use crate::frame::RawFrame;
use crate::governance::{GovernanceConfig, GovernanceEngine, MediaItem, Selection};
use crate::metrics::MetricsRecorder;
use crate::persist::{self, PersistRejection, SessionPayload, SnapshotInput};
use crate::roster::{
    DeviceAssignment, EntityStatus, GuestAssignment, RosterEntry, UserRegistry,
};
use crate::timeline::Timeline;
use crate::transfer::{self, TransferPlanes, TransferRequest};
use crate::treasure::TreasureBox;
use crate::zones::{ZoneConfig, ZoneProfileStore};

pub mod run;
pub mod tick;

pub use run::{SessionActor, SessionChannels, SessionCommand, SessionHandle};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    /// Pre-session buffer is filling.
    Starting,
    Active,
    Ended,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Inactivity,
    EmptyRoster,
    Explicit(String),
}

impl EndReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inactivity => "inactivity",
            Self::EmptyRoster => "empty_roster",
            Self::Explicit(reason) => reason,
        }
    }
}

/// One buffered pre-session heart-rate ping.
#[derive(Debug, Clone)]
pub struct BufferedPing {
    pub device_id: String,
    pub hr: f64,
    pub at_ms: u64,
}

/// Result of ending a session: the payload (when validation passed) plus
/// the events to broadcast.
pub struct SessionEnd {
    pub payload: Option<SessionPayload>,
    pub rejection: Option<PersistRejection>,
    pub events: Vec<SessionEvent>,
}

/// The single-owner session core.
pub struct FitnessSession {
    pub(crate) tuning: SessionTuning,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) session_id: Option<String>,
    pub(crate) start_ms: u64,
    pub(crate) pre_session: Vec<BufferedPing>,
    pub(crate) devices: DeviceRegistry,
    pub(crate) roster: UserRegistry,
    pub(crate) zones: ZoneProfileStore,
    pub(crate) activity: ActivityMonitor,
    pub(crate) treasure: TreasureBox,
    pub(crate) timeline: Timeline,
    pub(crate) governance: GovernanceEngine,
    pub(crate) metrics: MetricsRecorder,
    /// Cumulative heart beats per user id.
    pub(crate) heart_beats: HashMap<String, f64>,
    /// Cumulative heart beats per entity id (dual-write namespace).
    pub(crate) entity_beats: HashMap<String, f64>,
    /// Cumulative crank rotations per equipment device id.
    pub(crate) rotations: HashMap<String, f64>,
    /// Participants that received their one-time coins baseline.
    pub(crate) seen_participants: HashSet<String>,
    /// Users whose state migrated away in a grace-period transfer.
    pub(crate) transferred_users: HashSet<String>,
    /// Latest known zone per user, updated on every HR sample so debounced
    /// governance evaluations see sub-tick zone changes.
    pub(crate) live_zones: HashMap<String, Option<String>>,
    /// Participant count staged by the most recent tick.
    pub(crate) last_total_count: usize,
    pub(crate) pending_snapshot_ref: Option<String>,
    pub(crate) voice_memo_count: u32,
    pub(crate) last_activity_ms: u64,
    pub(crate) roster_empty_since_ms: Option<u64>,
    pub(crate) last_tick_at_ms: u64,
    pub(crate) tick_index: u64,
}

impl FitnessSession {
    pub fn new(tuning: SessionTuning) -> Self {
        Self {
            tuning,
            lifecycle: Lifecycle::Idle,
            session_id: None,
            start_ms: 0,
            pre_session: Vec::new(),
            devices: DeviceRegistry::default(),
            roster: UserRegistry::default(),
            zones: ZoneProfileStore::default(),
            activity: ActivityMonitor::default(),
            treasure: TreasureBox::new(tuning.coin_time_unit_ms),
            timeline: Timeline::new(0, tuning.tick_interval_ms),
            governance: GovernanceEngine::default(),
            metrics: MetricsRecorder::default(),
            heart_beats: HashMap::new(),
            entity_beats: HashMap::new(),
            rotations: HashMap::new(),
            seen_participants: HashSet::new(),
            transferred_users: HashSet::new(),
            live_zones: HashMap::new(),
            last_total_count: 0,
            pending_snapshot_ref: None,
            voice_memo_count: 0,
            last_activity_ms: 0,
            roster_empty_since_ms: None,
            last_tick_at_ms: 0,
            tick_index: 0,
        }
    }

    /// Swap in a governance engine (tests seed its challenge RNG).
    pub fn with_governance(mut self, governance: GovernanceEngine) -> Self {
        self.governance = governance;
        self
    }

    // -- Ingestion ------------------------------------------------------------

    /// Ingest one sensor frame.
    ///
    /// Idle sessions buffer valid heart-rate pings until the pre-session
    /// threshold starts a session (a single stray ping never does). Active
    /// sessions feed the coin accumulator and zone-change notifications.
    pub fn ingest(
        &mut self,
        frame: &RawFrame,
        now_ms: u64,
    ) -> Result<Vec<SessionEvent>, EngineError> {
        if !frame.topic.is_empty() && frame.topic != "fitness" {
            return Ok(Vec::new());
        }
        let result = self.devices.register_or_update(frame, now_ms)?;
        if result.created {
            // A brand-new device must not inherit cumulative counters from a
            // previous occupant of the same slot.
            self.rotations.remove(&result.device_id);
        }
        let hr = frame.heart_rate();
        if frame.has_metric() {
            self.last_activity_ms = now_ms;
        }

        let mut events = Vec::new();
        match self.lifecycle {
            Lifecycle::Idle | Lifecycle::Starting => {
                if let Some(hr) = hr.filter(|v| *v > 0.0) {
                    self.lifecycle = Lifecycle::Starting;
                    self.pre_session.push(BufferedPing {
                        device_id: result.device_id,
                        hr,
                        at_ms: now_ms,
                    });
                    debug!(
                        buffered = self.pre_session.len(),
                        threshold = self.tuning.pre_session_threshold,
                        "pre-session ping buffered"
                    );
                    if self.pre_session.len() >= self.tuning.pre_session_threshold {
                        events.extend(self.start_session(now_ms));
                    }
                }
            }
            Lifecycle::Active => {
                if let Some(hr) = hr {
                    self.record_heart_rate(&result.device_id, hr, now_ms);
                }
            }
            Lifecycle::Ended => {}
        }
        Ok(events)
    }

    /// Feed one heart-rate sample into the coin accumulator and notify
    /// governance of zone transitions.
    fn record_heart_rate(&mut self, device_id: &str, hr: f64, now_ms: u64) {
        let Some(occupant) = self.roster.resolve_user_for_device(device_id) else {
            return;
        };
        let key = occupant.entity_id.clone().unwrap_or_else(|| occupant.user_id.clone());
        let prev_zone = self
            .treasure
            .accumulator(&key)
            .and_then(|acc| acc.last_zone_id.clone());
        self.treasure
            .record_heart_rate(&key, &occupant.user_id, hr, now_ms, &self.zones);
        let next_zone = self
            .treasure
            .accumulator(&key)
            .and_then(|acc| acc.last_zone_id.clone());
        self.live_zones.insert(occupant.user_id.clone(), next_zone.clone());
        if prev_zone != next_zone {
            self.governance.notify_zone_change(
                &occupant.user_id,
                prev_zone.as_deref(),
                next_zone.as_deref(),
                now_ms,
            );
        }
    }

    // -- Lifecycle ------------------------------------------------------------

    /// The pre-session buffer filled: initialize and emit the first tick at
    /// the session start time.
    fn start_session(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        let session_id = format_session_id(now_ms);
        info!(session = %session_id, "session started");
        self.session_id = Some(session_id.clone());
        self.lifecycle = Lifecycle::Active;
        self.start_ms = now_ms;
        self.pre_session.clear();
        self.heart_beats.clear();
        self.entity_beats.clear();
        self.rotations.clear();
        self.seen_participants.clear();
        self.transferred_users.clear();
        self.live_zones.clear();
        self.last_total_count = 0;
        self.voice_memo_count = 0;
        self.roster_empty_since_ms = None;
        self.tick_index = 0;
        self.last_tick_at_ms = now_ms;
        let ticks_per = self.tuning.tick_interval_ms.max(1);
        self.activity.configure(
            self.tuning.tick_interval_ms,
            self.tuning.device_thresholds.inactive_ms / ticks_per,
            self.tuning.device_thresholds.remove_ms / ticks_per,
        );
        self.activity.reset(now_ms);
        self.treasure.reset(now_ms);
        self.metrics.reset();
        self.timeline.reset(now_ms);
        self.timeline.set_interval_ms(self.tuning.tick_interval_ms);
        self.timeline.log_event("session_started", json!({ "session_id": session_id }), now_ms);

        let mut events = vec![SessionEvent::SessionStarted {
            session_id,
            start_ms: now_ms,
        }];
        events.extend(tick::run_tick(self, now_ms));
        events
    }

    /// Re-entrant start guard: an already-active session keeps its id.
    pub fn ensure_started(&mut self, now_ms: u64) -> (String, Vec<SessionEvent>) {
        if self.lifecycle == Lifecycle::Active {
            return (self.session_id.clone().unwrap_or_default(), Vec::new());
        }
        let events = self.start_session(now_ms);
        (self.session_id.clone().unwrap_or_default(), events)
    }

    /// Run one tick of the pipeline (no-op unless active).
    pub fn tick(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        if self.lifecycle != Lifecycle::Active {
            return Vec::new();
        }
        tick::run_tick(self, now_ms)
    }

    /// Which timeout, if any, should end the session now.
    pub fn due_timeout(&self, now_ms: u64) -> Option<EndReason> {
        if self.lifecycle != Lifecycle::Active {
            return None;
        }
        if now_ms.saturating_sub(self.last_activity_ms) > self.tuning.device_thresholds.remove_ms {
            return Some(EndReason::Inactivity);
        }
        if self
            .roster_empty_since_ms
            .is_some_and(|since| now_ms.saturating_sub(since) > self.tuning.empty_session_ms)
        {
            return Some(EndReason::EmptyRoster);
        }
        None
    }

    /// End the session: final tick, snapshot build + validation, reset.
    pub fn end_session(
        &mut self,
        reason: &EndReason,
        now_ms: u64,
    ) -> Result<SessionEnd, EngineError> {
        if self.lifecycle != Lifecycle::Active {
            return Err(EngineError::SessionMissing);
        }
        let mut events = tick::run_tick(self, now_ms);
        self.lifecycle = Lifecycle::Ended;
        let session_id = self.session_id.clone().unwrap_or_default();
        info!(session = %session_id, reason = %reason.as_str(), "session ending");

        let built = persist::build_payload(SnapshotInput {
            session_id: &session_id,
            start_ms: self.start_ms,
            end_ms: now_ms,
            roster: &self.roster,
            timeline: self.timeline.summary(),
            voice_memo_count: self.voice_memo_count,
        });
        let (payload, rejection) = match built {
            Ok(payload) => (Some(payload), None),
            Err(rejection) => {
                persist::log_rejection(&rejection);
                (None, Some(rejection))
            }
        };

        events.push(SessionEvent::SessionEnded {
            session_id,
            reason: reason.as_str().to_owned(),
            tick_count: self.timeline.tick_count(),
            duration_ms: now_ms.saturating_sub(self.start_ms),
            persisted: payload.is_some(),
        });

        self.reset();
        Ok(SessionEnd { payload, rejection, events })
    }

    /// Return to idle. The roster and device registry survive; everything
    /// session-scoped clears, including governance's `satisfied_once`.
    pub fn reset(&mut self) {
        self.lifecycle = Lifecycle::Idle;
        self.session_id = None;
        self.start_ms = 0;
        self.pre_session.clear();
        self.heart_beats.clear();
        self.entity_beats.clear();
        self.rotations.clear();
        self.seen_participants.clear();
        self.transferred_users.clear();
        self.live_zones.clear();
        self.last_total_count = 0;
        self.pending_snapshot_ref = None;
        self.voice_memo_count = 0;
        self.roster_empty_since_ms = None;
        self.tick_index = 0;
        self.activity.reset(0);
        self.treasure.reset(0);
        self.metrics.reset();
        self.timeline.reset(0);
        self.governance.reset();
        self.roster.reset_session_state();
    }

    // -- Roster & assignment --------------------------------------------------

    /// Install the participant roster and device assignments.
    pub fn set_roster(
        &mut self,
        entries: Vec<RosterEntry>,
        assignments: Vec<DeviceAssignment>,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        self.roster.set_roster(entries, assignments, now_ms)?;
        let pairs: Vec<(String, String)> = self
            .roster
            .ledger()
            .map(|entry| (entry.device_id.clone(), entry.occupant_id.clone()))
            .collect();
        for (device_id, occupant_id) in pairs {
            self.devices.assign(&device_id, &occupant_id);
        }
        if self.roster.users().next().is_some() {
            self.roster_empty_since_ms = None;
        }
        Ok(())
    }

    /// Assign a guest to a device. Inside the grace window the previous
    /// occupant's session state transfers to the new identity; past it the
    /// old entity is dropped.
    pub fn assign_guest(
        &mut self,
        device_id: &str,
        assignment: GuestAssignment,
        now_ms: u64,
    ) -> Result<Vec<SessionEvent>, EngineError> {
        if self.lifecycle != Lifecycle::Active {
            return Err(EngineError::SessionMissing);
        }
        let outcome = self.roster.assign_guest(device_id, assignment, now_ms)?;
        self.devices.assign(&outcome.entry.device_id, &outcome.entry.occupant_id);

        let mut events = Vec::new();
        self.timeline.log_event(
            "guest_assigned",
            json!({
                "device_id": outcome.entry.device_id,
                "occupant": outcome.entry.occupant_id,
                "entity_id": outcome.entity_id,
            }),
            now_ms,
        );

        if let Some(replaced) = outcome.replaced {
            let within_grace =
                now_ms.saturating_sub(replaced.updated_at_ms) <= self.tuning.transfer_grace_ms;
            if within_grace && replaced.occupant_id != outcome.entry.occupant_id {
                let request = TransferRequest {
                    device_id: outcome.entry.device_id.clone(),
                    from_user: replaced.occupant_id.clone(),
                    to_user: outcome.entry.occupant_id.clone(),
                    from_entity: replaced.entity_id.clone(),
                    to_entity: Some(outcome.entity_id.clone()),
                };
                transfer::execute(
                    &request,
                    TransferPlanes {
                        treasure: &mut self.treasure,
                        timeline: &mut self.timeline,
                        activity: &mut self.activity,
                        heart_beats: &mut self.heart_beats,
                        entity_beats: &mut self.entity_beats,
                        transferred_users: &mut self.transferred_users,
                    },
                );
                self.metrics.transfer(&request.from_user, &request.to_user);
                if let Some(ref from_entity) = replaced.entity_id {
                    self.roster.mark_entity_transferred(from_entity, &outcome.entity_id);
                }
                self.timeline.log_event(
                    "grace_period_transfer",
                    json!({
                        "device_id": request.device_id,
                        "from": request.from_user,
                        "to": request.to_user,
                    }),
                    now_ms,
                );
                events.push(SessionEvent::GracePeriodTransfer {
                    device_id: request.device_id,
                    from_user: request.from_user,
                    to_user: request.to_user,
                    from_entity: request.from_entity,
                    to_entity: request.to_entity,
                });
            } else if let Some(ref old_entity) = replaced.entity_id {
                self.roster.set_entity_status(old_entity, EntityStatus::Dropped);
            }
        }
        Ok(events)
    }

    /// Clear a device's assignment, ending its entity.
    pub fn clear_assignment(
        &mut self,
        device_id: &str,
    ) -> Result<Vec<SessionEvent>, EngineError> {
        let removed = self.roster.clear(device_id)?;
        if let Some(ref entry) = removed {
            self.devices.unassign(&entry.device_id);
        }
        Ok(Vec::new())
    }

    // -- Governance & media ---------------------------------------------------

    /// Install governance configuration (with optional zone config).
    pub fn configure_governance(
        &mut self,
        config: GovernanceConfig,
        zone_config: Option<ZoneConfig>,
    ) {
        if let Some(zone_config) = zone_config {
            self.zones.configure(zone_config.zones, zone_config.user_overrides);
        }
        self.governance.configure(config, self.zones.all().to_vec());
    }

    /// Swap the current media item.
    pub fn set_media(&mut self, media: Option<MediaItem>, now_ms: u64) -> Vec<SessionEvent> {
        let events = self.governance.set_media(media, now_ms);
        self.wrap_governance(events, now_ms)
    }

    /// Governance timer wakeup, evaluated against a fresh snapshot so
    /// sub-tick zone changes are visible to the debounced cycle.
    pub fn governance_poll(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        if !self.governance.wakeup_due(now_ms) {
            return Vec::new();
        }
        let input = self.governance_input();
        let events = self.governance.evaluate(&input, now_ms);
        self.wrap_governance(events, now_ms)
    }

    /// Roster+zone snapshot from the most recent completed tick, with zone
    /// assignments refreshed by any samples that arrived since.
    pub(crate) fn governance_input(&self) -> crate::governance::GovernanceInput {
        let active: Vec<crate::governance::ParticipantState> = self
            .activity
            .previous_tick_active()
            .iter()
            .map(|user_id| crate::governance::ParticipantState {
                user_id: user_id.clone(),
                zone_id: self.live_zones.get(user_id).cloned().flatten(),
            })
            .collect();
        let total_count = self.last_total_count.max(active.len());
        crate::governance::GovernanceInput { active, total_count }
    }

    pub fn governance_pause(&mut self, now_ms: u64) {
        self.governance.pause(now_ms);
    }

    pub fn governance_resume(&mut self, now_ms: u64) {
        self.governance.resume(now_ms);
    }

    /// Force an immediate challenge.
    pub fn trigger_challenge(
        &mut self,
        selection: Option<Selection>,
        now_ms: u64,
    ) -> Vec<SessionEvent> {
        let events = self.governance.trigger_challenge(selection, now_ms);
        self.wrap_governance(events, now_ms)
    }

    pub fn next_governance_wakeup_ms(&self) -> Option<u64> {
        self.governance.next_wakeup_ms()
    }

    // -- Supplementary inputs -------------------------------------------------

    /// Queue a snapshot reference for emission on the next tick.
    pub fn queue_snapshot_ref(&mut self, reference: String) {
        self.pending_snapshot_ref = Some(reference);
    }

    /// Record attached voice memos (feeds the persistence spam guard).
    pub fn attach_voice_memo_count(&mut self, count: u32) {
        self.voice_memo_count = count;
    }

    // -- Read APIs ------------------------------------------------------------

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn tuning(&self) -> &SessionTuning {
        &self.tuning
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn treasure(&self) -> &TreasureBox {
        &self.treasure
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn roster(&self) -> &UserRegistry {
        &self.roster
    }

    pub fn governance(&self) -> &GovernanceEngine {
        &self.governance
    }

    pub fn activity(&self) -> &ActivityMonitor {
        &self.activity
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn transferred_users(&self) -> &HashSet<String> {
        &self.transferred_users
    }

    /// Snapshot for the autosave path. `None` when validation rejects.
    pub fn autosave_payload(&self, now_ms: u64) -> Option<SessionPayload> {
        if self.lifecycle != Lifecycle::Active {
            return None;
        }
        let session_id = self.session_id.as_deref()?;
        match persist::build_payload(SnapshotInput {
            session_id,
            start_ms: self.start_ms,
            end_ms: now_ms,
            roster: &self.roster,
            timeline: self.timeline.summary(),
            voice_memo_count: self.voice_memo_count,
        }) {
            Ok(payload) => Some(payload),
            Err(rejection) => {
                persist::log_rejection(&rejection);
                None
            }
        }
    }

    /// Union of every participant id that ever contributed to the timeline,
    /// the coin accumulator, or the staged roster — minus transferred
    /// identities. Keeps departed users visible on the chart.
    pub fn historical_participants(&self) -> Vec<String> {
        let mut ids = self.timeline.all_participant_ids();
        for key in self.treasure.per_user_totals().keys() {
            if !key.starts_with("entity_") && !ids.contains(key) {
                ids.push(key.clone());
            }
        }
        for id in self.metrics.user_ids() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        for id in &self.seen_participants {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids.retain(|id| !self.transferred_users.contains(id));
        ids
    }

    // -- Internals ------------------------------------------------------------

    fn wrap_governance(
        &mut self,
        events: Vec<crate::governance::GovernanceEvent>,
        now_ms: u64,
    ) -> Vec<SessionEvent> {
        tick::log_governance_events(&mut self.timeline, &events, now_ms);
        events.into_iter().map(SessionEvent::Governance).collect()
    }
}

/// Timezone-stable session id: `fs_YYYYMMDDHHmmss` in local time.
pub fn format_session_id(now_ms: u64) -> String {
    Local
        .timestamp_millis_opt(now_ms as i64)
        .single()
        .map(|dt| format!("fs_{}", dt.format("%Y%m%d%H%M%S")))
        .unwrap_or_else(|| format!("fs_{now_ms}"))
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
