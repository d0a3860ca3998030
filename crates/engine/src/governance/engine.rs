// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media-gating state machine.
//!
//! The engine consumes a roster+zone snapshot each evaluation cycle and
//! walks the phase machine: `pending → unlocked ⇄ warning → locked`, with a
//! 500 ms hysteresis before the first unlock, a grace countdown on slips,
//! and a nested challenge sub-machine while unlocked.
//!
//! Timer model: instead of owning timers, the engine exposes
//! [`GovernanceEngine::next_wakeup_ms`] — the earliest deadline among the
//! zone-change debounce, hysteresis re-check, grace deadline, scheduled
//! challenge, and challenge expiry. The session actor arms one sleep at
//! that instant and calls [`GovernanceEngine::poll`] when it fires.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::zones::ZoneDefinition;

use super::challenge::{
    zone_rank, ChallengeContext, ChallengeMachine, ChallengeOutcome, ChallengeRecord,
    ChallengeSnapshot,
};
use super::{GovernanceConfig, MediaItem, Phase, Policy, RequirementSummary, Selection};

/// Debounce applied to zone-change notifications.
const ZONE_CHANGE_DEBOUNCE_MS: u64 = 100;

/// How long requirements must hold before the first unlock.
const HYSTERESIS_MS: u64 = 500;

/// One active participant and their current zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
}

/// The roster+zone snapshot consumed by an evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceInput {
    /// Participants that are currently active (fresh HR this tick).
    pub active: Vec<ParticipantState>,
    /// Total participants present, active or not.
    pub total_count: usize,
}

/// Events emitted by evaluation cycles.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceEvent {
    PhaseChanged { prev: Option<Phase>, next: Option<Phase> },
    MediaLocked,
    MediaUnlocked,
    ChallengeStarted { challenge: ChallengeSnapshot },
    ChallengeSucceeded { challenge: ChallengeSnapshot },
    ChallengeFailed { challenge: ChallengeSnapshot },
    ChallengeRecovered { challenge: ChallengeSnapshot },
}

/// Read-model snapshot of the engine for the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct GovernanceStatus {
    pub phase: Option<Phase>,
    pub satisfied_once: bool,
    pub video_locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_total_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_policy_id: Option<String>,
    pub requirements: Vec<RequirementSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeSnapshot>,
    pub challenge_history: Vec<ChallengeRecord>,
}

/// The media-gating state machine.
#[derive(Debug)]
pub struct GovernanceEngine {
    config: GovernanceConfig,
    zones: Vec<ZoneDefinition>,
    media: Option<MediaItem>,
    phase: Option<Phase>,
    satisfied_once: bool,
    satisfied_since_ms: Option<u64>,
    recheck_at_ms: Option<u64>,
    deadline_ms: Option<u64>,
    grace_total_ms: Option<u64>,
    active_policy_id: Option<String>,
    requirements: Vec<RequirementSummary>,
    challenge: ChallengeMachine,
    debounce_fire_at_ms: Option<u64>,
    paused: bool,
    paused_remaining_ms: Option<u64>,
    video_locked: bool,
    last_input: GovernanceInput,
}

impl Default for GovernanceEngine {
    fn default() -> Self {
        Self::with_challenge_machine(ChallengeMachine::default())
    }
}

impl GovernanceEngine {
    /// Build with an explicit challenge machine (tests seed its RNG).
    pub fn with_challenge_machine(challenge: ChallengeMachine) -> Self {
        Self {
            config: GovernanceConfig::default(),
            zones: Vec::new(),
            media: None,
            phase: None,
            satisfied_once: false,
            satisfied_since_ms: None,
            recheck_at_ms: None,
            deadline_ms: None,
            grace_total_ms: None,
            active_policy_id: None,
            requirements: Vec::new(),
            challenge,
            debounce_fire_at_ms: None,
            paused: false,
            paused_remaining_ms: None,
            video_locked: false,
            last_input: GovernanceInput::default(),
        }
    }

    /// Install configuration and the zone table. Resets phase sub-state but
    /// never `satisfied_once` (cleared only by session reset).
    pub fn configure(&mut self, config: GovernanceConfig, zones: Vec<ZoneDefinition>) {
        self.config = config;
        self.zones = zones;
        self.phase = None;
        self.requirements.clear();
        self.satisfied_since_ms = None;
        self.recheck_at_ms = None;
        self.deadline_ms = None;
        self.grace_total_ms = None;
        self.active_policy_id = None;
        self.debounce_fire_at_ms = None;
        self.challenge.reset();
    }

    /// Swap the current media item. Ungoverned (or absent) media idles the
    /// engine without clearing `satisfied_once` retroactively.
    pub fn set_media(&mut self, media: Option<MediaItem>, _now_ms: u64) -> Vec<GovernanceEvent> {
        let mut events = Vec::new();
        self.media = media;
        let governed = self.media.as_ref().is_some_and(|m| self.config.is_governed(m));
        if !governed {
            self.enter_idle(&mut events);
        }
        events
    }

    /// Debounced zone-change notification: schedules an evaluation shortly,
    /// yielding sub-second response to zone transitions without per-tick
    /// work.
    pub fn notify_zone_change(&mut self, user_id: &str, from: Option<&str>, to: Option<&str>, now_ms: u64) {
        if self.paused || self.media.is_none() {
            return;
        }
        debug!(user = %user_id, ?from, ?to, "zone change notified");
        let fire_at = now_ms + ZONE_CHANGE_DEBOUNCE_MS;
        self.debounce_fire_at_ms = Some(match self.debounce_fire_at_ms {
            Some(existing) => existing.min(fire_at),
            None => fire_at,
        });
    }

    /// Freeze the warning countdown during a playback stall. Zero-cost when
    /// the phase is not `warning`.
    pub fn pause(&mut self, now_ms: u64) {
        self.paused = true;
        if self.phase == Some(Phase::Warning) {
            if let Some(deadline) = self.deadline_ms.take() {
                self.paused_remaining_ms = Some(deadline.saturating_sub(now_ms));
            }
        }
    }

    /// Resume after a stall, restoring whatever countdown remained.
    pub fn resume(&mut self, now_ms: u64) {
        self.paused = false;
        if let Some(remaining) = self.paused_remaining_ms.take() {
            self.deadline_ms = Some(now_ms + remaining);
        }
    }

    /// Earliest instant at which [`GovernanceEngine::poll`] has work to do.
    pub fn next_wakeup_ms(&self) -> Option<u64> {
        if self.paused {
            return None;
        }
        [
            self.debounce_fire_at_ms,
            self.recheck_at_ms,
            self.deadline_ms,
            self.challenge.next_wakeup_ms(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Whether any armed deadline has come due.
    pub fn wakeup_due(&self, now_ms: u64) -> bool {
        self.next_wakeup_ms().is_some_and(|at| now_ms >= at)
    }

    /// Timer-driven entry point: runs an evaluation cycle when any armed
    /// deadline has come due, against the last-captured input. Callers that
    /// can assemble a fresher snapshot should use
    /// [`GovernanceEngine::evaluate`] directly.
    pub fn poll(&mut self, now_ms: u64) -> Vec<GovernanceEvent> {
        if self.wakeup_due(now_ms) {
            let input = self.last_input.clone();
            self.evaluate(&input, now_ms)
        } else {
            Vec::new()
        }
    }

    /// Run one evaluation cycle against a fresh snapshot.
    pub fn evaluate(&mut self, input: &GovernanceInput, now_ms: u64) -> Vec<GovernanceEvent> {
        let mut events = Vec::new();
        if self.paused {
            return events;
        }
        self.debounce_fire_at_ms = None;
        self.last_input = input.clone();

        // Nothing governed or nothing configured: idle.
        let governed = self.media.as_ref().is_some_and(|m| self.config.is_governed(m));
        if !governed || self.config.policies.is_empty() {
            self.enter_idle(&mut events);
            return events;
        }

        // Empty room: pre-populate a requirements shell so the UI renders
        // zone names immediately, and hold at pending.
        if input.active.is_empty() {
            self.requirements = self.shell_requirements(input.total_count);
            self.satisfied_since_ms = None;
            self.recheck_at_ms = None;
            self.set_phase(Some(Phase::Pending), &mut events);
            return events;
        }

        let Some((policy_id, policy)) = self.config.select_policy(input.total_count) else {
            self.enter_idle(&mut events);
            return events;
        };
        let policy_id = policy_id.clone();
        let policy = policy.clone();
        if self.active_policy_id.as_deref() != Some(policy_id.as_str()) {
            debug!(policy = %policy_id, "active policy changed");
            self.challenge.reset();
            self.active_policy_id = Some(policy_id.clone());
        }

        let ranked = self.rank_active(input);
        self.requirements = self.evaluate_requirements(&policy, &ranked);
        // A non-empty ruleset that produced no summaries (zone table race)
        // counts as unsatisfied.
        let all_satisfied = !policy.base_requirement.is_empty()
            && !self.requirements.is_empty()
            && self.requirements.iter().all(|r| r.satisfied);

        if self.challenge.has_failed_active() {
            self.deadline_ms = None;
            self.paused_remaining_ms = None;
            self.satisfied_since_ms = None;
            self.recheck_at_ms = None;
            self.set_phase(Some(Phase::Locked), &mut events);
        } else if all_satisfied {
            self.deadline_ms = None;
            match self.satisfied_since_ms {
                Some(since) if now_ms.saturating_sub(since) >= HYSTERESIS_MS => {
                    self.satisfied_once = true;
                    self.recheck_at_ms = None;
                    self.set_phase(Some(Phase::Unlocked), &mut events);
                }
                Some(since) => {
                    // Still inside the hysteresis window: hold phase, keep
                    // the re-check armed for the remainder.
                    self.recheck_at_ms = Some(since + HYSTERESIS_MS);
                }
                None => {
                    self.satisfied_since_ms = Some(now_ms);
                    self.recheck_at_ms = Some(now_ms + HYSTERESIS_MS);
                    if self.phase.is_none() {
                        self.set_phase(Some(Phase::Pending), &mut events);
                    }
                }
            }
        } else {
            self.satisfied_since_ms = None;
            self.recheck_at_ms = None;
            if !self.satisfied_once {
                self.deadline_ms = None;
                self.set_phase(Some(Phase::Pending), &mut events);
            } else {
                let grace_ms = self.grace_ms(&policy);
                if grace_ms == 0 {
                    self.deadline_ms = None;
                    self.set_phase(Some(Phase::Locked), &mut events);
                } else {
                    if self.deadline_ms.is_none() {
                        self.deadline_ms = Some(now_ms + grace_ms);
                        self.grace_total_ms = Some(grace_ms);
                        info!(grace_ms, "governance grace countdown started");
                    }
                    if self.deadline_ms.is_some_and(|deadline| now_ms >= deadline) {
                        self.deadline_ms = None;
                        self.set_phase(Some(Phase::Locked), &mut events);
                    } else {
                        self.set_phase(Some(Phase::Warning), &mut events);
                    }
                }
            }
        }

        self.run_challenges(&policy_id, &policy, &ranked, now_ms, &mut events);
        events
    }

    /// Force an immediate challenge, optionally overriding the preview.
    pub fn trigger_challenge(
        &mut self,
        selection: Option<Selection>,
        now_ms: u64,
    ) -> Vec<GovernanceEvent> {
        let mut events = Vec::new();
        let Some(policy_id) = self.active_policy_id.clone() else {
            return events;
        };
        let Some(policy) = self.config.policies.get(&policy_id).cloned() else {
            return events;
        };
        let input = self.last_input.clone();
        let ranked = self.rank_active(&input);
        let outcomes = {
            let ctx = ChallengeContext {
                unlocked: self.phase == Some(Phase::Unlocked),
                config: policy.challenges.first(),
                policy_id: &policy_id,
                zones: &self.zones,
                ranked_active: &ranked,
                exemptions: &self.config.exemptions,
            };
            self.challenge.trigger(selection, &ctx, now_ms)
        };
        self.apply_challenge_outcomes(outcomes, &mut events);
        events
    }

    // -- Read accessors -------------------------------------------------------

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn satisfied_once(&self) -> bool {
        self.satisfied_once
    }

    pub fn video_locked(&self) -> bool {
        self.video_locked
    }

    pub fn requirements(&self) -> &[RequirementSummary] {
        &self.requirements
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    pub fn active_policy_id(&self) -> Option<&str> {
        self.active_policy_id.as_deref()
    }

    pub fn status(&self) -> GovernanceStatus {
        GovernanceStatus {
            phase: self.phase,
            satisfied_once: self.satisfied_once,
            video_locked: self.video_locked,
            deadline_ms: self.deadline_ms,
            grace_total_ms: self.grace_total_ms,
            active_policy_id: self.active_policy_id.clone(),
            requirements: self.requirements.clone(),
            challenge: self.challenge.active().map(ChallengeSnapshot::from),
            challenge_history: self.challenge.history().cloned().collect(),
        }
    }

    /// Clear everything including `satisfied_once` — explicit session reset
    /// is the only path allowed to do this.
    pub fn reset(&mut self) {
        self.phase = None;
        self.satisfied_once = false;
        self.satisfied_since_ms = None;
        self.recheck_at_ms = None;
        self.deadline_ms = None;
        self.grace_total_ms = None;
        self.active_policy_id = None;
        self.requirements.clear();
        self.debounce_fire_at_ms = None;
        self.paused = false;
        self.paused_remaining_ms = None;
        self.challenge.reset();
        if self.video_locked {
            self.video_locked = false;
        }
        self.last_input = GovernanceInput::default();
    }

    // -- Internals ------------------------------------------------------------

    fn grace_ms(&self, policy: &Policy) -> u64 {
        let seconds = policy
            .grace_period_seconds
            .or(self.config.grace_period_seconds)
            .unwrap_or(0.0);
        if seconds <= 0.0 {
            0
        } else {
            (seconds * 1000.0) as u64
        }
    }

    fn rank_active(&self, input: &GovernanceInput) -> Vec<(String, Option<usize>)> {
        input
            .active
            .iter()
            .map(|p| {
                let rank = p.zone_id.as_deref().and_then(|z| zone_rank(&self.zones, z));
                (p.user_id.clone(), rank)
            })
            .collect()
    }

    fn shell_requirements(&self, total_count: usize) -> Vec<RequirementSummary> {
        let Some((_, policy)) = self.config.select_policy(total_count) else {
            return Vec::new();
        };
        policy
            .base_requirement
            .keys()
            .filter_map(|zone_ref| {
                let rank = zone_rank(&self.zones, zone_ref)?;
                self.zones.get(rank).map(RequirementSummary::shell)
            })
            .collect()
    }

    fn evaluate_requirements(
        &self,
        policy: &Policy,
        ranked: &[(String, Option<usize>)],
    ) -> Vec<RequirementSummary> {
        let exemptions = &self.config.exemptions;
        let effective: Vec<&(String, Option<usize>)> =
            ranked.iter().filter(|(id, _)| !exemptions.contains(id)).collect();
        let mut summaries = Vec::new();
        for (zone_ref, rule) in &policy.base_requirement {
            let Some(required_rank) = zone_rank(&self.zones, zone_ref) else {
                continue;
            };
            let Some(zone) = self.zones.get(required_rank) else {
                continue;
            };
            let required_count = rule.required_count(effective.len());
            let met_users: Vec<String> = effective
                .iter()
                .filter(|(_, rank)| rank.is_some_and(|r| r >= required_rank))
                .map(|(id, _)| id.clone())
                .collect();
            let missing_users: Vec<String> = effective
                .iter()
                .filter(|(id, _)| !met_users.contains(id))
                .map(|(id, _)| id.clone())
                .collect();
            let satisfied = met_users.len() >= required_count;
            summaries.push(RequirementSummary {
                zone_id: zone.id.clone(),
                zone_name: zone.name.clone(),
                zone_color: zone.color.clone(),
                required_count: Some(required_count),
                met_users,
                missing_users,
                satisfied,
            });
        }
        summaries
    }

    fn run_challenges(
        &mut self,
        policy_id: &str,
        policy: &Policy,
        ranked: &[(String, Option<usize>)],
        now_ms: u64,
        events: &mut Vec<GovernanceEvent>,
    ) {
        let outcomes = {
            let Self { ref mut challenge, ref zones, ref config, ref phase, .. } = *self;
            let ctx = ChallengeContext {
                unlocked: *phase == Some(Phase::Unlocked),
                config: policy.challenges.first(),
                policy_id,
                zones,
                ranked_active: ranked,
                exemptions: &config.exemptions,
            };
            challenge.run(&ctx, now_ms)
        };
        self.apply_challenge_outcomes(outcomes, events);
    }

    fn apply_challenge_outcomes(
        &mut self,
        outcomes: Vec<ChallengeOutcome>,
        events: &mut Vec<GovernanceEvent>,
    ) {
        for outcome in outcomes {
            match outcome {
                ChallengeOutcome::Started(challenge) => {
                    events.push(GovernanceEvent::ChallengeStarted { challenge });
                }
                ChallengeOutcome::Succeeded(challenge) => {
                    events.push(GovernanceEvent::ChallengeSucceeded { challenge });
                }
                ChallengeOutcome::Failed(challenge) => {
                    // A failed challenge locks immediately; the grace
                    // countdown is moot.
                    self.deadline_ms = None;
                    self.paused_remaining_ms = None;
                    self.satisfied_since_ms = None;
                    self.recheck_at_ms = None;
                    self.set_phase(Some(Phase::Locked), events);
                    events.push(GovernanceEvent::ChallengeFailed { challenge });
                }
                ChallengeOutcome::Recovered(challenge) => {
                    events.push(GovernanceEvent::ChallengeRecovered { challenge });
                }
            }
        }
    }

    fn enter_idle(&mut self, events: &mut Vec<GovernanceEvent>) {
        self.requirements.clear();
        self.satisfied_since_ms = None;
        self.recheck_at_ms = None;
        self.deadline_ms = None;
        self.grace_total_ms = None;
        self.active_policy_id = None;
        self.challenge.reset();
        self.set_phase(None, events);
    }

    fn set_phase(&mut self, next: Option<Phase>, events: &mut Vec<GovernanceEvent>) {
        if self.phase == next {
            return;
        }
        let prev = self.phase;
        self.phase = next;
        info!(?prev, ?next, "governance phase changed");
        events.push(GovernanceEvent::PhaseChanged { prev, next });

        let should_lock = match next {
            Some(Phase::Locked) => Some(true),
            Some(Phase::Unlocked) | None => Some(false),
            _ => None,
        };
        if let Some(lock) = should_lock {
            if lock != self.video_locked {
                self.video_locked = lock;
                events.push(if lock {
                    GovernanceEvent::MediaLocked
                } else {
                    GovernanceEvent::MediaUnlocked
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
