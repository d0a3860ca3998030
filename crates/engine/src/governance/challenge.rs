// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Challenge sub-machine: time-boxed heightened requirements scheduled while
//! media is unlocked.
//!
//! `idle (maybe scheduled) → pending (active) → success | failed`. A failed
//! challenge stays resident: if participants later satisfy the same rules it
//! recovers to success and the next one is scheduled.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::zones::ZoneDefinition;

use super::{ChallengeConfig, Rule, Selection, SelectionType};

/// Retained history depth.
const HISTORY_CAP: usize = 20;

/// Challenge lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Success,
    Failed,
}

/// The currently-resident challenge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveChallenge {
    pub id: String,
    pub config_id: String,
    pub zone: String,
    pub rule: Rule,
    pub required_count: usize,
    pub time_limit_s: f64,
    pub started_at_ms: u64,
    pub expires_at_ms: u64,
    pub status: ChallengeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused_remaining_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Serializable view of a challenge for events and history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSnapshot {
    pub id: String,
    pub zone: String,
    pub required_count: usize,
    pub time_limit_s: f64,
    pub started_at_ms: u64,
    pub expires_at_ms: u64,
    pub status: ChallengeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl From<&ActiveChallenge> for ChallengeSnapshot {
    fn from(c: &ActiveChallenge) -> Self {
        Self {
            id: c.id.clone(),
            zone: c.zone.clone(),
            required_count: c.required_count,
            time_limit_s: c.time_limit_s,
            started_at_ms: c.started_at_ms,
            expires_at_ms: c.expires_at_ms,
            status: c.status,
            label: c.label.clone(),
        }
    }
}

/// One resolved challenge kept in the capped history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub id: String,
    pub zone: String,
    pub status: ChallengeStatus,
    pub started_at_ms: u64,
    pub resolved_at_ms: u64,
    pub required_count: usize,
    pub summary: String,
}

/// What the machine reports back to the engine each run.
#[derive(Debug, Clone)]
pub enum ChallengeOutcome {
    Started(ChallengeSnapshot),
    Succeeded(ChallengeSnapshot),
    Failed(ChallengeSnapshot),
    /// A previously-failed challenge was satisfied after the fact.
    Recovered(ChallengeSnapshot),
}

/// Inputs the machine needs for one run, borrowed from the engine's cycle.
pub struct ChallengeContext<'a> {
    /// Whether the base phase is currently `unlocked`.
    pub unlocked: bool,
    pub config: Option<&'a ChallengeConfig>,
    pub policy_id: &'a str,
    pub zones: &'a [ZoneDefinition],
    /// Active participants with their current zone rank.
    pub ranked_active: &'a [(String, Option<usize>)],
    pub exemptions: &'a [String],
}

/// The challenge scheduler + lifecycle machine for the active policy.
#[derive(Debug)]
pub struct ChallengeMachine {
    rng: StdRng,
    next_at_ms: Option<u64>,
    preview: Option<Selection>,
    cursor: usize,
    bag: Vec<usize>,
    active: Option<ActiveChallenge>,
    history: VecDeque<ChallengeRecord>,
}

impl Default for ChallengeMachine {
    fn default() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }
}

impl ChallengeMachine {
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            next_at_ms: None,
            preview: None,
            cursor: 0,
            bag: Vec::new(),
            active: None,
            history: VecDeque::new(),
        }
    }

    /// Clear scheduling and the resident challenge (policy change, media
    /// change). History survives.
    pub fn reset(&mut self) {
        self.next_at_ms = None;
        self.preview = None;
        self.cursor = 0;
        self.bag.clear();
        self.active = None;
    }

    /// Whether a resident challenge is currently in the failed state.
    pub fn has_failed_active(&self) -> bool {
        self.active.as_ref().is_some_and(|c| c.status == ChallengeStatus::Failed)
    }

    pub fn active(&self) -> Option<&ActiveChallenge> {
        self.active.as_ref()
    }

    pub fn preview(&self) -> Option<&Selection> {
        self.preview.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &ChallengeRecord> {
        self.history.iter()
    }

    /// The earliest instant this machine needs to be woken at.
    pub fn next_wakeup_ms(&self) -> Option<u64> {
        let expiry = self.active.as_ref().and_then(|c| {
            (c.status == ChallengeStatus::Pending && c.paused_at_ms.is_none())
                .then_some(c.expires_at_ms)
        });
        match (self.next_at_ms, expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Advance the machine one step. Called at the tail of every engine
    /// evaluation cycle.
    pub fn run(&mut self, ctx: &ChallengeContext<'_>, now_ms: u64) -> Vec<ChallengeOutcome> {
        let mut outcomes = Vec::new();
        let Some(config) = ctx.config else {
            self.reset();
            return outcomes;
        };
        if config.selections.is_empty() {
            return outcomes;
        }

        match self.active.as_ref().map(|c| c.status) {
            None => {
                if ctx.unlocked {
                    if self.next_at_ms.is_none() {
                        self.schedule(config, now_ms);
                    } else if self.next_at_ms.is_some_and(|at| now_ms >= at) {
                        outcomes.extend(self.start_from_preview(ctx, now_ms));
                    }
                } else {
                    // The schedule belongs to the unlocked phase; re-arm on
                    // the next unlock instead of holding a due deadline.
                    self.next_at_ms = None;
                }
            }
            Some(ChallengeStatus::Pending) => {
                if let Some(challenge) = self.active.as_mut() {
                    if !ctx.unlocked {
                        if challenge.paused_at_ms.is_none() {
                            challenge.paused_at_ms = Some(now_ms);
                            challenge.paused_remaining_ms =
                                Some(challenge.expires_at_ms.saturating_sub(now_ms));
                        }
                    } else if let Some(remaining) = challenge.paused_remaining_ms.take() {
                        challenge.paused_at_ms = None;
                        challenge.expires_at_ms = now_ms + remaining;
                    }
                }
                let satisfied =
                    self.active.as_ref().is_some_and(|c| challenge_satisfied(c, ctx));
                if satisfied {
                    if let Some(snapshot) = self.resolve_success(ctx, now_ms) {
                        self.schedule(config, now_ms);
                        outcomes.push(ChallengeOutcome::Succeeded(snapshot));
                    }
                } else if let Some(challenge) = self.active.as_mut() {
                    if challenge.paused_at_ms.is_none() && now_ms >= challenge.expires_at_ms {
                        challenge.status = ChallengeStatus::Failed;
                        debug!(challenge = %challenge.id, "challenge expired");
                        outcomes
                            .push(ChallengeOutcome::Failed(ChallengeSnapshot::from(&*challenge)));
                    }
                }
            }
            Some(ChallengeStatus::Failed) => {
                // Late satisfaction recovers a failed challenge.
                let satisfied =
                    self.active.as_ref().is_some_and(|c| challenge_satisfied(c, ctx));
                if satisfied {
                    if let Some(snapshot) = self.resolve_success(ctx, now_ms) {
                        self.schedule(config, now_ms);
                        outcomes.push(ChallengeOutcome::Recovered(snapshot));
                    }
                }
            }
            Some(ChallengeStatus::Success) => {
                self.active = None;
            }
        }
        outcomes
    }

    /// Flip the resident challenge to success, record it, and clear it.
    fn resolve_success(
        &mut self,
        ctx: &ChallengeContext<'_>,
        now_ms: u64,
    ) -> Option<ChallengeSnapshot> {
        let challenge = self.active.as_mut()?;
        challenge.status = ChallengeStatus::Success;
        let snapshot = ChallengeSnapshot::from(&*challenge);
        self.record(now_ms, ctx);
        self.active = None;
        Some(snapshot)
    }

    /// Force an immediate challenge, optionally overriding the preview.
    pub fn trigger(
        &mut self,
        selection_override: Option<Selection>,
        ctx: &ChallengeContext<'_>,
        now_ms: u64,
    ) -> Vec<ChallengeOutcome> {
        let Some(config) = ctx.config else {
            return Vec::new();
        };
        if config.selections.is_empty() {
            return Vec::new();
        }
        if let Some(selection) = selection_override {
            self.preview = Some(selection);
        } else if self.preview.is_none() {
            self.preview = self.pick(config);
        }
        self.next_at_ms = Some(now_ms);
        self.start_from_preview(ctx, now_ms)
    }

    fn schedule(&mut self, config: &ChallengeConfig, now_ms: u64) {
        let range = config.interval_range_seconds;
        let (lo, hi) = (range.min.max(0.0), range.max.max(range.min).max(0.0));
        let offset_s =
            if hi > lo { self.rng.random_range(lo..=hi) } else { lo };
        self.next_at_ms = Some(now_ms + (offset_s * 1000.0) as u64);
        self.preview = self.pick(config);
        debug!(at = self.next_at_ms, "next challenge scheduled");
    }

    /// Resolve the next selection per the configured strategy.
    fn pick(&mut self, config: &ChallengeConfig) -> Option<Selection> {
        match config.selection_type {
            SelectionType::Cyclic => {
                let selection = config.selections.get(self.cursor % config.selections.len());
                self.cursor = (self.cursor + 1) % config.selections.len();
                selection.cloned()
            }
            SelectionType::Random => {
                if self.bag.is_empty() {
                    for (index, selection) in config.selections.iter().enumerate() {
                        for _ in 0..selection.weight.max(1) {
                            self.bag.push(index);
                        }
                    }
                    self.bag.shuffle(&mut self.rng);
                }
                self.bag.pop().and_then(|index| config.selections.get(index)).cloned()
            }
        }
    }

    fn start_from_preview(
        &mut self,
        ctx: &ChallengeContext<'_>,
        now_ms: u64,
    ) -> Vec<ChallengeOutcome> {
        let Some(config) = ctx.config else {
            return Vec::new();
        };
        let Some(selection) = self.preview.take().or_else(|| self.pick(config)) else {
            self.next_at_ms = None;
            return Vec::new();
        };
        let effective = effective_count(ctx.ranked_active, ctx.exemptions);
        let required_count = selection.rule.required_count(effective);
        let config_id = config
            .id
            .clone()
            .unwrap_or_else(|| format!("{}_challenge", ctx.policy_id));
        let challenge = ActiveChallenge {
            id: format!("{config_id}_{now_ms}"),
            config_id,
            zone: selection.zone.clone(),
            rule: selection.rule,
            required_count,
            time_limit_s: selection.time_allowed,
            started_at_ms: now_ms,
            expires_at_ms: now_ms + (selection.time_allowed * 1000.0) as u64,
            status: ChallengeStatus::Pending,
            paused_at_ms: None,
            paused_remaining_ms: None,
            label: selection.label.clone(),
        };
        debug!(challenge = %challenge.id, zone = %challenge.zone, "challenge started");
        let snapshot = ChallengeSnapshot::from(&challenge);
        self.active = Some(challenge);
        self.next_at_ms = None;
        vec![ChallengeOutcome::Started(snapshot)]
    }

    fn record(&mut self, resolved_at_ms: u64, ctx: &ChallengeContext<'_>) {
        let Some(ref challenge) = self.active else {
            return;
        };
        let met = met_count(challenge, ctx);
        self.history.push_back(ChallengeRecord {
            id: challenge.id.clone(),
            zone: challenge.zone.clone(),
            status: challenge.status,
            started_at_ms: challenge.started_at_ms,
            resolved_at_ms,
            required_count: challenge.required_count,
            summary: format!(
                "{met}/{} reached {} within {}s",
                challenge.required_count, challenge.zone, challenge.time_limit_s
            ),
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }
}

/// Rank of a zone reference (id or case-insensitive name) in the zone table.
pub fn zone_rank(zones: &[ZoneDefinition], zone_ref: &str) -> Option<usize> {
    let lowered = zone_ref.to_lowercase();
    zones
        .iter()
        .position(|z| z.id == zone_ref || z.name.to_lowercase() == lowered)
}

fn effective_count(ranked_active: &[(String, Option<usize>)], exemptions: &[String]) -> usize {
    ranked_active.iter().filter(|(id, _)| !exemptions.contains(id)).count()
}

fn met_count(challenge: &ActiveChallenge, ctx: &ChallengeContext<'_>) -> usize {
    let Some(required_rank) = zone_rank(ctx.zones, &challenge.zone) else {
        return 0;
    };
    ctx.ranked_active
        .iter()
        .filter(|(id, rank)| {
            !ctx.exemptions.contains(id) && rank.is_some_and(|r| r >= required_rank)
        })
        .count()
}

fn challenge_satisfied(challenge: &ActiveChallenge, ctx: &ChallengeContext<'_>) -> bool {
    if ctx.ranked_active.is_empty() {
        return false;
    }
    met_count(challenge, ctx) >= challenge.required_count
}

#[cfg(test)]
#[path = "challenge_tests.rs"]
mod tests;
