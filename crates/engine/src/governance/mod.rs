// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media-governance configuration model.
//!
//! A **policy** bundles base zone requirements with challenge configuration
//! and is selected by participant count. Rules are either absolute counts or
//! named fractions of the effective (non-exempt) participant pool.

pub mod challenge;
pub mod engine;

pub use challenge::{ChallengeRecord, ChallengeSnapshot, ChallengeStatus};
pub use engine::{
    GovernanceEngine, GovernanceEvent, GovernanceInput, GovernanceStatus, ParticipantState,
};

use std::fmt;

use indexmap::IndexMap;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::zones::ZoneDefinition;

/// Governance phase for the current media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Requirements exist but have never been satisfied.
    Pending,
    /// Requirements are met; media plays.
    Unlocked,
    /// Requirements slipped after being met; grace countdown running.
    Warning,
    /// Violation past grace, or a failed challenge.
    Locked,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Unlocked => "unlocked",
            Self::Warning => "warning",
            Self::Locked => "locked",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The media item currently loaded in the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A participation rule: an absolute count or a named fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    Count(i64),
    All,
    Majority,
    Some,
    Any,
}

impl Rule {
    /// Normalize to a concrete required count against the effective
    /// participant pool (actives minus exemptions).
    pub fn required_count(&self, effective_count: usize) -> usize {
        let n = effective_count as f64;
        match self {
            Self::Count(count) => (*count).clamp(0, effective_count as i64) as usize,
            Self::All => effective_count,
            Self::Majority => ((n * 0.5).ceil() as usize).max(1),
            Self::Some => ((n * 0.3).ceil() as usize).max(1),
            Self::Any => 1,
        }
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Count(count) => serializer.serialize_i64(*count),
            Self::All => serializer.serialize_str("all"),
            Self::Majority => serializer.serialize_str("majority"),
            Self::Some => serializer.serialize_str("some"),
            Self::Any => serializer.serialize_str("any"),
        }
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Number(ref n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Rule::Count)
                .ok_or_else(|| D::Error::custom("rule count out of range")),
            Value::String(ref s) => match s.to_lowercase().as_str() {
                "all" => Ok(Rule::All),
                "majority" | "most" => Ok(Rule::Majority),
                "some" => Ok(Rule::Some),
                "any" => Ok(Rule::Any),
                other => Err(D::Error::custom(format!("unknown rule: {other}"))),
            },
            _ => Err(D::Error::custom("rule must be a number or string")),
        }
    }
}

/// How the challenge scheduler picks the next selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionType {
    #[default]
    Random,
    Cyclic,
}

/// One candidate challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub zone: String,
    pub rule: Rule,
    /// Seconds allowed to satisfy the challenge once started.
    pub time_allowed: f64,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_weight() -> u32 {
    1
}

/// Interval range (seconds) between scheduled challenges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalRange {
    pub min: f64,
    pub max: f64,
}

/// Challenge configuration carried by a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub interval_range_seconds: IntervalRange,
    #[serde(default)]
    pub selection_type: SelectionType,
    pub selections: Vec<Selection>,
}

/// A named requirement bundle selected by participant count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub min_participants: usize,
    /// Flattened zone-id → rule map.
    #[serde(default)]
    pub base_requirement: IndexMap<String, Rule>,
    #[serde(default)]
    pub grace_period_seconds: Option<f64>,
    #[serde(default)]
    pub challenges: Vec<ChallengeConfig>,
}

/// Top-level governance configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub grace_period_seconds: Option<f64>,
    #[serde(default)]
    pub governed_labels: Vec<String>,
    #[serde(default)]
    pub governed_types: Vec<String>,
    #[serde(default)]
    pub policies: IndexMap<String, Policy>,
    /// Participants excluded from the effective pool.
    #[serde(default)]
    pub exemptions: Vec<String>,
}

impl GovernanceConfig {
    /// Whether the media item falls under governance: at least one governed
    /// label, or a governed type.
    pub fn is_governed(&self, media: &MediaItem) -> bool {
        if media.labels.iter().any(|label| self.governed_labels.contains(label)) {
            return true;
        }
        media
            .kind
            .as_deref()
            .is_some_and(|kind| self.governed_types.iter().any(|t| t == kind))
    }

    /// Pick the policy for the given participant count: the one with the
    /// largest `min_participants ≤ total`, falling back to the smallest.
    pub fn select_policy(&self, total_count: usize) -> Option<(&String, &Policy)> {
        self.policies
            .iter()
            .filter(|(_, p)| p.min_participants <= total_count)
            .max_by_key(|(_, p)| p.min_participants)
            .or_else(|| self.policies.iter().min_by_key(|(_, p)| p.min_participants))
    }
}

/// One evaluated base-requirement row, as exposed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementSummary {
    pub zone_id: String,
    pub zone_name: String,
    pub zone_color: String,
    /// `None` in the pre-populated shell shown before anyone is active.
    pub required_count: Option<usize>,
    pub met_users: Vec<String>,
    pub missing_users: Vec<String>,
    pub satisfied: bool,
}

impl RequirementSummary {
    /// An empty shell row so the UI can render zone names before activity.
    pub fn shell(zone: &ZoneDefinition) -> Self {
        Self {
            zone_id: zone.id.clone(),
            zone_name: zone.name.clone(),
            zone_color: zone.color.clone(),
            required_count: None,
            met_users: Vec::new(),
            missing_users: Vec::new(),
            satisfied: false,
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
