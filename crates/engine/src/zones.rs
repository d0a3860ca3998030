// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heart-rate zone configuration and per-user threshold resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One configured heart-rate zone. Immutable inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDefinition {
    pub id: String,
    pub name: String,
    /// Zone floor in bpm; a user is in the highest zone whose effective
    /// threshold is at or below their current HR.
    pub min: f64,
    pub color: String,
    /// Coins awarded per closed interval spent with this zone as the ceiling.
    pub coins: u64,
}

/// Wire shape for zone configuration (`configure`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub zones: Vec<ZoneDefinition>,
    /// user id → (zone id or lowercased name → threshold bpm).
    #[serde(default)]
    pub user_overrides: HashMap<String, HashMap<String, f64>>,
}

/// Per-user effective zone thresholds derived from the base zone config and
/// optional per-user overrides.
///
/// Overrides never change a zone's identity or color — only its threshold.
/// They are keyed by zone id or by lowercased zone name.
#[derive(Debug, Clone, Default)]
pub struct ZoneProfileStore {
    /// Sorted ascending by `min`; rank is the index in this order.
    zones: Vec<ZoneDefinition>,
    overrides: HashMap<String, HashMap<String, f64>>,
}

impl ZoneProfileStore {
    /// Install the base zones (sorted by `min` ascending) and per-user
    /// threshold overrides. Replaces any previous configuration.
    pub fn configure(
        &mut self,
        mut base: Vec<ZoneDefinition>,
        per_user: HashMap<String, HashMap<String, f64>>,
    ) {
        base.sort_by(|a, b| a.min.total_cmp(&b.min));
        self.zones = base;
        self.overrides = per_user;
    }

    /// Resolve the zone a user's heart rate falls into.
    ///
    /// Iterates zones in descending `min` and returns the first whose
    /// effective threshold is at or below `hr`. Returns `None` when `hr ≤ 0`
    /// or no zones are configured.
    pub fn resolve_zone(&self, user_id: &str, hr: f64) -> Option<&ZoneDefinition> {
        if hr <= 0.0 || !hr.is_finite() {
            return None;
        }
        self.zones
            .iter()
            .rev()
            .find(|zone| self.effective_threshold(user_id, zone) <= hr)
    }

    /// The rank of a zone id in ascending-`min` order, if configured.
    pub fn rank(&self, zone_id: &str) -> Option<usize> {
        self.zones.iter().position(|z| z.id == zone_id)
    }

    /// Look up a zone definition by id.
    pub fn get(&self, zone_id: &str) -> Option<&ZoneDefinition> {
        self.zones.iter().find(|z| z.id == zone_id)
    }

    /// Resolve a zone id or (case-insensitive) zone name to a definition.
    pub fn resolve_ref(&self, zone_ref: &str) -> Option<&ZoneDefinition> {
        let lowered = zone_ref.to_lowercase();
        self.zones
            .iter()
            .find(|z| z.id == zone_ref || z.name.to_lowercase() == lowered)
    }

    /// All configured zones in ascending-`min` order.
    pub fn all(&self) -> &[ZoneDefinition] {
        &self.zones
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    fn effective_threshold(&self, user_id: &str, zone: &ZoneDefinition) -> f64 {
        let Some(user_overrides) = self.overrides.get(user_id) else {
            return zone.min;
        };
        user_overrides
            .get(&zone.id)
            .or_else(|| user_overrides.get(&zone.name.to_lowercase()))
            .copied()
            .unwrap_or(zone.min)
    }
}

#[cfg(test)]
#[path = "zones_tests.rs"]
mod tests;
