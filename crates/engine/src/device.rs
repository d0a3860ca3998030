// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device registry: one record per physical sensor.
//!
//! Ingestion normalizes raw frames into typed metric slots and maintains the
//! liveness bookkeeping (`last_seen`, `last_significant_activity`) that
//! drives the inactivity ramp and eventual removal.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::frame::{slugify, MetricSample, RawFrame};

/// Sensor classification inferred from frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    HeartRate,
    Cadence,
    Power,
    Speed,
    #[default]
    Unknown,
}

impl DeviceType {
    /// Cadence-like devices keep reporting frames while the rider coasts, so
    /// their liveness is judged by `last_significant_activity` rather than
    /// `last_seen`.
    pub fn is_cadence_like(&self) -> bool {
        matches!(self, Self::Cadence | Self::Power | Self::Speed)
    }
}

/// Liveness thresholds for the inactivity ramp, in milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeviceThresholds {
    /// A cadence-like device past this without significant activity is
    /// coasting: its displayed rpm/power/speed are forced to zero.
    pub rpm_zero_ms: u64,
    /// Past this, the device is flagged inactive and a removal countdown
    /// starts.
    pub inactive_ms: u64,
    /// Past this, the device is removed by `prune`.
    pub remove_ms: u64,
}

impl Default for DeviceThresholds {
    fn default() -> Self {
        Self { rpm_zero_ms: 12_000, inactive_ms: 30_000, remove_ms: 120_000 }
    }
}

/// One registered sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DeviceType,
    pub profile: Option<String>,
    pub last_seen_ms: u64,
    pub last_significant_activity_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactive_since_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removal_at_ms: Option<u64>,
    /// Last merged metric sample; slots persist across frames.
    pub sample: MetricSample,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_occupant_id: Option<String>,
}

impl Device {
    /// Whether the inactivity flag is currently set.
    pub fn is_inactive(&self) -> bool {
        self.inactive_since_ms.is_some()
    }

    /// Whether a cadence-like device has gone long enough without
    /// significant activity to be treated as coasting.
    pub fn is_coasting(&self, now_ms: u64, thresholds: &DeviceThresholds) -> bool {
        self.kind.is_cadence_like()
            && now_ms.saturating_sub(self.last_significant_activity_ms) > thresholds.rpm_zero_ms
    }

    /// The metric sample adjusted for display: a coasting device reports
    /// zero rpm/power/speed even though its slots hold the last readings.
    pub fn display_sample(&self, now_ms: u64, thresholds: &DeviceThresholds) -> MetricSample {
        let mut sample = self.sample.clone();
        if self.is_coasting(now_ms, thresholds) {
            if sample.rpm.is_some() {
                sample.rpm = Some(0.0);
            }
            if sample.power.is_some() {
                sample.power = Some(0.0);
            }
            if sample.speed.is_some() {
                sample.speed = Some(0.0);
            }
        }
        sample
    }

    /// Milliseconds since the reading relevant to this device's liveness.
    fn time_since_activity(&self, now_ms: u64) -> u64 {
        let anchor = if self.kind.is_cadence_like() {
            self.last_significant_activity_ms
        } else {
            self.last_seen_ms
        };
        now_ms.saturating_sub(anchor)
    }
}

/// Result of ingesting one frame.
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub device_id: String,
    /// Set when this frame created the device record, so the orchestrator
    /// can reset any cumulative counters bound to it.
    pub created: bool,
}

/// Registry of all sensors seen this session.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: IndexMap<String, Device>,
}

impl DeviceRegistry {
    /// Ingest a frame: create or update the device record and refresh its
    /// liveness bookkeeping.
    pub fn register_or_update(
        &mut self,
        frame: &RawFrame,
        now_ms: u64,
    ) -> Result<IngestResult, EngineError> {
        let id = slugify(&frame.device_id)?;
        let created = !self.devices.contains_key(&id);

        let device = self.devices.entry(id.clone()).or_insert_with(|| Device {
            id: id.clone(),
            kind: DeviceType::Unknown,
            profile: None,
            last_seen_ms: now_ms,
            last_significant_activity_ms: now_ms,
            inactive_since_ms: None,
            removal_at_ms: None,
            sample: MetricSample::default(),
            last_occupant_id: None,
        });

        if let Some(ref profile) = frame.profile {
            device.profile = Some(profile.clone());
        }
        device.sample.absorb(frame);
        device.last_seen_ms = now_ms;
        // Only a frame that actually carried a positive reading refreshes
        // activity; stale slots alone do not.
        let significant = frame.heart_rate().is_some_and(|v| v > 0.0)
            || frame.cadence().is_some_and(|v| v > 0.0)
            || frame.power().is_some_and(|v| v > 0.0)
            || frame.speed().is_some_and(|v| v > 0.0);
        if significant {
            device.last_significant_activity_ms = now_ms;
            device.inactive_since_ms = None;
            device.removal_at_ms = None;
        }

        // Definitive type signals win over the unknown default.
        if frame.heart_rate().is_some() {
            device.kind = DeviceType::HeartRate;
        } else if frame.power().is_some() {
            device.kind = DeviceType::Power;
        } else if device.kind == DeviceType::Unknown {
            if frame.cadence().is_some() || frame.revolutions().is_some() {
                device.kind = DeviceType::Cadence;
            } else if frame.speed().is_some() {
                device.kind = DeviceType::Speed;
            }
        }

        if created {
            debug!(device = %id, kind = ?device.kind, "device registered");
        }
        Ok(IngestResult { device_id: id, created })
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Record the current occupant for a device.
    pub fn assign(&mut self, device_id: &str, occupant_id: &str) {
        if let Some(device) = self.devices.get_mut(device_id) {
            device.last_occupant_id = Some(occupant_id.to_owned());
        }
    }

    /// Clear the occupant marker for a device.
    pub fn unassign(&mut self, device_id: &str) {
        if let Some(device) = self.devices.get_mut(device_id) {
            device.last_occupant_id = None;
        }
    }

    /// Advance the inactivity ramp and remove devices past the removal
    /// deadline. Returns the removed device ids.
    ///
    /// Ramp: past `inactive_ms` the device is flagged with `inactive_since`
    /// and a `removal_at` countdown; past `remove_ms` it is deleted. A fresh
    /// reading before the deadline clears both flags (handled on ingest).
    pub fn prune(&mut self, now_ms: u64, thresholds: &DeviceThresholds) -> Vec<String> {
        let mut removed = Vec::new();
        for device in self.devices.values_mut() {
            let since_activity = device.time_since_activity(now_ms);
            if since_activity > thresholds.remove_ms {
                removed.push(device.id.clone());
            } else if since_activity > thresholds.inactive_ms {
                if device.inactive_since_ms.is_none() {
                    device.inactive_since_ms = Some(now_ms);
                    device.removal_at_ms =
                        Some(now_ms + (thresholds.remove_ms - thresholds.inactive_ms));
                    debug!(device = %device.id, "device inactive, removal countdown started");
                }
            } else if device.inactive_since_ms.is_some() {
                device.inactive_since_ms = None;
                device.removal_at_ms = None;
            }
        }
        for id in &removed {
            self.devices.shift_remove(id);
            debug!(device = %id, "device removed");
        }
        removed
    }

    /// Drop all device records (session reset).
    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
