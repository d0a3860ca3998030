// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound sensor frame wire model and metric normalization.
//!
//! Frames arrive as loosely-typed JSON from ANT/BLE bridge processes. This
//! module is the ingress boundary: everything past it works with typed
//! [`MetricSample`] slots. Unknown fields are ignored; well-known raw fields
//! are mapped additively onto the sample.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// A raw sensor frame as received from the bridge process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    /// Message topic; only `"fitness"` frames reach the session core.
    #[serde(default)]
    pub topic: String,
    /// Bridge transport type (e.g. `"ant"`).
    #[serde(rename = "type", default)]
    pub transport: Option<String>,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Sensor profile string from the bridge (e.g. `"HR"`, `"SPDCAD"`, `"PWR"`).
    #[serde(default)]
    pub profile: Option<String>,
    /// Raw metric map; well-known keys are normalized, the rest ignored.
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
    #[serde(rename = "dongleIndex", default)]
    pub dongle_index: Option<u32>,
    /// Epoch milliseconds; the ingest path substitutes its own clock if absent.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

impl RawFrame {
    /// Heart rate in bpm, accepted from any of the known aliases.
    pub fn heart_rate(&self) -> Option<f64> {
        finite_positive_or_zero(
            self.field("heartRate")
                .or_else(|| self.field("heart_rate"))
                .or_else(|| self.field("ComputedHeartRate")),
        )
    }

    /// Cadence in rpm.
    pub fn cadence(&self) -> Option<f64> {
        finite_positive_or_zero(self.field("CalculatedCadence").or_else(|| self.field("cadence")))
    }

    /// Instantaneous power in watts.
    pub fn power(&self) -> Option<f64> {
        finite_positive_or_zero(self.field("InstantaneousPower").or_else(|| self.field("power")))
    }

    /// Speed in the bridge's native unit.
    pub fn speed(&self) -> Option<f64> {
        finite_positive_or_zero(self.field("CalculatedSpeed").or_else(|| self.field("speed")))
    }

    /// Accumulated distance.
    pub fn distance(&self) -> Option<f64> {
        finite_positive_or_zero(
            self.field("CalculatedDistance").or_else(|| self.field("distance")),
        )
    }

    /// Cumulative crank revolution count.
    pub fn revolutions(&self) -> Option<f64> {
        finite_positive_or_zero(self.field("CumulativeCadenceRevolutionCount"))
    }

    /// Battery level percentage.
    pub fn battery(&self) -> Option<u8> {
        self.field("BatteryLevel").map(|v| v.clamp(0.0, 100.0) as u8)
    }

    /// Whether the frame carries any recognized metric at all.
    pub fn has_metric(&self) -> bool {
        self.heart_rate().is_some()
            || self.cadence().is_some()
            || self.power().is_some()
            || self.speed().is_some()
            || self.distance().is_some()
            || self.revolutions().is_some()
            || self.battery().is_some()
    }

    fn field(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }
}

/// Reject NaN/infinite readings and clamp negatives to zero.
fn finite_positive_or_zero(value: Option<f64>) -> Option<f64> {
    match value {
        Some(v) if v.is_finite() => Some(v.max(0.0)),
        _ => None,
    }
}

/// Typed metric slots for one device. Mapping is additive: a frame only
/// overwrites the slots it carries, the rest keep their prior values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revolutions: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
}

impl MetricSample {
    /// Merge a frame's recognized fields into this sample.
    pub fn absorb(&mut self, frame: &RawFrame) {
        if let Some(hr) = frame.heart_rate() {
            self.heart_rate = Some(hr);
        }
        if let Some(rpm) = frame.cadence() {
            self.rpm = Some(rpm);
        }
        if let Some(power) = frame.power() {
            self.power = Some(power);
        }
        if let Some(speed) = frame.speed() {
            self.speed = Some(speed);
        }
        if let Some(distance) = frame.distance() {
            self.distance = Some(distance);
        }
        if let Some(revolutions) = frame.revolutions() {
            self.revolutions = Some(revolutions);
        }
        if let Some(battery) = frame.battery() {
            self.battery = Some(battery);
        }
    }

    /// Whether any of HR, cadence, power, or speed is above zero.
    pub fn has_significant_activity(&self) -> bool {
        [self.heart_rate, self.rpm, self.power, self.speed]
            .iter()
            .any(|slot| slot.is_some_and(|v| v > 0.0))
    }
}

/// Normalize a raw identifier into a stable slug: lowercase, with every
/// non-alphanumeric run collapsed to a single underscore.
pub fn slugify(raw: &str) -> Result<String, EngineError> {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        return Err(EngineError::InvalidId);
    }
    Ok(slug)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
