// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::device::DeviceThresholds;

/// Group-fitness telemetry and media-governance session core.
#[derive(Debug, Parser)]
#[command(name = "sweatbox", version, about)]
pub struct Config {
    /// Tick interval in milliseconds.
    #[arg(long, env = "SWEATBOX_TICK_INTERVAL_MS", default_value = "5000")]
    pub tick_interval_ms: u64,

    /// Autosave interval in milliseconds (0 = disabled).
    #[arg(long, env = "SWEATBOX_AUTOSAVE_MS", default_value = "15000")]
    pub autosave_ms: u64,

    /// Valid heart-rate samples required before a session starts.
    #[arg(long, env = "SWEATBOX_PRESESSION_THRESHOLD", default_value = "3")]
    pub pre_session_threshold: usize,

    /// Width of one coin interval in milliseconds.
    #[arg(long, env = "SWEATBOX_COIN_UNIT_MS", default_value = "5000")]
    pub coin_time_unit_ms: u64,

    /// Cadence-zero threshold in milliseconds (coasting detection).
    #[arg(long, env = "SWEATBOX_RPM_ZERO_MS", default_value = "12000")]
    pub rpm_zero_ms: u64,

    /// Inactivity threshold in milliseconds before a device is flagged.
    #[arg(long, env = "SWEATBOX_INACTIVE_MS", default_value = "30000")]
    pub inactive_ms: u64,

    /// Removal threshold in milliseconds; also the no-activity session end.
    #[arg(long, env = "SWEATBOX_REMOVE_MS", default_value = "120000")]
    pub remove_ms: u64,

    /// How long an empty roster is tolerated before the session ends.
    #[arg(long, env = "SWEATBOX_EMPTY_SESSION_MS", default_value = "60000")]
    pub empty_session_ms: u64,

    /// Grace window for device-handoff state transfer.
    #[arg(long, env = "SWEATBOX_TRANSFER_GRACE_MS", default_value = "60000")]
    pub transfer_grace_ms: u64,

    /// Zone configuration file (JSON).
    #[arg(long, env = "SWEATBOX_ZONES")]
    pub zones: Option<PathBuf>,

    /// Roster configuration file (JSON).
    #[arg(long, env = "SWEATBOX_ROSTER")]
    pub roster: Option<PathBuf>,

    /// Governance configuration file (JSON).
    #[arg(long, env = "SWEATBOX_GOVERNANCE")]
    pub governance: Option<PathBuf>,

    /// Directory session snapshots are written into.
    #[arg(long, env = "SWEATBOX_SESSIONS_DIR", default_value = "sessions")]
    pub sessions_dir: PathBuf,

    /// Log format (json or text).
    #[arg(long, env = "SWEATBOX_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SWEATBOX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            anyhow::bail!("--tick-interval-ms must be positive");
        }
        if self.pre_session_threshold == 0 {
            anyhow::bail!("--pre-session-threshold must be at least 1");
        }
        if self.inactive_ms >= self.remove_ms {
            anyhow::bail!("--inactive-ms must be below --remove-ms");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// Engine tuning derived from the parsed flags.
    pub fn tuning(&self) -> SessionTuning {
        SessionTuning {
            tick_interval_ms: self.tick_interval_ms,
            autosave_ms: self.autosave_ms,
            pre_session_threshold: self.pre_session_threshold,
            coin_time_unit_ms: self.coin_time_unit_ms,
            device_thresholds: DeviceThresholds {
                rpm_zero_ms: self.rpm_zero_ms,
                inactive_ms: self.inactive_ms,
                remove_ms: self.remove_ms,
            },
            empty_session_ms: self.empty_session_ms,
            transfer_grace_ms: self.transfer_grace_ms,
        }
    }
}

/// Engine knobs grouped for the session core. Field defaults follow the
/// production configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionTuning {
    pub tick_interval_ms: u64,
    pub autosave_ms: u64,
    pub pre_session_threshold: usize,
    pub coin_time_unit_ms: u64,
    pub device_thresholds: DeviceThresholds,
    pub empty_session_ms: u64,
    pub transfer_grace_ms: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            autosave_ms: 15_000,
            pre_session_threshold: 3,
            coin_time_unit_ms: 5_000,
            device_thresholds: DeviceThresholds::default(),
            empty_session_ms: 60_000,
            transfer_grace_ms: 60_000,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
