// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host wiring — shared by `main` and integration tests.
//!
//! Drives a session actor from newline-delimited JSON frames on stdin and
//! persists snapshots through a [`FilePersister`]. This is deliberately the
//! only place that owns a real clock, transport, or filesystem.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::frame::RawFrame;
use crate::governance::GovernanceConfig;
use crate::persist::FilePersister;
use crate::roster::{DeviceAssignment, RosterEntry};
use crate::session::{self, FitnessSession};
use crate::zones::ZoneConfig;

/// Wire shape of the roster file.
#[derive(Debug, Default, Deserialize)]
pub struct RosterFile {
    #[serde(default)]
    pub roster: Vec<RosterEntry>,
    #[serde(default)]
    pub assignments: Vec<DeviceAssignment>,
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / SWEATBOX_LOG_LEVEL > RUST_LOG > default.
    let filter = if std::env::var("SWEATBOX_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Run a session host: stdin frames in, snapshots out, until EOF.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    let mut session = FitnessSession::new(config.tuning());
    let now = session::run::epoch_ms();

    let zone_config: Option<ZoneConfig> = match config.zones {
        Some(ref path) => Some(load_json(path)?),
        None => None,
    };
    let governance_config: GovernanceConfig = match config.governance {
        Some(ref path) => load_json(path)?,
        None => GovernanceConfig::default(),
    };
    session.configure_governance(governance_config, zone_config);

    if let Some(ref path) = config.roster {
        let roster_file: RosterFile = load_json(path)?;
        if let Err(error) = session.set_roster(roster_file.roster, roster_file.assignments, now) {
            anyhow::bail!("invalid roster file: {error}");
        }
    }

    let shutdown = CancellationToken::new();
    let persister = Arc::new(FilePersister::new(config.sessions_dir.clone()));
    let channels = session::run::channel(session, persister, shutdown.clone());
    let handle = channels.handle;
    let actor = tokio::spawn(channels.actor.run());

    info!("reading frames from stdin");
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<RawFrame>(trimmed) {
                            Ok(frame) => handle.ingest(frame).await,
                            Err(error) => warn!("unparseable frame: {error}"),
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!("stdin read failed: {error}");
                        break;
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }

    info!("stdin closed, ending session");
    let _ = handle.end_session(Some("host_eof".to_owned())).await;
    shutdown.cancel();
    match actor.await {
        Ok(result) => result,
        Err(join_error) => anyhow::bail!("session actor panicked: {join_error}"),
    }
}
