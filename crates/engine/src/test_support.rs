// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders, fixtures, and a recording
//! persister.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

use crate::config::SessionTuning;
use crate::frame::RawFrame;
use crate::governance::challenge::ChallengeMachine;
use crate::governance::{
    ChallengeConfig, GovernanceConfig, GovernanceEngine, IntervalRange, MediaItem, Policy, Rule,
    Selection, SelectionType,
};
use crate::persist::{PersistFuture, Persister, SessionPayload};
use crate::roster::{DeviceAssignment, RosterEntry};
use crate::session::FitnessSession;
use crate::zones::{ZoneDefinition, ZoneProfileStore};

/// The four-zone ladder used throughout the tests.
pub fn test_zones() -> Vec<ZoneDefinition> {
    vec![
        zone("cool", "Cool", 90.0, "blue", 1),
        zone("active", "Active", 120.0, "green", 2),
        zone("warm", "Warm", 140.0, "orange", 5),
        zone("hot", "Hot", 160.0, "red", 10),
    ]
}

pub fn zone(id: &str, name: &str, min: f64, color: &str, coins: u64) -> ZoneDefinition {
    ZoneDefinition {
        id: id.to_owned(),
        name: name.to_owned(),
        min,
        color: color.to_owned(),
        coins,
    }
}

/// A configured zone store with no per-user overrides.
pub fn test_zone_store() -> ZoneProfileStore {
    let mut store = ZoneProfileStore::default();
    store.configure(test_zones(), HashMap::new());
    store
}

/// A heart-rate frame as the ANT bridge would send it.
pub fn hr_frame(device_id: &str, hr: f64) -> RawFrame {
    let mut data = serde_json::Map::new();
    data.insert("ComputedHeartRate".to_owned(), json!(hr));
    RawFrame {
        topic: "fitness".to_owned(),
        transport: Some("ant".to_owned()),
        device_id: device_id.to_owned(),
        profile: Some("HR".to_owned()),
        data,
        dongle_index: None,
        timestamp: None,
    }
}

/// A cadence/power frame from a bike sensor.
pub fn bike_frame(device_id: &str, rpm: f64, power: f64) -> RawFrame {
    let mut data = serde_json::Map::new();
    data.insert("CalculatedCadence".to_owned(), json!(rpm));
    data.insert("InstantaneousPower".to_owned(), json!(power));
    RawFrame {
        topic: "fitness".to_owned(),
        transport: Some("ant".to_owned()),
        device_id: device_id.to_owned(),
        profile: Some("SPDCAD".to_owned()),
        data,
        dongle_index: None,
        timestamp: None,
    }
}

/// Fast tuning for lifecycle tests: 5 s ticks, instant session start.
pub fn test_tuning() -> SessionTuning {
    SessionTuning::default()
}

/// A session with zones configured and a deterministic governance RNG.
pub fn test_session() -> FitnessSession {
    test_session_with(test_tuning())
}

pub fn test_session_with(tuning: SessionTuning) -> FitnessSession {
    let mut session = FitnessSession::new(tuning)
        .with_governance(GovernanceEngine::with_challenge_machine(seeded_machine(7)));
    session.configure_governance(
        GovernanceConfig::default(),
        Some(crate::zones::ZoneConfig {
            zones: test_zones(),
            user_overrides: HashMap::new(),
        }),
    );
    session
}

/// Drive a session straight to `active` with three HR pings, the last one
/// landing exactly at `now_ms` (which becomes the session start).
pub fn started_session(now_ms: u64) -> anyhow::Result<FitnessSession> {
    let mut session = test_session();
    for offset in (0..3u64).rev() {
        session.ingest(&hr_frame("strap-1", 120.0), now_ms - offset)?;
    }
    anyhow::ensure!(
        session.lifecycle() == crate::session::Lifecycle::Active,
        "session failed to start"
    );
    Ok(session)
}

/// Roster entries binding `u1`/`u2` to straps 1 and 2.
pub fn two_user_roster() -> (Vec<RosterEntry>, Vec<DeviceAssignment>) {
    let roster = vec![
        RosterEntry {
            id: Some("u1".to_owned()),
            name: "Ana".to_owned(),
            group_label: None,
            hr_device_id: Some("strap-1".to_owned()),
            zones: None,
        },
        RosterEntry {
            id: Some("u2".to_owned()),
            name: "Ben".to_owned(),
            group_label: None,
            hr_device_id: Some("strap-2".to_owned()),
            zones: None,
        },
    ];
    let assignments = vec![
        DeviceAssignment {
            device_id: "strap-1".to_owned(),
            profile_id: "u1".to_owned(),
            name: Some("Ana".to_owned()),
            zones: None,
            allow_while_assigned: false,
        },
        DeviceAssignment {
            device_id: "strap-2".to_owned(),
            profile_id: "u2".to_owned(),
            name: Some("Ben".to_owned()),
            zones: None,
            allow_while_assigned: false,
        },
    ];
    (roster, assignments)
}

/// A deterministic challenge machine.
pub fn seeded_machine(seed: u64) -> ChallengeMachine {
    ChallengeMachine::with_rng(StdRng::seed_from_u64(seed))
}

/// A governance engine with the test zones installed.
pub fn test_governance(config: GovernanceConfig) -> GovernanceEngine {
    let mut engine = GovernanceEngine::with_challenge_machine(seeded_machine(7));
    engine.configure(config, test_zones());
    engine
}

/// One governed-label config with a single majority-in-active policy.
pub fn majority_active_config(grace_seconds: f64) -> GovernanceConfig {
    let mut policies = IndexMap::new();
    let mut base = IndexMap::new();
    base.insert("active".to_owned(), Rule::Majority);
    policies.insert(
        "default".to_owned(),
        Policy {
            min_participants: 0,
            base_requirement: base,
            grace_period_seconds: None,
            challenges: Vec::new(),
        },
    );
    GovernanceConfig {
        grace_period_seconds: Some(grace_seconds),
        governed_labels: vec!["workout".to_owned()],
        governed_types: Vec::new(),
        policies,
        exemptions: Vec::new(),
    }
}

/// A cyclic two-selection challenge config.
pub fn cyclic_challenge_config() -> ChallengeConfig {
    ChallengeConfig {
        id: Some("drills".to_owned()),
        interval_range_seconds: IntervalRange { min: 10.0, max: 10.0 },
        selection_type: SelectionType::Cyclic,
        selections: vec![
            Selection {
                zone: "warm".to_owned(),
                rule: Rule::Majority,
                time_allowed: 30.0,
                weight: 1,
                label: Some("push to warm".to_owned()),
            },
            Selection {
                zone: "hot".to_owned(),
                rule: Rule::Any,
                time_allowed: 20.0,
                weight: 2,
                label: None,
            },
        ],
    }
}

/// Governed media item carrying the `workout` label.
pub fn governed_media() -> MediaItem {
    MediaItem {
        id: "video-1".to_owned(),
        kind: Some("show".to_owned()),
        labels: vec!["workout".to_owned()],
    }
}

/// Records every payload it is handed.
#[derive(Debug, Default, Clone)]
pub struct RecordingPersister {
    payloads: Arc<Mutex<Vec<SessionPayload>>>,
}

impl RecordingPersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<SessionPayload> {
        self.payloads.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl Persister for RecordingPersister {
    fn persist(&self, payload: SessionPayload) -> PersistFuture {
        let payloads = Arc::clone(&self.payloads);
        Box::pin(async move {
            if let Ok(mut guard) = payloads.lock() {
                guard.push(payload);
            }
            Ok(())
        })
    }
}
