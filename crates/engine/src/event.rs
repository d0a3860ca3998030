// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session event types broadcast to host-process subscribers.

use serde::Serialize;

use crate::governance::GovernanceEvent;
use crate::treasure::CoinAward;

/// Events emitted by the session actor, tagged for wire consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The pre-session buffer filled and a session began.
    SessionStarted { session_id: String, start_ms: u64 },
    /// The session ended and its snapshot was handed to the persister.
    SessionEnded {
        session_id: String,
        reason: String,
        tick_count: usize,
        duration_ms: u64,
        persisted: bool,
    },
    /// An autosave snapshot was handed to the persister.
    Autosaved { session_id: String, tick_count: usize },
    /// A device changed hands inside the grace window and the previous
    /// occupant's state migrated to the new identity.
    GracePeriodTransfer {
        device_id: String,
        from_user: String,
        to_user: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        from_entity: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to_entity: Option<String>,
    },
    /// Coins were awarded at an interval close.
    CoinsAwarded { awards: Vec<CoinAward> },
    /// A governance phase/challenge event.
    Governance(GovernanceEvent),
}
