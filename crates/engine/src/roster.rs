// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Participant roster, device-assignment ledger, and session entities.
//!
//! The ledger is the authoritative device → occupant mapping. A session
//! entity is one continuous stint of a profile on a device; a new entity is
//! minted on each (re)assignment, and the previous one is ended, dropped, or
//! transferred depending on how the reassignment happened.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::EngineError;
use crate::frame::slugify;

/// How a user record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSource {
    Roster,
    Guest,
    AutoAssign,
}

/// A known participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_label: Option<String>,
    /// Bound heart-rate device, when the roster pre-assigns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub zone_overrides: HashMap<String, f64>,
    pub source: UserSource,
}

/// Wire shape for one roster entry (`set_roster`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub group_label: Option<String>,
    #[serde(default)]
    pub hr_device_id: Option<String>,
    #[serde(default)]
    pub zones: Option<HashMap<String, f64>>,
}

/// Wire shape for one device assignment (`set_roster`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub device_id: String,
    pub profile_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub zones: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub allow_while_assigned: bool,
}

/// Wire shape for `assign_guest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestAssignment {
    pub name: String,
    #[serde(default)]
    pub profile_id: Option<String>,
    /// The roster user this guest is standing in for, if any.
    #[serde(default)]
    pub base_user_name: Option<String>,
    #[serde(default)]
    pub zones: Option<HashMap<String, f64>>,
    /// When set, this profile may occupy additional devices concurrently.
    #[serde(default)]
    pub allow_while_assigned: bool,
}

/// One ledger record: the current occupant of a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub device_id: String,
    pub occupant_id: String,
    pub occupant_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_user_name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub zone_overrides: HashMap<String, f64>,
    pub updated_at_ms: u64,
    pub allow_while_assigned: bool,
}

/// Session entity lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Ended,
    Dropped,
    Transferred,
}

/// One continuous stint of a profile on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntity {
    pub entity_id: String,
    pub profile_id: String,
    pub name: String,
    pub device_id: String,
    pub start_ms: u64,
    pub status: EntityStatus,
    pub coins: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transferred_to: Option<String>,
}

/// The occupant resolved for a device during the tick pipeline.
#[derive(Debug, Clone)]
pub struct ResolvedOccupant {
    pub user_id: String,
    pub display_name: String,
    pub entity_id: Option<String>,
    pub from_ledger: bool,
}

/// Outcome of `assign_guest`: the new entry plus whatever it displaced.
#[derive(Debug, Clone)]
pub struct AssignOutcome {
    pub entry: LedgerEntry,
    pub entity_id: String,
    /// The ledger entry this assignment replaced, if the device was occupied.
    pub replaced: Option<LedgerEntry>,
}

/// A non-mutating finding from `reconcile_assignments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileFinding {
    /// The ledger references a user that no longer exists.
    MissingUser { device_id: String, occupant_id: String },
    /// The bound user's `hr_device_id` disagrees with the ledger.
    DeviceMismatch { device_id: String, occupant_id: String, hr_device_id: String },
    /// The ledger references a device the registry no longer knows.
    DeviceMissing { device_id: String, occupant_id: String },
}

/// Roster of known participants plus the device-assignment ledger.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: IndexMap<String, User>,
    ledger: IndexMap<String, LedgerEntry>,
    entities: IndexMap<String, SessionEntity>,
}

fn mint_entity_id() -> String {
    format!("entity_{}", Uuid::new_v4().simple())
}

impl UserRegistry {
    /// Replace the roster and install the given device assignments.
    ///
    /// Existing ledger entries for devices not named in `assignments` are
    /// left alone (guests survive a roster refresh).
    pub fn set_roster(
        &mut self,
        entries: Vec<RosterEntry>,
        assignments: Vec<DeviceAssignment>,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        let mut users = IndexMap::new();
        for entry in entries {
            let id = match entry.id {
                Some(ref raw) => slugify(raw)?,
                None => slugify(&entry.name)?,
            };
            let hr_device_id = match entry.hr_device_id {
                Some(ref raw) => Some(slugify(raw)?),
                None => None,
            };
            users.insert(
                id.clone(),
                User {
                    id,
                    display_name: entry.name,
                    group_label: entry.group_label,
                    hr_device_id,
                    zone_overrides: entry.zones.unwrap_or_default(),
                    source: UserSource::Roster,
                },
            );
        }
        // Guests created at runtime survive a roster refresh.
        for (id, user) in &self.users {
            if user.source != UserSource::Roster && !users.contains_key(id) {
                users.insert(id.clone(), user.clone());
            }
        }
        self.users = users;

        for assignment in assignments {
            let device_id = slugify(&assignment.device_id)?;
            let occupant_id = slugify(&assignment.profile_id)?;
            if self
                .ledger
                .get(&device_id)
                .is_some_and(|existing| existing.occupant_id == occupant_id)
            {
                continue;
            }
            let name = assignment
                .name
                .clone()
                .or_else(|| self.users.get(&occupant_id).map(|u| u.display_name.clone()))
                .unwrap_or_else(|| occupant_id.clone());
            let entity_id = mint_entity_id();
            self.entities.insert(
                entity_id.clone(),
                SessionEntity {
                    entity_id: entity_id.clone(),
                    profile_id: occupant_id.clone(),
                    name: name.clone(),
                    device_id: device_id.clone(),
                    start_ms: now_ms,
                    status: EntityStatus::Active,
                    coins: 0,
                    transferred_to: None,
                },
            );
            self.ledger.insert(
                device_id.clone(),
                LedgerEntry {
                    device_id,
                    occupant_id,
                    occupant_name: name,
                    entity_id: Some(entity_id),
                    base_user_name: None,
                    zone_overrides: assignment.zones.unwrap_or_default(),
                    updated_at_ms: now_ms,
                    allow_while_assigned: assignment.allow_while_assigned,
                },
            );
        }
        Ok(())
    }

    /// Resolve the occupant of a device: ledger first, then any user whose
    /// bound `hr_device_id` matches.
    ///
    /// Ledger rows that disagree with the roster are logged and still
    /// honored — the ledger is authoritative.
    pub fn resolve_user_for_device(&self, device_id: &str) -> Option<ResolvedOccupant> {
        if let Some(entry) = self.ledger.get(device_id) {
            match self.users.get(&entry.occupant_id) {
                Some(user) => {
                    if user
                        .hr_device_id
                        .as_deref()
                        .is_some_and(|bound| bound != device_id)
                    {
                        warn!(
                            code = "LEDGER_DEVICE_MISMATCH",
                            device = %device_id,
                            occupant = %entry.occupant_id,
                            bound = ?user.hr_device_id,
                            "ledger occupant bound to a different device"
                        );
                    }
                }
                None => {
                    warn!(
                        code = "LEDGER_DEVICE_MISSING_USER",
                        device = %device_id,
                        occupant = %entry.occupant_id,
                        "ledger occupant not in roster"
                    );
                }
            }
            return Some(ResolvedOccupant {
                user_id: entry.occupant_id.clone(),
                display_name: entry.occupant_name.clone(),
                entity_id: entry.entity_id.clone(),
                from_ledger: true,
            });
        }
        self.users.values().find(|u| u.hr_device_id.as_deref() == Some(device_id)).map(|user| {
            ResolvedOccupant {
                user_id: user.id.clone(),
                display_name: user.display_name.clone(),
                entity_id: None,
                from_ledger: false,
            }
        })
    }

    /// Assign a guest (or stand-in profile) to a device, minting a new
    /// session entity. The caller decides whether the displaced occupant's
    /// state transfers (grace window) or the old entity is dropped.
    pub fn assign_guest(
        &mut self,
        device_id: &str,
        assignment: GuestAssignment,
        now_ms: u64,
    ) -> Result<AssignOutcome, EngineError> {
        let device_id = slugify(device_id).map_err(|_| EngineError::InvalidDevice)?;
        if assignment.name.trim().is_empty() {
            return Err(EngineError::InvalidPayload);
        }
        let occupant_id = match assignment.profile_id {
            Some(ref raw) => slugify(raw)?,
            None => slugify(&assignment.name)?,
        };

        // A profile without allow_while_assigned occupies at most one device.
        for entry in self.ledger.values() {
            if entry.device_id != device_id
                && entry.occupant_id == occupant_id
                && !entry.allow_while_assigned
                && !assignment.allow_while_assigned
            {
                return Err(EngineError::UserAlreadyAssigned);
            }
        }

        let replaced = self.ledger.get(&device_id).cloned();

        if !self.users.contains_key(&occupant_id) {
            self.users.insert(
                occupant_id.clone(),
                User {
                    id: occupant_id.clone(),
                    display_name: assignment.name.clone(),
                    group_label: None,
                    hr_device_id: Some(device_id.clone()),
                    zone_overrides: assignment.zones.clone().unwrap_or_default(),
                    source: UserSource::Guest,
                },
            );
        }

        let entity_id = mint_entity_id();
        self.entities.insert(
            entity_id.clone(),
            SessionEntity {
                entity_id: entity_id.clone(),
                profile_id: occupant_id.clone(),
                name: assignment.name.clone(),
                device_id: device_id.clone(),
                start_ms: now_ms,
                status: EntityStatus::Active,
                coins: 0,
                transferred_to: None,
            },
        );

        let entry = LedgerEntry {
            device_id: device_id.clone(),
            occupant_id,
            occupant_name: assignment.name,
            entity_id: Some(entity_id.clone()),
            base_user_name: assignment.base_user_name,
            zone_overrides: assignment.zones.unwrap_or_default(),
            updated_at_ms: now_ms,
            allow_while_assigned: assignment.allow_while_assigned,
        };
        self.ledger.insert(device_id, entry.clone());

        Ok(AssignOutcome { entry, entity_id, replaced })
    }

    /// Remove the ledger entry for a device, ending its entity.
    pub fn clear(&mut self, device_id: &str) -> Result<Option<LedgerEntry>, EngineError> {
        let device_id = slugify(device_id).map_err(|_| EngineError::InvalidDevice)?;
        let removed = self.ledger.shift_remove(&device_id);
        if let Some(ref entry) = removed {
            if let Some(ref entity_id) = entry.entity_id {
                self.set_entity_status(entity_id, EntityStatus::Ended);
            }
        }
        Ok(removed)
    }

    /// Drop ledger entries whose bound user no longer exists or whose device
    /// no longer matches the user's `hr_device_id`. Returns dropped ids.
    pub fn cleanup_orphan_guests(&mut self) -> Vec<String> {
        let orphaned: Vec<String> = self
            .ledger
            .values()
            .filter(|entry| match self.users.get(&entry.occupant_id) {
                None => true,
                Some(user) => user
                    .hr_device_id
                    .as_deref()
                    .is_some_and(|bound| bound != entry.device_id),
            })
            .map(|entry| entry.device_id.clone())
            .collect();
        for device_id in &orphaned {
            if let Some(entry) = self.ledger.shift_remove(device_id) {
                if let Some(ref entity_id) = entry.entity_id {
                    self.set_entity_status(entity_id, EntityStatus::Dropped);
                }
                warn!(
                    code = "LEDGER_RECONCILE_WARN",
                    device = %device_id,
                    occupant = %entry.occupant_id,
                    "orphaned ledger entry dropped"
                );
            }
        }
        orphaned
    }

    /// Report ledger inconsistencies without mutating anything.
    pub fn reconcile_assignments(&self, known_devices: &[String]) -> Vec<ReconcileFinding> {
        let mut findings = Vec::new();
        for entry in self.ledger.values() {
            match self.users.get(&entry.occupant_id) {
                None => findings.push(ReconcileFinding::MissingUser {
                    device_id: entry.device_id.clone(),
                    occupant_id: entry.occupant_id.clone(),
                }),
                Some(user) => {
                    if let Some(ref bound) = user.hr_device_id {
                        if bound != &entry.device_id {
                            findings.push(ReconcileFinding::DeviceMismatch {
                                device_id: entry.device_id.clone(),
                                occupant_id: entry.occupant_id.clone(),
                                hr_device_id: bound.clone(),
                            });
                        }
                    }
                }
            }
            if !known_devices.contains(&entry.device_id) {
                findings.push(ReconcileFinding::DeviceMissing {
                    device_id: entry.device_id.clone(),
                    occupant_id: entry.occupant_id.clone(),
                });
            }
        }
        findings
    }

    // -- Read APIs ------------------------------------------------------------

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn ledger_entry(&self, device_id: &str) -> Option<&LedgerEntry> {
        self.ledger.get(device_id)
    }

    pub fn ledger(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.ledger.values()
    }

    pub fn entity(&self, entity_id: &str) -> Option<&SessionEntity> {
        self.entities.get(entity_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &SessionEntity> {
        self.entities.values()
    }

    pub fn is_ledger_empty(&self) -> bool {
        self.ledger.is_empty()
    }

    /// Zone overrides for a user, merging the roster record with any ledger
    /// entry override (ledger wins on conflicts).
    pub fn effective_zone_overrides(&self, user_id: &str) -> HashMap<String, f64> {
        let mut merged = self
            .users
            .get(user_id)
            .map(|u| u.zone_overrides.clone())
            .unwrap_or_default();
        for entry in self.ledger.values() {
            if entry.occupant_id == user_id {
                for (zone, threshold) in &entry.zone_overrides {
                    merged.insert(zone.clone(), *threshold);
                }
            }
        }
        merged
    }

    // -- Entity mutation ------------------------------------------------------

    pub fn set_entity_status(&mut self, entity_id: &str, status: EntityStatus) {
        if let Some(entity) = self.entities.get_mut(entity_id) {
            entity.status = status;
        }
    }

    pub fn mark_entity_transferred(&mut self, entity_id: &str, to_entity: &str) {
        if let Some(entity) = self.entities.get_mut(entity_id) {
            entity.status = EntityStatus::Transferred;
            entity.transferred_to = Some(to_entity.to_owned());
        }
    }

    pub fn set_entity_coins(&mut self, entity_id: &str, coins: u64) {
        if let Some(entity) = self.entities.get_mut(entity_id) {
            entity.coins = coins;
        }
    }

    /// Reset session-scoped state (entities); the roster itself survives
    /// across sessions.
    pub fn reset_session_state(&mut self) {
        self.entities.clear();
    }
}

#[cfg(test)]
#[path = "roster_tests.rs"]
mod tests;
