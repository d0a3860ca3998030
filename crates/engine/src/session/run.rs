// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session actor: one tokio task owning all session state, driven by a
//! `select!` loop over the command channel, the tick and autosave timers,
//! the governance wakeup, and the shutdown token.
//!
//! External entry points send [`SessionCommand`]s; events fan out on a
//! broadcast channel. Nothing else touches the state, which is what makes
//! the whole core single-writer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SessionTuning;
use crate::error::{EngineError, Envelope};
use crate::event::SessionEvent;
use crate::frame::RawFrame;
use crate::governance::{GovernanceConfig, GovernanceStatus, MediaItem, Selection};
use crate::persist::Persister;
use crate::roster::{DeviceAssignment, GuestAssignment, RosterEntry};
use crate::zones::ZoneConfig;

use super::{EndReason, FitnessSession, Lifecycle};

/// Commands accepted by the session actor.
pub enum SessionCommand {
    Ingest(RawFrame),
    SetRoster {
        entries: Vec<RosterEntry>,
        assignments: Vec<DeviceAssignment>,
        reply: oneshot::Sender<Envelope<()>>,
    },
    AssignGuest {
        device_id: String,
        assignment: GuestAssignment,
        reply: oneshot::Sender<Envelope<()>>,
    },
    ClearAssignment {
        device_id: String,
        reply: oneshot::Sender<Envelope<()>>,
    },
    SetMedia(Option<MediaItem>),
    Configure {
        config: GovernanceConfig,
        zone_config: Option<ZoneConfig>,
    },
    TriggerChallenge(Option<Selection>),
    Pause,
    Resume,
    SnapshotRef(String),
    VoiceMemoCount(u32),
    EndSession {
        reason: Option<String>,
        reply: oneshot::Sender<Envelope<()>>,
    },
    GovernanceStatus {
        reply: oneshot::Sender<GovernanceStatus>,
    },
}

/// Cloneable handle for talking to a running session actor.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Fire-and-forget frame ingestion.
    pub async fn ingest(&self, frame: RawFrame) {
        let _ = self.cmd_tx.send(SessionCommand::Ingest(frame)).await;
    }

    pub async fn set_roster(
        &self,
        entries: Vec<RosterEntry>,
        assignments: Vec<DeviceAssignment>,
    ) -> Envelope<()> {
        self.request(|reply| SessionCommand::SetRoster { entries, assignments, reply }).await
    }

    pub async fn assign_guest(
        &self,
        device_id: String,
        assignment: GuestAssignment,
    ) -> Envelope<()> {
        self.request(|reply| SessionCommand::AssignGuest { device_id, assignment, reply }).await
    }

    pub async fn clear_assignment(&self, device_id: String) -> Envelope<()> {
        self.request(|reply| SessionCommand::ClearAssignment { device_id, reply }).await
    }

    pub async fn set_media(&self, media: Option<MediaItem>) {
        let _ = self.cmd_tx.send(SessionCommand::SetMedia(media)).await;
    }

    pub async fn configure(&self, config: GovernanceConfig, zone_config: Option<ZoneConfig>) {
        let _ = self.cmd_tx.send(SessionCommand::Configure { config, zone_config }).await;
    }

    pub async fn trigger_challenge(&self, selection: Option<Selection>) {
        let _ = self.cmd_tx.send(SessionCommand::TriggerChallenge(selection)).await;
    }

    pub async fn pause(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Resume).await;
    }

    pub async fn end_session(&self, reason: Option<String>) -> Envelope<()> {
        self.request(|reply| SessionCommand::EndSession { reason, reply }).await
    }

    pub async fn governance_status(&self) -> Option<GovernanceStatus> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::GovernanceStatus { reply })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok()
    }

    async fn request<F>(&self, build: F) -> Envelope<()>
    where
        F: FnOnce(oneshot::Sender<Envelope<()>>) -> SessionCommand,
    {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(build(reply)).await.is_err() {
            return Envelope::err(EngineError::SessionMissing, "session actor stopped");
        }
        rx.await
            .unwrap_or_else(|_| Envelope::err(EngineError::SessionMissing, "session actor stopped"))
    }
}

/// The actor task. Owns the [`FitnessSession`] exclusively.
pub struct SessionActor {
    session: FitnessSession,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
    persister: Arc<dyn Persister>,
    shutdown: CancellationToken,
    /// Autosave latch: prevents overlapping saves without blocking the tick.
    save_in_flight: Arc<AtomicBool>,
}

/// A connected handle/actor pair.
pub struct SessionChannels {
    pub handle: SessionHandle,
    pub actor: SessionActor,
}

/// Build a session actor and its handle.
pub fn channel(
    session: FitnessSession,
    persister: Arc<dyn Persister>,
    shutdown: CancellationToken,
) -> SessionChannels {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, _) = broadcast::channel(256);
    let handle = SessionHandle { cmd_tx, event_tx: event_tx.clone() };
    let actor = SessionActor {
        session,
        cmd_rx,
        event_tx,
        persister,
        shutdown,
        save_in_flight: Arc::new(AtomicBool::new(false)),
    };
    SessionChannels { handle, actor }
}

impl SessionActor {
    /// Run until shutdown or the command channel closes.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let tuning: SessionTuning = *self.session.tuning();
        let mut tick = tokio::time::interval(Duration::from_millis(tuning.tick_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First interval fires immediately; skip it so ticks align to the
        // configured cadence after session start.
        tick.tick().await;

        let autosave_enabled = tuning.autosave_ms > 0;
        let mut autosave =
            tokio::time::interval(Duration::from_millis(tuning.autosave_ms.max(1)));
        autosave.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        autosave.tick().await;

        loop {
            let governance_wakeup = self.session.next_governance_wakeup_ms();
            tokio::select! {
                // 1. External commands.
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }

                // 2. Tick cadence: timeouts first, then the pipeline.
                _ = tick.tick() => {
                    let now = epoch_ms();
                    if let Some(reason) = self.session.due_timeout(now) {
                        self.end(reason, now).await;
                    } else {
                        let events = self.session.tick(now);
                        self.broadcast(events);
                    }
                }

                // 3. Autosave (fire-and-forget with overlap latch).
                _ = autosave.tick(), if autosave_enabled => {
                    self.autosave(epoch_ms());
                }

                // 4. Governance deadline (hysteresis, grace, debounce,
                //    challenge schedule/expiry).
                _ = sleep_until_epoch(governance_wakeup), if governance_wakeup.is_some() => {
                    let events = self.session.governance_poll(epoch_ms());
                    self.broadcast(events);
                }

                // 5. Shutdown preempts all timers.
                _ = self.shutdown.cancelled() => {
                    let now = epoch_ms();
                    if self.session.lifecycle() == Lifecycle::Active {
                        self.end(EndReason::Explicit("shutdown".to_owned()), now).await;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        let now = epoch_ms();
        match cmd {
            SessionCommand::Ingest(frame) => match self.session.ingest(&frame, now) {
                Ok(events) => self.broadcast(events),
                Err(error) => {
                    debug!(code = %error, device = %frame.device_id, "frame rejected");
                }
            },
            SessionCommand::SetRoster { entries, assignments, reply } => {
                let envelope = match self.session.set_roster(entries, assignments, now) {
                    Ok(()) => Envelope::ok_empty(),
                    Err(error) => Envelope::from(error),
                };
                let _ = reply.send(envelope);
            }
            SessionCommand::AssignGuest { device_id, assignment, reply } => {
                let envelope = match self.session.assign_guest(&device_id, assignment, now) {
                    Ok(events) => {
                        self.broadcast(events);
                        Envelope::ok_empty()
                    }
                    Err(error) => Envelope::from(error),
                };
                let _ = reply.send(envelope);
            }
            SessionCommand::ClearAssignment { device_id, reply } => {
                let envelope = match self.session.clear_assignment(&device_id) {
                    Ok(events) => {
                        self.broadcast(events);
                        Envelope::ok_empty()
                    }
                    Err(error) => Envelope::from(error),
                };
                let _ = reply.send(envelope);
            }
            SessionCommand::SetMedia(media) => {
                let events = self.session.set_media(media, now);
                self.broadcast(events);
            }
            SessionCommand::Configure { config, zone_config } => {
                self.session.configure_governance(config, zone_config);
            }
            SessionCommand::TriggerChallenge(selection) => {
                let events = self.session.trigger_challenge(selection, now);
                self.broadcast(events);
            }
            SessionCommand::Pause => self.session.governance_pause(now),
            SessionCommand::Resume => self.session.governance_resume(now),
            SessionCommand::SnapshotRef(reference) => {
                self.session.queue_snapshot_ref(reference);
            }
            SessionCommand::VoiceMemoCount(count) => {
                self.session.attach_voice_memo_count(count);
            }
            SessionCommand::EndSession { reason, reply } => {
                let reason = reason
                    .map(EndReason::Explicit)
                    .unwrap_or_else(|| EndReason::Explicit("requested".to_owned()));
                let envelope = if self.session.lifecycle() == Lifecycle::Active {
                    self.end(reason, now).await;
                    Envelope::ok_empty()
                } else {
                    Envelope::err(EngineError::SessionMissing, "no active session")
                };
                let _ = reply.send(envelope);
            }
            SessionCommand::GovernanceStatus { reply } => {
                let _ = reply.send(self.session.governance().status());
            }
        }
    }

    /// End the session and run the final persist. The in-flight autosave is
    /// never cancelled; the final save only proceeds through the
    /// not-already-saving branch.
    async fn end(&mut self, reason: EndReason, now_ms: u64) {
        match self.session.end_session(&reason, now_ms) {
            Ok(end) => {
                self.broadcast(end.events);
                let Some(payload) = end.payload else {
                    return;
                };
                if self.save_in_flight.swap(true, Ordering::Acquire) {
                    warn!("autosave in flight at session end, final save skipped");
                    return;
                }
                if let Err(error) = self.persister.persist(payload).await {
                    warn!("final persist failed: {error:#}");
                }
                self.save_in_flight.store(false, Ordering::Release);
            }
            Err(error) => {
                debug!(code = %error, "end_session with no active session");
            }
        }
    }

    /// Kick off an autosave without blocking the actor.
    fn autosave(&mut self, now_ms: u64) {
        if self.session.lifecycle() != Lifecycle::Active {
            return;
        }
        if self.save_in_flight.swap(true, Ordering::Acquire) {
            debug!("autosave skipped, previous save still in flight");
            return;
        }
        let Some(payload) = self.session.autosave_payload(now_ms) else {
            self.save_in_flight.store(false, Ordering::Release);
            return;
        };
        self.broadcast(vec![SessionEvent::Autosaved {
            session_id: payload.session_id.clone(),
            tick_count: payload.timeline.tick_count,
        }]);
        let persister = Arc::clone(&self.persister);
        let latch = Arc::clone(&self.save_in_flight);
        tokio::spawn(async move {
            if let Err(error) = persister.persist(payload).await {
                warn!("autosave persist failed: {error:#}");
            }
            latch.store(false, Ordering::Release);
        });
    }

    fn broadcast(&self, events: Vec<SessionEvent>) {
        for event in events {
            let _ = self.event_tx.send(event);
        }
    }

    /// Direct access for tests driving the actor synchronously.
    pub fn session_mut(&mut self) -> &mut FitnessSession {
        &mut self.session
    }
}

/// Sleep until an epoch-millisecond instant (resolves immediately if past).
async fn sleep_until_epoch(target_ms: Option<u64>) {
    match target_ms {
        Some(target) => {
            let delay = target.saturating_sub(epoch_ms());
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        None => std::future::pending().await,
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
