// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor-level tests: the command channel, event broadcast, timers, and the
//! persister seam, with real (fast) timers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sweatbox::config::SessionTuning;
use sweatbox::event::SessionEvent;
use sweatbox::session::run::channel;
use sweatbox::test_support::{hr_frame, test_session_with, RecordingPersister};

fn fast_tuning() -> SessionTuning {
    SessionTuning {
        tick_interval_ms: 50,
        autosave_ms: 0,
        coin_time_unit_ms: 100,
        ..SessionTuning::default()
    }
}

#[tokio::test]
async fn actor_runs_a_session_end_to_end() -> anyhow::Result<()> {
    let persister = RecordingPersister::new();
    let shutdown = CancellationToken::new();
    let channels = channel(
        test_session_with(fast_tuning()),
        Arc::new(persister.clone()),
        shutdown.clone(),
    );
    let handle = channels.handle;
    let mut events = handle.subscribe();
    let actor = tokio::spawn(channels.actor.run());

    for _ in 0..3 {
        handle.ingest(hr_frame("strap-1", 150.0)).await;
    }

    // The session starts as soon as the buffer fills.
    let started = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(SessionEvent::SessionStarted { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await;
    anyhow::ensure!(started.is_ok(), "no SessionStarted event");

    // Let a few ticks elapse, feeding fresh samples.
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.ingest(hr_frame("strap-1", 150.0)).await;
    }

    let envelope = handle.end_session(Some("class_over".to_owned())).await;
    anyhow::ensure!(envelope.ok, "end_session failed: {:?}", envelope.message);

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), actor).await;

    let payloads = persister.payloads();
    anyhow::ensure!(payloads.len() == 1, "expected one persisted payload");
    anyhow::ensure!(payloads[0].version == 2);
    anyhow::ensure!(payloads[0].timeline.tick_count >= 3);
    Ok(())
}

#[tokio::test]
async fn ending_without_a_session_reports_session_missing() -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let channels = channel(
        test_session_with(fast_tuning()),
        Arc::new(RecordingPersister::new()),
        shutdown.clone(),
    );
    let handle = channels.handle;
    let actor = tokio::spawn(channels.actor.run());

    let envelope = handle.end_session(None).await;
    anyhow::ensure!(!envelope.ok);
    anyhow::ensure!(envelope.code.as_deref() == Some("SESSION_MISSING"));

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(2), actor).await;
    Ok(())
}
