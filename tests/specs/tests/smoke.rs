// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `sweatbox` binary, stream
//! JSONL frames over stdin, and inspect the persisted snapshots.

use std::time::Duration;

use sweatbox_specs::SweatboxProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn stdin_frames_produce_a_persisted_session() -> anyhow::Result<()> {
    let mut process = SweatboxProcess::start(100)?;

    // Fill the pre-session buffer, then keep broadcasting long enough for
    // a handful of ticks.
    for _ in 0..3 {
        process.send_hr("strap-1", 145.0)?;
    }
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        process.send_hr("strap-1", 145.0)?;
    }

    let payloads = process.finish(TIMEOUT).await?;
    assert_eq!(payloads.len(), 1);
    let payload = &payloads[0];
    assert_eq!(payload["version"], 2);
    assert_eq!(payload["timeline"]["encoding"], "rle");
    assert!(payload["sessionId"].as_str().is_some_and(|id| id.starts_with("fs_")));
    assert!(payload["timeline"]["tick_count"].as_u64().is_some_and(|n| n >= 3));
    Ok(())
}

#[tokio::test]
async fn a_lone_ping_persists_nothing() -> anyhow::Result<()> {
    let mut process = SweatboxProcess::start(100)?;
    process.send_hr("strap-1", 140.0)?;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let payloads = process.finish(TIMEOUT).await?;
    assert!(payloads.is_empty());
    Ok(())
}
