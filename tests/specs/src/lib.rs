// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `sweatbox` binary as a subprocess, feeds it JSONL device
//! frames over stdin, and inspects the session snapshots it writes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde_json::Value;

/// Resolve the path to the compiled `sweatbox` binary.
pub fn sweatbox_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("sweatbox")
}

/// A running `sweatbox` process that is killed on drop.
pub struct SweatboxProcess {
    child: Child,
    sessions_dir: tempfile::TempDir,
}

impl SweatboxProcess {
    /// Spawn sweatbox with a fast tick cadence and a temp sessions dir.
    pub fn start(tick_interval_ms: u64) -> anyhow::Result<Self> {
        let binary = sweatbox_binary();
        anyhow::ensure!(binary.exists(), "sweatbox binary not found at {}", binary.display());
        let sessions_dir = tempfile::tempdir()?;

        let child = Command::new(&binary)
            .args([
                "--tick-interval-ms",
                &tick_interval_ms.to_string(),
                "--autosave-ms",
                "0",
                "--sessions-dir",
                &sessions_dir.path().to_string_lossy(),
                "--log-format",
                "text",
                "--log-level",
                "warn",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, sessions_dir })
    }

    /// Write one heart-rate frame line to the process's stdin.
    pub fn send_hr(&mut self, device_id: &str, hr: f64) -> anyhow::Result<()> {
        let line = serde_json::json!({
            "topic": "fitness",
            "type": "ant",
            "deviceId": device_id,
            "profile": "HR",
            "data": { "ComputedHeartRate": hr },
        });
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("stdin not piped"))?;
        writeln!(stdin, "{line}")?;
        stdin.flush()?;
        Ok(())
    }

    /// Close stdin (ends the session) and wait for a clean exit.
    pub async fn finish(mut self, timeout: Duration) -> anyhow::Result<Vec<Value>> {
        drop(self.child.stdin.take());
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                anyhow::ensure!(status.success(), "sweatbox exited with {status}");
                break;
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("sweatbox did not exit within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut payloads = Vec::new();
        for entry in std::fs::read_dir(self.sessions_dir.path())? {
            let contents = std::fs::read_to_string(entry?.path())?;
            payloads.push(serde_json::from_str(&contents)?);
        }
        Ok(payloads)
    }
}

impl Drop for SweatboxProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
