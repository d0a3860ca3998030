// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::{Config, SessionTuning};

fn parse(args: &[&str]) -> anyhow::Result<Config> {
    let mut full = vec!["sweatbox"];
    full.extend_from_slice(args);
    Ok(Config::try_parse_from(full)?)
}

#[test]
fn defaults_follow_the_production_profile() -> anyhow::Result<()> {
    let config = parse(&[])?;
    config.validate()?;
    let tuning = config.tuning();
    assert_eq!(tuning.tick_interval_ms, 5_000);
    assert_eq!(tuning.autosave_ms, 15_000);
    assert_eq!(tuning.pre_session_threshold, 3);
    assert_eq!(tuning.coin_time_unit_ms, 5_000);
    assert_eq!(tuning.device_thresholds.rpm_zero_ms, 12_000);
    assert_eq!(tuning.empty_session_ms, 60_000);
    assert_eq!(tuning.transfer_grace_ms, 60_000);
    Ok(())
}

#[test]
fn zero_tick_interval_is_rejected() -> anyhow::Result<()> {
    let config = parse(&["--tick-interval-ms", "0"])?;
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn inactive_must_stay_below_remove() -> anyhow::Result<()> {
    let config = parse(&["--inactive-ms", "120000", "--remove-ms", "120000"])?;
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn bad_log_format_is_rejected() -> anyhow::Result<()> {
    let config = parse(&["--log-format", "yaml"])?;
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn tuning_defaults_match_cli_defaults() -> anyhow::Result<()> {
    let from_cli = parse(&[])?.tuning();
    let default = SessionTuning::default();
    assert_eq!(from_cli.tick_interval_ms, default.tick_interval_ms);
    assert_eq!(from_cli.pre_session_threshold, default.pre_session_threshold);
    assert_eq!(from_cli.device_thresholds.inactive_ms, default.device_thresholds.inactive_ms);
    Ok(())
}
