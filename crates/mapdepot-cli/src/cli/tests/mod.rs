//! CLI parse tests.

use super::{with_paths, Cli, CliCommand};
use clap::Parser;
use mapdepot_core::config::MapdepotConfig;
use std::path::{Path, PathBuf};

fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

#[test]
fn cli_parse_fetch_defaults() {
    match parse(&["mapdepot", "fetch", "manifest.json"]) {
        CliCommand::Fetch {
            manifest,
            asset_dir,
            ledger,
            jobs,
            callers,
        } => {
            assert_eq!(manifest, PathBuf::from("manifest.json"));
            assert!(asset_dir.is_none());
            assert!(ledger.is_none());
            assert!(jobs.is_none());
            assert!(callers.is_none());
        }
        _ => panic!("expected Fetch"),
    }
}

#[test]
fn cli_parse_fetch_overrides() {
    match parse(&[
        "mapdepot",
        "fetch",
        "m.json",
        "--asset-dir",
        "/srv/maps",
        "--ledger",
        "/srv/ledger.json",
        "--jobs",
        "2",
        "--callers",
        "16",
    ]) {
        CliCommand::Fetch {
            asset_dir,
            ledger,
            jobs,
            callers,
            ..
        } => {
            assert_eq!(asset_dir.as_deref(), Some(Path::new("/srv/maps")));
            assert_eq!(ledger.as_deref(), Some(Path::new("/srv/ledger.json")));
            assert_eq!(jobs, Some(2));
            assert_eq!(callers, Some(16));
        }
        _ => panic!("expected Fetch"),
    }
}

#[test]
fn cli_parse_fetch_requires_manifest() {
    assert!(Cli::try_parse_from(["mapdepot", "fetch"]).is_err());
}

#[test]
fn cli_parse_status() {
    match parse(&["mapdepot", "status", "--ledger", "l.json"]) {
        CliCommand::Status { ledger } => assert_eq!(ledger, Some(PathBuf::from("l.json"))),
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_reconcile() {
    match parse(&["mapdepot", "reconcile"]) {
        CliCommand::Reconcile { asset_dir, ledger } => {
            assert!(asset_dir.is_none());
            assert!(ledger.is_none());
        }
        _ => panic!("expected Reconcile"),
    }
}

#[test]
fn path_flags_override_config() {
    let cfg = MapdepotConfig {
        asset_dir: Some(PathBuf::from("/cfg/maps")),
        ..MapdepotConfig::default()
    };
    let cfg = with_paths(cfg, None, Some(PathBuf::from("/flag/ledger.json")));
    assert_eq!(cfg.asset_dir, Some(PathBuf::from("/cfg/maps")));
    assert_eq!(cfg.ledger_path().unwrap(), PathBuf::from("/flag/ledger.json"));
}

#[test]
fn status_survives_corrupt_ledger() {
    let tmp = tempfile::tempdir().unwrap();
    let ledger = tmp.path().join("ledger.json");
    std::fs::write(&ledger, b"{ truncated").unwrap();
    let cfg = with_paths(MapdepotConfig::default(), None, Some(ledger.clone()));
    assert!(super::commands::run_status(&cfg).is_ok());

    std::fs::write(&ledger, br#"{"version": 2}"#).unwrap();
    assert!(super::commands::run_status(&cfg).is_ok());
}

#[test]
fn status_without_ledger_is_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = with_paths(
        MapdepotConfig::default(),
        None,
        Some(tmp.path().join("missing.json")),
    );
    assert!(super::commands::run_status(&cfg).is_ok());
}
