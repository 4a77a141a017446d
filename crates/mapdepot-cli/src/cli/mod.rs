//! CLI for the mapdepot dependency fetcher.

mod commands;
mod manifest;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mapdepot_core::config::{self, MapdepotConfig};
use std::path::PathBuf;

use commands::{run_fetch, run_reconcile, run_status, FetchArgs};

/// Top-level CLI for mapdepot.
#[derive(Debug, Parser)]
#[command(name = "mapdepot")]
#[command(about = "mapdepot: single-flight fetcher for replay map dependencies", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Resolve the map dependency of every input listed in a manifest.
    Fetch {
        /// JSON manifest: entries with `input` plus either `digest`/`kind`/`region` or `key`/`url`.
        manifest: PathBuf,
        /// Directory for fetched assets (overrides config).
        #[arg(long, value_name = "DIR")]
        asset_dir: Option<PathBuf>,
        /// Ledger file (overrides config).
        #[arg(long, value_name = "PATH")]
        ledger: Option<PathBuf>,
        /// Maximum concurrent fetches.
        #[arg(long, value_name = "W")]
        jobs: Option<usize>,
        /// Caller threads issuing resolves.
        #[arg(long, value_name = "N")]
        callers: Option<usize>,
    },

    /// Show resolved assets and processed inputs recorded in the ledger.
    Status {
        /// Ledger file (overrides config).
        #[arg(long, value_name = "PATH")]
        ledger: Option<PathBuf>,
    },

    /// Check the ledger against the asset directory and save the result.
    Reconcile {
        /// Directory for fetched assets (overrides config).
        #[arg(long, value_name = "DIR")]
        asset_dir: Option<PathBuf>,
        /// Ledger file (overrides config).
        #[arg(long, value_name = "PATH")]
        ledger: Option<PathBuf>,
    },
}

/// Apply path flags on top of the loaded config.
fn with_paths(
    mut cfg: MapdepotConfig,
    asset_dir: Option<PathBuf>,
    ledger: Option<PathBuf>,
) -> MapdepotConfig {
    if asset_dir.is_some() {
        cfg.asset_dir = asset_dir;
    }
    if ledger.is_some() {
        cfg.ledger_path = ledger;
    }
    cfg
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                manifest,
                asset_dir,
                ledger,
                jobs,
                callers,
            } => {
                let mut cfg = with_paths(cfg, asset_dir, ledger);
                if let Some(jobs) = jobs {
                    cfg.max_concurrency = jobs;
                }
                if let Some(callers) = callers {
                    cfg.caller_threads = callers;
                }
                run_fetch(FetchArgs { cfg, manifest }).await?;
            }
            CliCommand::Status { ledger } => run_status(&with_paths(cfg, None, ledger))?,
            CliCommand::Reconcile { asset_dir, ledger } => {
                run_reconcile(&with_paths(cfg, asset_dir, ledger))?
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
