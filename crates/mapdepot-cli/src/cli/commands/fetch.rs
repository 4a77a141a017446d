//! `mapdepot fetch` – resolve every manifest input's map, save the ledger,
//! then rewrite the foreign to English name mapping.

use anyhow::{Context, Result};
use mapdepot_core::config::MapdepotConfig;
use mapdepot_core::locale::{LocaleNameExtractor, ScanOpener};
use mapdepot_core::pipeline::{self, InputOutcome};
use mapdepot_core::{CurlFetcher, DownloadCoordinator, Ledger, LedgerError, Reconciliation};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::cli::manifest;

pub struct FetchArgs {
    pub cfg: MapdepotConfig,
    pub manifest: PathBuf,
}

pub async fn run_fetch(args: FetchArgs) -> Result<()> {
    let FetchArgs { cfg, manifest } = args;
    let inputs = manifest::load_manifest(&manifest)?;
    let ledger_path = cfg.ledger_path()?;
    let mapping_path = cfg.name_mapping_path()?;

    let fetcher = CurlFetcher::new(LocaleNameExtractor::new(ScanOpener), cfg.fetch_options());
    let coordinator = DownloadCoordinator::from_config(&cfg, Arc::new(fetcher))?;

    let mut ledger = Ledger::load_or_empty(&ledger_path);
    if let Reconciliation::Discarded { entries, .. } = ledger.reconcile(coordinator.asset_dir()) {
        println!("Ledger out of date with asset directory; discarded {} entries.", entries);
    }
    let warmed = coordinator.warm_from_ledger(&ledger);
    tracing::debug!(warmed, "cache warmed from ledger");

    let callers = cfg.caller_threads;
    let started = Instant::now();
    let (report, mapping) = tokio::task::spawn_blocking(move || {
        let report =
            pipeline::run_batch(&coordinator, &mut ledger, &ledger_path, inputs, callers);
        let asset_dir = coordinator.asset_dir().to_path_buf();
        coordinator.drain_and_close();
        let report = report?;
        let mapping = pipeline::write_name_mapping(&asset_dir, &ScanOpener, &mapping_path)
            .map(|names| (names.len(), mapping_path));
        Ok::<_, LedgerError>((report, mapping))
    })
    .await
    .context("batch task failed")??;

    for (input, outcome) in &report.outcomes {
        if let InputOutcome::Failed { key, error } = outcome {
            println!("FAILED {} ({}): {}", input.display(), key, error);
        }
    }
    println!(
        "{} resolved, {} failed, {} skipped, {} already processed in {:.1}s",
        report.resolved(),
        report.failed(),
        report.skipped(),
        report.already_processed(),
        started.elapsed().as_secs_f64()
    );
    match mapping {
        Ok((names, path)) => println!("{} map names written to {}", names, path.display()),
        Err(e) => {
            tracing::warn!("name mapping not written: {:#}", e);
            println!("warning: name mapping not written: {:#}", e);
        }
    }
    Ok(())
}
