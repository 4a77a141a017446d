//! `mapdepot reconcile` – check the ledger against the asset directory.

use anyhow::Result;
use mapdepot_core::config::MapdepotConfig;
use mapdepot_core::{Ledger, Reconciliation};

pub fn run_reconcile(cfg: &MapdepotConfig) -> Result<()> {
    let asset_dir = cfg.asset_dir()?;
    let ledger_path = cfg.ledger_path()?;
    let mut ledger = Ledger::load_or_empty(&ledger_path);

    match ledger.reconcile(&asset_dir) {
        Reconciliation::Kept { entries } => {
            println!("Ledger kept: {} entries match {}.", entries, asset_dir.display());
        }
        Reconciliation::Discarded {
            entries,
            backed,
            on_disk,
        } => {
            println!(
                "Ledger discarded: {} entries, {} with files, {} asset files in {}.",
                entries,
                backed,
                on_disk,
                asset_dir.display()
            );
        }
    }
    ledger.save(&ledger_path)?;
    Ok(())
}
