//! `mapdepot status` – show what the ledger records.

use anyhow::Result;
use mapdepot_core::config::MapdepotConfig;
use mapdepot_core::Ledger;

pub fn run_status(cfg: &MapdepotConfig) -> Result<()> {
    let path = cfg.ledger_path()?;
    let ledger = match Ledger::load(&path) {
        Ok(Some(ledger)) => ledger,
        Ok(None) => {
            println!("No ledger at {}.", path.display());
            return Ok(());
        }
        Err(e) => {
            tracing::warn!("{}; showing an empty ledger", e);
            eprintln!("warning: {}; showing an empty ledger", e);
            Ledger::default()
        }
    };

    if ledger.resolved().is_empty() {
        println!("No resolved assets.");
    } else {
        println!("{:<32} {}", "KEY", "NAME");
        for (key, name) in ledger.resolved() {
            println!("{:<32} {}", key, name);
        }
    }

    let inputs = ledger.processed_inputs();
    if !inputs.is_empty() {
        println!();
        println!("{:<12} {:<12} {}", "SIZE", "MODIFIED", "INPUT");
        for (input, fp) in inputs {
            println!("{:<12} {:<12} {}", fp.size, fp.modified, input.display());
        }
    }
    Ok(())
}
