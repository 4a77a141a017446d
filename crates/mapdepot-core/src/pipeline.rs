//! Batch driver: resolve the asset of every input, then persist the ledger.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use anyhow::Context;

use crate::asset::{asset_files, AssetKey, AssetSource, ResolvedName};
use crate::coordinator::DownloadCoordinator;
use crate::error::{LedgerError, ResolveError};
use crate::ledger::{write_json_atomic, Ledger};
use crate::locale::{foreign_name_mapping, ArchiveOpener};

/// One input file and the asset it depends on. `source` is `None` when the
/// dependency cannot be fetched (e.g. an unsupported region).
#[derive(Debug, Clone)]
pub struct BatchInput {
    pub input: PathBuf,
    pub source: Option<AssetSource>,
}

impl BatchInput {
    pub fn new(input: impl Into<PathBuf>, source: Option<AssetSource>) -> Self {
        Self {
            input: input.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    /// Unchanged since a previous batch processed it.
    AlreadyProcessed,
    /// No fetchable source.
    Skipped,
    Resolved { key: AssetKey, name: ResolvedName },
    Failed { key: AssetKey, error: ResolveError },
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(PathBuf, InputOutcome)>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&InputOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn resolved(&self) -> usize {
        self.count(|o| matches!(o, InputOutcome::Resolved { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, InputOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, InputOutcome::Skipped))
    }

    pub fn already_processed(&self) -> usize {
        self.count(|o| matches!(o, InputOutcome::AlreadyProcessed))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// Resolve every unprocessed input from `caller_threads` threads, drain the
/// pool, record names and fingerprints in `ledger`, and save it to `ledger_path`.
///
/// Failed inputs are left unprocessed so the next batch retries them.
pub fn run_batch(
    coordinator: &DownloadCoordinator,
    ledger: &mut Ledger,
    ledger_path: &Path,
    inputs: Vec<BatchInput>,
    caller_threads: usize,
) -> Result<BatchReport, LedgerError> {
    let paths: Vec<PathBuf> = inputs.iter().map(|i| i.input.clone()).collect();
    let todo: HashSet<PathBuf> = ledger.filter_unprocessed(&paths).into_iter().collect();

    let (work, done): (Vec<_>, Vec<_>) = inputs
        .into_iter()
        .enumerate()
        .partition(|(_, i)| todo.contains(&i.input));

    let mut slots: Vec<Option<(PathBuf, InputOutcome)>> = vec![None; work.len() + done.len()];
    for (idx, input) in done {
        slots[idx] = Some((input.input, InputOutcome::AlreadyProcessed));
    }

    tracing::info!(
        inputs = slots.len(),
        todo = work.len(),
        callers = caller_threads.max(1),
        workers = coordinator.max_concurrency(),
        "batch started"
    );

    let results = resolve_all(coordinator, &work, caller_threads.max(1));
    for ((idx, input), outcome) in work.into_iter().zip(results) {
        slots[idx] = Some((input.input, outcome));
    }

    coordinator.drain();
    ledger.record_resolved(coordinator.resolved_names());

    let mut report = BatchReport::default();
    for (input, outcome) in slots.into_iter().flatten() {
        if matches!(outcome, InputOutcome::Resolved { .. } | InputOutcome::Skipped) {
            if let Err(e) = ledger.mark_processed(&input) {
                tracing::warn!(input = %input.display(), "cannot fingerprint input: {}", e);
            }
        }
        report.outcomes.push((input, outcome));
    }
    ledger.save(ledger_path)?;

    tracing::info!(
        resolved = report.resolved(),
        failed = report.failed(),
        skipped = report.skipped(),
        already_processed = report.already_processed(),
        "batch finished"
    );
    Ok(report)
}

/// Read every asset in `asset_dir` and write the merged foreign name to
/// English name mapping to `path` as JSON. Assets that cannot be opened or
/// have no English name are skipped. Returns the mapping written.
pub fn write_name_mapping<O: ArchiveOpener>(
    asset_dir: &Path,
    opener: &O,
    path: &Path,
) -> anyhow::Result<BTreeMap<String, String>> {
    let files = asset_files(asset_dir)
        .with_context(|| format!("list asset directory {}", asset_dir.display()))?;

    let mut mapping = BTreeMap::new();
    let mut unnamed = 0usize;
    for file in &files {
        let names = opener
            .open(file)
            .and_then(|mut archive| foreign_name_mapping(&mut archive));
        match names {
            Ok(Some(names)) => mapping.extend(names),
            Ok(None) => {
                unnamed += 1;
                tracing::warn!(asset = %file.display(), "no English map name, left out of mapping");
            }
            Err(e) => {
                unnamed += 1;
                tracing::warn!(asset = %file.display(), "cannot read asset: {}", e);
            }
        }
    }

    write_json_atomic(path, &mapping)
        .with_context(|| format!("write name mapping {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        assets = files.len(),
        unnamed,
        names = mapping.len(),
        "name mapping written"
    );
    Ok(mapping)
}

/// Outcomes of `work`, in order.
fn resolve_all(
    coordinator: &DownloadCoordinator,
    work: &[(usize, BatchInput)],
    caller_threads: usize,
) -> Vec<InputOutcome> {
    let next = AtomicUsize::new(0);
    let results: Mutex<Vec<Option<InputOutcome>>> = Mutex::new(vec![None; work.len()]);

    thread::scope(|s| {
        let handles: Vec<_> = (0..caller_threads.min(work.len()))
            .map(|_| {
                s.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some((_, input)) = work.get(i) else {
                        break;
                    };
                    let outcome = resolve_one(coordinator, input);
                    results.lock().unwrap_or_else(PoisonError::into_inner)[i] = Some(outcome);
                })
            })
            .collect();
        for h in handles {
            if h.join().is_err() {
                tracing::warn!("batch caller thread panicked");
            }
        }
    });

    results
        .into_inner()
        .unwrap_or_else(PoisonError::into_inner)
        .into_iter()
        .zip(work)
        .map(|(outcome, (_, input))| {
            outcome.unwrap_or_else(|| match &input.source {
                Some(src) => InputOutcome::Failed {
                    key: src.key.clone(),
                    error: ResolveError::Abandoned {
                        key: src.key.to_string(),
                    },
                },
                None => InputOutcome::Skipped,
            })
        })
        .collect()
}

fn resolve_one(coordinator: &DownloadCoordinator, input: &BatchInput) -> InputOutcome {
    let Some(source) = &input.source else {
        tracing::debug!(input = %input.input.display(), "no fetchable source, skipping");
        return InputOutcome::Skipped;
    };
    match coordinator.resolve(source) {
        Ok(name) => InputOutcome::Resolved {
            key: source.key.clone(),
            name,
        },
        Err(error) => {
            tracing::warn!(input = %input.input.display(), key = %source.key, "{}", error);
            InputOutcome::Failed {
                key: source.key.clone(),
                error,
            }
        }
    }
}
