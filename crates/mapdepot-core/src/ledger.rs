//! Durable record of resolved assets and processed inputs.
//!
//! Stored as pretty-printed JSON so it can be inspected and edited by hand:
//!
//! ```json
//! {
//!   "version": 1,
//!   "resolved": { "abcd1234.s2ma": "Abyssal Reef LE" },
//!   "processed_inputs": { "/replays/a.SC2Replay": { "size": 51234, "modified": 1700000000 } }
//! }
//! ```
//!
//! Writes go to a temp file in the same directory which is then renamed over
//! the ledger, so readers never observe a partial file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::asset::{asset_files, AssetKey, ResolvedName};
use crate::error::LedgerError;

const LEDGER_VERSION: u8 = 1;

fn default_version() -> u8 {
    LEDGER_VERSION
}

/// Size and modification time of an input file when it was last processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    /// Seconds since the Unix epoch.
    pub modified: i64,
}

impl Fingerprint {
    pub fn of(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(unix_seconds)
            .unwrap_or(0);
        Ok(Self {
            size: meta.len(),
            modified,
        })
    }
}

/// Whole seconds, saturating at `i64::MAX`.
fn unix_seconds(since_epoch: Duration) -> i64 {
    i64::try_from(since_epoch.as_secs()).unwrap_or(i64::MAX)
}

/// Result of checking the ledger against the asset directory at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Kept {
        entries: usize,
    },
    /// The ledger no longer matches the files on disk and was cleared.
    Discarded {
        entries: usize,
        backed: usize,
        on_disk: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(default = "default_version")]
    version: u8,
    #[serde(default)]
    resolved: BTreeMap<AssetKey, ResolvedName>,
    #[serde(default)]
    processed_inputs: BTreeMap<PathBuf, Fingerprint>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            resolved: BTreeMap::new(),
            processed_inputs: BTreeMap::new(),
        }
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the ledger at `path`. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Ledger>, LedgerError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(LedgerError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let parse_err = |source| LedgerError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let ledger: Ledger = serde_json::from_slice(&bytes).map_err(parse_err)?;
        if ledger.version != LEDGER_VERSION {
            return Err(parse_err(<serde_json::Error as serde::de::Error>::custom(
                format!(
                    "unsupported ledger version {} (expected {})",
                    ledger.version, LEDGER_VERSION
                ),
            )));
        }
        Ok(Some(ledger))
    }

    /// Load the ledger, degrading a missing, unreadable or corrupt file to an empty one.
    pub fn load_or_empty(path: &Path) -> Ledger {
        match Self::load(path) {
            Ok(Some(ledger)) => {
                tracing::debug!(
                    path = %path.display(),
                    resolved = ledger.resolved.len(),
                    inputs = ledger.processed_inputs.len(),
                    "ledger loaded"
                );
                ledger
            }
            Ok(None) => Ledger::default(),
            Err(e) => {
                tracing::warn!("{}; starting with an empty ledger", e);
                Ledger::default()
            }
        }
    }

    /// Check entries against `asset_dir`. The ledger is kept only if every
    /// entry still has its backing file and the number of backed entries equals
    /// the number of asset files in the directory; otherwise it is cleared.
    pub fn reconcile(&mut self, asset_dir: &Path) -> Reconciliation {
        let entries = self.resolved.len();
        let backed = self
            .resolved
            .keys()
            .filter(|k| asset_dir.join(k.as_str()).is_file())
            .count();
        let on_disk = count_asset_files(asset_dir);

        if backed == entries && backed == on_disk {
            tracing::debug!(entries, "ledger matches asset directory");
            return Reconciliation::Kept { entries };
        }
        tracing::warn!(
            entries,
            backed,
            on_disk,
            dir = %asset_dir.display(),
            "ledger does not match asset directory; discarding it"
        );
        *self = Ledger::default();
        Reconciliation::Discarded {
            entries,
            backed,
            on_disk,
        }
    }

    pub fn resolved(&self) -> &BTreeMap<AssetKey, ResolvedName> {
        &self.resolved
    }

    pub fn record_resolved<I>(&mut self, names: I)
    where
        I: IntoIterator<Item = (AssetKey, ResolvedName)>,
    {
        self.resolved.extend(names);
    }

    pub fn processed_inputs(&self) -> &BTreeMap<PathBuf, Fingerprint> {
        &self.processed_inputs
    }

    /// True when `input` was processed before and is unchanged since.
    pub fn is_processed(&self, input: &Path) -> bool {
        match (self.processed_inputs.get(input), Fingerprint::of(input)) {
            (Some(stored), Ok(current)) => *stored == current,
            _ => false,
        }
    }

    /// Inputs that still need work. Fingerprints of inputs modified since they
    /// were processed are dropped.
    pub fn filter_unprocessed(&mut self, inputs: &[PathBuf]) -> Vec<PathBuf> {
        let mut todo = Vec::new();
        for input in inputs {
            let current = match Fingerprint::of(input) {
                Ok(fp) => fp,
                Err(e) => {
                    tracing::warn!(input = %input.display(), "cannot stat input: {}", e);
                    todo.push(input.clone());
                    continue;
                }
            };
            match self.processed_inputs.get(input) {
                Some(stored) if *stored == current => {
                    tracing::debug!(input = %input.display(), "input already processed, skipping");
                }
                Some(_) => {
                    tracing::info!(input = %input.display(), "input modified since last run, processing again");
                    self.processed_inputs.remove(input);
                    todo.push(input.clone());
                }
                None => todo.push(input.clone()),
            }
        }
        todo
    }

    /// Record the current fingerprint of `input`.
    pub fn mark_processed(&mut self, input: &Path) -> io::Result<()> {
        let fp = Fingerprint::of(input)?;
        self.processed_inputs.insert(input.to_path_buf(), fp);
        Ok(())
    }

    /// Atomically replace the file at `path` with this ledger.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        write_json_atomic(path, self).map_err(|e| LedgerError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        tracing::info!(
            path = %path.display(),
            resolved = self.resolved.len(),
            inputs = self.processed_inputs.len(),
            "ledger saved"
        );
        Ok(())
    }
}

/// Write `value` as pretty JSON to a temp file beside `path`, sync it, then
/// rename it over `path`. On error `path` is untouched and the temp file is removed.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn count_asset_files(dir: &Path) -> usize {
    match asset_files(dir) {
        Ok(files) => files.len(),
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(dir = %dir.display(), "cannot list asset directory: {}", e);
            }
            0
        }
    }
}
