//! Single-flight download coordinator.
//!
//! One lock guards both the resolved-name cache and the in-flight registry.
//! The "cache hit / join in-flight / dispatch" decision is a single critical
//! section, so concurrent callers for a never-seen key produce exactly one
//! fetch job. The lock is never held across I/O; the only place a caller
//! blocks is its own one-shot waiter channel.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Context;

use crate::asset::{AssetKey, AssetSource, ResolvedName};
use crate::config::MapdepotConfig;
use crate::error::{LedgerError, ResolveError};
use crate::fetcher::Fetcher;
use crate::ledger::Ledger;
use crate::pool::WorkerPool;

type Outcome = Result<ResolvedName, ResolveError>;

#[derive(Default)]
struct SharedDownloadState {
    resolved: HashMap<AssetKey, ResolvedName>,
    in_flight: HashMap<AssetKey, Vec<SyncSender<Outcome>>>,
}

struct Inner {
    state: RwLock<SharedDownloadState>,
    fetcher: Arc<dyn Fetcher>,
    asset_dir: PathBuf,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, SharedDownloadState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SharedDownloadState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the outcome for `key` and wake every waiter. Successful names
    /// are cached; failures are not, so the key becomes eligible for retry.
    fn complete(&self, key: &AssetKey, outcome: Outcome) {
        let mut state = self.write();
        match &outcome {
            Ok(name) => {
                tracing::info!(key = %key, name = %name, "asset resolved");
                state.resolved.insert(key.clone(), name.clone());
            }
            Err(e) => tracing::warn!(key = %key, "asset could not be resolved: {}", e),
        }
        let waiters = state.in_flight.remove(key).unwrap_or_default();
        for tx in &waiters {
            // Capacity 1 and exactly one message per channel: never blocks.
            let _ = tx.try_send(outcome.clone());
        }
        tracing::debug!(key = %key, waiters = waiters.len(), "completion delivered");
    }
}

/// Notifies waiters with `Abandoned` if the fetch job unwinds before
/// reporting an outcome.
struct CompletionGuard<'a> {
    inner: &'a Inner,
    key: &'a AssetKey,
    done: bool,
}

impl CompletionGuard<'_> {
    fn finish(mut self, outcome: Outcome) {
        self.done = true;
        self.inner.complete(self.key, outcome);
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inner.complete(
                self.key,
                Err(ResolveError::Abandoned {
                    key: self.key.to_string(),
                }),
            );
        }
    }
}

enum Dispatch {
    Hit(ResolvedName),
    Join(Receiver<Outcome>),
    Lead(Receiver<Outcome>),
}

/// Resolves asset keys to names, fetching each distinct key at most once at a time.
///
/// Owns its worker pool; `drain_and_close` (or drop) drains and joins it.
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
    pool: WorkerPool,
}

impl DownloadCoordinator {
    /// Create a coordinator writing into `asset_dir` with `max_concurrency` fetch workers.
    pub fn new(
        asset_dir: impl Into<PathBuf>,
        max_concurrency: usize,
        fetcher: Arc<dyn Fetcher>,
    ) -> std::io::Result<Self> {
        let pool = WorkerPool::new(max_concurrency)?;
        Ok(Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SharedDownloadState::default()),
                fetcher,
                asset_dir: asset_dir.into(),
            }),
            pool,
        })
    }

    /// Create from config; creating the asset directory is the one fatal step.
    pub fn from_config(cfg: &MapdepotConfig, fetcher: Arc<dyn Fetcher>) -> anyhow::Result<Self> {
        let asset_dir = cfg.ensure_asset_dir()?;
        Self::new(asset_dir, cfg.max_concurrency, fetcher).context("start worker pool")
    }

    pub fn asset_dir(&self) -> &Path {
        &self.inner.asset_dir
    }

    /// Where the file for `key` lives once fetched.
    pub fn asset_path(&self, key: &AssetKey) -> PathBuf {
        self.inner.asset_dir.join(key.as_str())
    }

    pub fn max_concurrency(&self) -> usize {
        self.pool.size()
    }

    /// Resolve `source.key`, fetching it from `source.url` only if no fetch is
    /// already running and no name is cached. Safe to call from any number of
    /// threads; blocks until the outcome for this key is known.
    pub fn resolve(&self, source: &AssetSource) -> Result<ResolvedName, ResolveError> {
        let key = &source.key;
        if let Some(name) = self.inner.read().resolved.get(key) {
            tracing::debug!(key = %key, "cache hit");
            return Ok(name.clone());
        }

        let dispatch = {
            let mut state = self.inner.write();
            if let Some(name) = state.resolved.get(key) {
                Dispatch::Hit(name.clone())
            } else {
                let (tx, rx) = mpsc::sync_channel(1);
                match state.in_flight.entry(key.clone()) {
                    Entry::Occupied(mut waiters) => {
                        waiters.get_mut().push(tx);
                        Dispatch::Join(rx)
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(vec![tx]);
                        Dispatch::Lead(rx)
                    }
                }
            }
        };

        match dispatch {
            Dispatch::Hit(name) => {
                tracing::debug!(key = %key, "cache hit");
                Ok(name)
            }
            Dispatch::Join(rx) => {
                tracing::debug!(key = %key, "joining in-flight fetch");
                wait(key, &rx)
            }
            Dispatch::Lead(rx) => {
                tracing::debug!(key = %key, url = %source.url, "dispatching fetch");
                let inner = Arc::clone(&self.inner);
                let job_key = key.clone();
                let url = source.url.clone();
                let submitted = self.pool.submit(move || {
                    let guard = CompletionGuard {
                        inner: &inner,
                        key: &job_key,
                        done: false,
                    };
                    let dest = inner.asset_dir.join(job_key.as_str());
                    let outcome = inner.fetcher.fetch(&url, &dest).map_err(ResolveError::from);
                    guard.finish(outcome);
                });
                if let Err(e) = submitted {
                    self.inner.complete(key, Err(e));
                }
                wait(key, &rx)
            }
        }
    }

    /// Pre-populate the cache (e.g. from a reconciled ledger). Existing entries win.
    pub fn warm<I>(&self, names: I) -> usize
    where
        I: IntoIterator<Item = (AssetKey, ResolvedName)>,
    {
        let mut state = self.inner.write();
        let before = state.resolved.len();
        for (key, name) in names {
            state.resolved.entry(key).or_insert(name);
        }
        let added = state.resolved.len() - before;
        tracing::debug!(added, "cache warmed");
        added
    }

    pub fn warm_from_ledger(&self, ledger: &Ledger) -> usize {
        self.warm(
            ledger
                .resolved()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        )
    }

    pub fn cached(&self, key: &AssetKey) -> Option<ResolvedName> {
        self.inner.read().resolved.get(key).cloned()
    }

    /// Number of keys with a fetch job queued or running.
    pub fn in_flight(&self) -> usize {
        self.inner.read().in_flight.len()
    }

    /// Snapshot of every resolved name, sorted by key.
    pub fn resolved_names(&self) -> BTreeMap<AssetKey, ResolvedName> {
        self.inner
            .read()
            .resolved
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Block until every submitted fetch job has completed.
    pub fn drain(&self) {
        self.pool.drain_and_wait();
    }

    /// Drain, merge resolved names into `ledger`, and write it atomically.
    pub fn drain_and_save(&self, ledger: &mut Ledger, path: &Path) -> Result<(), LedgerError> {
        self.drain();
        ledger.record_resolved(self.resolved_names());
        ledger.save(path)
    }

    /// Wait for outstanding jobs, then release the worker pool.
    pub fn drain_and_close(self) {
        self.pool.close();
    }
}

fn wait(key: &AssetKey, rx: &Receiver<Outcome>) -> Result<ResolvedName, ResolveError> {
    rx.recv().unwrap_or_else(|_| {
        Err(ResolveError::Abandoned {
            key: key.to_string(),
        })
    })
}
