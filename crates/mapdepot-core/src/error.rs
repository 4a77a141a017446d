//! Error taxonomy for asset resolution and the ledger.
//!
//! Asset-level errors (`FetchError`) are scoped to a single key: the same
//! value is delivered to every waiter of that key and is never cached, so the
//! next `resolve` for the key tries again. `LedgerError` is recoverable; the
//! caller degrades to an empty cache.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Network,
    Storage,
    Format,
}

/// Failure of a single fetch job. Cloned once per waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection failure, timeout, or non-success HTTP status.
    #[error("network error fetching {url}: {message}")]
    Network {
        url: String,
        /// HTTP status when the server answered with a non-2xx code.
        status: Option<u32>,
        message: String,
    },

    /// The destination file could not be created or written.
    #[error("storage error at {}: {message}", path.display())]
    Storage { path: PathBuf, message: String },

    /// The downloaded file could not be read, or no name was found in it.
    #[error("format error in {}: {message}", path.display())]
    Format { path: PathBuf, message: String },
}

impl FetchError {
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Network {
            url: url.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn http_status(url: impl Into<String>, status: u32) -> Self {
        FetchError::Network {
            url: url.into(),
            status: Some(status),
            message: format!("HTTP {}", status),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        FetchError::Storage {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        FetchError::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network { .. } => FetchErrorKind::Network,
            FetchError::Storage { .. } => FetchErrorKind::Storage,
            FetchError::Format { .. } => FetchErrorKind::Format,
        }
    }
}

/// Error returned by `DownloadCoordinator::resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The worker pool was closed before the job could be queued.
    #[error("worker pool is closed")]
    PoolClosed,

    /// The fetch job ended without reporting an outcome (e.g. it panicked).
    #[error("fetch job for {key} ended without a result")]
    Abandoned { key: String },
}

impl ResolveError {
    /// The fetch error kind, if this failure came from the fetcher.
    pub fn fetch_kind(&self) -> Option<FetchErrorKind> {
        match self {
            ResolveError::Fetch(e) => Some(e.kind()),
            ResolveError::PoolClosed | ResolveError::Abandoned { .. } => None,
        }
    }
}

/// Ledger file could not be read, parsed, or written.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("read ledger {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse ledger {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("write ledger {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

/// Asset key rejected by validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid asset key {key:?}: {reason}")]
pub struct InvalidKey {
    pub key: String,
    pub reason: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            FetchError::network("http://x/", "timeout").kind(),
            FetchErrorKind::Network
        );
        assert_eq!(
            FetchError::storage("/tmp/a", "disk full").kind(),
            FetchErrorKind::Storage
        );
        assert_eq!(
            FetchError::format("/tmp/a", "no name").kind(),
            FetchErrorKind::Format
        );
    }

    #[test]
    fn http_status_is_network_with_code() {
        let e = FetchError::http_status("http://depot/x.s2ma", 404);
        match &e {
            FetchError::Network { status, .. } => assert_eq!(*status, Some(404)),
            other => panic!("expected Network, got {:?}", other),
        }
        assert!(e.to_string().contains("HTTP 404"));
    }

    #[test]
    fn resolve_error_exposes_fetch_kind() {
        let e: ResolveError = FetchError::format("/a", "empty").into();
        assert_eq!(e.fetch_kind(), Some(FetchErrorKind::Format));
        assert_eq!(ResolveError::PoolClosed.fetch_kind(), None);
    }
}
