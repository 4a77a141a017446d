pub mod asset;
pub mod config;
pub mod coordinator;
pub mod depot;
pub mod error;
pub mod fetcher;
pub mod ledger;
pub mod locale;
pub mod logging;
pub mod pipeline;
pub mod pool;

pub use asset::{AssetKey, AssetSource, ResolvedName};
pub use coordinator::DownloadCoordinator;
pub use error::{FetchError, FetchErrorKind, LedgerError, ResolveError};
pub use fetcher::{CurlFetcher, FetchOptions, Fetcher, NameExtractor};
pub use ledger::{Ledger, Reconciliation};
