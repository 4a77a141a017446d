//! CLI command handlers, one file per command.

mod fetch;
mod reconcile;
mod status;

pub use fetch::{run_fetch, FetchArgs};
pub use reconcile::run_reconcile;
pub use status::run_status;
