//! Watches the CIEM scheduler listing for new or changed work orders.
//!
//! One fetch logs in through a WebDriver-controlled browser, reads the
//! listing, diffs it against the last committed snapshot and commits the
//! new state. [`pipeline::ScrapeOrchestrator::fetch_changes`] is the entry
//! point.

pub mod config;
pub mod diagnostics;
pub mod diff;
pub mod driver;
pub mod error;
pub mod extract;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod wait;

#[cfg(test)]
mod testing;

pub use config::{Credential, LoginConfig, Settings};
pub use diff::{ChangeEntry, ChangeKind, ChangeSet};
pub use error::{ErrorKind, ScrapeError};
pub use pipeline::{FetchReport, ScrapeOrchestrator};
