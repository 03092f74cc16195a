//! Worker engine for Tessera
//!
//! This crate wires the lower layers into one explicit context:
//! - Worker: store registry, object cache, reclaimer, transaction manager
//! - Transaction: the handle closures use for reads, writes and nesting
//! - WorkerConfig: `tessera.toml` configuration
//!
//! There is no process-wide state; each worker is independent.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod transaction;
pub mod worker;

pub use config::{WorkerConfig, CONFIG_FILE_NAME};
pub use transaction::Transaction;
pub use worker::{Worker, WorkerStats};
