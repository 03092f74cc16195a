//! Optimistic transactions across stores
//!
//! This crate implements the worker side of optimistic concurrency control:
//! - TransactionContext: read/write set tracking, nesting
//! - TransactionManager: cache-routed access and two-phase commit
//! - Prepare fan-out with a deadline, and validation of the replies
//! - RetryConfig: backoff for restarted transactions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
mod prepare;
pub mod retry;
pub mod transaction;
pub mod validation;

pub use manager::{
    CommitOutcome, CommitReceipt, TransactionManager, TransactionStats, DEFAULT_PREPARE_TIMEOUT,
};
pub use retry::RetryConfig;
pub use transaction::{TransactionContext, TransactionStatus, WriteEntry};
pub use validation::ValidationResult;
