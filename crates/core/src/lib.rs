//! Core types and contracts for Tessera
//!
//! This crate defines the foundational types used throughout the system:
//! - Oid / StoreId / TransactionId / AttemptId: identities
//! - VersionedObject: the unit of storage
//! - Timestamp / Clock: time for treaty expiries
//! - Error: error taxonomy and aggregated commit failures
//! - StoreProxy / StoreRegistry: the store RPC contract
//! - SignedGlob / GlobSource: overlay-delivered objects

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod failure;
pub mod glob;
pub mod store;
pub mod timestamp;
pub mod types;

pub use error::{TesseraError, TesseraResult};
pub use failure::{BackoffClass, CommitFailures, FailureKind, StoreFailure, VersionConflict};
pub use glob::{GlobSource, SignedGlob};
pub use store::{PrepareOutcome, PrepareRequest, PrepareWrite, StoreProxy, StoreRegistry};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};
pub use types::{AttemptId, Oid, StoreId, TransactionId, VersionedObject, WorkerId};
