//! Worker-side object cache
//!
//! This crate holds the worker's shadows of remote objects:
//! - ObjectCache: the row table, single-flight fetch, pins, reclamation
//! - CacheEntry: one shadow with its pin count, read link and soft state
//! - Reclaimer: background thread that drives `ObjectCache::reclaim`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod entry;
mod fetch;
pub mod reclaimer;

pub use cache::{CacheStats, ObjectCache, ReclaimReport};
pub use entry::CacheEntry;
pub use reclaimer::Reclaimer;
