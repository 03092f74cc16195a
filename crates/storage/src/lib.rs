//! Reference store implementations for Tessera
//!
//! This crate provides in-process implementations of the external
//! collaborators a worker talks to:
//! - MemoryStore: a store that owns objects, allocates object numbers and
//!   runs the store side of the two-phase prepare/commit protocol
//! - MemoryOverlay: a dissemination overlay holding store-signed blobs
//!
//! Both carry fault-injection knobs (unreachability, latency, forced
//! rejection) so worker-side behaviour can be exercised deterministically.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod overlay;

pub use memory::{MemoryStore, StoreCounters};
pub use overlay::MemoryOverlay;
