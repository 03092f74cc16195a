//! Worker Scenario Tests
//!
//! End-to-end scenarios through the `tessera` facade: several workers,
//! several stores, the overlay, and treaty state carried in objects.

#[path = "../common/mod.rs"]
mod common;

mod atomicity;
mod overlay;
mod reclamation;
mod treaties;
