//! surface-store: SQLite-backed history store.
//!
//! This crate is the single mutation point for scan history. All reads and
//! writes of scans, port events, and per-port lifecycle records flow through
//! [`SqliteHistoryStore`], which implements the
//! [`surface_core::HistoryStore`] contract.

pub mod client;
mod contract;
pub mod mutations;
pub mod queries;
pub mod schema;

pub use client::{SqliteHistoryStore, StoreConfig, StoreError};
