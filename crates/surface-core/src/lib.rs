//! surface-core: Shared types, error taxonomy, and the history store contract.
//!
//! This crate provides the foundational types used across all surface crates:
//! - Port observations, scans, and per-port lifecycle history
//! - Change sets and risk assessments produced per scan
//! - The two-phase history store contract (capture baseline, then commit)
//! - Common error types

pub mod error;
pub mod event;
pub mod history;
pub mod types;

pub use error::{MalformedEventError, StorageError, StorageResult, SurfaceError};
pub use event::EventBatch;
pub use history::{Baseline, BaselineSnapshot, BaselineView, CommitTicket, HistoryStore};
pub use types::{
    ChangeSet, PortChange, PortEvent, PortHistoryRecord, PortKey, PortState, Protocol,
    RawPortEvent, ReportSummary, RiskAssessment, RiskRationale, ScanId, ScanOutcome, ScanRecord,
    ScanReport, ScanStatus,
};
