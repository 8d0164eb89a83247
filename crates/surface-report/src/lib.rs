//! surface-report: Tamper-evident scan reports.
//!
//! Each pipeline run produces one [`ScanReport`]. Reports are wrapped in a
//! [`StoredReport`] carrying a BLAKE3 content hash so that any later edit to
//! the file on disk is detectable, and can be rendered as text tables for the
//! terminal.

pub mod hash;
pub mod render;
pub mod store;
pub mod summary;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surface_core::ScanReport;
use uuid::Uuid;

pub use store::{FileReportStore, ReportQuery, ReportStore, StoreError};
pub use summary::assemble;

// ── Core Types ───────────────────────────────────────────────────

/// Unique identifier for a stored report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ReportId(pub Uuid);

impl ReportId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scan report as persisted on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredReport {
    pub id: ReportId,
    pub created_at: DateTime<Utc>,
    pub report: ScanReport,
    /// BLAKE3 content hash (hex), set by [`StoredReport::seal`].
    pub content_hash: Option<String>,
}

impl StoredReport {
    /// Wrap a report without sealing it.
    pub fn new(report: ScanReport) -> Self {
        Self {
            id: ReportId::new(),
            created_at: Utc::now(),
            report,
            content_hash: None,
        }
    }

    /// Compute and store the content hash.
    pub fn seal(mut self) -> Result<Self, serde_json::Error> {
        self.content_hash = Some(self.compute_hash()?);
        Ok(self)
    }

    /// BLAKE3 hash of every field except `content_hash` itself.
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        hash::compute_report_hash(self)
    }

    /// Whether the stored hash matches the content.
    pub fn verify_integrity(&self) -> bool {
        match (&self.content_hash, self.compute_hash()) {
            (Some(stored), Ok(fresh)) => stored == &fresh,
            _ => false,
        }
    }
}
