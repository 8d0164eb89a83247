//! BLAKE3 content hashing for tamper evidence.

use chrono::{DateTime, Utc};
use serde::Serialize;
use surface_core::ScanReport;

use crate::{ReportId, StoredReport};

/// Hashable view of a stored report (excludes content_hash).
#[derive(Serialize)]
struct HashableReport<'a> {
    id: &'a ReportId,
    created_at: &'a DateTime<Utc>,
    report: &'a ScanReport,
}

/// Serialize everything but the hash to JSON and hash the bytes.
/// Returns the hex-encoded digest.
pub fn compute_report_hash(stored: &StoredReport) -> Result<String, serde_json::Error> {
    let hashable = HashableReport {
        id: &stored.id,
        created_at: &stored.created_at,
        report: &stored.report,
    };

    let json = serde_json::to_vec(&hashable)?;
    Ok(blake3::hash(&json).to_hex().to_string())
}
