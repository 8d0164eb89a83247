//! Report persistence for finished scans.

use std::path::{Path, PathBuf};

use surface_core::ScanReport;
use surface_report::{FileReportStore, ReportStore, StoredReport};

use crate::error::Result;

/// Seal a report and write it under `reports_dir`.
pub fn save_report(reports_dir: impl AsRef<Path>, report: &ScanReport) -> Result<PathBuf> {
    let store = FileReportStore::new(reports_dir.as_ref())?;
    let stored = StoredReport::new(report.clone())
        .seal()
        .map_err(surface_report::StoreError::from)?;
    let path = store.save(&stored)?;

    tracing::info!(
        scan_id = %report.scan.id,
        report_id = %stored.id,
        path = %path.display(),
        "Scan report stored"
    );
    Ok(path)
}

/// Like [`save_report`], but a failure is logged and swallowed. The scan is
/// already committed by the time a report is written.
pub fn store_report(reports_dir: impl AsRef<Path>, report: &ScanReport) -> Option<PathBuf> {
    match save_report(reports_dir, report) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(scan_id = %report.scan.id, error = %e, "Failed to store scan report");
            None
        }
    }
}
