//! Report storage: trait + filesystem implementation.
//!
//! Reports are stored as pretty JSON files in a date tree under the
//! configured reports directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use surface_core::ScanId;

use crate::{ReportId, StoredReport};

/// Errors that can occur during report storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Report not found: {0}")]
    NotFound(ReportId),

    #[error("Integrity check failed for report {0}: stored hash does not match content")]
    IntegrityViolation(ReportId),

    #[error("Report has no content hash (not sealed)")]
    NotSealed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Query parameters for listing reports.
#[derive(Debug, Default)]
pub struct ReportQuery {
    /// Filter by scan target.
    pub target: Option<String>,
    /// Filter by scan id.
    pub scan_id: Option<ScanId>,
    /// Only include scans run at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only include scans run at or before this time.
    pub to: Option<DateTime<Utc>>,
}

/// Trait for report persistence backends.
pub trait ReportStore {
    /// Store a sealed report. Returns the path written.
    fn save(&self, report: &StoredReport) -> Result<PathBuf, StoreError>;

    /// Retrieve a report by id, verifying integrity.
    fn get(&self, id: ReportId) -> Result<StoredReport, StoreError>;

    /// List reports matching the query, newest scan first.
    fn list(&self, query: &ReportQuery) -> Result<Vec<StoredReport>, StoreError>;
}

/// File-system backed report store.
///
/// ```text
/// {root}/
///   2024/
///     01/
///       15/
///         report_scan_{scan_id}_{report_id}.json
/// ```
pub struct FileReportStore {
    root: PathBuf,
}

impl FileReportStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn report_path(&self, stored: &StoredReport) -> PathBuf {
        let date = stored.report.scan.timestamp.format("%Y/%m/%d");
        self.root.join(format!(
            "{}/report_scan_{}_{}.json",
            date, stored.report.scan.id, stored.id
        ))
    }

    fn find_path(&self, id: ReportId) -> Result<PathBuf, StoreError> {
        let suffix = format!("_{}.json", id.0);
        find_file_recursive(&self.root, &suffix).ok_or(StoreError::NotFound(id))
    }
}

impl ReportStore for FileReportStore {
    fn save(&self, stored: &StoredReport) -> Result<PathBuf, StoreError> {
        if stored.content_hash.is_none() {
            return Err(StoreError::NotSealed);
        }

        let path = self.report_path(stored);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(stored)?;
        fs::write(&path, json)?;

        tracing::debug!(
            report_id = %stored.id,
            scan_id = %stored.report.scan.id,
            path = %path.display(),
            "Report saved"
        );

        Ok(path)
    }

    fn get(&self, id: ReportId) -> Result<StoredReport, StoreError> {
        let path = self.find_path(id)?;
        let stored = read_report(&path)?;

        if !stored.verify_integrity() {
            return Err(StoreError::IntegrityViolation(id));
        }

        Ok(stored)
    }

    fn list(&self, query: &ReportQuery) -> Result<Vec<StoredReport>, StoreError> {
        let mut results = Vec::new();
        collect_reports_recursive(&self.root, query, &mut results)?;

        results.sort_by(|a, b| {
            b.report
                .scan
                .timestamp
                .cmp(&a.report.scan.timestamp)
                .then_with(|| b.report.scan.id.cmp(&a.report.scan.id))
        });

        Ok(results)
    }
}

fn read_report(path: &Path) -> Result<StoredReport, StoreError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn is_report_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("report_scan_"))
}

/// Recursively find a report file whose name ends with `suffix`.
fn find_file_recursive(dir: &Path, suffix: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_recursive(&path, suffix) {
                return Some(found);
            }
        } else if is_report_file(&path)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(suffix))
        {
            return Some(path);
        }
    }

    None
}

fn collect_reports_recursive(
    dir: &Path,
    query: &ReportQuery,
    results: &mut Vec<StoredReport>,
) -> Result<(), StoreError> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = fs::read_dir(dir)?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_reports_recursive(&path, query, results)?;
        } else if is_report_file(&path) {
            let stored = read_report(&path)?;
            if matches_query(&stored, query) {
                results.push(stored);
            }
        }
    }

    Ok(())
}

fn matches_query(stored: &StoredReport, query: &ReportQuery) -> bool {
    let scan = &stored.report.scan;
    if let Some(target) = &query.target {
        if &scan.target != target {
            return false;
        }
    }
    if let Some(scan_id) = query.scan_id {
        if scan.id != scan_id {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if &scan.timestamp < from {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if &scan.timestamp > to {
            return false;
        }
    }
    true
}
