//! Error types for the surface-monitor crate.

use surface_core::{ScanId, StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Nmap not found at path: {path}")]
    NmapNotFound { path: String },

    #[error("Nmap exited with code {code}: {stderr}")]
    NmapFailed { code: i32, stderr: String },

    #[error("Nmap timed out after {secs} seconds")]
    NmapTimeout { secs: u64 },

    #[error("Failed to parse nmap XML output: {0}")]
    XmlParse(String),

    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Unknown scan profile '{0}'. Available: fast, full, comprehensive, stealth")]
    UnknownProfile(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] surface_store::StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Report error: {0}")]
    Report(#[from] surface_report::StoreError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for MonitorError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MonitorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// A pipeline run aborted by a storage failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The scan row itself could not be created.
    #[error("Failed to record scan: {0}")]
    Record(#[source] StorageError),

    /// The scan was recorded, then aborted and marked failed.
    #[error("Scan {scan_id} failed: {source}")]
    Scan {
        scan_id: ScanId,
        #[source]
        source: StorageError,
    },
}

impl PipelineError {
    pub fn scan_id(&self) -> Option<ScanId> {
        match self {
            Self::Record(_) => None,
            Self::Scan { scan_id, .. } => Some(*scan_id),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
