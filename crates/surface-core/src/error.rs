use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{RawPortEvent, ScanId};

/// Top-level error type for the surface monitoring platform.
#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of the history store. Any of these aborts the scan run.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store schema missing: {0}")]
    SchemaMissing(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Scan not found: {0}")]
    ScanNotFound(ScanId),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Why an incoming event was rejected.
#[derive(Error, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MalformedReason {
    #[error("missing host")]
    MissingHost,
    #[error("port outside 1-65535")]
    InvalidPort,
    #[error("protocol is not tcp or udp")]
    UnsupportedProtocol,
}

/// An incoming event that failed validation. Dropped and counted, never fatal.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("Malformed event #{index} ({host}:{port}/{protocol}): {reason}")]
pub struct MalformedEventError {
    /// Position of the event in the incoming batch.
    pub index: usize,
    pub reason: MalformedReason,
    pub host: String,
    pub port: String,
    pub protocol: String,
}

impl MalformedEventError {
    fn new(index: usize, reason: MalformedReason, raw: &RawPortEvent) -> Self {
        Self {
            index,
            reason,
            host: raw.host.clone(),
            port: raw.port.clone(),
            protocol: raw.protocol.clone(),
        }
    }

    pub fn missing_host(index: usize, raw: &RawPortEvent) -> Self {
        Self::new(index, MalformedReason::MissingHost, raw)
    }

    pub fn invalid_port(index: usize, raw: &RawPortEvent) -> Self {
        Self::new(index, MalformedReason::InvalidPort, raw)
    }

    pub fn unsupported_protocol(index: usize, raw: &RawPortEvent) -> Self {
        Self::new(index, MalformedReason::UnsupportedProtocol, raw)
    }
}
