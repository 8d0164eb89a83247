//! Core domain types for attack surface monitoring.
//!
//! These types describe port observations, scans, the per-port lifecycle
//! history, and the change/risk results produced for each scan run.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedEventError;

// ── Enums ─────────────────────────────────────────────────────────

/// Transport protocol of a monitored port.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// Observed state of a port in one scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unknown,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Filtered => "filtered",
            Self::Unknown => "unknown",
        }
    }

    /// Lenient mapping from scanner state strings.
    ///
    /// Compound states such as `open|filtered` collapse to `Filtered`;
    /// anything unrecognised becomes `Unknown`.
    pub fn from_scanner(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "open" => Self::Open,
            "closed" => Self::Closed,
            "filtered" | "open|filtered" | "closed|filtered" => Self::Filtered,
            _ => Self::Unknown,
        }
    }

    /// States that count as "not exposed" when a port was previously open.
    pub fn is_shut(&self) -> bool {
        matches!(self, Self::Closed | Self::Filtered)
    }
}

/// Lifecycle status of a scan run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Scan row exists, results not yet committed.
    Running,
    Completed,
    /// Completed, but some incoming events were dropped as malformed.
    Partial,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Error returned when a stored enum value cannot be parsed back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Protocol {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(ParseEnumError {
                kind: "protocol",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for PortState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "filtered" => Ok(Self::Filtered),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseEnumError {
                kind: "port state",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for ScanStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseEnumError {
                kind: "scan status",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Identity ──────────────────────────────────────────────────────

/// Store-assigned scan identity, monotonically increasing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ScanId(pub i64);

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `(host, port, protocol)` triple identifying one service slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortKey {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl PortKey {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.protocol)
    }
}

// ── Observations ──────────────────────────────────────────────────

/// One validated observation of a port on a host during one scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortEvent {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    /// Scan execution time, shared by every event of the scan.
    pub timestamp: DateTime<Utc>,
}

impl PortEvent {
    pub fn key(&self) -> PortKey {
        PortKey::new(self.host.clone(), self.port, self.protocol)
    }
}

/// A port observation as reported by the parsing collaborator, before
/// validation. Fields are kept as text so that bad input can be reported
/// instead of failing the whole document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawPortEvent {
    pub host: String,
    pub port: String,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl RawPortEvent {
    /// Validate into a [`PortEvent`] stamped with the scan time.
    ///
    /// `index` is the position in the incoming batch, used for reporting.
    pub fn validate(
        &self,
        index: usize,
        timestamp: DateTime<Utc>,
    ) -> Result<PortEvent, MalformedEventError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(MalformedEventError::missing_host(index, self));
        }

        let port: u32 = self
            .port
            .trim()
            .parse()
            .map_err(|_| MalformedEventError::invalid_port(index, self))?;
        if port == 0 || port > u32::from(u16::MAX) {
            return Err(MalformedEventError::invalid_port(index, self));
        }

        let protocol: Protocol = self
            .protocol
            .parse()
            .map_err(|_| MalformedEventError::unsupported_protocol(index, self))?;

        Ok(PortEvent {
            host: host.to_string(),
            port: port as u16,
            protocol,
            state: PortState::from_scanner(&self.state),
            service: non_empty(&self.service),
            product: non_empty(&self.product),
            version: non_empty(&self.version),
            timestamp,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ── Scans and history ─────────────────────────────────────────────

/// One execution of the scan pipeline against one target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRecord {
    pub id: ScanId,
    pub target: String,
    /// Opaque profile name, interpreted only by the scanner.
    pub profile: String,
    pub timestamp: DateTime<Utc>,
    pub status: ScanStatus,
    pub error_message: Option<String>,
    pub duration_secs: Option<f64>,
}

/// Final state written to a scan row once the run is over.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub status: ScanStatus,
    pub error_message: Option<String>,
    pub duration_secs: Option<f64>,
}

impl ScanOutcome {
    pub fn succeeded(dropped_events: usize, duration_secs: Option<f64>) -> Self {
        Self {
            status: if dropped_events > 0 {
                ScanStatus::Partial
            } else {
                ScanStatus::Completed
            },
            error_message: None,
            duration_secs,
        }
    }

    pub fn failed(error: impl Into<String>, duration_secs: Option<f64>) -> Self {
        Self {
            status: ScanStatus::Failed,
            error_message: Some(error.into()),
            duration_secs,
        }
    }
}

/// Durable lifecycle tracker for one `(host, port, protocol)` triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortHistoryRecord {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of scans in which the triple was observed, in any state.
    pub seen_count: u32,
    /// State from the most recent scan that observed the triple.
    pub current_state: PortState,
}

impl PortHistoryRecord {
    pub fn key(&self) -> PortKey {
        PortKey::new(self.host.clone(), self.port, self.protocol)
    }
}

// ── Change detection ──────────────────────────────────────────────

/// A single classified triple in a [`ChangeSet`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortChange {
    #[serde(flatten)]
    pub key: PortKey,
    /// State before this scan; `None` when never observed.
    pub previous: Option<PortState>,
    /// State in this scan; `None` when absent from the scan.
    pub current: Option<PortState>,
    pub service: Option<String>,
}

/// Output of one change detection run, scoped to one scan.
///
/// The four lists are pairwise disjoint and sorted by triple.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSet {
    pub newly_opened: Vec<PortChange>,
    pub newly_closed: Vec<PortChange>,
    pub still_open: Vec<PortChange>,
    pub reopened: Vec<PortChange>,
    /// Triples observed this scan that fell in none of the four lists.
    pub uncategorized: usize,
}

impl ChangeSet {
    /// True when nothing opened, closed or reopened.
    pub fn has_no_changes(&self) -> bool {
        self.newly_opened.is_empty() && self.newly_closed.is_empty() && self.reopened.is_empty()
    }

    /// Every classified triple, in list order.
    pub fn classified(&self) -> impl Iterator<Item = &PortChange> {
        self.newly_opened
            .iter()
            .chain(&self.newly_closed)
            .chain(&self.still_open)
            .chain(&self.reopened)
    }
}

// ── Risk ──────────────────────────────────────────────────────────

/// Which scoring rule produced a risk score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RiskRationale {
    /// Exact port + protocol rule matched on an open port.
    PortMatch,
    /// Service-name rule matched on an open port.
    ServiceMatch,
    /// No rule matched; the default baseline applied.
    DefaultUnknown,
    /// A matched or default score was reduced because the port is not open.
    StateAdjusted,
}

impl RiskRationale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PortMatch => "port-match",
            Self::ServiceMatch => "service-match",
            Self::DefaultUnknown => "default-unknown",
            Self::StateAdjusted => "state-adjusted",
        }
    }
}

impl fmt::Display for RiskRationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal risk score for one scored port event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RiskAssessment {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub service: Option<String>,
    pub state: PortState,
    /// Always within `0..=10`.
    pub score: u8,
    pub rationale: RiskRationale,
    /// Name of the rule that matched, if any.
    pub rule: Option<String>,
}

// ── Report ────────────────────────────────────────────────────────

/// Aggregate counts for a scan report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSummary {
    pub total_events: usize,
    pub open_ports: usize,
    pub closed_ports: usize,
    pub filtered_ports: usize,
    /// Assessments scoring 8 or more.
    pub high_risk_findings: usize,
    /// Assessments scoring 5 to 7.
    pub medium_risk_findings: usize,
    pub dropped_events: usize,
}

/// The combined result of one scan run, handed to reporting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    pub scan: ScanRecord,
    pub summary: ReportSummary,
    pub changes: ChangeSet,
    pub risks: Vec<RiskAssessment>,
    pub dropped: Vec<MalformedEventError>,
}
