//! Configuration for the surface monitor.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::Deserialize;
use surface_core::Protocol;

use crate::error::{MonitorError, Result};
use crate::risk::MAX_SCORE;

/// Top-level monitor configuration.
///
/// Loaded from `surface.toml` (or the file prefix given with `--config`) and
/// `SURFACE_MONITOR__` environment variables, which take priority.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// SQLite history database.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Directory for JSON scan reports.
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,

    /// Kill nmap after this many seconds.
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,

    /// Target used when none is given on the command line.
    #[serde(default = "default_target")]
    pub default_target: String,

    #[serde(default)]
    pub default_profile: ScanProfile,

    /// Maximum concurrent nmap processes in daemon mode.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_scans: usize,

    /// Scheduled targets for daemon mode.
    #[serde(default)]
    pub targets: Vec<TargetSchedule>,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A target with its scan schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSchedule {
    /// IP, CIDR or hostname.
    pub address: String,

    /// Human-readable name for this target.
    pub name: Option<String>,

    /// Scan profile override for this target.
    pub profile: Option<ScanProfile>,

    /// Scan interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Scores accepted for the default and for configured rules.
const SCORE_RANGE: RangeInclusive<u8> = 1..=MAX_SCORE;

/// Risk scoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Score for open ports no rule matches.
    #[serde(default = "default_risk_score")]
    pub default_score: u8,

    /// Drop the built-in rule table and use only `rules`.
    #[serde(default)]
    pub replace_defaults: bool,

    #[serde(default)]
    pub rules: Vec<RiskRuleConfig>,
}

/// One configured scoring rule. A rule with a port is a port rule; a rule
/// with only a service is a service rule.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RiskRuleConfig {
    pub name: String,
    pub port: Option<u16>,
    /// Restricts a port rule to one protocol; any protocol when absent.
    pub protocol: Option<Protocol>,
    /// Case-insensitive substring of the detected service name.
    pub service: Option<String>,
    pub score: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,
}

/// Predefined scan profiles mapping to nmap flag sets.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanProfile {
    /// Top 100 TCP ports: `-T4 --top-ports 100`
    #[default]
    Fast,
    /// Every TCP port with version detection: `-p- -sV -T3`
    Full,
    /// Every TCP port with version and OS detection: `-sS -sV -O -p- -T4`
    Comprehensive,
    /// SYN scan, no host discovery, slow timing: `-sS -Pn -T2`
    Stealth,
}

impl ScanProfile {
    pub const ALL: [ScanProfile; 4] = [
        ScanProfile::Fast,
        ScanProfile::Full,
        ScanProfile::Comprehensive,
        ScanProfile::Stealth,
    ];

    /// Return the nmap flags for this profile.
    pub fn nmap_flags(&self) -> Vec<&'static str> {
        match self {
            Self::Fast => vec!["-T4", "--top-ports", "100"],
            Self::Full => vec!["-p-", "-sV", "-T3"],
            Self::Comprehensive => vec!["-sS", "-sV", "-O", "-p-", "-T4"],
            Self::Stealth => vec!["-sS", "-Pn", "-T2"],
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Fast => "Fast scan of top 100 TCP ports",
            Self::Full => "Full port scan with service detection",
            Self::Comprehensive => "All ports with service and OS detection",
            Self::Stealth => "Low-noise SYN scan without host discovery",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Full => "full",
            Self::Comprehensive => "comprehensive",
            Self::Stealth => "stealth",
        }
    }
}

impl fmt::Display for ScanProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanProfile {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| MonitorError::UnknownProfile(s.to_string()))
    }
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_database_path() -> String {
    "data/surface.db".to_string()
}

fn default_reports_dir() -> String {
    "reports".to_string()
}

fn default_scan_timeout() -> u64 {
    300
}

fn default_target() -> String {
    "scanme.nmap.org".to_string()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_interval() -> u64 {
    3600
}

fn default_risk_score() -> u8 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            nmap_path: default_nmap_path(),
            database_path: default_database_path(),
            reports_dir: default_reports_dir(),
            scan_timeout_secs: default_scan_timeout(),
            default_target: default_target(),
            default_profile: ScanProfile::default(),
            max_concurrent_scans: default_max_concurrent(),
            targets: Vec::new(),
            risk: RiskConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            default_score: default_risk_score(),
            replace_defaults: false,
            rules: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Load layered configuration: environment over file over defaults.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("SURFACE_MONITOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = cfg.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings that would make scanning impossible.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_scans == 0 {
            return Err(MonitorError::Config(
                "max_concurrent_scans must be at least 1".to_string(),
            ));
        }
        if self.scan_timeout_secs == 0 {
            return Err(MonitorError::Config(
                "scan_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(t) = self.targets.iter().find(|t| t.interval_secs == 0) {
            return Err(MonitorError::Config(format!(
                "target {} has a zero scan interval",
                t.address
            )));
        }
        if !SCORE_RANGE.contains(&self.risk.default_score) {
            return Err(MonitorError::Config(format!(
                "risk.default_score {} is outside 1..=10",
                self.risk.default_score
            )));
        }
        if let Some(rule) = self.risk.rules.iter().find(|r| !SCORE_RANGE.contains(&r.score)) {
            return Err(MonitorError::Config(format!(
                "risk rule {} has score {} outside 1..=10",
                rule.name, rule.score
            )));
        }
        Ok(())
    }
}
