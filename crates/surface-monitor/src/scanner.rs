//! Nmap process wrapper.
//!
//! Executes nmap as a child process via `tokio::process::Command` and
//! parses the XML it writes to stdout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::process::Command;

use crate::config::ScanProfile;
use crate::error::{MonitorError, Result};
use crate::nmap_xml::{self, NmapRun};
use crate::target::TargetSpec;

/// Result of a single nmap execution.
pub struct ScanResult {
    pub target: TargetSpec,
    pub profile: ScanProfile,
    /// The command line that was run.
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub nmap_run: NmapRun,
    /// Wall-clock duration of the nmap process.
    pub duration: Duration,
}

/// Wrapper around the nmap binary.
pub struct NmapScanner {
    nmap_path: String,
    timeout: Duration,
}

impl NmapScanner {
    pub fn new(nmap_path: &str, timeout: Duration) -> Self {
        Self {
            nmap_path: nmap_path.to_string(),
            timeout,
        }
    }

    /// Verify nmap is installed and return its version banner.
    pub async fn verify_installation(&self) -> Result<String> {
        let output = Command::new(&self.nmap_path)
            .arg("--version")
            .output()
            .await
            .map_err(|_| MonitorError::NmapNotFound {
                path: self.nmap_path.clone(),
            })?;

        if !output.status.success() {
            return Err(MonitorError::NmapNotFound {
                path: self.nmap_path.clone(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Arguments passed to nmap for a target and profile.
    pub fn args(&self, target: &TargetSpec, profile: ScanProfile) -> Vec<String> {
        let mut args: Vec<String> = profile.nmap_flags().into_iter().map(String::from).collect();
        args.extend(["-oX", "-", "--noninteractive"].map(String::from));
        args.push(target.to_string());
        args
    }

    /// The full command line, without running it.
    pub fn command_line(&self, target: &TargetSpec, profile: ScanProfile) -> String {
        let mut parts = vec![self.nmap_path.clone()];
        parts.extend(self.args(target, profile));
        parts.join(" ")
    }

    /// Run nmap against `target`, killing it if it exceeds the timeout.
    pub async fn scan(&self, target: &TargetSpec, profile: ScanProfile) -> Result<ScanResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let command = self.command_line(target, profile);

        tracing::info!(target = %target, profile = %profile, "Starting nmap scan");
        tracing::debug!(command = %command, "Nmap command line");

        let child = Command::new(&self.nmap_path)
            .args(self.args(target, profile))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MonitorError::NmapNotFound {
                path: format!("{}: {e}", self.nmap_path),
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                tracing::error!(
                    target = %target,
                    timeout_secs = self.timeout.as_secs(),
                    "Nmap scan timed out"
                );
                return Err(MonitorError::NmapTimeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let duration = start.elapsed();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(MonitorError::NmapFailed {
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let nmap_run = nmap_xml::parse_nmap_xml(&output.stdout)?;

        tracing::info!(
            target = %target,
            hosts_up = nmap_run.hosts_up(),
            duration_ms = duration.as_millis(),
            "Nmap scan complete"
        );

        Ok(ScanResult {
            target: target.clone(),
            profile,
            command,
            started_at,
            nmap_run,
            duration,
        })
    }
}
