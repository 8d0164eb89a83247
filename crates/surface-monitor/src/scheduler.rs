//! Scan scheduling engine.
//!
//! Spawns one tokio task per enabled target, each scanning on its own
//! interval. A semaphore limits concurrent nmap processes. The pipeline is
//! synchronous and runs on the blocking pool.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use surface_core::ScanReport;
use tokio::sync::Semaphore;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::config::{MonitorConfig, ScanProfile, TargetSchedule};
use crate::error::Result;
use crate::events;
use crate::persist;
use crate::pipeline::{ScanInput, ScanPipeline};
use crate::scanner::{NmapScanner, ScanResult};
use crate::target::TargetSpec;

/// Outcome of one successful scan run.
#[derive(Debug)]
pub struct ScanRun {
    pub report: ScanReport,
    /// Where the JSON report was written, if it was.
    pub report_path: Option<PathBuf>,
}

/// The scheduler manages periodic scan jobs for multiple targets.
pub struct ScanScheduler {
    config: MonitorConfig,
    scanner: Arc<NmapScanner>,
    pipeline: Arc<ScanPipeline>,
    concurrency: Arc<Semaphore>,
}

impl ScanScheduler {
    pub fn new(config: MonitorConfig, scanner: NmapScanner, pipeline: Arc<ScanPipeline>) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.max_concurrent_scans));
        Self {
            config,
            scanner: Arc::new(scanner),
            pipeline,
            concurrency,
        }
    }

    /// Run the scheduler, spawning a tokio task per enabled target.
    /// Returns once every task has ended, which in practice is never.
    pub async fn run(&self) -> Result<()> {
        let mut handles = Vec::new();

        for schedule in &self.config.targets {
            if !schedule.enabled {
                tracing::info!(target = %schedule.address, "Target disabled, skipping");
                continue;
            }
            let target: TargetSpec = schedule.address.parse()?;

            let scanner = self.scanner.clone();
            let pipeline = self.pipeline.clone();
            let config = self.config.clone();
            let schedule = schedule.clone();
            let semaphore = self.concurrency.clone();

            let handle = tokio::spawn(async move {
                run_target_loop(scanner, pipeline, config, schedule, target, semaphore).await;
            });
            handles.push(handle);
        }

        tracing::info!(target_count = handles.len(), "Scheduler started");

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Target scan task panicked");
            }
        }

        Ok(())
    }
}

/// Per-target scan loop.
async fn run_target_loop(
    scanner: Arc<NmapScanner>,
    pipeline: Arc<ScanPipeline>,
    config: MonitorConfig,
    schedule: TargetSchedule,
    target: TargetSpec,
    semaphore: Arc<Semaphore>,
) {
    let profile = schedule.profile.unwrap_or(config.default_profile);
    let name = schedule.name.as_deref().unwrap_or(&schedule.address);
    let mut ticker = interval(Duration::from_secs(schedule.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        tracing::info!(target = %target, name = %name, profile = %profile, "Scheduled scan triggered");

        let Ok(_permit) = semaphore.acquire().await else {
            tracing::warn!(target = %target, "Scan semaphore closed, stopping");
            return;
        };

        if let Err(e) = run_single_scan(&scanner, &pipeline, &config, &target, profile, true).await
        {
            tracing::error!(target = %target, error = %e, "Scheduled scan failed");
        }
    }
}

/// Execute a single scan: nmap → parse → pipeline → report.
///
/// A failed nmap run is still recorded as a failed scan before the error is
/// returned.
pub async fn run_single_scan(
    scanner: &NmapScanner,
    pipeline: &Arc<ScanPipeline>,
    config: &MonitorConfig,
    target: &TargetSpec,
    profile: ScanProfile,
    write_report: bool,
) -> Result<ScanRun> {
    let started_at = Utc::now();
    let clock = std::time::Instant::now();

    let scan_result = match scanner.scan(target, profile).await {
        Ok(r) => r,
        Err(e) => {
            let pipeline = pipeline.clone();
            let target_name = target.to_string();
            let message = e.to_string();
            let duration = clock.elapsed().as_secs_f64();
            let recorded = tokio::task::spawn_blocking(move || {
                pipeline.record_failed_scan(
                    &target_name,
                    profile.as_str(),
                    started_at,
                    &message,
                    Some(duration),
                )
            })
            .await;
            match recorded {
                Ok(Ok(_)) => {}
                Ok(Err(record_err)) => {
                    tracing::error!(error = %record_err, "Could not record failed scan")
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "Could not record failed scan")
                }
            }
            return Err(e);
        }
    };

    let input = scan_input(&scan_result);
    let pipeline = pipeline.clone();
    let report = tokio::task::spawn_blocking(move || pipeline.run(input)).await??;

    let report_path = if write_report {
        persist::store_report(&config.reports_dir, &report)
    } else {
        None
    };

    tracing::info!(
        scan_id = %report.scan.id,
        target = %target,
        newly_opened = report.changes.newly_opened.len(),
        newly_closed = report.changes.newly_closed.len(),
        reopened = report.changes.reopened.len(),
        high_risk = report.summary.high_risk_findings,
        duration_ms = scan_result.duration.as_millis(),
        "Scan complete"
    );

    Ok(ScanRun {
        report,
        report_path,
    })
}

/// Build pipeline input from a finished nmap run.
fn scan_input(result: &ScanResult) -> ScanInput {
    let observations = events::extract(&result.nmap_run);
    let run = &result.nmap_run;

    let mut metadata = vec![
        ("command".to_string(), result.command.clone()),
        ("hosts_up".to_string(), observations.hosts_up.len().to_string()),
    ];
    if let Some(version) = &run.version {
        metadata.push(("nmap_version".to_string(), version.clone()));
    }
    if let Some(elapsed) = run.elapsed_secs() {
        metadata.push(("nmap_elapsed_secs".to_string(), format!("{elapsed:.2}")));
    }

    ScanInput {
        target: result.target.to_string(),
        profile: result.profile.as_str().to_string(),
        timestamp: result.started_at,
        events: observations.events,
        hosts_up: observations.hosts_up,
        metadata,
        scan_duration_secs: Some(result.duration.as_secs_f64()),
    }
}

#[cfg(test)]
mod tests {
    use surface_core::{PortKey, PortState, Protocol, ScanStatus};
    use surface_store::SqliteHistoryStore;

    use super::*;
    use crate::error::MonitorError;
    use crate::risk::RiskScorer;

    fn setup(reports_dir: &std::path::Path) -> (Arc<ScanPipeline>, SqliteHistoryStore, MonitorConfig) {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let pipeline = Arc::new(ScanPipeline::new(
            Arc::new(store.clone()),
            RiskScorer::default(),
        ));
        let config = MonitorConfig {
            reports_dir: reports_dir.to_string_lossy().to_string(),
            ..MonitorConfig::default()
        };
        (pipeline, store, config)
    }

    #[tokio::test]
    async fn test_scheduler_without_enabled_targets_returns() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _store, mut config) = setup(dir.path());
        config.targets = vec![TargetSchedule {
            address: "10.0.0.0/24".to_string(),
            name: None,
            profile: None,
            interval_secs: 60,
            enabled: false,
        }];
        let scanner = NmapScanner::new("nmap", Duration::from_secs(1));

        let scheduler = ScanScheduler::new(config, scanner, pipeline);
        assert!(scheduler.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_nmap_records_failed_scan() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, store, config) = setup(dir.path());
        let scanner = NmapScanner::new("/nonexistent/nmap", Duration::from_secs(1));
        let target: TargetSpec = "10.0.0.5".parse().unwrap();

        let result =
            run_single_scan(&scanner, &pipeline, &config, &target, ScanProfile::Fast, true).await;
        assert!(matches!(result, Err(MonitorError::NmapNotFound { .. })));

        let scans = store.recent_scans(Some("10.0.0.5"), 10).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].status, ScanStatus::Failed);
        assert!(scans[0].error_message.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_single_scan_end_to_end() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let xml_path = dir.path().join("out.xml");
        std::fs::write(&xml_path, crate::nmap_xml::tests::FAST_SCAN_XML).unwrap();
        let nmap = dir.path().join("nmap");
        std::fs::write(&nmap, format!("#!/bin/sh\ncat '{}'\n", xml_path.display())).unwrap();
        std::fs::set_permissions(&nmap, std::fs::Permissions::from_mode(0o755)).unwrap();

        let reports = dir.path().join("reports");
        let (pipeline, store, config) = setup(&reports);
        let scanner = NmapScanner::new(&nmap.to_string_lossy(), Duration::from_secs(10));
        let target: TargetSpec = "10.0.0.0/29".parse().unwrap();

        let run = run_single_scan(&scanner, &pipeline, &config, &target, ScanProfile::Fast, true)
            .await
            .unwrap();

        let report = &run.report;
        assert_eq!(report.scan.status, ScanStatus::Completed);
        assert_eq!(report.scan.target, "10.0.0.0/29");
        assert_eq!(report.summary.total_events, 4);
        assert_eq!(report.summary.open_ports, 2);
        assert_eq!(report.summary.filtered_ports, 2);
        assert_eq!(report.changes.newly_opened.len(), 2);
        assert!(run.report_path.unwrap().exists());

        let ftp = store
            .port_history(&PortKey::new("10.0.0.5", 21, Protocol::Tcp))
            .unwrap()
            .unwrap();
        assert_eq!(ftp.current_state, PortState::Open);

        let metadata = store.scan_metadata(report.scan.id).unwrap();
        assert!(metadata
            .iter()
            .any(|m| m.key == "nmap_version" && m.value == "7.94"));

        let again = run_single_scan(&scanner, &pipeline, &config, &target, ScanProfile::Fast, false)
            .await
            .unwrap();
        assert_eq!(again.report.changes.still_open.len(), 2);
        assert!(again.report.changes.has_no_changes());
        assert!(again.report_path.is_none());
    }
}
