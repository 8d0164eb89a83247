//! Pipeline orchestration for one scan of one target.
//!
//! Steps run strictly in order:
//! normalize → record scan → capture baseline → detect changes → score →
//! commit events and history → finalize scan → assemble report.
//!
//! Any storage failure after the scan row exists aborts the run and marks
//! the scan `failed` with the error message. The commit is a single
//! transaction, so an aborted run leaves no events or history behind.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use surface_core::event::normalize;
use surface_core::{
    BaselineSnapshot, EventBatch, HistoryStore, MalformedEventError, RawPortEvent, ScanId,
    ScanOutcome, ScanReport, StorageError, StorageResult,
};
use surface_report::assemble;

use crate::diff::detect_changes;
use crate::error::PipelineError;
use crate::risk::RiskScorer;

/// Everything the scan+parse step hands to the pipeline.
#[derive(Debug, Clone)]
pub struct ScanInput {
    pub target: String,
    /// Opaque profile name, stored as-is.
    pub profile: String,
    pub timestamp: DateTime<Utc>,
    pub events: Vec<RawPortEvent>,
    /// Hosts that answered, including those with no port rows.
    pub hosts_up: Vec<String>,
    /// Key/value pairs stored alongside the scan.
    pub metadata: Vec<(String, String)>,
    /// Time spent scanning before the pipeline ran.
    pub scan_duration_secs: Option<f64>,
}

impl ScanInput {
    pub fn new(target: &str, profile: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            target: target.to_string(),
            profile: profile.to_string(),
            timestamp,
            events: Vec::new(),
            hosts_up: Vec::new(),
            metadata: Vec::new(),
            scan_duration_secs: None,
        }
    }
}

/// Runs scans through change detection, scoring and persistence.
pub struct ScanPipeline {
    store: Arc<dyn HistoryStore>,
    scorer: RiskScorer,
}

impl ScanPipeline {
    pub fn new(store: Arc<dyn HistoryStore>, scorer: RiskScorer) -> Self {
        Self { store, scorer }
    }

    /// Run one scan end to end and return its report.
    pub fn run(&self, input: ScanInput) -> Result<ScanReport, PipelineError> {
        let started = Instant::now();

        let (events, dropped) = normalize(&input.events, input.timestamp);
        let batch = EventBatch::new(events, input.hosts_up.iter().cloned());

        let scan_id = self
            .store
            .record_scan(&input.target, &input.profile, input.timestamp)
            .map_err(|e| {
                tracing::error!(target = %input.target, error = %e, "Failed to record scan");
                PipelineError::Record(e)
            })?;

        tracing::info!(
            scan_id = %scan_id,
            target = %input.target,
            profile = %input.profile,
            events = batch.events().len(),
            triples = batch.triple_count(),
            hosts = batch.hosts().len(),
            dropped = dropped.len(),
            "Pipeline started"
        );

        match self.process(scan_id, &input, &batch, dropped, started) {
            Ok(report) => {
                tracing::info!(
                    scan_id = %scan_id,
                    status = %report.scan.status,
                    newly_opened = report.changes.newly_opened.len(),
                    newly_closed = report.changes.newly_closed.len(),
                    reopened = report.changes.reopened.len(),
                    high_risk = report.summary.high_risk_findings,
                    "Pipeline complete"
                );
                Ok(report)
            }
            Err(source) => {
                tracing::error!(scan_id = %scan_id, error = %source, "Pipeline aborted");
                let duration = total_duration(&input, started);
                self.mark_failed(scan_id, &source.to_string(), duration);
                Err(PipelineError::Scan { scan_id, source })
            }
        }
    }

    fn process(
        &self,
        scan_id: ScanId,
        input: &ScanInput,
        batch: &EventBatch,
        dropped: Vec<MalformedEventError>,
        started: Instant,
    ) -> StorageResult<ScanReport> {
        let store = self.store.as_ref();

        for (key, value) in &input.metadata {
            store.record_scan_metadata(scan_id, key, value)?;
        }

        // All reads happen here, before anything is written.
        let snapshot = BaselineSnapshot::capture(store, scan_id, &input.target, batch)?;

        let changes = detect_changes(batch, snapshot.view());
        let risks = self.scorer.score_all(batch.authoritative());

        snapshot.commit(store, batch)?;
        tracing::info!(
            scan_id = %scan_id,
            events = batch.events().len(),
            triples = batch.triple_count(),
            "Scan events and history committed"
        );

        let outcome = ScanOutcome::succeeded(dropped.len(), total_duration(input, started));
        store.finish_scan(scan_id, &outcome)?;

        let scan = store
            .scan(scan_id)?
            .ok_or(StorageError::ScanNotFound(scan_id))?;

        Ok(assemble(scan, batch.authoritative(), changes, risks, dropped))
    }

    /// Record a scan whose external scan step failed, so the attempt shows
    /// up in history with its error.
    pub fn record_failed_scan(
        &self,
        target: &str,
        profile: &str,
        timestamp: DateTime<Utc>,
        error: &str,
        duration_secs: Option<f64>,
    ) -> Result<ScanId, PipelineError> {
        let scan_id = self
            .store
            .record_scan(target, profile, timestamp)
            .map_err(PipelineError::Record)?;

        self.store
            .finish_scan(scan_id, &ScanOutcome::failed(error, duration_secs))
            .map_err(|source| PipelineError::Scan { scan_id, source })?;

        tracing::warn!(scan_id = %scan_id, target = %target, error = %error, "Scan recorded as failed");
        Ok(scan_id)
    }

    fn mark_failed(&self, scan_id: ScanId, error: &str, duration_secs: Option<f64>) {
        let outcome = ScanOutcome::failed(error, duration_secs);
        if let Err(e) = self.store.finish_scan(scan_id, &outcome) {
            tracing::error!(
                scan_id = %scan_id,
                error = %e,
                "Could not mark scan as failed"
            );
        }
    }
}

fn total_duration(input: &ScanInput, started: Instant) -> Option<f64> {
    Some(input.scan_duration_secs.unwrap_or_default() + started.elapsed().as_secs_f64())
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use surface_core::{PortKey, PortState, Protocol, RiskRationale, ScanStatus};
    use surface_store::SqliteHistoryStore;

    use super::*;

    fn pipeline() -> (ScanPipeline, SqliteHistoryStore) {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let pipeline = ScanPipeline::new(Arc::new(store.clone()), RiskScorer::default());
        (pipeline, store)
    }

    fn raw(host: &str, port: &str, state: &str, service: &str) -> RawPortEvent {
        RawPortEvent {
            host: host.to_string(),
            port: port.to_string(),
            protocol: "tcp".to_string(),
            state: state.to_string(),
            service: Some(service.to_string()),
            ..Default::default()
        }
    }

    fn input(target: &str, minutes: i64, events: Vec<RawPortEvent>) -> ScanInput {
        let base = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut input = ScanInput::new(target, "fast", base + TimeDelta::minutes(minutes));
        input.events = events;
        input
    }

    #[test]
    fn test_ftp_open_close_reopen() {
        let (pipeline, store) = pipeline();
        let key = PortKey::new("10.0.0.5", 21, Protocol::Tcp);

        let first = pipeline
            .run(input("10.0.0.5", 0, vec![raw("10.0.0.5", "21", "open", "ftp")]))
            .unwrap();
        assert_eq!(first.changes.newly_opened.len(), 1);
        assert_eq!(first.scan.status, ScanStatus::Completed);
        let history = store.port_history(&key).unwrap().unwrap();
        assert_eq!(history.seen_count, 1);
        assert_eq!(history.current_state, PortState::Open);

        let second = pipeline
            .run(input("10.0.0.5", 10, vec![raw("10.0.0.5", "21", "closed", "ftp")]))
            .unwrap();
        assert_eq!(second.changes.newly_closed.len(), 1);
        assert_eq!(second.changes.newly_closed[0].current, Some(PortState::Closed));
        assert!(second.risks.is_empty());
        let history = store.port_history(&key).unwrap().unwrap();
        assert_eq!(history.seen_count, 2);
        assert_eq!(history.current_state, PortState::Closed);

        let third = pipeline
            .run(input("10.0.0.5", 20, vec![raw("10.0.0.5", "21", "open", "ftp")]))
            .unwrap();
        assert_eq!(third.changes.reopened.len(), 1);
        assert!(third.changes.newly_opened.is_empty());
        assert_eq!(third.risks[0].score, 8);
        assert_eq!(third.risks[0].rationale, RiskRationale::PortMatch);
        assert_eq!(store.port_history(&key).unwrap().unwrap().seen_count, 3);
    }

    #[test]
    fn test_port_absent_then_back_is_reopened() {
        let (pipeline, store) = pipeline();
        let scan = |minutes: i64, ports: &[&str]| {
            let mut scan = input(
                "10.0.0.5",
                minutes,
                ports.iter().map(|p| raw("10.0.0.5", p, "open", "ssh")).collect(),
            );
            scan.hosts_up = vec!["10.0.0.5".to_string()];
            pipeline.run(scan).unwrap()
        };
        let ports = |changes: &[surface_core::PortChange]| -> Vec<u16> {
            changes.iter().map(|c| c.key.port).collect()
        };

        scan(0, &["22", "23"]);

        let second = scan(10, &["22"]);
        assert_eq!(ports(&second.changes.newly_closed), vec![23]);
        assert_eq!(ports(&second.changes.still_open), vec![22]);

        let third = scan(20, &["22", "23"]);
        assert_eq!(ports(&third.changes.reopened), vec![23]);
        assert_eq!(third.changes.reopened[0].previous, Some(PortState::Closed));
        assert_eq!(ports(&third.changes.still_open), vec![22]);
        assert!(third.changes.newly_opened.is_empty());

        let key = PortKey::new("10.0.0.5", 23, Protocol::Tcp);
        assert_eq!(store.port_history(&key).unwrap().unwrap().seen_count, 2);
    }

    #[test]
    fn test_vanished_host_returning_is_reopened() {
        let (pipeline, _store) = pipeline();

        pipeline
            .run(input("10.0.0.0/24", 0, vec![raw("10.0.0.5", "22", "open", "ssh")]))
            .unwrap();
        let mut gone = input("10.0.0.0/24", 10, vec![raw("10.0.0.6", "80", "open", "http")]);
        gone.hosts_up = vec!["10.0.0.6".to_string()];
        pipeline.run(gone).unwrap();

        let back = pipeline
            .run(input(
                "10.0.0.0/24",
                20,
                vec![
                    raw("10.0.0.5", "22", "open", "ssh"),
                    raw("10.0.0.6", "80", "open", "http"),
                ],
            ))
            .unwrap();
        assert_eq!(back.changes.reopened.len(), 1);
        assert_eq!(back.changes.reopened[0].key.host, "10.0.0.5");
        assert_eq!(back.changes.still_open.len(), 1);
        assert!(back.changes.newly_opened.is_empty());
    }

    #[test]
    fn test_vanished_host_reported_closed() {
        let (pipeline, _store) = pipeline();
        let ports = ["22", "80", "443"];

        pipeline
            .run(input(
                "10.0.0.0/24",
                0,
                ports.iter().map(|p| raw("10.0.0.5", p, "open", "http")).collect(),
            ))
            .unwrap();

        let mut second = input("10.0.0.0/24", 10, vec![raw("10.0.0.6", "22", "open", "ssh")]);
        second.hosts_up = vec!["10.0.0.6".to_string()];
        let report = pipeline.run(second).unwrap();

        let closed: Vec<u16> = report.changes.newly_closed.iter().map(|c| c.key.port).collect();
        assert_eq!(closed, vec![22, 80, 443]);
        assert_eq!(report.changes.newly_opened.len(), 1);
    }

    #[test]
    fn test_malformed_events_make_scan_partial() {
        let (pipeline, store) = pipeline();
        let report = pipeline
            .run(input(
                "10.0.0.5",
                0,
                vec![
                    raw("10.0.0.5", "22", "open", "ssh"),
                    raw("10.0.0.5", "70000", "open", "ssh"),
                    raw("", "80", "open", "http"),
                ],
            ))
            .unwrap();

        assert_eq!(report.scan.status, ScanStatus::Partial);
        assert_eq!(report.summary.dropped_events, 2);
        assert_eq!(report.dropped.len(), 2);
        assert_eq!(report.summary.total_events, 1);
        assert_eq!(store.event_count(report.scan.id).unwrap(), 1);
    }

    #[test]
    fn test_metadata_and_duration_recorded() {
        let (pipeline, store) = pipeline();
        let mut scan = input("10.0.0.5", 0, vec![raw("10.0.0.5", "22", "open", "ssh")]);
        scan.metadata = vec![("nmap_version".to_string(), "7.94".to_string())];
        scan.scan_duration_secs = Some(12.5);

        let report = pipeline.run(scan).unwrap();
        assert!(report.scan.duration_secs.unwrap() >= 12.5);

        let metadata = store.scan_metadata(report.scan.id).unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].key, "nmap_version");
        assert_eq!(metadata[0].value, "7.94");
    }

    #[test]
    fn test_storage_failure_marks_scan_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.db");
        let store = SqliteHistoryStore::open(&path).unwrap();
        let pipeline = ScanPipeline::new(Arc::new(store.clone()), RiskScorer::default());

        let other = rusqlite::Connection::open(&path).unwrap();
        other.execute_batch("DROP TABLE port_history").unwrap();

        let err = pipeline
            .run(input("10.0.0.5", 0, vec![raw("10.0.0.5", "21", "open", "ftp")]))
            .unwrap_err();
        let scan_id = err.scan_id().unwrap();

        let scan = store.get_scan(scan_id).unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        assert!(scan.error_message.is_some());
        assert_eq!(store.event_count(scan_id).unwrap(), 0);
    }

    #[test]
    fn test_record_failed_scan() {
        let (pipeline, store) = pipeline();
        let scan_id = pipeline
            .record_failed_scan("10.0.0.5", "stealth", Utc::now(), "requires root", Some(0.2))
            .unwrap();

        let scan = store.get_scan(scan_id).unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        assert_eq!(scan.error_message.as_deref(), Some("requires root"));
        assert!(store.latest_successful_scan("10.0.0.5").unwrap().is_none());
    }
}
