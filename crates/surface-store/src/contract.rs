//! [`HistoryStore`] implementation for the SQLite store.

use chrono::{DateTime, Utc};
use surface_core::{
    Baseline, CommitTicket, EventBatch, HistoryStore, PortHistoryRecord, PortKey, PortState,
    ScanId, ScanOutcome, ScanRecord, StorageResult,
};

use crate::client::SqliteHistoryStore;

impl HistoryStore for SqliteHistoryStore {
    fn record_scan(
        &self,
        target: &str,
        profile: &str,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<ScanId> {
        Ok(self.insert_scan(target, profile, timestamp)?)
    }

    fn finish_scan(&self, scan_id: ScanId, outcome: &ScanOutcome) -> StorageResult<()> {
        Ok(self.update_scan_outcome(scan_id, outcome)?)
    }

    fn record_scan_metadata(&self, scan_id: ScanId, key: &str, value: &str) -> StorageResult<()> {
        Ok(self.upsert_scan_metadata(scan_id, key, value)?)
    }

    fn prior_state(&self, key: &PortKey) -> StorageResult<Option<PortState>> {
        Ok(self.current_state(key)?)
    }

    fn latest_baseline(&self, target: &str, before: ScanId) -> StorageResult<Baseline> {
        Ok(self.baseline_for(target, before)?)
    }

    fn commit_scan(&self, ticket: CommitTicket, batch: &EventBatch) -> StorageResult<()> {
        Ok(self.write_scan_batch(ticket.scan_id(), batch)?)
    }

    fn scan(&self, scan_id: ScanId) -> StorageResult<Option<ScanRecord>> {
        Ok(self.get_scan(scan_id)?)
    }

    fn list_scans(&self, target: Option<&str>, limit: usize) -> StorageResult<Vec<ScanRecord>> {
        Ok(self.recent_scans(target, limit)?)
    }

    fn last_scan(&self, target: &str) -> StorageResult<Option<ScanRecord>> {
        Ok(self.latest_successful_scan(target)?)
    }

    fn history(&self, key: &PortKey) -> StorageResult<Option<PortHistoryRecord>> {
        Ok(self.port_history(key)?)
    }

    fn host_history(&self, host: &str) -> StorageResult<Vec<PortHistoryRecord>> {
        Ok(self.host_ports(host)?)
    }
}
