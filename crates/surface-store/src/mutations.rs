//! Write operations: scan lifecycle and the per-scan history commit.

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction, TransactionBehavior};
use surface_core::{EventBatch, PortEvent, ScanId, ScanOutcome};

use crate::client::{SqliteHistoryStore, StoreError};

const UPSERT_HISTORY: &str = "INSERT INTO port_history \
     (host, port, protocol, first_seen, last_seen, seen_count, current_state) \
     VALUES (?1, ?2, ?3, ?4, ?4, 1, ?5) \
     ON CONFLICT(host, port, protocol) DO UPDATE SET \
         last_seen = excluded.last_seen, \
         seen_count = port_history.seen_count + 1, \
         current_state = excluded.current_state";

impl SqliteHistoryStore {
    // ── Scans ─────────────────────────────────────────────────────

    /// Register the target if new and create a `running` scan row.
    pub fn insert_scan(
        &self,
        target: &str,
        profile: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ScanId, StoreError> {
        let conn = self.lock()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO targets (address, created_at) VALUES (?1, ?2) \
             ON CONFLICT(address) DO NOTHING",
            params![target, timestamp],
        )?;
        let target_id: i64 = tx.query_row(
            "SELECT id FROM targets WHERE address = ?1",
            params![target],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO scans (target_id, target_address, profile, timestamp, status) \
             VALUES (?1, ?2, ?3, ?4, 'running')",
            params![target_id, target, profile, timestamp],
        )?;
        let scan_id = ScanId(tx.last_insert_rowid());
        tx.commit()?;

        tracing::info!(scan_id = %scan_id, target = %target, profile = %profile, "Scan recorded");
        Ok(scan_id)
    }

    /// Set the final status, error message and duration of a scan.
    pub fn update_scan_outcome(
        &self,
        scan_id: ScanId,
        outcome: &ScanOutcome,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE scans SET status = ?1, error_message = ?2, duration_seconds = ?3 \
             WHERE id = ?4",
            params![
                outcome.status.as_str(),
                outcome.error_message,
                outcome.duration_secs,
                scan_id.0,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::ScanNotFound(scan_id));
        }

        tracing::debug!(scan_id = %scan_id, status = %outcome.status, "Scan finalized");
        Ok(())
    }

    /// Insert or replace one metadata entry of a scan.
    pub fn upsert_scan_metadata(
        &self,
        scan_id: ScanId,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scan_metadata (scan_id, key, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT(scan_id, key) DO UPDATE SET value = excluded.value",
            params![scan_id.0, key, value],
        )?;
        Ok(())
    }

    // ── History commit ────────────────────────────────────────────

    /// Persist the scan's hosts and events, then upsert history once per
    /// authoritative triple. Nothing is written if any statement fails.
    pub fn write_scan_batch(&self, scan_id: ScanId, batch: &EventBatch) -> Result<(), StoreError> {
        let conn = self.lock()?;
        // Take the write lock up front so a concurrent writer cannot
        // invalidate this transaction's read snapshot.
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM scans WHERE id = ?1)",
            params![scan_id.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::ScanNotFound(scan_id));
        }

        insert_hosts(&tx, scan_id, batch)?;
        insert_events(&tx, scan_id, batch.events())?;
        let upserted = upsert_history(&tx, batch.authoritative())?;
        tx.commit()?;

        tracing::info!(
            scan_id = %scan_id,
            hosts = batch.hosts().len(),
            events = batch.events().len(),
            triples = upserted,
            "Scan history committed"
        );
        Ok(())
    }
}

fn insert_hosts(tx: &Transaction<'_>, scan_id: ScanId, batch: &EventBatch) -> Result<(), StoreError> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO hosts (scan_id, host) VALUES (?1, ?2) ON CONFLICT(scan_id, host) DO NOTHING",
    )?;
    for host in batch.hosts() {
        stmt.execute(params![scan_id.0, host])?;
    }
    Ok(())
}

fn insert_events(
    tx: &Transaction<'_>,
    scan_id: ScanId,
    events: &[PortEvent],
) -> Result<(), StoreError> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO port_events \
         (scan_id, host, port, protocol, state, service, product, version, timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for event in events {
        stmt.execute(params![
            scan_id.0,
            event.host,
            event.port,
            event.protocol.as_str(),
            event.state.as_str(),
            event.service,
            event.product,
            event.version,
            event.timestamp,
        ])?;
    }
    Ok(())
}

/// One atomic statement per triple: concurrent writers sharing a triple each
/// add exactly one to `seen_count`.
fn upsert_history<'a>(
    tx: &Transaction<'_>,
    events: impl Iterator<Item = &'a PortEvent>,
) -> Result<usize, StoreError> {
    let mut stmt = tx.prepare_cached(UPSERT_HISTORY)?;
    let mut count = 0;
    for event in events {
        stmt.execute(params![
            event.host,
            event.port,
            event.protocol.as_str(),
            event.timestamp,
            event.state.as_str(),
        ])?;
        count += 1;
    }
    Ok(count)
}
