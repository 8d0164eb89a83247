//! Read operations: prior states, baselines, scans and port history.

use std::collections::BTreeSet;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use surface_core::{Baseline, PortHistoryRecord, PortKey, PortState, ScanId, ScanRecord};

use crate::client::{SqliteHistoryStore, StoreError};

const SCAN_COLUMNS: &str =
    "id, target_address, profile, timestamp, status, error_message, duration_seconds";

const HISTORY_COLUMNS: &str =
    "host, port, protocol, first_seen, last_seen, seen_count, current_state";

/// Metadata entry attached to a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanMetadataRecord {
    pub key: String,
    pub value: String,
}

impl SqliteHistoryStore {
    // ── Baseline reads ────────────────────────────────────────────

    /// Current state of a triple, if it has ever been observed.
    pub fn current_state(&self, key: &PortKey) -> Result<Option<PortState>, StoreError> {
        let conn = self.lock()?;
        let state = conn
            .query_row(
                "SELECT current_state FROM port_history \
                 WHERE host = ?1 AND port = ?2 AND protocol = ?3",
                params![key.host, key.port, key.protocol.as_str()],
                |row| text_enum::<PortState>(row, 0),
            )
            .optional()?;
        Ok(state)
    }

    /// History of the triples observed by the most recent completed or
    /// partial scan of `target` with an id below `before`.
    pub fn baseline_for(&self, target: &str, before: ScanId) -> Result<Baseline, StoreError> {
        let conn = self.lock()?;

        let prior: Option<i64> = conn
            .query_row(
                "SELECT id FROM scans \
                 WHERE target_address = ?1 AND id < ?2 AND status IN ('completed', 'partial') \
                 ORDER BY id DESC LIMIT 1",
                params![target, before.0],
                |row| row.get(0),
            )
            .optional()?;

        let Some(prior) = prior else {
            return Ok(Baseline::default());
        };

        let mut stmt = conn.prepare_cached("SELECT host FROM hosts WHERE scan_id = ?1")?;
        let hosts = stmt
            .query_map(params![prior], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut stmt = conn.prepare_cached(
            "SELECT h.host, h.port, h.protocol, h.first_seen, h.last_seen, h.seen_count, \
                    h.current_state \
             FROM port_history h \
             WHERE EXISTS ( \
                 SELECT 1 FROM port_events e \
                 WHERE e.scan_id = ?1 AND e.host = h.host \
                   AND e.port = h.port AND e.protocol = h.protocol) \
             ORDER BY h.host, h.port, h.protocol",
        )?;
        let records = stmt
            .query_map(params![prior], history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Baseline {
            scan_id: Some(ScanId(prior)),
            hosts,
            records,
        })
    }

    // ── Scans ─────────────────────────────────────────────────────

    /// Get a scan by id.
    pub fn get_scan(&self, scan_id: ScanId) -> Result<Option<ScanRecord>, StoreError> {
        let conn = self.lock()?;
        let scan = conn
            .query_row(
                &format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = ?1"),
                params![scan_id.0],
                scan_from_row,
            )
            .optional()?;
        Ok(scan)
    }

    /// Most recent scans first, optionally restricted to one target.
    pub fn recent_scans(
        &self,
        target: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScanRecord>, StoreError> {
        let conn = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SCAN_COLUMNS} FROM scans \
             WHERE (?1 IS NULL OR target_address = ?1) \
             ORDER BY id DESC LIMIT ?2"
        ))?;
        let scans = stmt
            .query_map(params![target, limit], scan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(scans)
    }

    /// Most recent completed or partial scan of a target.
    pub fn latest_successful_scan(&self, target: &str) -> Result<Option<ScanRecord>, StoreError> {
        let conn = self.lock()?;
        let scan = conn
            .query_row(
                &format!(
                    "SELECT {SCAN_COLUMNS} FROM scans \
                     WHERE target_address = ?1 AND status IN ('completed', 'partial') \
                     ORDER BY id DESC LIMIT 1"
                ),
                params![target],
                scan_from_row,
            )
            .optional()?;
        Ok(scan)
    }

    /// Metadata entries of a scan, ordered by key.
    pub fn scan_metadata(&self, scan_id: ScanId) -> Result<Vec<ScanMetadataRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT key, value FROM scan_metadata WHERE scan_id = ?1 ORDER BY key",
        )?;
        let entries = stmt
            .query_map(params![scan_id.0], |row| {
                Ok(ScanMetadataRecord {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Number of raw events stored for a scan, duplicates included.
    pub fn event_count(&self, scan_id: ScanId) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM port_events WHERE scan_id = ?1",
            params![scan_id.0],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ── Port history ──────────────────────────────────────────────

    /// Lifecycle record of one triple.
    pub fn port_history(&self, key: &PortKey) -> Result<Option<PortHistoryRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {HISTORY_COLUMNS} FROM port_history \
                     WHERE host = ?1 AND port = ?2 AND protocol = ?3"
                ),
                params![key.host, key.port, key.protocol.as_str()],
                history_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All lifecycle records of a host, ordered by port then protocol.
    pub fn host_ports(&self, host: &str) -> Result<Vec<PortHistoryRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {HISTORY_COLUMNS} FROM port_history WHERE host = ?1 \
             ORDER BY port, protocol"
        ))?;
        let records = stmt
            .query_map(params![host], history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

// ── Row mapping ───────────────────────────────────────────────────

/// Read a text column into any `FromStr` enum.
fn text_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<ScanRecord> {
    Ok(ScanRecord {
        id: ScanId(row.get(0)?),
        target: row.get(1)?,
        profile: row.get(2)?,
        timestamp: row.get(3)?,
        status: text_enum(row, 4)?,
        error_message: row.get(5)?,
        duration_secs: row.get(6)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<PortHistoryRecord> {
    Ok(PortHistoryRecord {
        host: row.get(0)?,
        port: row.get(1)?,
        protocol: text_enum(row, 2)?,
        first_seen: row.get(3)?,
        last_seen: row.get(4)?,
        seen_count: row.get(5)?,
        current_state: text_enum(row, 6)?,
    })
}
