//! Database schema: tables, constraints, and indexes.
//!
//! All statements are idempotent so the schema can be applied on every open.

use rusqlite::Connection;

/// Bumped whenever a table definition changes.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS targets (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    address     TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scans (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id         INTEGER NOT NULL REFERENCES targets(id),
    target_address    TEXT NOT NULL,
    profile           TEXT NOT NULL,
    timestamp         TEXT NOT NULL,
    status            TEXT NOT NULL
                      CHECK (status IN ('running', 'completed', 'partial', 'failed')),
    error_message     TEXT,
    duration_seconds  REAL
);
CREATE INDEX IF NOT EXISTS idx_scans_target ON scans(target_address, id);

CREATE TABLE IF NOT EXISTS hosts (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id  INTEGER NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    host     TEXT NOT NULL,
    UNIQUE (scan_id, host)
);

CREATE TABLE IF NOT EXISTS port_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id    INTEGER NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    host       TEXT NOT NULL CHECK (length(host) > 0),
    port       INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    protocol   TEXT NOT NULL CHECK (protocol IN ('tcp', 'udp')),
    state      TEXT NOT NULL CHECK (state IN ('open', 'closed', 'filtered', 'unknown')),
    service    TEXT,
    product    TEXT,
    version    TEXT,
    timestamp  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_port_events_scan ON port_events(scan_id);
CREATE INDEX IF NOT EXISTS idx_port_events_triple ON port_events(host, port, protocol);

CREATE TABLE IF NOT EXISTS port_history (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    host           TEXT NOT NULL,
    port           INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    protocol       TEXT NOT NULL CHECK (protocol IN ('tcp', 'udp')),
    first_seen     TEXT NOT NULL,
    last_seen      TEXT NOT NULL,
    seen_count     INTEGER NOT NULL DEFAULT 1 CHECK (seen_count >= 1),
    current_state  TEXT NOT NULL
                   CHECK (current_state IN ('open', 'closed', 'filtered', 'unknown')),
    UNIQUE (host, port, protocol)
);
CREATE INDEX IF NOT EXISTS idx_port_history_host ON port_history(host);

CREATE TABLE IF NOT EXISTS scan_metadata (
    scan_id  INTEGER NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    key      TEXT NOT NULL,
    value    TEXT NOT NULL,
    PRIMARY KEY (scan_id, key)
);
"#;

/// Connection-level settings applied on every open.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Create all tables and indexes if absent.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tracing::debug!(version = SCHEMA_VERSION, "Schema initialized");
    Ok(())
}

/// Schema version recorded in the database file; 0 when never initialized.
pub fn version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}
