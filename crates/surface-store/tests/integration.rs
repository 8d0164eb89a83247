//! Integration tests for surface-store against on-disk SQLite databases.
//!
//! Run with: cargo test --package surface-store --test integration

use std::collections::BTreeSet;
use std::thread;

use chrono::{DateTime, TimeDelta, Utc};
use surface_core::{
    BaselineSnapshot, BaselineView, EventBatch, HistoryStore, PortEvent, PortKey, PortState,
    Protocol, ScanId, ScanOutcome, ScanStatus, StorageError,
};
use surface_store::SqliteHistoryStore;
use tempfile::TempDir;

fn temp_store() -> (TempDir, SqliteHistoryStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteHistoryStore::open(dir.path().join("db").join("surface.db")).unwrap();
    (dir, store)
}

fn make_event(host: &str, port: u16, state: PortState, ts: DateTime<Utc>) -> PortEvent {
    PortEvent {
        host: host.to_string(),
        port,
        protocol: Protocol::Tcp,
        state,
        service: Some("ftp".to_string()),
        product: None,
        version: None,
        timestamp: ts,
    }
}

/// Record, capture, commit and finalize one scan.
fn run_scan(
    store: &SqliteHistoryStore,
    target: &str,
    ts: DateTime<Utc>,
    events: Vec<PortEvent>,
) -> (ScanId, BaselineView) {
    let scan_id = store.record_scan(target, "fast", ts).unwrap();
    let batch = EventBatch::new(events, Vec::new());
    let snapshot = BaselineSnapshot::capture(store, scan_id, target, &batch).unwrap();
    let view = snapshot.view().clone();
    snapshot.commit(store, &batch).unwrap();
    store
        .finish_scan(scan_id, &ScanOutcome::succeeded(0, Some(1.0)))
        .unwrap();
    (scan_id, view)
}

#[test]
fn test_seen_count_matches_scans_observing_triple() {
    let (_dir, store) = temp_store();
    let t0 = Utc::now();

    for i in 0..4 {
        let ts = t0 + TimeDelta::minutes(i);
        run_scan(
            &store,
            "10.0.0.0/24",
            ts,
            vec![make_event("10.0.0.5", 22, PortState::Open, ts)],
        );
    }

    let key = PortKey::new("10.0.0.5", 22, Protocol::Tcp);
    let record = store.history(&key).unwrap().unwrap();
    assert_eq!(record.seen_count, 4);
    assert_eq!(record.first_seen, t0);
    assert_eq!(record.last_seen, t0 + TimeDelta::minutes(3));
    assert!(record.first_seen <= record.last_seen);
}

#[test]
fn test_ftp_reopen_lifecycle() {
    let (_dir, store) = temp_store();
    let key = PortKey::new("10.0.0.5", 21, Protocol::Tcp);
    let t1 = Utc::now();
    let t2 = t1 + TimeDelta::hours(1);
    let t3 = t2 + TimeDelta::hours(1);

    let (_, first) = run_scan(
        &store,
        "10.0.0.5",
        t1,
        vec![make_event("10.0.0.5", 21, PortState::Open, t1)],
    );
    assert_eq!(first.prior_state(&key), None);

    let (_, second) = run_scan(
        &store,
        "10.0.0.5",
        t2,
        vec![make_event("10.0.0.5", 21, PortState::Closed, t2)],
    );
    assert_eq!(second.prior_state(&key), Some(PortState::Open));

    let (_, third) = run_scan(
        &store,
        "10.0.0.5",
        t3,
        vec![make_event("10.0.0.5", 21, PortState::Open, t3)],
    );
    assert_eq!(third.prior_state(&key), Some(PortState::Closed));

    let record = store.history(&key).unwrap().unwrap();
    assert_eq!(record.seen_count, 3);
    assert_eq!(record.current_state, PortState::Open);
    assert_eq!(record.first_seen, t1);
    assert_eq!(record.last_seen, t3);
}

#[test]
fn test_baseline_comes_from_latest_successful_scan_of_target() {
    let (_dir, store) = temp_store();
    let t0 = Utc::now();

    let (first, _) = run_scan(
        &store,
        "10.0.0.0/24",
        t0,
        vec![
            make_event("10.0.0.5", 22, PortState::Open, t0),
            make_event("10.0.0.6", 80, PortState::Open, t0),
        ],
    );

    // Another target touching a different host must not leak into the baseline.
    run_scan(
        &store,
        "192.168.1.1",
        t0,
        vec![make_event("192.168.1.1", 443, PortState::Open, t0)],
    );

    // A failed scan of the same target is skipped.
    let failed = store.record_scan("10.0.0.0/24", "fast", t0).unwrap();
    store
        .finish_scan(failed, &ScanOutcome::failed("nmap exited 1", None))
        .unwrap();

    let current = store.record_scan("10.0.0.0/24", "fast", t0).unwrap();
    let baseline = store.latest_baseline("10.0.0.0/24", current).unwrap();

    assert_eq!(baseline.scan_id, Some(first));
    let hosts: BTreeSet<String> = ["10.0.0.5", "10.0.0.6"].iter().map(|s| s.to_string()).collect();
    assert_eq!(baseline.hosts, hosts);
    let ports: Vec<u16> = baseline.records.iter().map(|r| r.port).collect();
    assert_eq!(ports, vec![22, 80]);
}

#[test]
fn test_first_scan_has_empty_baseline() {
    let (_dir, store) = temp_store();
    let scan_id = store.record_scan("10.0.0.5", "fast", Utc::now()).unwrap();
    let baseline = store.latest_baseline("10.0.0.5", scan_id).unwrap();
    assert!(baseline.scan_id.is_none());
    assert!(baseline.records.is_empty());
}

#[test]
fn test_duplicates_stored_but_history_upserted_once() {
    let (_dir, store) = temp_store();
    let t0 = Utc::now();
    let t1 = t0 + TimeDelta::seconds(10);

    let (scan_id, _) = run_scan(
        &store,
        "10.0.0.5",
        t0,
        vec![
            make_event("10.0.0.5", 21, PortState::Open, t0),
            make_event("10.0.0.5", 21, PortState::Closed, t1),
        ],
    );

    assert_eq!(store.event_count(scan_id).unwrap(), 2);
    let record = store
        .history(&PortKey::new("10.0.0.5", 21, Protocol::Tcp))
        .unwrap()
        .unwrap();
    assert_eq!(record.seen_count, 1);
    assert_eq!(record.current_state, PortState::Closed);
}

#[test]
fn test_failed_commit_leaves_no_partial_writes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("surface.db");
    let store = SqliteHistoryStore::open(&path).unwrap();

    let ts = Utc::now();
    let scan_id = store.record_scan("10.0.0.5", "fast", ts).unwrap();

    let batch = EventBatch::new(
        vec![make_event("10.0.0.5", 21, PortState::Open, ts)],
        Vec::new(),
    );
    let snapshot = BaselineSnapshot::capture(&store, scan_id, "10.0.0.5", &batch).unwrap();

    // Break the history table from a second connection so the upsert fails
    // after the events have already been inserted.
    let other = rusqlite::Connection::open(&path).unwrap();
    other.execute_batch("DROP TABLE port_history;").unwrap();

    let err = snapshot.commit(&store, &batch).unwrap_err();
    assert!(matches!(err, StorageError::SchemaMissing(_)), "{err:?}");

    assert_eq!(store.event_count(scan_id).unwrap(), 0);
}

#[test]
fn test_commit_for_unknown_scan_is_rejected() {
    let (_dir, store) = temp_store();
    let batch = EventBatch::new(
        vec![make_event("10.0.0.5", 21, PortState::Open, Utc::now())],
        Vec::new(),
    );
    let snapshot = BaselineSnapshot::capture(&store, ScanId(999), "10.0.0.5", &batch).unwrap();
    let err = snapshot.commit(&store, &batch).unwrap_err();
    assert!(matches!(err, StorageError::ScanNotFound(ScanId(999))));
}

#[test]
fn test_scan_lifecycle_and_listing() {
    let (_dir, store) = temp_store();
    let ts = Utc::now();

    let a = store.record_scan("10.0.0.5", "fast", ts).unwrap();
    let running = store.scan(a).unwrap().unwrap();
    assert_eq!(running.status, ScanStatus::Running);

    store
        .finish_scan(a, &ScanOutcome::succeeded(2, Some(3.5)))
        .unwrap();
    store.record_scan_metadata(a, "nmap_version", "7.94").unwrap();
    store.record_scan_metadata(a, "nmap_version", "7.95").unwrap();

    let b = store.record_scan("10.0.0.6", "full", ts).unwrap();
    store
        .finish_scan(b, &ScanOutcome::failed("timeout", Some(300.0)))
        .unwrap();

    let finished = store.scan(a).unwrap().unwrap();
    assert_eq!(finished.status, ScanStatus::Partial);
    assert_eq!(finished.duration_secs, Some(3.5));
    assert_eq!(finished.timestamp, ts);

    let metadata = store.scan_metadata(a).unwrap();
    assert_eq!(metadata.len(), 1);
    assert_eq!(metadata[0].value, "7.95");

    let all = store.list_scans(None, 10).unwrap();
    assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![b, a]);

    let only_a = store.list_scans(Some("10.0.0.5"), 10).unwrap();
    assert_eq!(only_a.len(), 1);

    assert_eq!(store.last_scan("10.0.0.5").unwrap().unwrap().id, a);
    assert!(store.last_scan("10.0.0.6").unwrap().is_none());

    let err = store
        .finish_scan(ScanId(42), &ScanOutcome::succeeded(0, None))
        .unwrap_err();
    assert!(matches!(err, StorageError::ScanNotFound(ScanId(42))));
}

#[test]
fn test_host_history_is_ordered() {
    let (_dir, store) = temp_store();
    let ts = Utc::now();
    run_scan(
        &store,
        "10.0.0.5",
        ts,
        vec![
            make_event("10.0.0.5", 443, PortState::Open, ts),
            make_event("10.0.0.5", 21, PortState::Filtered, ts),
            make_event("10.0.0.5", 80, PortState::Open, ts),
        ],
    );

    let ports: Vec<u16> = store
        .host_history("10.0.0.5")
        .unwrap()
        .iter()
        .map(|r| r.port)
        .collect();
    assert_eq!(ports, vec![21, 80, 443]);
}

#[test]
fn test_concurrent_scans_never_lose_increments() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("surface.db");
    SqliteHistoryStore::open(&path).unwrap();

    let workers = 4;
    let scans_per_worker = 5;

    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let path = path.clone();
            thread::spawn(move || {
                let store = SqliteHistoryStore::open(&path).unwrap();
                let target = format!("target-{w}");
                for _ in 0..scans_per_worker {
                    let ts = Utc::now();
                    run_scan(
                        &store,
                        &target,
                        ts,
                        vec![make_event("10.0.0.5", 22, PortState::Open, ts)],
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let store = SqliteHistoryStore::open(&path).unwrap();
    let record = store
        .history(&PortKey::new("10.0.0.5", 22, Protocol::Tcp))
        .unwrap()
        .unwrap();
    assert_eq!(record.seen_count, (workers * scans_per_worker) as u32);
}
