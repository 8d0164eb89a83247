//! Plain-text rendering of reports, scan lists and port history.

use std::fmt::Write as _;

use surface_core::{
    ChangeSet, PortChange, PortHistoryRecord, RiskAssessment, ScanRecord, ScanReport,
};
use tabled::{Table, Tabled};

/// Table row for risk findings
#[derive(Tabled)]
struct RiskRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Risk")]
    score: u8,
    #[tabled(rename = "Rationale")]
    rationale: String,
}

/// Table row for scan listings
#[derive(Tabled)]
struct ScanRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Profile")]
    profile: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

/// Table row for port history
#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Port")]
    port: u16,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Seen")]
    seen: u32,
    #[tabled(rename = "First Seen")]
    first_seen: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn change_line(out: &mut String, marker: &str, label: &str, change: &PortChange) {
    let service = change.service.as_deref().unwrap_or("unknown");
    let _ = writeln!(out, "  [{marker}] {label}: {} ({service})", change.key);
}

/// One line per classified change, grouped by category.
pub fn render_changes(changes: &ChangeSet) -> String {
    if changes.has_no_changes() {
        return "No changes detected since the previous scan.\n".to_string();
    }

    let mut out = String::new();
    for change in &changes.newly_opened {
        change_line(&mut out, "+", "NEW", change);
    }
    for change in &changes.reopened {
        change_line(&mut out, "~", "REOPENED", change);
    }
    for change in &changes.newly_closed {
        change_line(&mut out, "-", "CLOSED", change);
    }
    for change in &changes.still_open {
        change_line(&mut out, "=", "OPEN", change);
    }
    if changes.uncategorized > 0 {
        let _ = writeln!(out, "  ({} other observations unchanged)", changes.uncategorized);
    }
    out
}

pub fn render_risks(risks: &[RiskAssessment]) -> String {
    if risks.is_empty() {
        return "No scored services.\n".to_string();
    }
    let rows: Vec<RiskRow> = risks
        .iter()
        .map(|r| RiskRow {
            host: r.host.clone(),
            port: r.port,
            protocol: r.protocol.to_string(),
            service: r.service.clone().unwrap_or_else(|| "-".to_string()),
            score: r.score,
            rationale: r.rationale.to_string(),
        })
        .collect();
    format!("{}\n", Table::new(rows))
}

/// Full human-readable report: header, summary, changes and risks.
pub fn render_report(report: &ScanReport) -> String {
    let scan = &report.scan;
    let summary = &report.summary;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Scan #{} of {} ({}) at {} [{}]",
        scan.id,
        scan.target,
        scan.profile,
        scan.timestamp.format(TIME_FORMAT),
        scan.status
    );
    let _ = writeln!(
        out,
        "Ports: {} total, {} open, {} closed, {} filtered",
        summary.total_events, summary.open_ports, summary.closed_ports, summary.filtered_ports
    );
    let _ = writeln!(
        out,
        "Findings: {} high risk, {} medium risk",
        summary.high_risk_findings, summary.medium_risk_findings
    );
    if summary.dropped_events > 0 {
        let _ = writeln!(out, "Dropped {} malformed events", summary.dropped_events);
    }

    out.push_str("\nChanges:\n");
    out.push_str(&render_changes(&report.changes));
    out.push_str("\nRisk assessment:\n");
    out.push_str(&render_risks(&report.risks));
    out
}

pub fn render_scans(scans: &[ScanRecord]) -> String {
    if scans.is_empty() {
        return "No scans recorded.\n".to_string();
    }
    let rows: Vec<ScanRow> = scans
        .iter()
        .map(|s| ScanRow {
            id: s.id.0,
            target: s.target.clone(),
            profile: s.profile.clone(),
            started: s.timestamp.format(TIME_FORMAT).to_string(),
            status: s.status.to_string(),
            duration: s
                .duration_secs
                .map(|d| format!("{d:.1}s"))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    format!("{}\n", Table::new(rows))
}

pub fn render_history(host: &str, records: &[PortHistoryRecord]) -> String {
    if records.is_empty() {
        return format!("No history for {host}.\n");
    }
    let rows: Vec<HistoryRow> = records
        .iter()
        .map(|r| HistoryRow {
            port: r.port,
            protocol: r.protocol.to_string(),
            state: r.current_state.to_string(),
            seen: r.seen_count,
            first_seen: r.first_seen.format(TIME_FORMAT).to_string(),
            last_seen: r.last_seen.format(TIME_FORMAT).to_string(),
        })
        .collect();
    format!("Port history for {host}:\n{}\n", Table::new(rows))
}
