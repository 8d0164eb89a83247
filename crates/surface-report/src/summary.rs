//! Assembly of the per-scan result handed to reporting.

use std::cmp::Ordering;

use surface_core::{
    ChangeSet, MalformedEventError, PortEvent, PortState, ReportSummary, RiskAssessment,
    ScanRecord, ScanReport,
};

/// Scores at or above this are high risk.
pub const HIGH_RISK_THRESHOLD: u8 = 8;
/// Scores at or above this (and below high) are medium risk.
pub const MEDIUM_RISK_THRESHOLD: u8 = 5;

/// Build the report for one scan from its authoritative events and results.
///
/// Risks are ordered by score descending, then by host, port and protocol.
pub fn assemble<'a>(
    scan: ScanRecord,
    events: impl IntoIterator<Item = &'a PortEvent>,
    changes: ChangeSet,
    mut risks: Vec<RiskAssessment>,
    dropped: Vec<MalformedEventError>,
) -> ScanReport {
    risks.sort_by(compare_risk);

    let mut summary = ReportSummary {
        dropped_events: dropped.len(),
        ..ReportSummary::default()
    };
    for event in events {
        summary.total_events += 1;
        match event.state {
            PortState::Open => summary.open_ports += 1,
            PortState::Closed => summary.closed_ports += 1,
            PortState::Filtered => summary.filtered_ports += 1,
            PortState::Unknown => {}
        }
    }
    summary.high_risk_findings = risks
        .iter()
        .filter(|r| r.score >= HIGH_RISK_THRESHOLD)
        .count();
    summary.medium_risk_findings = risks
        .iter()
        .filter(|r| (MEDIUM_RISK_THRESHOLD..HIGH_RISK_THRESHOLD).contains(&r.score))
        .count();

    ScanReport {
        scan,
        summary,
        changes,
        risks,
        dropped,
    }
}

fn compare_risk(a: &RiskAssessment, b: &RiskAssessment) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.host.cmp(&b.host))
        .then_with(|| a.port.cmp(&b.port))
        .then_with(|| a.protocol.cmp(&b.protocol))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use surface_core::{Protocol, RiskRationale, ScanId, ScanStatus};

    use super::*;

    fn scan() -> ScanRecord {
        ScanRecord {
            id: ScanId(1),
            target: "10.0.0.5".to_string(),
            profile: "fast".to_string(),
            timestamp: Utc::now(),
            status: ScanStatus::Completed,
            error_message: None,
            duration_secs: Some(1.0),
        }
    }

    fn event(port: u16, state: PortState) -> PortEvent {
        PortEvent {
            host: "10.0.0.5".to_string(),
            port,
            protocol: Protocol::Tcp,
            state,
            service: None,
            product: None,
            version: None,
            timestamp: Utc::now(),
        }
    }

    fn risk(host: &str, port: u16, score: u8) -> RiskAssessment {
        RiskAssessment {
            host: host.to_string(),
            port,
            protocol: Protocol::Tcp,
            service: None,
            state: PortState::Open,
            score,
            rationale: RiskRationale::PortMatch,
            rule: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let events = vec![
            event(21, PortState::Open),
            event(22, PortState::Open),
            event(23, PortState::Closed),
            event(25, PortState::Filtered),
            event(26, PortState::Unknown),
        ];
        let risks = vec![risk("10.0.0.5", 21, 8), risk("10.0.0.5", 22, 4), risk("10.0.0.5", 25, 5)];

        let report = assemble(scan(), &events, ChangeSet::default(), risks, Vec::new());

        assert_eq!(report.summary.total_events, 5);
        assert_eq!(report.summary.open_ports, 2);
        assert_eq!(report.summary.closed_ports, 1);
        assert_eq!(report.summary.filtered_ports, 1);
        assert_eq!(report.summary.high_risk_findings, 1);
        assert_eq!(report.summary.medium_risk_findings, 1);
        assert_eq!(report.summary.dropped_events, 0);
    }

    #[test]
    fn test_risks_sorted_by_score_then_triple() {
        let risks = vec![
            risk("10.0.0.6", 80, 3),
            risk("10.0.0.5", 443, 3),
            risk("10.0.0.5", 23, 9),
            risk("10.0.0.5", 80, 3),
        ];
        let report = assemble(scan(), &[], ChangeSet::default(), risks, Vec::new());
        let order: Vec<(String, u16)> = report
            .risks
            .iter()
            .map(|r| (r.host.clone(), r.port))
            .collect();
        assert_eq!(
            order,
            vec![
                ("10.0.0.5".to_string(), 23),
                ("10.0.0.5".to_string(), 80),
                ("10.0.0.5".to_string(), 443),
                ("10.0.0.6".to_string(), 80),
            ]
        );
    }
}
