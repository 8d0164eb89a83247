//! Rule-based risk scoring.
//!
//! Each port event is scored by looking it up in a rule table. Port rules
//! (exact port, optionally restricted to a protocol) are consulted first,
//! then service rules (case-insensitive substring of the detected service
//! name). Within a tier, configured rules come before built-in ones and
//! rules are tried in table order. The first match wins.
//!
//! State then adjusts the matched score: `open` keeps it, `filtered` and
//! `unknown` halve it (rounded down), `closed` is never scored.

use surface_core::{PortEvent, PortState, Protocol, RiskAssessment, RiskRationale};

use crate::config::{RiskConfig, RiskRuleConfig};
use crate::error::{MonitorError, Result};

pub const MAX_SCORE: u8 = 10;

/// Built-in port rules: `(name, port, score)`, all tcp.
const DEFAULT_PORT_RULES: &[(&str, u16, u8)] = &[
    ("ftp", 21, 8),
    ("ssh", 22, 4),
    ("telnet", 23, 9),
    ("smtp", 25, 5),
    ("http", 80, 3),
    ("pop3", 110, 6),
    ("imap", 143, 5),
    ("https", 443, 2),
    ("smb", 445, 9),
    ("pptp", 1723, 9),
    ("rdp", 3389, 8),
];

/// Built-in service rules: `(name, service substring, score)`.
/// `https` must precede `http`.
const DEFAULT_SERVICE_RULES: &[(&str, &str, u8)] = &[
    ("ftp", "ftp", 8),
    ("telnet", "telnet", 9),
    ("ssh", "ssh", 4),
    ("https", "https", 2),
    ("http", "http", 3),
    ("smtp", "smtp", 5),
    ("pop3", "pop3", 6),
    ("imap", "imap", 5),
    ("pptp", "pptp", 9),
    ("rdp", "ms-wbt-server", 8),
    ("rdp", "rdp", 8),
    ("smb", "microsoft-ds", 9),
    ("smb", "smb", 9),
];

/// What a rule matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatcher {
    /// Exact port; any protocol when `protocol` is `None`. An optional
    /// service substring narrows the match further.
    Port {
        port: u16,
        protocol: Option<Protocol>,
        service: Option<String>,
    },
    /// Lowercase substring of the service name.
    Service(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskRule {
    pub name: String,
    pub matcher: RuleMatcher,
    pub score: u8,
}

impl RiskRule {
    pub fn port(name: &str, port: u16, protocol: Option<Protocol>, score: u8) -> Self {
        Self {
            name: name.to_string(),
            matcher: RuleMatcher::Port {
                port,
                protocol,
                service: None,
            },
            score,
        }
    }

    pub fn service(name: &str, pattern: &str, score: u8) -> Self {
        Self {
            name: name.to_string(),
            matcher: RuleMatcher::Service(pattern.to_lowercase()),
            score,
        }
    }

    fn from_config(rule: &RiskRuleConfig) -> Result<Self> {
        let service = rule
            .service
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let matcher = match (rule.port, service) {
            (Some(port), service) => RuleMatcher::Port {
                port,
                protocol: rule.protocol,
                service,
            },
            (None, Some(pattern)) => RuleMatcher::Service(pattern),
            (None, None) => {
                return Err(MonitorError::Config(format!(
                    "risk rule '{}' needs a port or a service",
                    rule.name
                )))
            }
        };

        Ok(Self {
            name: rule.name.clone(),
            matcher,
            score: rule.score,
        })
    }

    fn matches(&self, event: &PortEvent, service: Option<&str>) -> bool {
        match &self.matcher {
            RuleMatcher::Port {
                port,
                protocol,
                service: pattern,
            } => {
                *port == event.port
                    && protocol.map_or(true, |p| p == event.protocol)
                    && pattern
                        .as_deref()
                        .map_or(true, |pat| service.is_some_and(|s| s.contains(pat)))
            }
            RuleMatcher::Service(pattern) => service.is_some_and(|s| s.contains(pattern.as_str())),
        }
    }

    fn is_port_rule(&self) -> bool {
        matches!(self.matcher, RuleMatcher::Port { .. })
    }
}

/// Ordered rule lookup with a fallback score.
#[derive(Debug, Clone)]
pub struct RiskRuleTable {
    port_rules: Vec<RiskRule>,
    service_rules: Vec<RiskRule>,
    default_score: u8,
}

impl RiskRuleTable {
    /// The built-in table with the given fallback score.
    pub fn builtin(default_score: u8) -> Self {
        Self::with_rules(builtin_rules(), default_score)
    }

    /// Build a table from rules in priority order.
    pub fn with_rules(rules: Vec<RiskRule>, default_score: u8) -> Self {
        let (port_rules, service_rules) = rules.into_iter().partition(RiskRule::is_port_rule);
        Self {
            port_rules,
            service_rules,
            default_score,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Result<Self> {
        let mut rules = config
            .rules
            .iter()
            .map(RiskRule::from_config)
            .collect::<Result<Vec<_>>>()?;
        if !config.replace_defaults {
            rules.extend(builtin_rules());
        }
        Ok(Self::with_rules(rules, config.default_score))
    }

    pub fn default_score(&self) -> u8 {
        self.default_score
    }

    pub fn len(&self) -> usize {
        self.port_rules.len() + self.service_rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First matching rule and the rationale of its tier.
    pub fn lookup(&self, event: &PortEvent) -> Option<(&RiskRule, RiskRationale)> {
        let service = event.service.as_deref().map(str::to_lowercase);
        let service = service.as_deref();

        if let Some(rule) = self.port_rules.iter().find(|r| r.matches(event, service)) {
            return Some((rule, RiskRationale::PortMatch));
        }
        self.service_rules
            .iter()
            .find(|r| r.matches(event, service))
            .map(|rule| (rule, RiskRationale::ServiceMatch))
    }
}

fn builtin_rules() -> Vec<RiskRule> {
    let ports = DEFAULT_PORT_RULES
        .iter()
        .map(|(name, port, score)| RiskRule::port(name, *port, Some(Protocol::Tcp), *score));
    let services = DEFAULT_SERVICE_RULES
        .iter()
        .map(|(name, pattern, score)| RiskRule::service(name, pattern, *score));
    ports.chain(services).collect()
}

/// Scores port events against a rule table.
#[derive(Debug, Clone)]
pub struct RiskScorer {
    table: RiskRuleTable,
}

impl RiskScorer {
    pub fn new(table: RiskRuleTable) -> Self {
        Self { table }
    }

    pub fn from_config(config: &RiskConfig) -> Result<Self> {
        let table = RiskRuleTable::from_config(config)?;
        tracing::debug!(
            rules = table.len(),
            default_score = table.default_score(),
            replace_defaults = config.replace_defaults,
            "Risk rule table loaded"
        );
        Ok(Self::new(table))
    }

    pub fn table(&self) -> &RiskRuleTable {
        &self.table
    }

    /// Score one event. Closed ports yield `None`.
    pub fn score(&self, event: &PortEvent) -> Option<RiskAssessment> {
        if event.state == PortState::Closed {
            return None;
        }

        let (base, rationale, rule) = match self.table.lookup(event) {
            Some((rule, rationale)) => (rule.score, rationale, Some(rule.name.clone())),
            None => (self.table.default_score, RiskRationale::DefaultUnknown, None),
        };
        let base = base.min(MAX_SCORE);

        let (score, rationale) = match event.state {
            PortState::Open => (base, rationale),
            _ => (base / 2, RiskRationale::StateAdjusted),
        };

        Some(RiskAssessment {
            host: event.host.clone(),
            port: event.port,
            protocol: event.protocol,
            service: event.service.clone(),
            state: event.state,
            score,
            rationale,
            rule,
        })
    }

    /// Score every event, skipping closed ones.
    pub fn score_all<'a>(
        &self,
        events: impl IntoIterator<Item = &'a PortEvent>,
    ) -> Vec<RiskAssessment> {
        events.into_iter().filter_map(|e| self.score(e)).collect()
    }
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new(RiskRuleTable::builtin(RiskConfig::default().default_score))
    }
}
