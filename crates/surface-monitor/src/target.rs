//! Scan target validation.
//!
//! Targets are passed to nmap as a positional argument, so anything that
//! could be read as an option is rejected before a process is spawned.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::MonitorError;

const MAX_HOSTNAME_LEN: usize = 253;

/// A validated scan target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Address(IpAddr),
    Network(IpNet),
    Hostname(String),
}

impl FromStr for TargetSpec {
    type Err = MonitorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MonitorError::InvalidTarget {
            target: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("target is empty"));
        }
        if raw.starts_with('-') {
            return Err(invalid("target must not start with '-'"));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(invalid("target must not contain whitespace"));
        }

        if let Ok(addr) = raw.parse::<IpAddr>() {
            return Ok(Self::Address(addr));
        }
        if let Ok(net) = raw.parse::<IpNet>() {
            return Ok(Self::Network(net));
        }
        if raw.contains('/') {
            return Err(invalid("malformed CIDR network"));
        }

        if raw.len() > MAX_HOSTNAME_LEN {
            return Err(invalid("hostname too long"));
        }
        let labels_ok = raw.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
        if !labels_ok {
            return Err(invalid("not an IP address, CIDR network or hostname"));
        }

        Ok(Self::Hostname(raw.to_ascii_lowercase()))
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{addr}"),
            Self::Network(net) => write!(f, "{net}"),
            Self::Hostname(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_addresses_networks_and_hostnames() {
        assert!(matches!(
            "10.0.0.5".parse::<TargetSpec>().unwrap(),
            TargetSpec::Address(_)
        ));
        assert!(matches!(
            "10.0.0.0/24".parse::<TargetSpec>().unwrap(),
            TargetSpec::Network(_)
        ));
        assert!(matches!(
            "2001:db8::/64".parse::<TargetSpec>().unwrap(),
            TargetSpec::Network(_)
        ));
        assert_eq!(
            "ScanMe.Nmap.org".parse::<TargetSpec>().unwrap(),
            TargetSpec::Hostname("scanme.nmap.org".to_string())
        );
    }

    #[test]
    fn test_rejects_option_injection() {
        for bad in ["-oN/tmp/x", "--script=evil", "10.0.0.1 -p-", "", "10.0.0.0/33", "a..b"] {
            assert!(
                matches!(bad.parse::<TargetSpec>(), Err(MonitorError::InvalidTarget { .. })),
                "accepted {bad:?}"
            );
        }
    }
}
