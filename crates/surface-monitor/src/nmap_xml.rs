//! Nmap XML output deserialization.
//!
//! Nmap's `-oX -` flag writes structured XML to stdout. These structs
//! deserialize the parts of it the monitor uses via `quick-xml` with serde.
//! Port ids and states are kept as raw strings; validation happens when
//! they are normalized into port events.

use serde::Deserialize;

use crate::error::{MonitorError, Result};

/// Root element: `<nmaprun>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct NmapRun {
    #[serde(rename = "@scanner")]
    pub scanner: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
    #[serde(rename = "@args")]
    pub args: Option<String>,
    #[serde(rename = "@startstr")]
    pub start_str: Option<String>,
    #[serde(rename = "host", default)]
    pub hosts: Vec<NmapHost>,
    pub runstats: Option<RunStats>,
}

/// A single host from scan results.
#[derive(Debug, Clone, Deserialize)]
pub struct NmapHost {
    pub status: Option<HostStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<Address>,
    pub hostnames: Option<Hostnames>,
    pub ports: Option<Ports>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostStatus {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Address {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<Hostname>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hostname {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ports {
    #[serde(rename = "port", default)]
    pub ports: Vec<NmapPort>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapPort {
    #[serde(rename = "@protocol")]
    pub protocol: String,
    #[serde(rename = "@portid")]
    pub port_id: String,
    pub state: PortStatus,
    pub service: Option<NmapService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortStatus {
    #[serde(rename = "@state")]
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NmapService {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStats {
    pub finished: Option<Finished>,
    pub hosts: Option<RunStatsHosts>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Finished {
    #[serde(rename = "@elapsed")]
    pub elapsed: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStatsHosts {
    #[serde(rename = "@up")]
    pub up: Option<String>,
    #[serde(rename = "@total")]
    pub total: Option<String>,
}

impl NmapHost {
    /// The host identifier used for port events: IPv4, then IPv6, then the
    /// first hostname.
    pub fn identifier(&self) -> Option<&str> {
        self.address_of("ipv4")
            .or_else(|| self.address_of("ipv6"))
            .or_else(|| self.hostname())
    }

    fn address_of(&self, kind: &str) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.addr_type == kind)
            .map(|a| a.addr.as_str())
    }

    /// Extract the first hostname, if present.
    pub fn hostname(&self) -> Option<&str> {
        self.hostnames
            .as_ref()
            .and_then(|hn| hn.hostnames.first())
            .map(|h| h.name.as_str())
    }

    /// Check if the host is up.
    pub fn is_up(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state == "up")
    }

    pub fn ports(&self) -> &[NmapPort] {
        self.ports.as_ref().map(|p| p.ports.as_slice()).unwrap_or(&[])
    }
}

impl NmapRun {
    /// Elapsed seconds reported by nmap, if present and numeric.
    pub fn elapsed_secs(&self) -> Option<f64> {
        self.runstats
            .as_ref()
            .and_then(|s| s.finished.as_ref())
            .and_then(|f| f.elapsed.as_deref())
            .and_then(|e| e.parse().ok())
    }

    pub fn hosts_up(&self) -> usize {
        self.hosts.iter().filter(|h| h.is_up()).count()
    }
}

/// Parse nmap XML bytes into a structured `NmapRun`.
pub fn parse_nmap_xml(xml: &[u8]) -> Result<NmapRun> {
    quick_xml::de::from_reader(xml).map_err(|e| MonitorError::XmlParse(format!("{e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const FAST_SCAN_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" version="7.94" args="nmap -T4 --top-ports 100 -oX - 10.0.0.0/29" startstr="Mon Feb 24 10:05:00 2026">
  <scaninfo type="connect" protocol="tcp" numservices="100" services="7,9"/>
  <host>
    <status state="up" reason="syn-ack"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <hostnames>
      <hostname name="files.local" type="PTR"/>
    </hostnames>
    <ports>
      <extraports state="closed" count="96"/>
      <port protocol="tcp" portid="21">
        <state state="open" reason="syn-ack"/>
        <service name="ftp" product="vsftpd" version="3.0.5"/>
      </port>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" product="OpenSSH" version="9.6"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open|filtered" reason="no-response"/>
        <service name="http"/>
      </port>
      <port protocol="tcp" portid="3306">
        <state state="filtered" reason="no-response"/>
      </port>
    </ports>
  </host>
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.0.6" addrtype="ipv4"/>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="10.0.0.7" addrtype="ipv4"/>
  </host>
  <runstats>
    <finished time="1740400100" elapsed="15.30"/>
    <hosts up="2" down="1" total="3"/>
  </runstats>
</nmaprun>"#;

    #[test]
    fn test_parse_fast_scan() {
        let result = parse_nmap_xml(FAST_SCAN_XML.as_bytes()).unwrap();
        assert_eq!(result.version.as_deref(), Some("7.94"));
        assert_eq!(result.hosts.len(), 3);
        assert_eq!(result.hosts_up(), 2);
        assert_eq!(result.elapsed_secs(), Some(15.30));

        let host = &result.hosts[0];
        assert_eq!(host.identifier(), Some("10.0.0.5"));
        assert_eq!(host.hostname(), Some("files.local"));

        let ports = host.ports();
        assert_eq!(ports.len(), 4);
        assert_eq!(ports[0].port_id, "21");
        assert_eq!(ports[0].state.state, "open");
        let ftp = ports[0].service.as_ref().unwrap();
        assert_eq!(ftp.name.as_deref(), Some("ftp"));
        assert_eq!(ftp.product.as_deref(), Some("vsftpd"));
        assert_eq!(ports[2].state.state, "open|filtered");
        assert!(ports[3].service.is_none());

        assert!(result.hosts[1].ports().is_empty());
    }

    #[test]
    fn test_parse_empty_scan() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sn 192.168.99.0/24">
  <runstats>
    <finished elapsed="1.00"/>
    <hosts up="0" down="256" total="256"/>
  </runstats>
</nmaprun>"#;

        let result = parse_nmap_xml(xml.as_bytes()).unwrap();
        assert_eq!(result.hosts.len(), 0);
        assert_eq!(result.hosts_up(), 0);
    }

    #[test]
    fn test_malformed_xml_rejected() {
        let result = parse_nmap_xml(b"<nmaprun><host><status state=");
        assert!(matches!(result, Err(MonitorError::XmlParse(_))));
    }

    #[test]
    fn test_identifier_falls_back_to_hostname() {
        let host = NmapHost {
            status: None,
            addresses: vec![Address {
                addr: "AA:BB:CC:DD:EE:01".to_string(),
                addr_type: "mac".to_string(),
            }],
            hostnames: Some(Hostnames {
                hostnames: vec![Hostname {
                    name: "scanme.nmap.org".to_string(),
                }],
            }),
            ports: None,
        };
        assert_eq!(host.identifier(), Some("scanme.nmap.org"));
        assert!(!host.is_up());
    }
}
