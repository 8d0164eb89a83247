//! Conversion of nmap output into raw port events.

use surface_core::RawPortEvent;

use crate::nmap_xml::{NmapHost, NmapRun};

/// Raw observations of one nmap run, before validation.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    pub events: Vec<RawPortEvent>,
    /// Hosts nmap reported up, including those without port rows.
    pub hosts_up: Vec<String>,
}

/// Flatten every host's ports into raw events.
///
/// Hosts with no usable identifier are skipped. Port fields are copied
/// as-is; range and protocol checks happen during validation.
pub fn extract(run: &NmapRun) -> Observations {
    let mut observations = Observations::default();

    for host in &run.hosts {
        let Some(id) = host.identifier() else {
            tracing::debug!("Skipping nmap host without address or hostname");
            continue;
        };

        if host.is_up() {
            observations.hosts_up.push(id.to_string());
        }
        observations.events.extend(host_events(id, host));
    }

    observations
}

fn host_events<'a>(id: &'a str, host: &'a NmapHost) -> impl Iterator<Item = RawPortEvent> + 'a {
    host.ports().iter().map(move |port| {
        let service = port.service.as_ref();
        RawPortEvent {
            host: id.to_string(),
            port: port.port_id.clone(),
            protocol: port.protocol.clone(),
            state: port.state.state.clone(),
            service: service.and_then(|s| s.name.clone()),
            product: service.and_then(|s| s.product.clone()),
            version: service.and_then(|s| s.version.clone()),
        }
    })
}
