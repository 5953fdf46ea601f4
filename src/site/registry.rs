//! Site lookup by listening port and `Host` header.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::TlsConfig;
use crate::site::Site;

/// Sites sharing one listening port.
#[derive(Debug, Default)]
pub struct PortSites {
    by_host: HashMap<String, Arc<Site>>,
    /// Taken from the first site registered on the port.
    tls: Option<TlsConfig>,
}

impl PortSites {
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    pub fn resolve(&self, host_header: &str) -> Option<Arc<Site>> {
        self.by_host.get(&normalize_host(host_header)).cloned()
    }

    pub fn sites(&self) -> impl Iterator<Item = &Arc<Site>> {
        self.by_host.values()
    }
}

/// Immutable once the server starts.
#[derive(Debug, Default)]
pub struct SiteRegistry {
    ports: BTreeMap<u16, Arc<PortSites>>,
}

/// Lowercase and strip any `:port`, keeping IPv6 brackets intact.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    without_port.to_ascii_lowercase()
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, site: Site) {
        let port = site.config().port;
        let host = normalize_host(&site.config().host);
        let entry = self
            .ports
            .entry(port)
            .or_insert_with(|| Arc::new(PortSites::default()));
        // Only mutated before the registry is shared.
        if let Some(port_sites) = Arc::get_mut(entry) {
            if port_sites.by_host.is_empty() {
                port_sites.tls = site.config().tls.clone();
            }
            port_sites.by_host.insert(host, Arc::new(site));
        }
    }

    pub fn port(&self, port: u16) -> Option<Arc<PortSites>> {
        self.ports.get(&port).cloned()
    }

    pub fn ports(&self) -> impl Iterator<Item = (u16, &Arc<PortSites>)> {
        self.ports.iter().map(|(p, s)| (*p, s))
    }

    pub fn resolve(&self, port: u16, host_header: &str) -> Option<Arc<Site>> {
        self.ports.get(&port)?.resolve(host_header)
    }

    pub fn site_count(&self) -> usize {
        self.ports.values().map(|p| p.by_host.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.site_count() == 0
    }
}
