//! Enrichment adapter: fills hostname and geolocation metadata into hop records.

use crate::{GeoData, GeoSource, HopGroup, HostnameLookup};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default)]
struct Metadata {
    hostname: Option<String>,
    geo: Option<GeoData>,
}

/// Best-effort metadata lookups for completed hop groups.
///
/// Results are cached per address for the lifetime of the enricher, so an
/// address answering several probes is looked up once.
pub struct Enricher {
    geo: Option<GeoSource>,
    hostnames: Option<Arc<dyn HostnameLookup>>,
    lookup_timeout: Duration,
    cache: Mutex<HashMap<IpAddr, Metadata>>,
}

impl Enricher {
    pub fn new(geo: Option<GeoSource>, hostnames: Option<Arc<dyn HostnameLookup>>) -> Self {
        Self {
            geo,
            hostnames,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Bounds each individual lookup.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Whether there is anything to look up at all.
    pub fn is_enabled(&self) -> bool {
        self.geo.is_some() || self.hostnames.is_some()
    }

    /// Fills metadata into every answered record of `group`.
    ///
    /// Addresses, RTTs and record order are left untouched.
    pub async fn enrich_group(&self, group: &mut HopGroup) {
        if !self.is_enabled() {
            return;
        }
        for addr in group.addresses() {
            let meta = self.metadata(addr).await;
            for record in group.records.iter_mut().filter(|r| r.address == Some(addr)) {
                if record.hostname.is_none() {
                    record.hostname = meta.hostname.clone();
                }
                if record.geo.is_none() {
                    record.geo = meta.geo.clone();
                }
            }
        }
    }

    async fn metadata(&self, ip: IpAddr) -> Metadata {
        if let Some(meta) = self.cache.lock().await.get(&ip) {
            return meta.clone();
        }

        let meta = Metadata {
            hostname: self.hostname(ip).await,
            geo: self.geo(ip).await,
        };
        self.cache.lock().await.insert(ip, meta.clone());
        meta
    }

    async fn hostname(&self, ip: IpAddr) -> Option<String> {
        let lookup = self.hostnames.as_ref()?;
        match tokio::time::timeout(self.lookup_timeout, lookup.reverse(ip)).await {
            Ok(Ok(names)) => names
                .into_iter()
                .next()
                .map(|name| name.trim_end_matches('.').to_string()),
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Reverse lookup failed");
                None
            }
            Err(_) => {
                debug!(ip = %ip, "Reverse lookup timed out");
                None
            }
        }
    }

    async fn geo(&self, ip: IpAddr) -> Option<GeoData> {
        let source = self.geo.as_ref()?;
        if !is_global(ip) {
            return None;
        }
        match tokio::time::timeout(self.lookup_timeout, source.lookup(ip)).await {
            Ok(Ok(geo)) if geo.is_empty() => None,
            Ok(Ok(geo)) => Some(geo),
            Ok(Err(e)) => {
                warn!(ip = %ip, provider = source.name(), error = %e, "Geolocation lookup failed");
                None
            }
            Err(_) => {
                warn!(ip = %ip, provider = source.name(), "Geolocation lookup timed out");
                None
            }
        }
    }
}

/// Whether an address is publicly routable and worth a geolocation lookup.
pub fn is_global(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_global_v4(v4),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            !(v6.is_unspecified()
                || v6.is_loopback()
                || v6.is_multicast()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
                || first == 0x2001 && v6.segments()[1] == 0x0db8)
        }
    }
}

fn is_global_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    !(ip.is_unspecified()
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        // shared address space, 100.64.0.0/10
        || (a == 100 && (b & 0xc0) == 64)
        // benchmarking, 198.18.0.0/15
        || (a == 198 && (b & 0xfe) == 18)
        || a == 0
        || a >= 240)
}
