//! Forward and reverse DNS through hickory-resolver.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hoptrace_core::{HostnameLookup, TraceError, TraceResult};
use std::net::IpAddr;
use tracing::debug;

/// Resolver built from the system configuration.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn from_system_conf() -> TraceResult<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            TraceError::Internal(format!("Failed to create DNS resolver: {}", e))
        })?;
        Ok(Self { resolver })
    }

    /// Resolves the trace destination.
    ///
    /// IP literals are returned as-is. Otherwise the first answer is used, or
    /// the first IPv4 answer when `ipv4_only` is set.
    pub async fn lookup_host(&self, name: &str, ipv4_only: bool) -> TraceResult<IpAddr> {
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(ip);
        }

        let failed = |reason: String| TraceError::DnsResolutionFailed {
            hostname: name.to_string(),
            reason,
        };
        let lookup = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let ip = pick_address(lookup.iter(), ipv4_only)
            .ok_or_else(|| failed("no usable address".to_string()))?;
        debug!(host = name, %ip, "Resolved destination");
        Ok(ip)
    }
}

fn pick_address(mut addrs: impl Iterator<Item = IpAddr>, ipv4_only: bool) -> Option<IpAddr> {
    if ipv4_only {
        addrs.find(IpAddr::is_ipv4)
    } else {
        addrs.next()
    }
}

#[async_trait]
impl HostnameLookup for DnsResolver {
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, TraceError> {
        let names = self
            .resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| TraceError::ReverseLookupFailed {
                ip,
                reason: e.to_string(),
            })?;
        Ok(names.iter().map(|name| name.to_string()).collect())
    }
}
