//! Network path discovery over ICMP echo, UDP and TCP SYN probes.
//!
//! [`traceroute`] opens the transceiver for the configured method, runs the
//! trace engine over it and releases the sockets afterwards. The building
//! blocks are re-exported for callers that want to wire them differently.

use hoptrace_enrich::DnsResolver;
use hoptrace_icmp::IcmpTransceiver;
use hoptrace_tcp::TcpTransceiver;
use hoptrace_udp::UdpTransceiver;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

pub use hoptrace_core::{
    GeoData, GeoFix, GeoLookup, GeoSource, HopGroup, HopRecord, HopSink, HostnameLookup, Method,
    TraceConfig, TraceError, TracePath, TraceResult, Tracer, Transceiver,
};

/// Opens the transceiver for `method` towards `target`.
///
/// `port` is the destination port of UDP and TCP probes and is ignored for ICMP.
pub async fn new_transceiver(
    method: Method,
    target: IpAddr,
    port: u16,
) -> TraceResult<Arc<dyn Transceiver>> {
    let transceiver: Arc<dyn Transceiver> = match method {
        Method::Icmp => Arc::new(IcmpTransceiver::open(target).await?),
        Method::Udp => Arc::new(UdpTransceiver::open(target, port).await?),
        Method::Tcp => Arc::new(TcpTransceiver::open(target, port).await?),
    };
    Ok(transceiver)
}

/// Resolves a hostname or IP literal to the address to trace.
///
/// UDP and TCP probes need an IPv4 destination, so only IPv4 answers are
/// considered for them.
pub async fn resolve_destination(target: &str, method: Method) -> TraceResult<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }
    let resolver = DnsResolver::from_system_conf()?;
    resolver.lookup_host(target, method != Method::Icmp).await
}

/// Traces the path to `config.dest_ip` with the configured probe method.
///
/// Setup failures (bad configuration, missing privileges, unsupported
/// address family) are returned as errors. Everything that goes wrong while
/// probing shows up in the path as unanswered records.
pub async fn traceroute(config: &TraceConfig) -> TraceResult<TracePath> {
    config.validate()?;

    let transceiver = new_transceiver(config.method, config.dest_ip, config.dest_port).await?;
    let mut tracer = Tracer::new(Arc::clone(&transceiver));
    if config.resolve_hostnames {
        match DnsResolver::from_system_conf() {
            Ok(resolver) => tracer = tracer.with_hostname_lookup(Arc::new(resolver)),
            Err(e) => warn!(error = %e, "Reverse DNS unavailable, hostnames left blank"),
        }
    }

    let result = tracer.run(config).await;

    if let Err(e) = transceiver.close().await {
        debug!(error = %e, "Failed to close transceiver");
    }
    result
}
