//! Core types for trace operations.

use crate::traits::GeoLookup;
use crate::{TraceError, TraceResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Probe method used for a trace run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Icmp,
    Udp,
    Tcp,
}

impl Method {
    /// Port used when the caller does not pick one.
    pub fn default_port(&self) -> u16 {
        match self {
            Method::Tcp => 80,
            Method::Udp | Method::Icmp => 53,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Icmp => write!(f, "icmp"),
            Method::Udp => write!(f, "udp"),
            Method::Tcp => write!(f, "tcp"),
        }
    }
}

impl std::str::FromStr for Method {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "icmp" => Ok(Method::Icmp),
            "udp" => Ok(Method::Udp),
            "tcp" | "syn" => Ok(Method::Tcp),
            _ => Err(TraceError::UnknownMethod(s.to_string())),
        }
    }
}

/// Per-probe identifier used to attribute a reply to the probe that caused it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationTag {
    /// ICMP echo identifier and sequence number.
    Echo { id: u16, seq: u16 },
    /// Ephemeral source port of a UDP or TCP probe.
    Port(u16),
}

impl fmt::Display for CorrelationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationTag::Echo { id, seq } => write!(f, "echo {}/{}", id, seq),
            CorrelationTag::Port(port) => write!(f, "port {}", port),
        }
    }
}

/// One outbound probe packet.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    /// IP TTL the probe was sent with.
    pub hop_limit: u8,
    /// Position of the probe within its hop.
    pub index: usize,
    /// Tag embedded in the packet.
    pub tag: CorrelationTag,
    /// When the probe left.
    pub sent_at: Instant,
}

/// A reply attributed to a probe by the reply reader.
#[derive(Debug, Clone, Copy)]
pub struct Reply {
    /// Address that answered.
    pub responder: IpAddr,
    /// Whether the answer came from the destination itself.
    pub reached: bool,
    /// When the reply was read off the socket.
    pub received_at: Instant,
}

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    /// TTL of the probe.
    pub hop_limit: u8,
    /// Measurement index of the probe.
    pub index: usize,
    /// Address that answered, `None` if nothing came back in time.
    pub responder: Option<IpAddr>,
    /// Round-trip time, only set together with `responder`.
    pub rtt: Option<Duration>,
    /// Whether the answer signalled that the destination was reached.
    pub reached: bool,
}

impl ProbeOutcome {
    /// Outcome of a probe that was answered.
    pub fn answered(probe: &Probe, reply: Reply) -> Self {
        Self {
            hop_limit: probe.hop_limit,
            index: probe.index,
            responder: Some(reply.responder),
            rtt: Some(reply.received_at.saturating_duration_since(probe.sent_at)),
            reached: reply.reached,
        }
    }

    /// Outcome of a probe that timed out or could not be sent.
    pub fn no_reply(hop_limit: u8, index: usize) -> Self {
        Self {
            hop_limit,
            index,
            responder: None,
            rtt: None,
            reached: false,
        }
    }
}

/// A sent probe waiting for its reply.
#[derive(Debug)]
pub struct PendingReply {
    probe: Probe,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    pub fn new(probe: Probe, rx: oneshot::Receiver<Reply>) -> Self {
        Self { probe, rx }
    }

    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    /// Waits for the reply until `timeout` elapses.
    ///
    /// A timeout or a dropped completion signal is a normal outcome with no
    /// responder.
    pub async fn wait(self, timeout: Duration) -> ProbeOutcome {
        let probe = self.probe;
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(reply)) => ProbeOutcome::answered(&probe, reply),
            Ok(Err(_)) | Err(_) => ProbeOutcome::no_reply(probe.hop_limit, probe.index),
        }
    }
}

/// Callback invoked once per completed hop group with the partial result and the hop-limit.
///
/// Runs on the aggregator's delivery path: it must return promptly.
pub type HopSink = Arc<dyn Fn(&crate::TracePath, u8) + Send + Sync>;

/// Handle to a geolocation provider.
pub type GeoSource = Arc<dyn GeoLookup>;

/// Configuration of one trace run.
#[derive(Clone)]
pub struct TraceConfig {
    /// Destination address.
    pub dest_ip: IpAddr,
    /// Destination port (UDP and TCP).
    pub dest_port: u16,
    /// Probe method.
    pub method: Method,
    /// First TTL to probe.
    pub first_hop: u8,
    /// Last TTL to probe.
    pub max_hops: u8,
    /// Probes sent per hop.
    pub queries_per_hop: usize,
    /// Probes allowed in flight at once across all hops.
    pub parallel_requests: usize,
    /// Time to wait for each probe's reply.
    pub timeout: Duration,
    /// Whether to resolve hop addresses to hostnames.
    pub resolve_hostnames: bool,
    /// Called once per completed hop group.
    pub sink: Option<HopSink>,
    /// Geolocation provider used to annotate hops.
    pub geo_source: Option<GeoSource>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            dest_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dest_port: Method::Icmp.default_port(),
            method: Method::Icmp,
            first_hop: 1,
            max_hops: 30,
            queries_per_hop: 3,
            parallel_requests: 18,
            timeout: Duration::from_millis(1000),
            resolve_hostnames: true,
            sink: None,
            geo_source: None,
        }
    }
}

impl fmt::Debug for TraceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceConfig")
            .field("dest_ip", &self.dest_ip)
            .field("dest_port", &self.dest_port)
            .field("method", &self.method)
            .field("first_hop", &self.first_hop)
            .field("max_hops", &self.max_hops)
            .field("queries_per_hop", &self.queries_per_hop)
            .field("parallel_requests", &self.parallel_requests)
            .field("timeout", &self.timeout)
            .field("resolve_hostnames", &self.resolve_hostnames)
            .field("sink", &self.sink.is_some())
            .field("geo_source", &self.geo_source.as_ref().map(|g| g.name().to_string()))
            .finish()
    }
}

impl TraceConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> TraceResult<()> {
        if self.first_hop == 0 || self.first_hop > self.max_hops {
            return Err(TraceError::InvalidHopRange {
                first_hop: self.first_hop,
                max_hops: self.max_hops,
            });
        }
        if self.queries_per_hop == 0 {
            return Err(TraceError::InvalidConfig(
                "queries per hop must be at least 1".to_string(),
            ));
        }
        if self.parallel_requests == 0 {
            return Err(TraceError::InvalidConfig(
                "parallel requests must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(TraceError::InvalidConfig(
                "probe timeout must be non-zero".to_string(),
            ));
        }
        if self.dest_ip.is_unspecified() {
            return Err(TraceError::InvalidConfig(
                "destination address is unspecified".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of hop-limits in the configured range.
    pub fn hop_count(&self) -> usize {
        if self.first_hop > self.max_hops {
            return 0;
        }
        (self.max_hops - self.first_hop) as usize + 1
    }
}
