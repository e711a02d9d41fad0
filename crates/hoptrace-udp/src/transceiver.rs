//! UDP datagram transceiver.

use crate::matcher::UdpMatcher;
use crate::packet::create_udp_packet;
use async_trait::async_trait;
use hoptrace_core::{
    CorrelationTag, Method, PendingReply, ProbeOutcome, TraceError, TraceResult, Transceiver,
};
use hoptrace_packets::{local_route, ProbeChannel};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, trace};

/// Route probes tried before giving up on finding a free source port.
const MAX_TAG_ATTEMPTS: usize = 16;

type RouteProbe = Box<dyn Fn(IpAddr) -> TraceResult<SocketAddr> + Send + Sync>;

/// Sends UDP datagrams to a (normally closed) port on the target.
///
/// Each probe gets the ephemeral port the kernel hands out for the outgoing
/// route, and that source port is its correlation tag.
pub struct UdpTransceiver {
    src_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
    target_port: u16,
    route: RouteProbe,
    channel: ProbeChannel,
}

impl UdpTransceiver {
    /// Opens raw sockets towards `target:port`.
    pub async fn open(target: IpAddr, port: u16) -> TraceResult<Self> {
        let IpAddr::V4(target_ip) = target else {
            return Err(TraceError::UnsupportedAddressFamily(target));
        };
        let IpAddr::V4(src_ip) = local_route(target)?.ip() else {
            return Err(TraceError::UnsupportedAddressFamily(target));
        };

        let matcher = UdpMatcher {
            src_ip: IpAddr::V4(src_ip),
            target_ip: target,
            target_port: port,
        };
        let channel = ProbeChannel::open(target, matcher).await?;
        debug!(src = %src_ip, target = %target_ip, port, "UDP transceiver ready");
        Ok(Self::with_channel(src_ip, target_ip, port, channel))
    }

    /// Builds a transceiver over an existing channel, whose matcher must use
    /// the same addresses and port.
    pub fn with_channel(
        src_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
        target_port: u16,
        channel: ProbeChannel,
    ) -> Self {
        Self {
            src_ip,
            target_ip,
            target_port,
            route: Box::new(local_route),
            channel,
        }
    }
}

#[async_trait]
impl Transceiver for UdpTransceiver {
    fn method(&self) -> Method {
        Method::Udp
    }

    fn next_tag(&self) -> Result<CorrelationTag, TraceError> {
        for _ in 0..MAX_TAG_ATTEMPTS {
            let tag = CorrelationTag::Port((self.route)(IpAddr::V4(self.target_ip))?.port());
            if !self.channel.is_pending(tag) {
                return Ok(tag);
            }
            trace!(%tag, "Source port still in flight, probing the route again");
        }
        Err(TraceError::DuplicateTag(
            "no free source port for UDP probe".to_string(),
        ))
    }

    async fn send(
        &self,
        hop_limit: u8,
        index: usize,
        tag: CorrelationTag,
    ) -> Result<PendingReply, TraceError> {
        // Another worker may have registered the same port between
        // `next_tag` and here; the probe then moves to a fresh port.
        let mut tag = tag;
        for _ in 0..MAX_TAG_ATTEMPTS {
            let CorrelationTag::Port(src_port) = tag else {
                return Err(TraceError::Internal(format!(
                    "UDP probes need a port tag, got {}",
                    tag
                )));
            };
            let packet = create_udp_packet(
                self.src_ip,
                self.target_ip,
                src_port,
                self.target_port,
                hop_limit,
            )?;
            match self.channel.transmit(hop_limit, index, tag, &packet).await {
                Err(TraceError::DuplicateTag(_)) => {
                    trace!(%tag, "Source port taken by a concurrent probe");
                    tag = self.next_tag()?;
                }
                result => return result,
            }
        }
        Err(TraceError::DuplicateTag(
            "no free source port for UDP probe".to_string(),
        ))
    }

    async fn await_reply(&self, pending: PendingReply, timeout: Duration) -> ProbeOutcome {
        self.channel.wait(pending, timeout).await
    }

    async fn close(&self) -> Result<(), TraceError> {
        self.channel.close().await
    }
}
