//! ICMP echo transceiver.

use crate::matcher::IcmpMatcher;
use crate::packet::create_icmp_echo_packet;
use async_trait::async_trait;
use hoptrace_core::{
    CorrelationTag, Method, PendingReply, ProbeOutcome, TraceError, TraceResult, Transceiver,
};
use hoptrace_packets::{local_route, ProbeChannel};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tracing::debug;

/// Sequence numbers tried before giving up on finding a free tag.
const MAX_TAG_ATTEMPTS: usize = 16;

/// Echo ID counter, so transceivers in one process do not share an ID.
static ECHO_ID_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Gets the next echo ID, derived from the process ID.
fn next_echo_id() -> u16 {
    (std::process::id() as u16).wrapping_add(ECHO_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Sends ICMP Echo Requests; replies are matched on echo ID and sequence number.
pub struct IcmpTransceiver {
    src_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
    echo_id: u16,
    next_seq: AtomicU16,
    channel: ProbeChannel,
}

impl IcmpTransceiver {
    /// Opens raw sockets towards `target`.
    pub async fn open(target: IpAddr) -> TraceResult<Self> {
        let IpAddr::V4(target_ip) = target else {
            return Err(TraceError::UnsupportedAddressFamily(target));
        };
        let IpAddr::V4(src_ip) = local_route(target)?.ip() else {
            return Err(TraceError::UnsupportedAddressFamily(target));
        };

        let echo_id = next_echo_id();
        let matcher = IcmpMatcher {
            src_ip: IpAddr::V4(src_ip),
            target_ip: target,
            echo_id,
        };
        let channel = ProbeChannel::open(target, matcher).await?;
        debug!(src = %src_ip, target = %target_ip, echo_id, "ICMP transceiver ready");
        Ok(Self::with_channel(src_ip, target_ip, echo_id, channel))
    }

    /// Builds a transceiver over an existing channel, whose matcher must use `echo_id`.
    pub fn with_channel(
        src_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
        echo_id: u16,
        channel: ProbeChannel,
    ) -> Self {
        Self {
            src_ip,
            target_ip,
            echo_id,
            next_seq: AtomicU16::new(1),
            channel,
        }
    }

    pub fn echo_id(&self) -> u16 {
        self.echo_id
    }
}

#[async_trait]
impl Transceiver for IcmpTransceiver {
    fn method(&self) -> Method {
        Method::Icmp
    }

    fn next_tag(&self) -> Result<CorrelationTag, TraceError> {
        for _ in 0..MAX_TAG_ATTEMPTS {
            let tag = CorrelationTag::Echo {
                id: self.echo_id,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            };
            if !self.channel.is_pending(tag) {
                return Ok(tag);
            }
        }
        Err(TraceError::DuplicateTag(format!(
            "no free sequence number for echo ID {}",
            self.echo_id
        )))
    }

    async fn send(
        &self,
        hop_limit: u8,
        index: usize,
        tag: CorrelationTag,
    ) -> Result<PendingReply, TraceError> {
        let CorrelationTag::Echo { id, seq } = tag else {
            return Err(TraceError::Internal(format!(
                "ICMP probes need an echo tag, got {}",
                tag
            )));
        };
        let packet = create_icmp_echo_packet(self.src_ip, self.target_ip, hop_limit, id, seq)?;
        self.channel.transmit(hop_limit, index, tag, &packet).await
    }

    async fn await_reply(&self, pending: PendingReply, timeout: Duration) -> ProbeOutcome {
        self.channel.wait(pending, timeout).await
    }

    async fn close(&self) -> Result<(), TraceError> {
        self.channel.close().await
    }
}
