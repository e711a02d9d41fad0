//! In-memory packet I/O and hand-built IPv4 frames, for tests of probe methods.

use crate::parser::{IPPROTO_ICMP, IPPROTO_TCP, IPPROTO_UDP};
use crate::sink::Sink;
use crate::source::Source;
use async_trait::async_trait;
use hoptrace_core::TraceError;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::sync::mpsc;

/// Yields frames pushed through the paired sender; fails once it is dropped.
pub struct ChannelSource(pub mpsc::UnboundedReceiver<Vec<u8>>);

#[async_trait]
impl Source for ChannelSource {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TraceError> {
        let frame = self
            .0
            .recv()
            .await
            .ok_or_else(|| TraceError::Internal("source closed".to_string()))?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }

    async fn close(&mut self) -> Result<(), TraceError> {
        self.0.close();
        Ok(())
    }
}

/// Forwards written packets to the paired receiver.
pub struct ChannelSink(pub mpsc::UnboundedSender<Vec<u8>>);

#[async_trait]
impl Sink for ChannelSink {
    async fn write_to(&mut self, buf: &[u8], _addr: SocketAddr) -> Result<(), TraceError> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| TraceError::WriteFailed(std::io::ErrorKind::BrokenPipe.into()))
    }

    async fn close(&mut self) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Both ends of an in-memory wire.
pub struct Wire {
    /// Frames pushed here are read by the source.
    pub inbound: mpsc::UnboundedSender<Vec<u8>>,
    /// Packets written to the sink arrive here.
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Creates a source/sink pair and the wire that drives them.
pub fn wire() -> (Box<dyn Source>, Box<dyn Sink>, Wire) {
    let (inbound, source_rx) = mpsc::unbounded_channel();
    let (sink_tx, outbound) = mpsc::unbounded_channel();
    (
        Box::new(ChannelSource(source_rx)),
        Box::new(ChannelSink(sink_tx)),
        Wire { inbound, outbound },
    )
}

pub fn ipv4(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, ttl: u8, payload: &[u8]) -> Vec<u8> {
    let total = (20 + payload.len()) as u16;
    let mut out = vec![0x45, 0x00];
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(&[0x12, 0x34, 0x40, 0x00, ttl, protocol, 0x00, 0x00]);
    out.extend_from_slice(&src.octets());
    out.extend_from_slice(&dst.octets());
    out.extend_from_slice(payload);
    out
}

pub fn icmp(icmp_type: u8, code: u8, rest: [u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = vec![icmp_type, code, 0x00, 0x00];
    out.extend_from_slice(&rest);
    out.extend_from_slice(body);
    out
}

/// A Time-Exceeded (type 11) or Unreachable (type 3) message from `router` quoting `probe`.
pub fn icmp_error(
    router: Ipv4Addr,
    me: Ipv4Addr,
    icmp_type: u8,
    code: u8,
    probe: &[u8],
) -> Vec<u8> {
    // Routers quote the probe's IP header plus 8 bytes.
    let quoted = &probe[..probe.len().min(28)];
    ipv4(
        router,
        me,
        IPPROTO_ICMP,
        64,
        &icmp(icmp_type, code, [0; 4], quoted),
    )
}

pub fn udp_probe(me: Ipv4Addr, target: Ipv4Addr, src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut udp = Vec::new();
    udp.extend_from_slice(&src_port.to_be_bytes());
    udp.extend_from_slice(&dst_port.to_be_bytes());
    udp.extend_from_slice(&[0x00, 0x0c, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef]);
    ipv4(me, target, IPPROTO_UDP, 3, &udp)
}

/// A TCP segment with the given flag byte (0x12 is SYN-ACK, 0x14 is RST-ACK).
pub fn tcp_segment(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    flags: u8,
) -> Vec<u8> {
    let mut tcp = Vec::new();
    tcp.extend_from_slice(&src_port.to_be_bytes());
    tcp.extend_from_slice(&dst_port.to_be_bytes());
    tcp.extend_from_slice(&0x0102_0304u32.to_be_bytes());
    tcp.extend_from_slice(&0u32.to_be_bytes());
    tcp.extend_from_slice(&[0x50, flags, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00]);
    ipv4(src, dst, IPPROTO_TCP, 64, &tcp)
}

pub fn echo_request(me: Ipv4Addr, target: Ipv4Addr, id: u16, seq: u16) -> Vec<u8> {
    ipv4(me, target, IPPROTO_ICMP, 2, &icmp(8, 0, id_seq(id, seq), &[0u8; 8]))
}

pub fn echo_reply(target: Ipv4Addr, me: Ipv4Addr, id: u16, seq: u16) -> Vec<u8> {
    ipv4(target, me, IPPROTO_ICMP, 60, &icmp(0, 0, id_seq(id, seq), &[0u8; 8]))
}

fn id_seq(id: u16, seq: u16) -> [u8; 4] {
    let mut rest = [0u8; 4];
    rest[..2].copy_from_slice(&id.to_be_bytes());
    rest[2..].copy_from_slice(&seq.to_be_bytes());
    rest
}
