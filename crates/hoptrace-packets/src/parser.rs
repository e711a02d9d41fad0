//! Frame parsing using etherparse.
//!
//! Frames start at the IPv4 header. ICMP errors carry the IP header and the
//! first bytes of the probe that triggered them; that quoted packet is cut
//! short by the router, so it is taken apart by hand instead of through
//! [`PacketHeaders`].

use etherparse::{
    Icmpv4Header, Icmpv4Type, IpHeader, Ipv4HeaderSlice, PacketHeaders, TransportHeader,
};
use hoptrace_core::{TraceError, TraceResult};
use std::net::IpAddr;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_PORT_UNREACHABLE: u8 = 3;

/// IP source/destination pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPair {
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
}

impl IpPair {
    /// Returns the pair with source and destination swapped.
    pub fn flipped(&self) -> Self {
        Self {
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
        }
    }
}

/// First 8 bytes of a UDP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpInfo {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

/// First 8 bytes of a TCP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpInfo {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
}

/// Identifier and sequence number of an ICMP echo message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoInfo {
    pub id: u16,
    pub seq: u16,
}

/// Parse the first 8 bytes of a UDP header from an ICMP payload.
pub fn parse_udp_first_bytes(buf: &[u8]) -> TraceResult<UdpInfo> {
    check_len(buf, 8)?;
    Ok(UdpInfo {
        src_port: u16::from_be_bytes([buf[0], buf[1]]),
        dst_port: u16::from_be_bytes([buf[2], buf[3]]),
        length: u16::from_be_bytes([buf[4], buf[5]]),
        checksum: u16::from_be_bytes([buf[6], buf[7]]),
    })
}

/// Parse the first 8 bytes of a TCP header from an ICMP payload.
pub fn parse_tcp_first_bytes(buf: &[u8]) -> TraceResult<TcpInfo> {
    check_len(buf, 8)?;
    Ok(TcpInfo {
        src_port: u16::from_be_bytes([buf[0], buf[1]]),
        dst_port: u16::from_be_bytes([buf[2], buf[3]]),
        seq: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
    })
}

/// Parse an echo request header (type, code, checksum, id, seq) from an ICMP payload.
pub fn parse_echo_first_bytes(buf: &[u8]) -> TraceResult<EchoInfo> {
    check_len(buf, 8)?;
    if buf[0] != ICMP_ECHO_REQUEST {
        return Err(TraceError::PacketMismatch);
    }
    Ok(EchoInfo {
        id: u16::from_be_bytes([buf[4], buf[5]]),
        seq: u16::from_be_bytes([buf[6], buf[7]]),
    })
}

fn check_len(buf: &[u8], expected: usize) -> TraceResult<()> {
    if buf.len() < expected {
        return Err(TraceError::PacketTooShort {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// ICMP error that quotes one of our probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpError {
    TimeExceeded,
    DestinationUnreachable { code: u8 },
}

impl IcmpError {
    pub fn is_port_unreachable(&self) -> bool {
        matches!(
            self,
            IcmpError::DestinationUnreachable {
                code: ICMP_PORT_UNREACHABLE
            }
        )
    }
}

/// The probe packet quoted inside an ICMP error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedPacket {
    pub ip_pair: IpPair,
    pub protocol: u8,
    pub identification: u16,
    /// Bytes following the quoted IP header (at least the first 8 of the transport header).
    pub transport: Vec<u8>,
}

impl QuotedPacket {
    pub fn udp(&self) -> TraceResult<UdpInfo> {
        self.expect_protocol(IPPROTO_UDP)?;
        parse_udp_first_bytes(&self.transport)
    }

    pub fn tcp(&self) -> TraceResult<TcpInfo> {
        self.expect_protocol(IPPROTO_TCP)?;
        parse_tcp_first_bytes(&self.transport)
    }

    pub fn echo_request(&self) -> TraceResult<EchoInfo> {
        self.expect_protocol(IPPROTO_ICMP)?;
        parse_echo_first_bytes(&self.transport)
    }

    fn expect_protocol(&self, protocol: u8) -> TraceResult<()> {
        if self.protocol != protocol {
            return Err(TraceError::PacketMismatch);
        }
        Ok(())
    }
}

/// An ICMP Time-Exceeded or Destination-Unreachable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpInfo {
    /// Addresses of the ICMP message itself; the source is the responding hop.
    pub ip_pair: IpPair,
    pub error: IcmpError,
    pub quoted: QuotedPacket,
}

/// A TCP segment addressed to this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpReply {
    pub ip_pair: IpPair,
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub syn: bool,
    pub ack: bool,
    pub rst: bool,
}

impl TcpReply {
    pub fn is_syn_ack(&self) -> bool {
        self.syn && self.ack
    }
}

/// What a received frame turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Icmp(IcmpInfo),
    EchoReply { ip_pair: IpPair, echo: EchoInfo },
    Tcp(TcpReply),
    /// Anything no probe method cares about.
    Other,
}

/// Parses a frame starting at the IP layer.
pub fn parse_frame(data: &[u8]) -> TraceResult<Frame> {
    let headers =
        PacketHeaders::from_ip_slice(data).map_err(|e| TraceError::PacketParseFailed {
            layer: "IP",
            reason: e.to_string(),
        })?;

    let ip_pair = match &headers.ip {
        Some(IpHeader::Version4(ipv4, _)) => IpPair {
            src_addr: IpAddr::from(ipv4.source),
            dst_addr: IpAddr::from(ipv4.destination),
        },
        Some(IpHeader::Version6(..)) => return Ok(Frame::Other),
        None => {
            return Err(TraceError::PacketParseFailed {
                layer: "IP",
                reason: "no IP header found".to_string(),
            })
        }
    };

    match headers.transport {
        Some(TransportHeader::Icmpv4(icmp)) => parse_icmpv4(&icmp, headers.payload, ip_pair),
        Some(TransportHeader::Tcp(tcp)) => Ok(Frame::Tcp(TcpReply {
            ip_pair,
            src_port: tcp.source_port,
            dst_port: tcp.destination_port,
            seq: tcp.sequence_number,
            syn: tcp.syn,
            ack: tcp.ack,
            rst: tcp.rst,
        })),
        _ => Ok(Frame::Other),
    }
}

fn parse_icmpv4(icmp: &Icmpv4Header, payload: &[u8], ip_pair: IpPair) -> TraceResult<Frame> {
    let error = match &icmp.icmp_type {
        Icmpv4Type::EchoReply(echo) => {
            return Ok(Frame::EchoReply {
                ip_pair,
                echo: EchoInfo {
                    id: echo.id,
                    seq: echo.seq,
                },
            })
        }
        Icmpv4Type::TimeExceeded(_) => IcmpError::TimeExceeded,
        Icmpv4Type::DestinationUnreachable(header) => IcmpError::DestinationUnreachable {
            code: header.code_u8(),
        },
        _ => return Ok(Frame::Other),
    };

    Ok(Frame::Icmp(IcmpInfo {
        ip_pair,
        error,
        quoted: parse_quoted(payload)?,
    }))
}

fn parse_quoted(payload: &[u8]) -> TraceResult<QuotedPacket> {
    let inner = Ipv4HeaderSlice::from_slice(payload).map_err(|e| TraceError::PacketParseFailed {
        layer: "Inner IP",
        reason: e.to_string(),
    })?;
    let header_len = inner.slice().len();

    Ok(QuotedPacket {
        ip_pair: IpPair {
            src_addr: IpAddr::V4(inner.source_addr()),
            dst_addr: IpAddr::V4(inner.destination_addr()),
        },
        protocol: inner.protocol(),
        identification: inner.identification(),
        transport: payload[header_len..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use std::net::Ipv4Addr;

    const ME: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 9);

    #[test]
    fn test_parse_udp_first_bytes() {
        let buf = [0x00, 0x50, 0x82, 0x9A, 0x00, 0x10, 0x12, 0x34];
        let info = parse_udp_first_bytes(&buf).unwrap();
        assert_eq!(info.src_port, 80);
        assert_eq!(info.dst_port, 33434);
        assert_eq!(info.length, 16);
        assert_eq!(info.checksum, 0x1234);
    }

    #[test]
    fn test_parse_tcp_first_bytes() {
        let buf = [0x00, 0x50, 0x01, 0xBB, 0x12, 0x34, 0x56, 0x78];
        let info = parse_tcp_first_bytes(&buf).unwrap();
        assert_eq!(info.src_port, 80);
        assert_eq!(info.dst_port, 443);
        assert_eq!(info.seq, 0x12345678);
    }

    #[test]
    fn test_first_bytes_too_short() {
        assert!(matches!(
            parse_udp_first_bytes(&[0, 1, 2]),
            Err(TraceError::PacketTooShort {
                expected: 8,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_time_exceeded_quoting_udp() {
        let probe = udp_probe(ME, TARGET, 40001, 33434);
        let frame = parse_frame(&icmp_error(ROUTER, ME, 11, 0, &probe)).unwrap();

        let Frame::Icmp(info) = frame else {
            panic!("expected ICMP error, got {:?}", frame);
        };
        assert_eq!(info.error, IcmpError::TimeExceeded);
        assert_eq!(info.ip_pair.src_addr, IpAddr::V4(ROUTER));
        assert_eq!(info.quoted.ip_pair.dst_addr, IpAddr::V4(TARGET));
        assert_eq!(info.quoted.identification, 0x1234);

        let udp = info.quoted.udp().unwrap();
        assert_eq!(udp.src_port, 40001);
        assert_eq!(udp.dst_port, 33434);
        assert!(info.quoted.tcp().is_err());
    }

    #[test]
    fn test_port_unreachable() {
        let probe = udp_probe(ME, TARGET, 40002, 53);
        let frame = parse_frame(&icmp_error(TARGET, ME, 3, 3, &probe)).unwrap();

        let Frame::Icmp(info) = frame else {
            panic!("expected ICMP error");
        };
        assert!(info.error.is_port_unreachable());
    }

    #[test]
    fn test_time_exceeded_quoting_echo_request() {
        let probe = echo_request(ME, TARGET, 0x4242, 17);
        let frame = parse_frame(&icmp_error(ROUTER, ME, 11, 0, &probe)).unwrap();

        let Frame::Icmp(info) = frame else {
            panic!("expected ICMP error");
        };
        assert_eq!(
            info.quoted.echo_request().unwrap(),
            EchoInfo {
                id: 0x4242,
                seq: 17
            }
        );
    }

    #[test]
    fn test_echo_reply() {
        let frame = parse_frame(&echo_reply(TARGET, ME, 7, 9)).unwrap();
        assert_eq!(
            frame,
            Frame::EchoReply {
                ip_pair: IpPair {
                    src_addr: IpAddr::V4(TARGET),
                    dst_addr: IpAddr::V4(ME),
                },
                echo: EchoInfo { id: 7, seq: 9 },
            }
        );
    }

    #[test]
    fn test_tcp_syn_ack() {
        let frame = parse_frame(&tcp_segment(TARGET, ME, 443, 40100, 0x12)).unwrap();
        let Frame::Tcp(reply) = frame else {
            panic!("expected TCP");
        };
        assert!(reply.is_syn_ack());
        assert!(!reply.rst);
        assert_eq!(reply.src_port, 443);
        assert_eq!(reply.dst_port, 40100);
        assert_eq!(reply.ip_pair.flipped().dst_addr, IpAddr::V4(TARGET));
    }

    #[test]
    fn test_echo_request_is_not_a_reply() {
        let frame = parse_frame(&echo_request(ME, TARGET, 1, 1)).unwrap();
        assert_eq!(frame, Frame::Other);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(parse_frame(&[0x45, 0x00, 0x00]).is_err());
    }
}
