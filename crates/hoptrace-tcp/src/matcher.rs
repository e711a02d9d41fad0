//! Attributes SYN-ACK/RST segments and ICMP errors to TCP probes.

use hoptrace_core::CorrelationTag;
use hoptrace_packets::{Frame, Matched, ReplyMatcher};
use std::net::IpAddr;
use tracing::trace;

/// Matches replies to SYN probes sent to `target_ip:target_port`.
///
/// The tag is our source port: the destination port of a SYN-ACK or RST from
/// the target, or the source port quoted in a Time-Exceeded.
#[derive(Debug, Clone, Copy)]
pub struct TcpMatcher {
    pub src_ip: IpAddr,
    pub target_ip: IpAddr,
    pub target_port: u16,
}

impl ReplyMatcher for TcpMatcher {
    fn match_frame(&self, frame: &Frame) -> Option<Matched> {
        match frame {
            Frame::Tcp(reply) => {
                if reply.ip_pair.src_addr != self.target_ip
                    || reply.ip_pair.dst_addr != self.src_ip
                    || reply.src_port != self.target_port
                {
                    return None;
                }
                if !reply.is_syn_ack() && !reply.rst {
                    trace!(
                        port = reply.dst_port,
                        "Ignored TCP segment that is neither SYN-ACK nor RST"
                    );
                    return None;
                }
                Some(Matched {
                    tag: CorrelationTag::Port(reply.dst_port),
                    responder: reply.ip_pair.src_addr,
                    reached: true,
                })
            }
            Frame::Icmp(info) => {
                let quoted = &info.quoted;
                if quoted.ip_pair.src_addr != self.src_ip
                    || quoted.ip_pair.dst_addr != self.target_ip
                {
                    return None;
                }
                let tcp = quoted.tcp().ok()?;
                if tcp.dst_port != self.target_port {
                    return None;
                }
                let responder = info.ip_pair.src_addr;
                Some(Matched {
                    tag: CorrelationTag::Port(tcp.src_port),
                    responder,
                    reached: responder == self.target_ip,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::create_tcp_syn_packet;
    use hoptrace_packets::parse_frame;
    use hoptrace_packets::testing::{icmp_error, tcp_segment};
    use std::net::Ipv4Addr;

    const ME: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 9);

    fn matched(frame: Vec<u8>) -> Option<Matched> {
        let matcher = TcpMatcher {
            src_ip: IpAddr::V4(ME),
            target_ip: IpAddr::V4(TARGET),
            target_port: 443,
        };
        matcher.match_frame(&parse_frame(&frame).unwrap())
    }

    #[test]
    fn test_syn_ack_and_rst_are_reached() {
        let syn_ack = matched(tcp_segment(TARGET, ME, 443, 40001, 0x12)).unwrap();
        assert_eq!(syn_ack.tag, CorrelationTag::Port(40001));
        assert!(syn_ack.reached);

        let rst = matched(tcp_segment(TARGET, ME, 443, 40002, 0x14)).unwrap();
        assert_eq!(rst.tag, CorrelationTag::Port(40002));
        assert_eq!(rst.responder, IpAddr::V4(TARGET));
    }

    #[test]
    fn test_time_exceeded_is_intermediate() {
        let probe = create_tcp_syn_packet(ME, TARGET, 40003, 443, 2, 99).unwrap();
        let m = matched(icmp_error(ROUTER, ME, 11, 0, &probe)).unwrap();

        assert_eq!(m.tag, CorrelationTag::Port(40003));
        assert_eq!(m.responder, IpAddr::V4(ROUTER));
        assert!(!m.reached);
    }

    #[test]
    fn test_unrelated_segments_are_ignored() {
        // Wrong service port.
        assert!(matched(tcp_segment(TARGET, ME, 80, 40001, 0x12)).is_none());
        // Bare ACK.
        assert!(matched(tcp_segment(TARGET, ME, 443, 40001, 0x10)).is_none());
        // Someone else.
        assert!(matched(tcp_segment(ROUTER, ME, 443, 40001, 0x12)).is_none());
    }
}
