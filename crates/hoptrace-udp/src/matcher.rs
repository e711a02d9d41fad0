//! Attributes ICMP errors to UDP probes.

use hoptrace_core::CorrelationTag;
use hoptrace_packets::{Frame, Matched, ReplyMatcher};
use std::net::IpAddr;
use tracing::trace;

/// Matches ICMP errors quoting a UDP probe we sent to the target.
///
/// The tag is the quoted source port. A Port-Unreachable, or any error sent by
/// the target itself, means the probe reached the destination.
#[derive(Debug, Clone, Copy)]
pub struct UdpMatcher {
    pub src_ip: IpAddr,
    pub target_ip: IpAddr,
    pub target_port: u16,
}

impl ReplyMatcher for UdpMatcher {
    fn match_frame(&self, frame: &Frame) -> Option<Matched> {
        let Frame::Icmp(info) = frame else {
            return None;
        };
        let quoted = &info.quoted;
        if quoted.ip_pair.src_addr != self.src_ip || quoted.ip_pair.dst_addr != self.target_ip {
            return None;
        }
        let udp = quoted.udp().ok()?;
        if udp.dst_port != self.target_port {
            trace!(
                expected = self.target_port,
                actual = udp.dst_port,
                "Ignored ICMP error quoting a different destination port"
            );
            return None;
        }

        let responder = info.ip_pair.src_addr;
        Some(Matched {
            tag: CorrelationTag::Port(udp.src_port),
            responder,
            reached: info.error.is_port_unreachable() || responder == self.target_ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoptrace_packets::parse_frame;
    use hoptrace_packets::testing::{echo_reply, icmp_error, udp_probe};
    use std::net::Ipv4Addr;

    const ME: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 9);

    fn matcher() -> UdpMatcher {
        UdpMatcher {
            src_ip: IpAddr::V4(ME),
            target_ip: IpAddr::V4(TARGET),
            target_port: 53,
        }
    }

    fn matched(frame: Vec<u8>) -> Option<Matched> {
        matcher().match_frame(&parse_frame(&frame).unwrap())
    }

    #[test]
    fn test_time_exceeded_is_intermediate() {
        let probe = udp_probe(ME, TARGET, 40001, 53);
        let m = matched(icmp_error(ROUTER, ME, 11, 0, &probe)).unwrap();

        assert_eq!(m.tag, CorrelationTag::Port(40001));
        assert_eq!(m.responder, IpAddr::V4(ROUTER));
        assert!(!m.reached);
    }

    #[test]
    fn test_port_unreachable_is_reached() {
        let probe = udp_probe(ME, TARGET, 40002, 53);
        let m = matched(icmp_error(TARGET, ME, 3, 3, &probe)).unwrap();

        assert_eq!(m.tag, CorrelationTag::Port(40002));
        assert!(m.reached);
    }

    #[test]
    fn test_foreign_probes_are_ignored() {
        let other_port = udp_probe(ME, TARGET, 40003, 33434);
        assert!(matched(icmp_error(ROUTER, ME, 11, 0, &other_port)).is_none());

        let other_target = udp_probe(ME, Ipv4Addr::new(192, 0, 2, 10), 40003, 53);
        assert!(matched(icmp_error(ROUTER, ME, 11, 0, &other_target)).is_none());

        assert!(matched(echo_reply(TARGET, ME, 1, 1)).is_none());
    }
}
