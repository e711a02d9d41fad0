//! Attributes ICMP replies to echo probes.

use hoptrace_core::CorrelationTag;
use hoptrace_packets::{Frame, Matched, ReplyMatcher};
use std::net::IpAddr;
use tracing::trace;

/// Matches echo replies and ICMP errors quoting our echo requests.
#[derive(Debug, Clone, Copy)]
pub struct IcmpMatcher {
    pub src_ip: IpAddr,
    pub target_ip: IpAddr,
    pub echo_id: u16,
}

impl ReplyMatcher for IcmpMatcher {
    fn match_frame(&self, frame: &Frame) -> Option<Matched> {
        match frame {
            Frame::EchoReply { ip_pair, echo } => {
                if echo.id != self.echo_id {
                    trace!(
                        expected = self.echo_id,
                        actual = echo.id,
                        "Ignored Echo Reply with different echo ID"
                    );
                    return None;
                }
                Some(Matched {
                    tag: CorrelationTag::Echo {
                        id: echo.id,
                        seq: echo.seq,
                    },
                    responder: ip_pair.src_addr,
                    reached: true,
                })
            }
            Frame::Icmp(info) => {
                let quoted = &info.quoted;
                if quoted.ip_pair.dst_addr != self.target_ip
                    || quoted.ip_pair.src_addr != self.src_ip
                {
                    return None;
                }
                let echo = quoted.echo_request().ok()?;
                if echo.id != self.echo_id {
                    trace!(
                        expected = self.echo_id,
                        actual = echo.id,
                        "Ignored ICMP error quoting a different echo ID"
                    );
                    return None;
                }
                Some(Matched {
                    tag: CorrelationTag::Echo {
                        id: echo.id,
                        seq: echo.seq,
                    },
                    responder: info.ip_pair.src_addr,
                    reached: info.ip_pair.src_addr == self.target_ip,
                })
            }
            _ => None,
        }
    }
}
