//! Packet I/O for hoptrace.
//!
//! Raw sockets, frame parsing, and the reply reader that routes each reply to
//! the probe waiting for it.

pub mod channel;
pub mod demux;
pub mod parser;
pub mod platform;
pub mod route;
pub mod sink;
pub mod source;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::ProbeChannel;
pub use demux::{DispatchTable, Matched, ReplyMatcher};
pub use parser::{
    parse_frame, parse_tcp_first_bytes, parse_udp_first_bytes, EchoInfo, Frame, IcmpError,
    IcmpInfo, IpPair, QuotedPacket, TcpInfo, TcpReply, UdpInfo,
};
pub use route::local_route;
pub use sink::Sink;
pub use source::Source;
