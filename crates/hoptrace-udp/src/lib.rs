//! UDP probes for hoptrace.

mod matcher;
mod packet;
mod transceiver;

pub use matcher::UdpMatcher;
pub use packet::create_udp_packet;
pub use transceiver::UdpTransceiver;
