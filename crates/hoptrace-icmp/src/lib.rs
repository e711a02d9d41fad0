//! ICMP echo probes for hoptrace.

mod matcher;
mod packet;
mod transceiver;

pub use matcher::IcmpMatcher;
pub use packet::create_icmp_echo_packet;
pub use transceiver::IcmpTransceiver;
