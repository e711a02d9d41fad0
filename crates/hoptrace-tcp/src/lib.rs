//! TCP SYN probes for hoptrace.

mod matcher;
mod packet;
mod transceiver;

pub use matcher::TcpMatcher;
pub use packet::create_tcp_syn_packet;
pub use transceiver::TcpTransceiver;
