//! Outgoing route probing through the kernel's routing table.

use hoptrace_core::{TraceError, TraceResult};
use std::net::{IpAddr, SocketAddr, UdpSocket};

/// Port the probing socket connects to; no packet is ever sent to it.
const ROUTE_PROBE_PORT: u16 = 12345;

/// Returns the local address and a fresh ephemeral port the kernel would use
/// to reach `target`.
///
/// Connecting a UDP socket only selects the route; nothing leaves the host.
pub fn local_route(target: IpAddr) -> TraceResult<SocketAddr> {
    let route_err = |source| TraceError::RouteLookup { target, source };

    let socket = match target {
        IpAddr::V4(_) => UdpSocket::bind("0.0.0.0:0"),
        IpAddr::V6(_) => UdpSocket::bind("[::]:0"),
    }
    .map_err(TraceError::socket)?;

    socket
        .connect(SocketAddr::new(target, ROUTE_PROBE_PORT))
        .map_err(route_err)?;
    socket.local_addr().map_err(route_err)
}
