//! UDP packet construction using pnet.

use hoptrace_core::{TraceError, TraceResult};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{Ipv4Flags, MutableIpv4Packet};
use pnet_packet::udp::MutableUdpPacket;
use std::net::Ipv4Addr;

const IPV4_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Creates a UDP probe from `src_port`, which doubles as its correlation tag.
///
/// The payload is the TTL byte. The IP identification is the source port, so
/// the probe can still be told apart if a router rewrites the UDP header.
pub fn create_udp_packet(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
) -> TraceResult<Vec<u8>> {
    let payload = [ttl];
    let udp_len = UDP_HEADER_LEN + payload.len();
    let ip_len = IPV4_HEADER_LEN + udp_len;

    let mut buffer = vec![0u8; ip_len];

    let mut ip_packet = MutableIpv4Packet::new(&mut buffer)
        .ok_or_else(|| TraceError::Internal("Failed to create IP packet".to_string()))?;

    ip_packet.set_version(4);
    ip_packet.set_header_length(5);
    ip_packet.set_total_length(ip_len as u16);
    ip_packet.set_identification(src_port);
    ip_packet.set_flags(Ipv4Flags::DontFragment);
    ip_packet.set_ttl(ttl);
    ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Udp);
    ip_packet.set_source(src_ip);
    ip_packet.set_destination(dst_ip);

    let checksum = pnet_packet::ipv4::checksum(&ip_packet.to_immutable());
    ip_packet.set_checksum(checksum);

    let mut udp_packet = MutableUdpPacket::new(&mut buffer[IPV4_HEADER_LEN..])
        .ok_or_else(|| TraceError::Internal("Failed to create UDP packet".to_string()))?;

    udp_packet.set_source(src_port);
    udp_packet.set_destination(dst_port);
    udp_packet.set_length(udp_len as u16);
    udp_packet.set_payload(&payload);

    let udp_checksum =
        pnet_packet::udp::ipv4_checksum(&udp_packet.to_immutable(), &src_ip, &dst_ip);
    udp_packet.set_checksum(udp_checksum);

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet_packet::udp::UdpPacket;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

    #[test]
    fn test_create_udp_packet() {
        let packet = create_udp_packet(SRC, DST, 40123, 33434, 5).unwrap();

        // 20 IP + 8 UDP header + 1 payload
        assert_eq!(packet.len(), 29);
        assert_eq!(packet[0] >> 4, 4);
        assert_eq!(packet[8], 5);
        assert_eq!(packet[9], 17);
        assert_eq!(u16::from_be_bytes([packet[4], packet[5]]), 40123);
        assert_eq!(u16::from_be_bytes([packet[20], packet[21]]), 40123);
        assert_eq!(u16::from_be_bytes([packet[22], packet[23]]), 33434);
        assert_eq!(packet[28], 5);
    }

    #[test]
    fn test_udp_checksum_verifies() {
        let packet = create_udp_packet(SRC, DST, 40000, 53, 9).unwrap();

        let udp = UdpPacket::new(&packet[20..]).unwrap();
        assert_ne!(udp.get_checksum(), 0);
        assert_eq!(
            pnet_packet::udp::ipv4_checksum(&udp, &SRC, &DST),
            udp.get_checksum()
        );
    }
}
