//! ICMP packet construction using pnet.

use hoptrace_core::{TraceError, TraceResult};
use pnet_packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet_packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{Ipv4Flags, MutableIpv4Packet};
use std::net::Ipv4Addr;

const IPV4_HEADER_LEN: usize = 20;
const ICMP_HEADER_LEN: usize = 8;

/// Creates an ICMP Echo Request probe with the given TTL, identifier and sequence number.
///
/// The payload is the TTL byte, so a quoted probe also shows the hop it was sent for.
pub fn create_icmp_echo_packet(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    ttl: u8,
    echo_id: u16,
    seq: u16,
) -> TraceResult<Vec<u8>> {
    let icmp_len = ICMP_HEADER_LEN + 1;
    let ip_len = IPV4_HEADER_LEN + icmp_len;

    let mut buffer = vec![0u8; ip_len];

    let mut ip_packet = MutableIpv4Packet::new(&mut buffer)
        .ok_or_else(|| TraceError::Internal("Failed to create IP packet".to_string()))?;

    ip_packet.set_version(4);
    ip_packet.set_header_length(5);
    ip_packet.set_total_length(ip_len as u16);
    ip_packet.set_identification(seq);
    ip_packet.set_flags(Ipv4Flags::DontFragment);
    ip_packet.set_ttl(ttl);
    ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
    ip_packet.set_source(src_ip);
    ip_packet.set_destination(dst_ip);

    let ip_checksum = pnet_packet::ipv4::checksum(&ip_packet.to_immutable());
    ip_packet.set_checksum(ip_checksum);

    {
        let mut icmp_packet = MutableEchoRequestPacket::new(&mut buffer[IPV4_HEADER_LEN..])
            .ok_or_else(|| TraceError::Internal("Failed to create ICMP packet".to_string()))?;

        icmp_packet.set_icmp_type(IcmpTypes::EchoRequest);
        icmp_packet.set_icmp_code(IcmpCode::new(0));
        icmp_packet.set_identifier(echo_id);
        icmp_packet.set_sequence_number(seq);
        icmp_packet.set_payload(&[ttl]);
    }

    {
        let icmp_view = IcmpPacket::new(&buffer[IPV4_HEADER_LEN..])
            .ok_or_else(|| TraceError::Internal("Failed to create ICMP view".to_string()))?;
        let icmp_checksum = pnet_packet::icmp::checksum(&icmp_view);
        buffer[IPV4_HEADER_LEN + 2..IPV4_HEADER_LEN + 4]
            .copy_from_slice(&icmp_checksum.to_be_bytes());
    }

    Ok(buffer)
}
