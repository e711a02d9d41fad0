//! TCP packet construction using pnet.

use hoptrace_core::{TraceError, TraceResult};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{Ipv4Flags, MutableIpv4Packet};
use pnet_packet::tcp::{MutableTcpPacket, TcpFlags};
use std::net::Ipv4Addr;

const IPV4_HEADER_LEN: usize = 20;
const TCP_HEADER_LEN: usize = 20;

/// TCP window size used in SYN packets.
const TCP_WINDOW_SIZE: u16 = 1024;

/// Creates a TCP SYN probe from `src_port`, which doubles as its correlation tag.
pub fn create_tcp_syn_packet(
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    ttl: u8,
    seq_num: u32,
) -> TraceResult<Vec<u8>> {
    let ip_len = IPV4_HEADER_LEN + TCP_HEADER_LEN;

    let mut buffer = vec![0u8; ip_len];

    let mut ip_packet = MutableIpv4Packet::new(&mut buffer)
        .ok_or_else(|| TraceError::Internal("Failed to create IP packet".to_string()))?;

    ip_packet.set_version(4);
    ip_packet.set_header_length(5);
    ip_packet.set_total_length(ip_len as u16);
    ip_packet.set_identification(src_port);
    ip_packet.set_flags(Ipv4Flags::DontFragment);
    ip_packet.set_ttl(ttl);
    ip_packet.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
    ip_packet.set_source(src_ip);
    ip_packet.set_destination(dst_ip);

    let ip_checksum = pnet_packet::ipv4::checksum(&ip_packet.to_immutable());
    ip_packet.set_checksum(ip_checksum);

    let mut tcp_packet = MutableTcpPacket::new(&mut buffer[IPV4_HEADER_LEN..])
        .ok_or_else(|| TraceError::Internal("Failed to create TCP packet".to_string()))?;

    tcp_packet.set_source(src_port);
    tcp_packet.set_destination(dst_port);
    tcp_packet.set_sequence(seq_num);
    tcp_packet.set_acknowledgement(0);
    tcp_packet.set_data_offset(5); // no options
    tcp_packet.set_flags(TcpFlags::SYN);
    tcp_packet.set_window(TCP_WINDOW_SIZE);
    tcp_packet.set_urgent_ptr(0);

    let tcp_checksum =
        pnet_packet::tcp::ipv4_checksum(&tcp_packet.to_immutable(), &src_ip, &dst_ip);
    tcp_packet.set_checksum(tcp_checksum);

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet_packet::tcp::TcpPacket;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

    #[test]
    fn test_create_tcp_syn_packet() {
        let packet = create_tcp_syn_packet(SRC, DST, 12345, 80, 5, 0x12345678).unwrap();

        assert_eq!(packet.len(), 40);
        assert_eq!(packet[8], 5);
        assert_eq!(packet[9], 6);

        let tcp = TcpPacket::new(&packet[20..]).unwrap();
        assert_eq!(tcp.get_source(), 12345);
        assert_eq!(tcp.get_destination(), 80);
        assert_eq!(tcp.get_sequence(), 0x12345678);
        assert_eq!(tcp.get_flags(), TcpFlags::SYN);
    }

    #[test]
    fn test_tcp_checksum_verifies() {
        let packet = create_tcp_syn_packet(SRC, DST, 40000, 443, 1, 7).unwrap();

        let tcp = TcpPacket::new(&packet[20..]).unwrap();
        assert_eq!(
            pnet_packet::tcp::ipv4_checksum(&tcp, &SRC, &DST),
            tcp.get_checksum()
        );
    }
}
