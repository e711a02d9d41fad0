//! Linux packet I/O: AF_PACKET capture and an IP_HDRINCL raw send socket.

use crate::{Sink, Source};
use async_trait::async_trait;
use hoptrace_core::{TraceError, TraceResult};
use std::io;
use std::mem;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tracing::debug;

const ETH_P_IP: u16 = 0x0800;

/// Convert host to network byte order (big-endian)
fn htons(val: u16) -> u16 {
    val.to_be()
}

fn owned_socket(domain: i32, ty: i32, protocol: i32) -> TraceResult<OwnedFd> {
    let fd = unsafe {
        libc::socket(
            domain,
            ty | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            protocol,
        )
    };
    if fd < 0 {
        return Err(TraceError::socket(io::Error::last_os_error()));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// AF_PACKET datagram socket: delivers inbound IPv4 packets without the link header.
pub struct AfPacketSource {
    fd: AsyncFd<OwnedFd>,
}

impl AfPacketSource {
    pub fn new() -> TraceResult<Self> {
        let fd = owned_socket(libc::AF_PACKET, libc::SOCK_DGRAM, htons(ETH_P_IP) as i32)?;
        let fd = AsyncFd::new(fd).map_err(TraceError::socket)?;
        Ok(Self { fd })
    }

    /// Receives one packet, returning its length and packet type.
    fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, u8)> {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        let n = unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr as *mut _ as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((n as usize, addr.sll_pkttype))
    }
}

#[async_trait]
impl Source for AfPacketSource {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TraceError> {
        loop {
            let mut guard = self.fd.readable().await.map_err(TraceError::from)?;
            match guard.try_io(|inner| Self::recv(inner.as_raw_fd(), buf)) {
                // Our own probes are captured on the way out as well.
                Ok(Ok((_, pkttype))) if pkttype == libc::PACKET_OUTGOING as u8 => continue,
                Ok(Ok((n, _))) => return Ok(n),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(TraceError::from(e)),
                Err(_would_block) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TraceError> {
        // The descriptor is closed when dropped.
        Ok(())
    }
}

/// Raw socket sending complete IPv4 packets.
pub struct RawSink {
    fd: Option<AsyncFd<OwnedFd>>,
}

impl RawSink {
    pub fn new() -> TraceResult<Self> {
        let fd = owned_socket(libc::AF_INET, libc::SOCK_RAW, libc::IPPROTO_RAW)?;

        let one: libc::c_int = 1;
        let result = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_HDRINCL,
                &one as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(TraceError::SocketCreation(io::Error::last_os_error()));
        }

        let fd = AsyncFd::new(fd).map_err(TraceError::socket)?;
        Ok(Self { fd: Some(fd) })
    }

    fn send_to(fd: RawFd, buf: &[u8], addr: &libc::sockaddr_in) -> io::Result<()> {
        let n = unsafe {
            libc::sendto(
                fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                0,
                addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[async_trait]
impl Sink for RawSink {
    async fn write_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<(), TraceError> {
        let SocketAddr::V4(v4) = addr else {
            return Err(TraceError::UnsupportedAddressFamily(addr.ip()));
        };
        let fd = self
            .fd
            .as_ref()
            .ok_or_else(|| TraceError::WriteFailed(io::ErrorKind::NotConnected.into()))?;

        let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
        sa.sin_family = libc::AF_INET as libc::sa_family_t;
        sa.sin_port = v4.port().to_be();
        sa.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());

        loop {
            let mut guard = fd.writable().await.map_err(TraceError::WriteFailed)?;
            match guard.try_io(|inner| Self::send_to(inner.as_raw_fd(), buf, &sa)) {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(TraceError::WriteFailed(e)),
                Err(_would_block) => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), TraceError> {
        self.fd = None;
        Ok(())
    }
}

/// Opens the capture source and the send socket for an IPv4 target.
pub fn open(target: IpAddr) -> TraceResult<(Box<dyn Source>, Box<dyn Sink>)> {
    if !target.is_ipv4() {
        return Err(TraceError::UnsupportedAddressFamily(target));
    }
    let source = AfPacketSource::new()?;
    let sink = RawSink::new()?;
    debug!(target = %target, "Opened raw sockets");
    Ok((Box::new(source), Box::new(sink)))
}
