//! Packet transmission sink trait.

use async_trait::async_trait;
use hoptrace_core::TraceError;
use std::net::SocketAddr;

/// Sends complete IPv4 packets, header included.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Writes an IP packet to the given address.
    async fn write_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<(), TraceError>;

    /// Closes the sink.
    async fn close(&mut self) -> Result<(), TraceError>;
}
