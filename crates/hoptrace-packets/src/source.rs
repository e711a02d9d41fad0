//! Packet capture source trait.

use async_trait::async_trait;
use hoptrace_core::TraceError;

/// Receives every inbound IPv4 packet for the reply reader.
#[async_trait]
pub trait Source: Send + Sync {
    /// Reads one packet (starting at the IP layer) into the buffer.
    /// Returns the number of bytes read.
    ///
    /// Waits until a packet arrives; retryable errors are reported so the
    /// reader can skip them.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TraceError>;

    /// Closes the source.
    async fn close(&mut self) -> Result<(), TraceError>;
}
