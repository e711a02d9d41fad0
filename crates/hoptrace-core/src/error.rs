//! Error types for trace operations.

use std::net::IpAddr;
use thiserror::Error;

/// Main error type shared by every hoptrace crate.
#[derive(Error, Debug)]
pub enum TraceError {
    // Socket/IO errors
    #[error("Failed to create socket: {0}")]
    SocketCreation(#[source] std::io::Error),

    #[error("Raw socket access denied (run as root or grant CAP_NET_RAW): {0}")]
    PermissionDenied(#[source] std::io::Error),

    #[error("Failed to probe outgoing route to {target}: {source}")]
    RouteLookup {
        target: IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Read timeout exceeded")]
    ReadTimeout,

    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    // Packet errors
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Failed to parse {layer} layer: {reason}")]
    PacketParseFailed { layer: &'static str, reason: String },

    #[error("Packet did not match any probe")]
    PacketMismatch,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Correlation tag {0} is already in flight")]
    DuplicateTag(String),

    // Driver errors
    #[error("Raw packet I/O is not available on this platform")]
    DriverNotAvailable,

    #[error("Address family of {0} is not supported")]
    UnsupportedAddressFamily(IpAddr),

    // Resolution errors
    #[error("Failed to resolve hostname {hostname}: {reason}")]
    DnsResolutionFailed { hostname: String, reason: String },

    // Configuration errors
    #[error("Invalid hop range: first={first_hop}, max={max_hops}")]
    InvalidHopRange { first_hop: u8, max_hops: u8 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown probe method: {0}")]
    UnknownMethod(String),

    #[error("Unknown geo provider: {0}")]
    UnknownGeoProvider(String),

    // Enrichment errors
    #[error("Geo lookup for {ip} failed: {reason}")]
    GeoLookupFailed { ip: IpAddr, reason: String },

    #[error("Geo source {provider} unreachable: {reason}")]
    GeoUnreachable { provider: String, reason: String },

    #[error("Geo source {0} is closed")]
    GeoSourceClosed(String),

    #[error("Geo source {0} does not accept corrections")]
    FixUnsupported(String),

    #[error("Geo correction store {path}: {reason}")]
    FixStore { path: String, reason: String },

    #[error("Reverse lookup for {ip} failed: {reason}")]
    ReverseLookupFailed { ip: IpAddr, reason: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TraceError {
    /// Returns true if this error is retryable (e.g., timeout, packet mismatch, parse failure).
    ///
    /// The reply reader keeps reading after a retryable error: a raw socket sees
    /// plenty of traffic that has nothing to do with our probes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ReadTimeout
                | Self::PacketMismatch
                | Self::MalformedPacket(_)
                | Self::PacketParseFailed { .. }
                | Self::PacketTooShort { .. }
        )
    }

    /// Returns true for errors that make tracing impossible and may surface
    /// from the engine entry point.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::SocketCreation(_)
                | Self::PermissionDenied(_)
                | Self::RouteLookup { .. }
                | Self::DriverNotAvailable
                | Self::UnsupportedAddressFamily(_)
                | Self::DnsResolutionFailed { .. }
                | Self::InvalidHopRange { .. }
                | Self::InvalidConfig(_)
                | Self::UnknownMethod(_)
        )
    }

    /// Classifies a socket creation failure, separating missing privilege.
    pub fn socket(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => TraceError::PermissionDenied(err),
            _ => TraceError::SocketCreation(err),
        }
    }
}

impl From<std::io::Error> for TraceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => TraceError::ReadTimeout,
            std::io::ErrorKind::WouldBlock => TraceError::ReadTimeout,
            _ => TraceError::Internal(err.to_string()),
        }
    }
}

/// Result type alias for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(TraceError::ReadTimeout.is_retryable());
        assert!(TraceError::PacketMismatch.is_retryable());
        assert!(TraceError::MalformedPacket("test".into()).is_retryable());
        assert!(TraceError::PacketParseFailed {
            layer: "IP",
            reason: "test".into()
        }
        .is_retryable());
        assert!(TraceError::PacketTooShort {
            expected: 20,
            actual: 10
        }
        .is_retryable());
        assert!(!TraceError::DriverNotAvailable.is_retryable());
    }

    #[test]
    fn test_setup_errors() {
        assert!(TraceError::InvalidHopRange {
            first_hop: 5,
            max_hops: 1
        }
        .is_setup());
        assert!(TraceError::DriverNotAvailable.is_setup());
        assert!(!TraceError::ReadTimeout.is_setup());
        assert!(!TraceError::GeoSourceClosed("IP.SB".into()).is_setup());
    }

    #[test]
    fn test_permission_denied_is_classified() {
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(TraceError::socket(err), TraceError::PermissionDenied(_)));

        let err = std::io::Error::from(std::io::ErrorKind::AddrInUse);
        assert!(matches!(TraceError::socket(err), TraceError::SocketCreation(_)));
    }

    #[test]
    fn test_io_timeout_maps_to_read_timeout() {
        let err: TraceError = std::io::Error::from(std::io::ErrorKind::WouldBlock).into();
        assert!(matches!(err, TraceError::ReadTimeout));
    }
}
