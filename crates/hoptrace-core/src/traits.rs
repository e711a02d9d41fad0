//! Core traits for probe transceivers and enrichment collaborators.

use crate::{CorrelationTag, GeoData, Method, PendingReply, ProbeOutcome, TraceError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Sends single probes for one probe method and attributes replies to them.
///
/// One implementation exists per [`Method`]. A transceiver is shared by every
/// worker of a trace run, so all methods take `&self`; implementations
/// serialize their own socket writes and demultiplex replies by tag.
#[async_trait]
pub trait Transceiver: Send + Sync {
    /// The probe method this transceiver speaks.
    fn method(&self) -> Method;

    /// Allocates a correlation tag that is not used by any probe in flight.
    fn next_tag(&self) -> Result<CorrelationTag, TraceError>;

    /// Builds and sends one probe with the given TTL.
    ///
    /// The reply slot is registered before the packet leaves, so a fast
    /// reply cannot be missed.
    async fn send(
        &self,
        hop_limit: u8,
        index: usize,
        tag: CorrelationTag,
    ) -> Result<PendingReply, TraceError>;

    /// Waits for the reply to a sent probe, releasing its tag afterwards.
    async fn await_reply(&self, pending: PendingReply, timeout: Duration) -> ProbeOutcome;

    /// Releases sockets and stops the reply reader.
    async fn close(&self) -> Result<(), TraceError>;
}

/// Correction submitted for a hop's geolocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoFix {
    pub country: String,
    pub prov: String,
    pub city: String,
}

impl GeoFix {
    pub fn is_empty(&self) -> bool {
        self.country.is_empty() && self.prov.is_empty() && self.city.is_empty()
    }
}

/// A pluggable geolocation provider.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Provider name, for logs.
    fn name(&self) -> &str;

    /// Looks up geolocation metadata for an address.
    async fn lookup(&self, ip: IpAddr) -> Result<GeoData, TraceError>;

    /// Feeds a correction for an address back to the provider.
    async fn submit_fix(&self, _ip: IpAddr, _fix: &GeoFix) -> Result<(), TraceError> {
        Err(TraceError::FixUnsupported(self.name().to_string()))
    }
}

/// Resolves hop addresses to hostnames.
#[async_trait]
pub trait HostnameLookup: Send + Sync {
    /// Returns the reverse DNS names of an address, best first.
    async fn reverse(&self, ip: IpAddr) -> Result<Vec<String>, TraceError>;
}
