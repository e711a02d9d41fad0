//! Hop metadata sources for hoptrace: geolocation providers and DNS.
//!
//! - [`GeoProvider`] and [`HttpGeoSource`] query the HTTP geolocation APIs
//! - [`GeoSession`] keeps a provider connection alive across failures
//! - [`GeoOverrides`], [`FixStore`] and [`apply_fix`] handle user corrections
//! - [`DnsResolver`] resolves destinations and hop hostnames

pub mod dns;
pub mod overrides;
pub mod provider;
pub mod session;
pub mod store;

pub use dns::DnsResolver;
pub use overrides::{apply_fix, GeoOverrides};
pub use provider::{parse_response, GeoProvider, HttpGeoSource};
pub use session::{GeoConnector, GeoSession, HttpConnector, SessionState};
pub use store::FixStore;
