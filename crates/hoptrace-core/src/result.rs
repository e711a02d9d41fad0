//! Result types for trace output.

use crate::ProbeOutcome;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Geolocation metadata for a hop address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoData {
    /// Autonomous system number, without the `AS` prefix.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub asnumber: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    /// Province, state or region.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prov: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub district: String,
    /// Network owner (organisation or ISP).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
}

impl GeoData {
    pub fn is_empty(&self) -> bool {
        *self == GeoData::default()
    }
}

/// One (hop-limit, measurement) cell of a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopRecord {
    /// The TTL for this hop.
    pub ttl: u8,
    /// Position within the hop group.
    pub index: usize,
    /// The IP address that responded (None if no response).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    /// Round-trip time in milliseconds.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_ms"
    )]
    pub rtt: Option<Duration>,
    /// Whether the reply came from the destination.
    #[serde(default)]
    pub reached: bool,
    /// Reverse DNS name of the address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Geolocation of the address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoData>,
}

impl From<ProbeOutcome> for HopRecord {
    fn from(outcome: ProbeOutcome) -> Self {
        Self {
            ttl: outcome.hop_limit,
            index: outcome.index,
            address: outcome.responder,
            rtt: outcome.responder.and(outcome.rtt),
            reached: outcome.reached,
            hostname: None,
            geo: None,
        }
    }
}

/// All records for one hop-limit, in measurement order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopGroup {
    pub ttl: u8,
    pub records: Vec<HopRecord>,
}

impl HopGroup {
    /// Whether any probe of this hop reached the destination.
    pub fn reached(&self) -> bool {
        self.records.iter().any(|r| r.reached)
    }

    /// Whether no probe of this hop was answered.
    pub fn is_silent(&self) -> bool {
        self.records.iter().all(|r| r.address.is_none())
    }

    /// Distinct responding addresses, in first-seen order.
    pub fn addresses(&self) -> Vec<IpAddr> {
        let mut seen = Vec::new();
        for addr in self.records.iter().filter_map(|r| r.address) {
            if !seen.contains(&addr) {
                seen.push(addr);
            }
        }
        seen
    }
}

/// Hop groups of a trace, in increasing hop-limit order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TracePath {
    pub hops: Vec<HopGroup>,
}

impl TracePath {
    /// Whether the last hop group reached the destination.
    pub fn reached(&self) -> bool {
        self.hops.last().map(HopGroup::reached).unwrap_or(false)
    }

    /// The group for a given hop-limit.
    pub fn hop(&self, ttl: u8) -> Option<&HopGroup> {
        self.hops.iter().find(|g| g.ttl == ttl)
    }

    /// Every record in hop then measurement order.
    pub fn records(&self) -> impl Iterator<Item = &HopRecord> {
        self.hops.iter().flat_map(|g| g.records.iter())
    }

    /// Serializes the path to JSON with indentation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serializes the path to compact JSON.
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_secs_f64() * 1000.0)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<f64>::deserialize(d)?;
        Ok(ms
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| Duration::from_secs_f64(v / 1000.0)))
    }
}
