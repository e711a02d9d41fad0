//! HTTP geolocation providers.

use async_trait::async_trait;
use hoptrace_core::{GeoData, GeoLookup, TraceError, TraceResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = concat!("hoptrace/", env!("CARGO_PKG_VERSION"));

/// Geolocation data providers selectable with `-d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoProvider {
    #[default]
    IpSb,
    IpInfo,
    IpApiCom,
    /// No geolocation at all.
    Disable,
}

impl GeoProvider {
    pub fn is_disabled(&self) -> bool {
        *self == GeoProvider::Disable
    }

    fn url(&self, ip: IpAddr, token: Option<&str>) -> String {
        match self {
            GeoProvider::IpSb => format!("https://api.ip.sb/geoip/{}", ip),
            GeoProvider::IpInfo => match token {
                Some(token) => format!("https://ipinfo.io/{}?token={}", ip, token),
                None => format!("https://ipinfo.io/{}", ip),
            },
            GeoProvider::IpApiCom => format!(
                "http://ip-api.com/json/{}?fields=status,message,country,regionName,city,district,isp,as",
                ip
            ),
            GeoProvider::Disable => String::new(),
        }
    }
}

impl fmt::Display for GeoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoProvider::IpSb => write!(f, "IP.SB"),
            GeoProvider::IpInfo => write!(f, "IPInfo"),
            GeoProvider::IpApiCom => write!(f, "IPAPI.com"),
            GeoProvider::Disable => write!(f, "disable"),
        }
    }
}

impl FromStr for GeoProvider {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ip.sb" | "ipsb" => Ok(GeoProvider::IpSb),
            "ipinfo" => Ok(GeoProvider::IpInfo),
            "ipapi.com" | "ip-api.com" => Ok(GeoProvider::IpApiCom),
            "disable" | "none" => Ok(GeoProvider::Disable),
            _ => Err(TraceError::UnknownGeoProvider(s.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpSbResponse {
    #[serde(default)]
    asn: Option<u32>,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    organization: String,
}

impl From<IpSbResponse> for GeoData {
    fn from(r: IpSbResponse) -> Self {
        GeoData {
            asnumber: r.asn.map(|a| a.to_string()).unwrap_or_default(),
            country: r.country,
            prov: r.region,
            city: r.city,
            district: String::new(),
            owner: if r.isp.is_empty() { r.organization } else { r.isp },
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    country: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    city: String,
    /// "AS15169 Google LLC"
    #[serde(default)]
    org: String,
}

impl From<IpInfoResponse> for GeoData {
    fn from(r: IpInfoResponse) -> Self {
        let (asnumber, owner) = split_as_org(&r.org);
        GeoData {
            asnumber,
            country: r.country,
            prov: r.region,
            city: r.city,
            district: String::new(),
            owner,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    district: String,
    #[serde(default)]
    isp: String,
    #[serde(default, rename = "as")]
    as_name: String,
}

impl IpApiResponse {
    fn into_geo(self, ip: IpAddr) -> TraceResult<GeoData> {
        if self.status != "success" {
            return Err(TraceError::GeoLookupFailed {
                ip,
                reason: self.message,
            });
        }
        let (asnumber, _) = split_as_org(&self.as_name);
        Ok(GeoData {
            asnumber,
            country: self.country,
            prov: self.region_name,
            city: self.city,
            district: self.district,
            owner: self.isp,
        })
    }
}

/// Splits "AS15169 Google LLC" into ("15169", "Google LLC").
fn split_as_org(s: &str) -> (String, String) {
    let s = s.trim();
    match s.split_once(' ') {
        Some((asn, org)) if asn.starts_with("AS") => (asn[2..].to_string(), org.to_string()),
        None if s.starts_with("AS") => (s[2..].to_string(), String::new()),
        _ => (String::new(), s.to_string()),
    }
}

/// Maps a provider's JSON body onto [`GeoData`].
pub fn parse_response(provider: GeoProvider, ip: IpAddr, body: &str) -> TraceResult<GeoData> {
    fn decode<T: DeserializeOwned>(ip: IpAddr, body: &str) -> TraceResult<T> {
        serde_json::from_str(body).map_err(|e| TraceError::GeoLookupFailed {
            ip,
            reason: e.to_string(),
        })
    }

    match provider {
        GeoProvider::IpSb => Ok(decode::<IpSbResponse>(ip, body)?.into()),
        GeoProvider::IpInfo => Ok(decode::<IpInfoResponse>(ip, body)?.into()),
        GeoProvider::IpApiCom => decode::<IpApiResponse>(ip, body)?.into_geo(ip),
        GeoProvider::Disable => Ok(GeoData::default()),
    }
}

/// Queries one HTTP provider per lookup.
pub struct HttpGeoSource {
    provider: GeoProvider,
    token: Option<String>,
    client: reqwest::Client,
    name: String,
}

impl HttpGeoSource {
    pub fn new(provider: GeoProvider, token: Option<String>) -> TraceResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TraceError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            provider,
            token,
            client,
            name: provider.to_string(),
        })
    }

    pub fn provider(&self) -> GeoProvider {
        self.provider
    }
}

#[async_trait]
impl GeoLookup for HttpGeoSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, ip: IpAddr) -> Result<GeoData, TraceError> {
        if self.provider.is_disabled() {
            return Ok(GeoData::default());
        }
        let unreachable = |e: reqwest::Error| TraceError::GeoUnreachable {
            provider: self.name.clone(),
            reason: e.to_string(),
        };

        let url = self.provider.url(ip, self.token.as_deref());
        debug!(provider = %self.provider, %ip, "Geo lookup");
        let response = self.client.get(&url).send().await.map_err(unreachable)?;
        // The provider answered, so a bad status is about this address.
        let response = response
            .error_for_status()
            .map_err(|e| TraceError::GeoLookupFailed {
                ip,
                reason: e.to_string(),
            })?;
        let body = response.text().await.map_err(unreachable)?;

        parse_response(self.provider, ip, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "8.8.8.8".parse().unwrap()
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("IP.SB".parse::<GeoProvider>().unwrap(), GeoProvider::IpSb);
        assert_eq!("ipinfo".parse::<GeoProvider>().unwrap(), GeoProvider::IpInfo);
        assert_eq!(
            "IPAPI.com".parse::<GeoProvider>().unwrap(),
            GeoProvider::IpApiCom
        );
        assert!("disable".parse::<GeoProvider>().unwrap().is_disabled());
        assert!(matches!(
            "LeoMoeAPI".parse::<GeoProvider>(),
            Err(TraceError::UnknownGeoProvider(_))
        ));
    }

    #[test]
    fn test_ipsb_response() {
        let body = r#"{"organization":"Google LLC","city":"Mountain View","isp":"Google LLC",
            "region":"California","asn":15169,"country":"United States","ip":"8.8.8.8"}"#;
        let geo = parse_response(GeoProvider::IpSb, ip(), body).unwrap();

        assert_eq!(geo.asnumber, "15169");
        assert_eq!(geo.country, "United States");
        assert_eq!(geo.prov, "California");
        assert_eq!(geo.city, "Mountain View");
        assert_eq!(geo.owner, "Google LLC");
    }

    #[test]
    fn test_ipinfo_response() {
        let body = r#"{"ip":"8.8.8.8","city":"Mountain View","region":"California",
            "country":"US","org":"AS15169 Google LLC"}"#;
        let geo = parse_response(GeoProvider::IpInfo, ip(), body).unwrap();

        assert_eq!(geo.asnumber, "15169");
        assert_eq!(geo.owner, "Google LLC");
        assert_eq!(geo.country, "US");
    }

    #[test]
    fn test_ipapi_response() {
        let body = r#"{"status":"success","country":"United States","regionName":"Virginia",
            "city":"Ashburn","district":"","isp":"Google LLC","as":"AS15169 Google LLC"}"#;
        let geo = parse_response(GeoProvider::IpApiCom, ip(), body).unwrap();
        assert_eq!(geo.asnumber, "15169");
        assert_eq!(geo.prov, "Virginia");

        let failed = r#"{"status":"fail","message":"reserved range"}"#;
        assert!(matches!(
            parse_response(GeoProvider::IpApiCom, ip(), failed),
            Err(TraceError::GeoLookupFailed { .. })
        ));
    }

    #[test]
    fn test_garbage_body() {
        assert!(parse_response(GeoProvider::IpSb, ip(), "<html>").is_err());
    }

    #[test]
    fn test_split_as_org() {
        assert_eq!(
            split_as_org("AS13335 Cloudflare, Inc."),
            ("13335".to_string(), "Cloudflare, Inc.".to_string())
        );
        assert_eq!(split_as_org("AS64500"), ("64500".to_string(), String::new()));
        assert_eq!(split_as_org("Example"), (String::new(), "Example".to_string()));
    }

    #[tokio::test]
    async fn test_disabled_source_returns_nothing() {
        let source = HttpGeoSource::new(GeoProvider::Disable, None).unwrap();
        assert!(source.lookup(ip()).await.unwrap().is_empty());
    }
}
