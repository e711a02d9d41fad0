//! User-submitted geolocation corrections.

use crate::store::FixStore;
use async_trait::async_trait;
use hoptrace_core::{GeoData, GeoFix, GeoLookup, GeoSource, TraceError, TracePath, TraceResult};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Wraps a geolocation source and lets corrections take precedence over it.
///
/// Corrections are passed on to the wrapped source. With a [`FixStore`] they
/// are also written to disk and loaded again by later runs.
pub struct GeoOverrides {
    inner: GeoSource,
    fixes: RwLock<HashMap<IpAddr, GeoFix>>,
    store: Option<FixStore>,
    name: String,
}

impl GeoOverrides {
    /// Keeps corrections in memory only.
    pub fn new(inner: GeoSource) -> Self {
        let name = format!("{}+fixes", inner.name());
        Self {
            inner,
            fixes: RwLock::new(HashMap::new()),
            store: None,
            name,
        }
    }

    /// Loads the corrections saved in `store` and saves new ones there.
    pub async fn with_store(inner: GeoSource, store: FixStore) -> TraceResult<Self> {
        let fixes = store.load().await?;
        let mut overrides = Self::new(inner);
        overrides.fixes = RwLock::new(fixes);
        overrides.store = Some(store);
        Ok(overrides)
    }

    pub fn store(&self) -> Option<&FixStore> {
        self.store.as_ref()
    }

    pub async fn fix_for(&self, ip: IpAddr) -> Option<GeoFix> {
        self.fixes.read().await.get(&ip).cloned()
    }
}

fn overlay(mut geo: GeoData, fix: &GeoFix) -> GeoData {
    if !fix.country.is_empty() {
        geo.country = fix.country.clone();
    }
    if !fix.prov.is_empty() {
        geo.prov = fix.prov.clone();
    }
    if !fix.city.is_empty() {
        geo.city = fix.city.clone();
    }
    geo
}

#[async_trait]
impl GeoLookup for GeoOverrides {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, ip: IpAddr) -> Result<GeoData, TraceError> {
        let fix = self.fix_for(ip).await;
        match (self.inner.lookup(ip).await, fix) {
            (Ok(geo), Some(fix)) => Ok(overlay(geo, &fix)),
            (Ok(geo), None) => Ok(geo),
            (Err(e), Some(fix)) => {
                debug!(%ip, error = %e, "Geo lookup failed, using stored correction");
                Ok(overlay(GeoData::default(), &fix))
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Records the correction, then forwards it to the wrapped source.
    ///
    /// A source that does not take corrections is only an error when there is
    /// no store either, since the correction would then be lost on exit.
    async fn submit_fix(&self, ip: IpAddr, fix: &GeoFix) -> Result<(), TraceError> {
        {
            let mut fixes = self.fixes.write().await;
            fixes.insert(ip, fix.clone());
            if let Some(store) = &self.store {
                store.save(&fixes).await?;
            }
        }
        match self.inner.submit_fix(ip, fix).await {
            Err(TraceError::FixUnsupported(name)) if self.store.is_some() => {
                debug!(%ip, source = %name, "Correction kept in the local store only");
                Ok(())
            }
            result => result,
        }
    }
}

/// Submits `fix` for every distinct responding address of `path`.
///
/// Returns the number of addresses corrected. The path itself is not modified.
pub async fn apply_fix(
    path: &TracePath,
    source: &dyn GeoLookup,
    fix: &GeoFix,
) -> TraceResult<usize> {
    if fix.is_empty() {
        return Ok(0);
    }
    let addresses: BTreeSet<IpAddr> = path.records().filter_map(|r| r.address).collect();
    for ip in &addresses {
        source.submit_fix(*ip, fix).await?;
    }
    info!(count = addresses.len(), source = source.name(), "Submitted geo corrections");
    Ok(addresses.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::scratch_store;
    use hoptrace_core::{HopGroup, HopRecord, ProbeOutcome};
    use std::sync::Arc;
    use std::time::Duration;

    struct Upstream {
        fail: bool,
    }

    #[async_trait]
    impl GeoLookup for Upstream {
        fn name(&self) -> &str {
            "upstream"
        }

        async fn lookup(&self, ip: IpAddr) -> Result<GeoData, TraceError> {
            if self.fail {
                return Err(TraceError::GeoLookupFailed {
                    ip,
                    reason: "down".into(),
                });
            }
            Ok(GeoData {
                asnumber: "64500".into(),
                country: "Wrongland".into(),
                city: "Somewhere".into(),
                ..Default::default()
            })
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn fix() -> GeoFix {
        GeoFix {
            country: "Rightland".into(),
            prov: String::new(),
            city: "Capital".into(),
        }
    }

    #[tokio::test]
    async fn test_fix_overrides_upstream_fields() {
        let store = scratch_store("overrides_fields");
        let geo = GeoOverrides::with_store(Arc::new(Upstream { fail: false }), store.clone())
            .await
            .unwrap();
        let addr = ip("203.0.113.1");
        geo.submit_fix(addr, &fix()).await.unwrap();

        let data = geo.lookup(addr).await.unwrap();
        assert_eq!(data.country, "Rightland");
        assert_eq!(data.city, "Capital");
        assert_eq!(data.asnumber, "64500");

        let other = geo.lookup(ip("203.0.113.2")).await.unwrap();
        assert_eq!(other.country, "Wrongland");
        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test]
    async fn test_fix_seen_by_later_run() {
        let store = scratch_store("overrides_later_run");
        let addr = ip("203.0.113.1");

        let first = GeoOverrides::with_store(Arc::new(Upstream { fail: false }), store.clone())
            .await
            .unwrap();
        first.submit_fix(addr, &fix()).await.unwrap();
        drop(first);

        let second = GeoOverrides::with_store(Arc::new(Upstream { fail: false }), store.clone())
            .await
            .unwrap();
        assert_eq!(second.fix_for(addr).await, Some(fix()));
        assert_eq!(second.lookup(addr).await.unwrap().country, "Rightland");
        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test]
    async fn test_unsupported_fix_without_store_fails() {
        let geo = GeoOverrides::new(Arc::new(Upstream { fail: false }));
        assert!(matches!(
            geo.submit_fix(ip("203.0.113.1"), &fix()).await,
            Err(TraceError::FixUnsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_fix_survives_upstream_failure() {
        let store = scratch_store("overrides_upstream_down");
        let geo = GeoOverrides::with_store(Arc::new(Upstream { fail: true }), store.clone())
            .await
            .unwrap();
        let addr = ip("203.0.113.1");
        assert!(geo.lookup(addr).await.is_err());

        geo.submit_fix(addr, &fix()).await.unwrap();
        assert_eq!(geo.lookup(addr).await.unwrap().country, "Rightland");
        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }

    #[tokio::test]
    async fn test_apply_fix_to_every_address() {
        let outcome = |ttl: u8, index: usize, addr: Option<&str>| ProbeOutcome {
            hop_limit: ttl,
            index,
            responder: addr.map(ip),
            rtt: addr.map(|_| Duration::from_millis(3)),
            reached: false,
        };
        let path = TracePath {
            hops: vec![
                HopGroup {
                    ttl: 1,
                    records: vec![
                        HopRecord::from(outcome(1, 0, Some("203.0.113.1"))),
                        HopRecord::from(outcome(1, 1, Some("203.0.113.1"))),
                    ],
                },
                HopGroup {
                    ttl: 2,
                    records: vec![
                        HopRecord::from(outcome(2, 0, None)),
                        HopRecord::from(outcome(2, 1, Some("203.0.113.2"))),
                    ],
                },
            ],
        };
        let before = path.clone();

        let store = scratch_store("overrides_apply");
        let geo = GeoOverrides::with_store(Arc::new(Upstream { fail: false }), store.clone())
            .await
            .unwrap();
        assert_eq!(apply_fix(&path, &geo, &fix()).await.unwrap(), 2);
        assert_eq!(store.load().await.unwrap().len(), 2);
        assert!(geo.fix_for(ip("203.0.113.1")).await.is_some());
        assert!(geo.fix_for(ip("203.0.113.2")).await.is_some());
        assert_eq!(path, before);

        assert_eq!(apply_fix(&path, &geo, &GeoFix::default()).await.unwrap(), 0);
        let _ = std::fs::remove_dir_all(store.path().parent().unwrap());
    }
}
