//! Long-lived geolocation session with reconnect and backoff.

use crate::provider::{GeoProvider, HttpGeoSource};
use async_trait::async_trait;
use hoptrace_core::{GeoData, GeoFix, GeoLookup, GeoSource, TraceError, TraceResult};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Establishes connections to a geolocation backend.
#[async_trait]
pub trait GeoConnector: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    async fn connect(&self) -> TraceResult<GeoSource>;
}

/// Connects to one of the HTTP providers.
pub struct HttpConnector {
    provider: GeoProvider,
    token: Option<String>,
    name: String,
}

impl HttpConnector {
    pub fn new(provider: GeoProvider, token: Option<String>) -> Self {
        Self {
            provider,
            token,
            name: provider.to_string(),
        }
    }
}

#[async_trait]
impl GeoConnector for HttpConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> TraceResult<GeoSource> {
        Ok(Arc::new(HttpGeoSource::new(self.provider, self.token.clone())?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Reconnecting,
    Closed,
}

struct Inner {
    state: SessionState,
    conn: Option<GeoSource>,
}

/// A geolocation backend connection that survives transient failures.
///
/// A lookup that cannot reach the backend triggers a reconnect, retried with
/// exponential backoff. Failures reported by a reachable backend are returned
/// as they are.
/// When every attempt fails the session is closed and later lookups fail
/// immediately with [`TraceError::GeoSourceClosed`].
pub struct GeoSession<C> {
    connector: C,
    base_delay: Duration,
    max_attempts: u32,
    inner: Mutex<Inner>,
}

impl<C: GeoConnector> GeoSession<C> {
    /// Connects and returns an open session.
    pub async fn open(connector: C) -> TraceResult<Self> {
        let conn = connector.connect().await?;
        debug!(source = connector.name(), "Geo session open");
        Ok(Self {
            connector,
            base_delay: DEFAULT_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            inner: Mutex::new(Inner {
                state: SessionState::Open,
                conn: Some(conn),
            }),
        })
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_attempts: u32) -> Self {
        self.base_delay = base_delay;
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = SessionState::Closed;
        inner.conn = None;
        debug!(source = self.connector.name(), "Geo session closed");
    }

    async fn current(&self) -> TraceResult<Option<GeoSource>> {
        let inner = self.inner.lock().await;
        match inner.state {
            SessionState::Closed => Err(self.closed()),
            _ => Ok(inner.conn.clone()),
        }
    }

    async fn reconnect(&self) -> TraceResult<GeoSource> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closed {
            return Err(self.closed());
        }
        inner.state = SessionState::Reconnecting;
        inner.conn = None;

        let mut delay = self.base_delay;
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(delay).await;
            match self.connector.connect().await {
                Ok(conn) => {
                    info!(source = self.connector.name(), attempt, "Geo source reconnected");
                    inner.state = SessionState::Open;
                    inner.conn = Some(Arc::clone(&conn));
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(source = self.connector.name(), attempt, error = %e, "Geo reconnect failed");
                    delay = delay.saturating_mul(2);
                }
            }
        }

        warn!(
            source = self.connector.name(),
            attempts = self.max_attempts,
            "Giving up on geo source"
        );
        inner.state = SessionState::Closed;
        Err(self.closed())
    }

    fn closed(&self) -> TraceError {
        TraceError::GeoSourceClosed(self.connector.name().to_string())
    }
}

#[async_trait]
impl<C: GeoConnector> GeoLookup for GeoSession<C> {
    fn name(&self) -> &str {
        self.connector.name()
    }

    async fn lookup(&self, ip: IpAddr) -> Result<GeoData, TraceError> {
        if let Some(conn) = self.current().await? {
            match conn.lookup(ip).await {
                Err(e @ TraceError::GeoUnreachable { .. }) => {
                    debug!(%ip, error = %e, "Geo source unreachable, reconnecting")
                }
                result => return result,
            }
        }
        self.reconnect().await?.lookup(ip).await
    }

    async fn submit_fix(&self, ip: IpAddr, fix: &GeoFix) -> Result<(), TraceError> {
        match self.current().await? {
            Some(conn) => conn.submit_fix(ip, fix).await,
            None => self.reconnect().await?.submit_fix(ip, fix).await,
        }
    }
}
