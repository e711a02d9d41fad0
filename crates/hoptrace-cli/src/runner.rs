//! Runs one trace from parsed command-line options.

use crate::{printer, report};
use hoptrace::{GeoFix, GeoLookup, GeoSource, Method, TraceConfig, TraceError, TracePath};
use hoptrace_enrich::{apply_fix, FixStore, GeoOverrides, GeoProvider, GeoSession, HttpConnector};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything a run needs, already validated by the argument parser.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: String,
    pub method: Method,
    pub port: u16,
    pub first_hop: u8,
    pub max_hops: u8,
    pub queries: usize,
    pub parallel: usize,
    pub timeout: Duration,
    pub resolve_hostnames: bool,
    pub provider: GeoProvider,
    pub token: Option<String>,
    pub json: bool,
    pub report: bool,
    pub fix: Option<GeoFix>,
    pub fix_store: Option<FixStore>,
}

/// Opens the geolocation source for `provider`, or none when it is disabled
/// or unreachable. Saved corrections are applied on top of it.
async fn open_geo_source(
    provider: GeoProvider,
    token: Option<String>,
    store: Option<FixStore>,
) -> Option<Arc<GeoOverrides>> {
    if provider.is_disabled() {
        return None;
    }
    let session: GeoSource = match GeoSession::open(HttpConnector::new(provider, token)).await {
        Ok(session) => Arc::new(session),
        Err(e) => {
            warn!(provider = %provider, error = %e, "Geolocation disabled");
            return None;
        }
    };
    let Some(store) = store else {
        return Some(Arc::new(GeoOverrides::new(session)));
    };
    match GeoOverrides::with_store(Arc::clone(&session), store).await {
        Ok(overrides) => Some(Arc::new(overrides)),
        Err(e) => {
            warn!(error = %e, "Ignoring saved geo corrections");
            Some(Arc::new(GeoOverrides::new(session)))
        }
    }
}

/// Resolves the target, traces it and prints the result.
pub async fn run(opts: RunOptions) -> Result<TracePath, TraceError> {
    let dest_ip: IpAddr = hoptrace::resolve_destination(&opts.target, opts.method).await?;
    debug!(target = %opts.target, %dest_ip, "Resolved target");

    let geo = open_geo_source(opts.provider, opts.token.clone(), opts.fix_store.clone()).await;

    println!("IP Geo Data Provider: {}", opts.provider);
    println!("{}", printer::header(dest_ip, &opts.target, opts.max_hops));

    let config = TraceConfig {
        dest_ip,
        dest_port: opts.port,
        method: opts.method,
        first_hop: opts.first_hop,
        max_hops: opts.max_hops,
        queries_per_hop: opts.queries,
        parallel_requests: opts.parallel,
        timeout: opts.timeout,
        resolve_hostnames: opts.resolve_hostnames,
        sink: (!opts.json).then(printer::realtime_printer),
        geo_source: geo.clone().map(|g| g as GeoSource),
    };

    let path = hoptrace::traceroute(&config).await?;

    if opts.json {
        let json = path
            .to_json()
            .map_err(|e| TraceError::Internal(format!("Failed to serialize results: {}", e)))?;
        println!("{}", json);
    }

    if opts.report {
        print!("{}", report::format_report(&path, dest_ip));
    }

    if let Some(fix) = &opts.fix {
        let Some(geo) = &geo else {
            return Err(TraceError::InvalidConfig(
                "--fix needs a geolocation provider".to_string(),
            ));
        };
        let count = apply_fix(&path, geo.as_ref() as &dyn GeoLookup, fix).await?;
        match geo.store() {
            Some(store) => println!(
                "Saved corrections for {} addresses to {}",
                count,
                store.path().display()
            ),
            None => println!("Submitted corrections for {} addresses", count),
        }
    }

    Ok(path)
}
