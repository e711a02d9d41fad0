//! CLI for hoptrace.

mod printer;
mod report;
mod runner;

use clap::Parser;
use hoptrace::{GeoFix, Method};
use hoptrace_enrich::{FixStore, GeoProvider};
use runner::RunOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// hoptrace - trace the network path to a host.
#[derive(Parser, Debug)]
#[command(name = "hoptrace")]
#[command(version)]
#[command(about = "Trace the network path to a host over ICMP, UDP or TCP SYN probes")]
pub struct Args {
    /// Target hostname or IP address.
    #[arg(required = true)]
    pub target: String,

    /// Use TCP SYN probes (default port 80).
    #[arg(short = 'T', long = "tcp", conflicts_with = "udp")]
    pub tcp: bool,

    /// Use UDP probes (default port 53).
    #[arg(short = 'U', long = "udp")]
    pub udp: bool,

    /// Destination port for TCP and UDP probes.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Probes per hop.
    #[arg(short = 'q', long = "queries", default_value = "3")]
    pub queries: usize,

    /// Probes in flight at once. Use 1 on multi-path routes.
    #[arg(short = 'r', long = "parallel-requests", default_value = "18")]
    pub parallel_requests: usize,

    /// Maximum number of hops (max TTL).
    #[arg(short = 'm', long = "max-hops", default_value = "30")]
    pub max_hops: u8,

    /// First hop to probe.
    #[arg(short = 'b', long = "begin-hop", default_value = "1")]
    pub begin_hop: u8,

    /// Timeout per probe in milliseconds.
    #[arg(short = 't', long, default_value = "1000")]
    pub timeout: u64,

    /// Disable reverse DNS lookups.
    #[arg(short = 'n', long = "no-rdns")]
    pub no_rdns: bool,

    /// Geolocation provider (IP.SB, IPInfo, IPAPI.com, disable).
    #[arg(short = 'd', long = "data-origin", default_value = "IP.SB")]
    pub data_origin: String,

    /// API token for providers that need one.
    #[arg(long)]
    pub token: Option<String>,

    /// Print the whole result as JSON instead of hop by hop.
    #[arg(long)]
    pub json: bool,

    /// Print a route-path report summarising the path by network.
    #[arg(long)]
    pub report: bool,

    /// Submit a geolocation correction for every address on the path.
    #[arg(long)]
    pub fix: bool,

    /// Country for --fix.
    #[arg(long = "fix-country", default_value = "")]
    pub fix_country: String,

    /// Province or region for --fix.
    #[arg(long = "fix-prov", default_value = "")]
    pub fix_prov: String,

    /// City for --fix.
    #[arg(long = "fix-city", default_value = "")]
    pub fix_city: String,

    /// File keeping geolocation corrections between runs.
    /// Defaults to `$XDG_DATA_HOME/hoptrace/geo_fixes.json`.
    #[arg(long = "fix-store")]
    pub fix_store: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    fn method(&self) -> Method {
        if self.tcp {
            Method::Tcp
        } else if self.udp {
            Method::Udp
        } else {
            Method::Icmp
        }
    }

    /// Convert CLI args to run options.
    fn to_options(&self) -> Result<RunOptions, String> {
        let method = self.method();
        let provider: GeoProvider = self
            .data_origin
            .parse()
            .map_err(|e| format!("Invalid data origin: {}", e))?;

        let fix = self.fix.then(|| GeoFix {
            country: self.fix_country.clone(),
            prov: self.fix_prov.clone(),
            city: self.fix_city.clone(),
        });

        Ok(RunOptions {
            target: self.target.clone(),
            method,
            port: self.port.unwrap_or_else(|| method.default_port()),
            first_hop: self.begin_hop,
            max_hops: self.max_hops,
            queries: self.queries,
            parallel: self.parallel_requests,
            timeout: Duration::from_millis(self.timeout),
            resolve_hostnames: !self.no_rdns,
            provider,
            token: self.token.clone(),
            json: self.json,
            report: self.report,
            fix,
            fix_store: self
                .fix_store
                .clone()
                .map(FixStore::new)
                .or_else(FixStore::default_location),
        })
    }
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = match args.to_options() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if !is_root() {
        eprintln!("Traceroute requires root/sudo privileges.");
        return ExitCode::FAILURE;
    }

    match runner::run(options).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Traceroute failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("hoptrace").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let opts = parse(&["example.com"]).to_options().unwrap();
        assert_eq!(opts.method, Method::Icmp);
        assert_eq!(opts.first_hop, 1);
        assert_eq!(opts.max_hops, 30);
        assert_eq!(opts.queries, 3);
        assert_eq!(opts.parallel, 18);
        assert_eq!(opts.timeout, Duration::from_millis(1000));
        assert!(opts.resolve_hostnames);
        assert_eq!(opts.provider, GeoProvider::IpSb);
        assert!(opts.fix.is_none());
        assert!(!opts.report);
    }

    #[test]
    fn test_report_and_store_options() {
        let opts = parse(&["--report", "--fix-store", "/tmp/fixes.json", "example.com"])
            .to_options()
            .unwrap();
        assert!(opts.report);
        assert_eq!(
            opts.fix_store.unwrap().path(),
            std::path::Path::new("/tmp/fixes.json")
        );
    }

    #[test]
    fn test_method_default_ports() {
        let tcp = parse(&["-T", "example.com"]).to_options().unwrap();
        assert_eq!((tcp.method, tcp.port), (Method::Tcp, 80));

        let udp = parse(&["-U", "example.com"]).to_options().unwrap();
        assert_eq!((udp.method, udp.port), (Method::Udp, 53));

        let custom = parse(&["-T", "-p", "443", "example.com"]).to_options().unwrap();
        assert_eq!(custom.port, 443);
    }

    #[test]
    fn test_tcp_and_udp_conflict() {
        assert!(Args::try_parse_from(["hoptrace", "-T", "-U", "example.com"]).is_err());
    }

    #[test]
    fn test_fix_options() {
        let opts = parse(&[
            "--fix",
            "--fix-country",
            "Testland",
            "--fix-city",
            "Capital",
            "-d",
            "disable",
            "example.com",
        ])
        .to_options()
        .unwrap();
        let fix = opts.fix.unwrap();
        assert_eq!(fix.country, "Testland");
        assert_eq!(fix.city, "Capital");
        assert!(fix.prov.is_empty());
        assert!(opts.provider.is_disabled());
    }

    #[test]
    fn test_unknown_provider() {
        assert!(parse(&["-d", "nowhere", "example.com"]).to_options().is_err());
    }
}
