//! End-to-end tests for the hoptrace CLI.
//!
//! These run the real binary against real targets and need raw socket
//! access, so they are ignored by default. Run them as root with:
//!
//! ```text
//! sudo -E cargo test -p hoptrace-cli --test e2e_test -- --ignored
//! ```
//!
//! `HOPTRACE_E2E_TARGET` overrides the public target.

use serde::Deserialize;
use std::io::Read;
use std::net::IpAddr;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const LOCALHOST_TARGET: &str = "127.0.0.1";
const DEFAULT_PUBLIC_TARGET: &str = "1.1.1.1";
const NUM_QUERIES: usize = 2;
const CLI_TIMEOUT: Duration = Duration::from_secs(120);

/// Path JSON as printed with --json.
#[derive(Debug, Deserialize)]
struct TracePath {
    hops: Vec<HopGroup>,
}

#[derive(Debug, Deserialize)]
struct HopGroup {
    ttl: u8,
    records: Vec<HopRecord>,
}

#[derive(Debug, Deserialize)]
struct HopRecord {
    ttl: u8,
    index: usize,
    address: Option<IpAddr>,
    rtt: Option<f64>,
    #[serde(default)]
    reached: bool,
}

fn public_target() -> String {
    std::env::var("HOPTRACE_E2E_TARGET").unwrap_or_else(|_| DEFAULT_PUBLIC_TARGET.to_string())
}

/// Runs the CLI with --json and parses the path from its output.
fn run_cli(extra: &[&str], target: &str) -> Result<TracePath, String> {
    let mut args = vec![
        "--json".to_string(),
        "-n".to_string(),
        "-d".to_string(),
        "disable".to_string(),
        "-q".to_string(),
        NUM_QUERIES.to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    args.push(target.to_string());

    eprintln!("Running: hoptrace {:?}", args);
    let mut child = Command::new(env!("CARGO_BIN_EXE_hoptrace"))
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to spawn command: {}", e))?;

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if start.elapsed() > CLI_TIMEOUT => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(format!("Process timed out after {:?}", CLI_TIMEOUT));
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(100)),
            Err(e) => return Err(format!("Error waiting for process: {}", e)),
        }
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }
    if !stderr.is_empty() {
        eprintln!("CLI stderr:\n{}", stderr);
    }
    if !status.success() {
        return Err(format!("Command failed with status {}:\n{}", status, stderr));
    }

    // The header lines come before the JSON document.
    let json_start = stdout
        .find("\n{")
        .map(|i| i + 1)
        .ok_or_else(|| format!("No JSON in output:\n{}", stdout))?;
    serde_json::from_str(&stdout[json_start..])
        .map_err(|e| format!("Failed to parse JSON output: {}\nOutput: {}", e, stdout))
}

fn check_path(path: &TracePath, target: Option<IpAddr>) {
    assert!(!path.hops.is_empty(), "no hop groups");

    for (i, window) in path.hops.windows(2).enumerate() {
        assert_eq!(
            window[1].ttl,
            window[0].ttl + 1,
            "hop groups out of order at position {}",
            i
        );
    }

    for group in &path.hops {
        assert_eq!(group.records.len(), NUM_QUERIES, "hop {}", group.ttl);
        for (i, record) in group.records.iter().enumerate() {
            assert_eq!(record.ttl, group.ttl);
            assert_eq!(record.index, i);
            assert_eq!(record.address.is_some(), record.rtt.is_some());
        }
    }

    // Nothing is kept past the first group that reached the destination.
    if let Some(pos) = path
        .hops
        .iter()
        .position(|g| g.records.iter().any(|r| r.reached))
    {
        assert_eq!(pos, path.hops.len() - 1);
        if let Some(target) = target {
            assert!(path.hops[pos]
                .records
                .iter()
                .any(|r| r.address == Some(target)));
        }
    }
}

#[test]
#[ignore] // Requires root privileges
fn test_localhost_icmp() {
    let path = run_cli(&[], LOCALHOST_TARGET).expect("ICMP trace to localhost");
    check_path(&path, LOCALHOST_TARGET.parse().ok());
    assert_eq!(path.hops.len(), 1);
}

#[test]
#[ignore] // Requires root privileges
fn test_localhost_udp() {
    let path = run_cli(&["-U"], LOCALHOST_TARGET).expect("UDP trace to localhost");
    check_path(&path, LOCALHOST_TARGET.parse().ok());
}

#[test]
#[ignore] // Requires root privileges and network access
fn test_public_icmp() {
    let target = public_target();
    let path = run_cli(&["-m", "20"], &target).expect("ICMP trace to public target");
    check_path(&path, target.parse().ok());
}

#[test]
#[ignore] // Requires root privileges and network access
fn test_public_tcp() {
    let target = public_target();
    let path = run_cli(&["-T", "-p", "443", "-m", "20"], &target).expect("TCP trace");
    check_path(&path, target.parse().ok());
}
