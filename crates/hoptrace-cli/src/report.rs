//! Route-path report: the traced path summarised by network.

use hoptrace::{HopRecord, TracePath};
use std::fmt::Write;
use std::net::IpAddr;

/// Consecutive hops answered by the same AS and owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSegment {
    pub asnumber: String,
    pub owner: String,
    pub location: String,
    pub first_ttl: u8,
    pub last_ttl: u8,
    pub addresses: Vec<IpAddr>,
}

impl RouteSegment {
    fn label(&self) -> String {
        if self.asnumber.is_empty() && self.owner.is_empty() {
            return "*".to_string();
        }
        let mut label = String::new();
        if !self.asnumber.is_empty() {
            let _ = write!(label, "AS{}", self.asnumber);
        }
        if !self.owner.is_empty() {
            if !label.is_empty() {
                label.push(' ');
            }
            label.push_str(&self.owner);
        }
        label
    }
}

fn location(record: &HopRecord) -> String {
    let Some(geo) = &record.geo else {
        return String::new();
    };
    [&geo.country, &geo.prov, &geo.city]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Groups the answered hops of `path` by AS number and owner.
///
/// Silent hops are skipped, so a segment may span them. Each hop counts with
/// its first answered record.
pub fn route_segments(path: &TracePath) -> Vec<RouteSegment> {
    let mut segments: Vec<RouteSegment> = Vec::new();

    for group in &path.hops {
        let Some(record) = group.records.iter().find(|r| r.address.is_some()) else {
            continue;
        };
        let geo = record.geo.clone().unwrap_or_default();
        let addresses: Vec<IpAddr> = group.records.iter().filter_map(|r| r.address).collect();

        match segments.last_mut() {
            Some(last) if last.asnumber == geo.asnumber && last.owner == geo.owner => {
                last.last_ttl = group.ttl;
                for addr in addresses {
                    if !last.addresses.contains(&addr) {
                        last.addresses.push(addr);
                    }
                }
            }
            _ => {
                let mut distinct = Vec::new();
                for addr in addresses {
                    if !distinct.contains(&addr) {
                        distinct.push(addr);
                    }
                }
                segments.push(RouteSegment {
                    asnumber: geo.asnumber.clone(),
                    owner: geo.owner.clone(),
                    location: location(record),
                    first_ttl: group.ttl,
                    last_ttl: group.ttl,
                    addresses: distinct,
                });
            }
        }
    }
    segments
}

/// Renders the route-path report printed by `--report`.
pub fn format_report(path: &TracePath, target: IpAddr) -> String {
    let mut out = format!("Route-Path Report to {}\n", target);
    let segments = route_segments(path);

    for segment in &segments {
        let hops = if segment.first_ttl == segment.last_ttl {
            format!("hop {}", segment.first_ttl)
        } else {
            format!("hops {}-{}", segment.first_ttl, segment.last_ttl)
        };
        let _ = write!(out, "  {:<28} {:<10}", segment.label(), hops);
        if !segment.location.is_empty() {
            let _ = write!(out, " [{}]", segment.location);
        }
        out.push('\n');
    }

    match path.hops.iter().find(|g| g.records.iter().any(|r| r.reached)) {
        Some(group) => {
            let _ = writeln!(
                out,
                "Reached {} at hop {} through {} networks",
                target,
                group.ttl,
                segments.len()
            );
        }
        None => {
            let last = path.hops.last().map(|g| g.ttl).unwrap_or(0);
            let _ = writeln!(out, "{} not reached within {} hops", target, last);
        }
    }
    out
}
