//! Terminal output.

use hoptrace::{HopGroup, HopRecord, HopSink, TracePath};
use std::fmt::Write;
use std::net::IpAddr;
use std::sync::Arc;

/// Header printed before the first hop.
pub fn header(ip: IpAddr, name: &str, max_hops: u8) -> String {
    if name == ip.to_string() {
        format!("traceroute to {}, {} hops max", ip, max_hops)
    } else {
        format!("traceroute to {} ({}), {} hops max", ip, name, max_hops)
    }
}

/// A sink printing every hop as soon as its group completes.
pub fn realtime_printer() -> HopSink {
    Arc::new(|path: &TracePath, ttl: u8| {
        if let Some(group) = path.hop(ttl) {
            print!("{}", format_hop(group));
        }
    })
}

struct Line<'a> {
    record: &'a HopRecord,
    rtts: Vec<String>,
}

/// Renders one hop group, one line pair per distinct responding address.
///
/// Unanswered probes are shown as `*` next to the address answering before
/// them, or the first address when no probe was answered yet.
pub fn format_hop(group: &HopGroup) -> String {
    let mut lines: Vec<Line<'_>> = Vec::new();
    let mut leading_stars = 0;
    let mut latest: Option<usize> = None;

    for record in &group.records {
        let Some(addr) = record.address else {
            match latest {
                Some(i) => lines[i].rtts.push("* ms".to_string()),
                None => leading_stars += 1,
            }
            continue;
        };
        let i = match lines.iter().position(|l| l.record.address == Some(addr)) {
            Some(i) => i,
            None => {
                let stars = if lines.is_empty() { leading_stars } else { 0 };
                lines.push(Line {
                    record,
                    rtts: vec!["* ms".to_string(); stars],
                });
                lines.len() - 1
            }
        };
        let rtt = record.rtt.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0);
        lines[i].rtts.push(format!("{:.2} ms", rtt));
        latest = Some(i);
    }

    let mut out = format!("{:<2}  ", group.ttl);
    if lines.is_empty() {
        out.push_str("*\n");
        return out;
    }

    for (n, line) in lines.iter().enumerate() {
        if n > 0 {
            out.push_str("    ");
        }
        let record = line.record;
        let geo = record.geo.clone().unwrap_or_default();
        let addr = record.address.map(|a| a.to_string()).unwrap_or_default();

        let _ = write!(out, "{:<15}", addr);
        if geo.asnumber.is_empty() {
            let _ = write!(out, " {:<8}", "*");
        } else {
            let _ = write!(out, " AS{:<6}", geo.asnumber);
        }
        let country = if geo.country.is_empty() {
            "LAN Address"
        } else {
            geo.country.as_str()
        };
        let _ = writeln!(
            out,
            " {} {} {} {} {:<6}",
            country, geo.prov, geo.city, geo.district, geo.owner
        );
        let _ = writeln!(
            out,
            "    {:<22}   {}",
            record.hostname.as_deref().unwrap_or(""),
            line.rtts.join(" / ")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoptrace::GeoData;
    use std::time::Duration;

    fn record(index: usize, addr: Option<&str>, ms: u64) -> HopRecord {
        HopRecord {
            ttl: 3,
            index,
            address: addr.map(|a| a.parse().unwrap()),
            rtt: addr.map(|_| Duration::from_millis(ms)),
            reached: false,
            hostname: None,
            geo: None,
        }
    }

    #[test]
    fn test_header() {
        let ip: IpAddr = "1.1.1.1".parse().unwrap();
        assert_eq!(
            header(ip, "one.one.one.one", 30),
            "traceroute to 1.1.1.1 (one.one.one.one), 30 hops max"
        );
        assert_eq!(header(ip, "1.1.1.1", 12), "traceroute to 1.1.1.1, 12 hops max");
    }

    #[test]
    fn test_silent_hop() {
        let group = HopGroup {
            ttl: 4,
            records: vec![record(0, None, 0), record(1, None, 0)],
        };
        assert_eq!(format_hop(&group), "4   *\n");
    }

    #[test]
    fn test_single_address_with_timeouts() {
        let mut answered = record(1, Some("203.0.113.5"), 12);
        answered.hostname = Some("core1.example.net".to_string());
        answered.geo = Some(GeoData {
            asnumber: "64500".into(),
            country: "Testland".into(),
            city: "Capital".into(),
            ..Default::default()
        });
        let group = HopGroup {
            ttl: 3,
            records: vec![record(0, None, 0), answered, record(2, None, 0)],
        };

        let out = format_hop(&group);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("3   203.0.113.5"));
        assert!(lines[0].contains("AS64500"));
        assert!(lines[0].contains("Testland"));
        assert!(lines[1].contains("core1.example.net"));
        assert!(lines[1].ends_with("* ms / 12.00 ms / * ms"));
    }

    #[test]
    fn test_multipath_hop() {
        let group = HopGroup {
            ttl: 3,
            records: vec![
                record(0, Some("10.0.0.1"), 1),
                record(1, Some("10.0.0.2"), 2),
                record(2, Some("10.0.0.1"), 3),
            ],
        };

        let out = format_hop(&group);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("10.0.0.1"));
        assert!(lines[0].contains("LAN Address"));
        assert!(lines[1].ends_with("1.00 ms / 3.00 ms"));
        assert!(lines[2].starts_with("    10.0.0.2"));
        assert!(lines[3].ends_with("2.00 ms"));
    }
}
