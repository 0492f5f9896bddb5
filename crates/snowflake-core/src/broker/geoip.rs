//! Country lookup over the tor-project geoip file formats.
//!
//! The IPv4 database carries integer-coded ranges (`16777216,16777471,AU`),
//! the IPv6 database textual addresses (`2001:200::,2001:200:ffff:...,JP`).
//! `#` comments and blank lines are skipped. Lookup is a binary search over
//! the range starts, then an upper-bound check.

use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use crate::error::{BrokerError, BrokerResult};

#[derive(Default)]
pub struct GeoIpResolver {
    v4: Vec<(u32, u32, String)>,
    v6: Vec<(u128, u128, String)>,
}

impl GeoIpResolver {
    /// Load range tables from the given files. `None` paths load nothing
    /// for that family.
    pub fn load(v4_path: Option<&Path>, v6_path: Option<&Path>) -> BrokerResult<Self> {
        let mut resolver = GeoIpResolver::default();
        if let Some(path) = v4_path {
            let text = std::fs::read_to_string(path)?;
            resolver.v4 = parse_v4(&text)?;
        }
        if let Some(path) = v6_path {
            let text = std::fs::read_to_string(path)?;
            resolver.v6 = parse_v6(&text)?;
        }
        Ok(resolver)
    }

    pub fn country(&self, ip: IpAddr) -> Option<&str> {
        match ip {
            IpAddr::V4(addr) => lookup(&self.v4, u32::from(addr)),
            IpAddr::V6(addr) => lookup(&self.v6, u128::from(addr)),
        }
    }

    pub fn v4_len(&self) -> usize {
        self.v4.len()
    }

    pub fn v6_len(&self) -> usize {
        self.v6.len()
    }
}

fn lookup<K: Ord + Copy>(ranges: &[(K, K, String)], key: K) -> Option<&str> {
    let idx = ranges.partition_point(|(lo, _, _)| *lo <= key);
    let (_, hi, country) = ranges.get(idx.checked_sub(1)?)?;
    (key <= *hi).then_some(country.as_str())
}

fn parse_v4(text: &str) -> BrokerResult<Vec<(u32, u32, String)>> {
    let mut ranges = Vec::new();
    for (lo, hi, country) in lines(text)? {
        let lo: u32 = lo
            .parse()
            .map_err(|_| bad_line("IPv4 range start", lo))?;
        let hi: u32 = hi.parse().map_err(|_| bad_line("IPv4 range end", hi))?;
        ranges.push((lo, hi, country.to_owned()));
    }
    ranges.sort_by_key(|(lo, _, _)| *lo);
    Ok(ranges)
}

fn parse_v6(text: &str) -> BrokerResult<Vec<(u128, u128, String)>> {
    let mut ranges = Vec::new();
    for (lo, hi, country) in lines(text)? {
        let lo: Ipv6Addr = lo
            .parse()
            .map_err(|_| bad_line("IPv6 range start", lo))?;
        let hi: Ipv6Addr = hi.parse().map_err(|_| bad_line("IPv6 range end", hi))?;
        ranges.push((u128::from(lo), u128::from(hi), country.to_owned()));
    }
    ranges.sort_by_key(|(lo, _, _)| *lo);
    Ok(ranges)
}

fn lines(text: &str) -> BrokerResult<Vec<(&str, &str, &str)>> {
    let mut parsed = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.splitn(3, ',');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(lo), Some(hi), Some(country)) if !country.is_empty() => {
                parsed.push((lo, hi, country));
            }
            _ => return Err(bad_line("geoip entry", line)),
        }
    }
    Ok(parsed)
}

fn bad_line(what: &str, line: &str) -> BrokerError {
    BrokerError::Geoip(format!("malformed {what}: {line:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const V4_DB: &str = "\
# test database
16777216,16777471,AU
16777472,16778239,CN

3221225984,3221226239,EX
";

    const V6_DB: &str = "\
2001:200::,2001:200:ffff:ffff:ffff:ffff:ffff:ffff,JP
2001:db8::,2001:db8::ffff,EX
";

    #[test]
    fn v4_lookup_hits_and_misses() {
        let resolver = GeoIpResolver {
            v4: parse_v4(V4_DB).expect("parse v4"),
            v6: Vec::new(),
        };
        // 1.0.0.1 = 16777217, inside the first range
        assert_eq!(resolver.country("1.0.0.1".parse().expect("addr")), Some("AU"));
        assert_eq!(resolver.country("1.0.4.1".parse().expect("addr")), Some("CN"));
        // 192.0.2.1 = 3221225985, the documentation range
        assert_eq!(resolver.country("192.0.2.1".parse().expect("addr")), Some("EX"));
        assert_eq!(resolver.country("9.9.9.9".parse().expect("addr")), None);
    }

    #[test]
    fn v6_lookup() {
        let resolver = GeoIpResolver {
            v4: Vec::new(),
            v6: parse_v6(V6_DB).expect("parse v6"),
        };
        assert_eq!(
            resolver.country("2001:200::123".parse().expect("addr")),
            Some("JP")
        );
        assert_eq!(
            resolver.country("2001:db8::1".parse().expect("addr")),
            Some("EX")
        );
        assert_eq!(resolver.country("2001:db8:1::1".parse().expect("addr")), None);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse_v4("1,2").is_err());
        assert!(parse_v4("a,b,CC").is_err());
        assert!(parse_v6("2001:db8::,nonsense,CC").is_err());
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let ranges = parse_v4("# comment\n\n16777216,16777471,AU\n").expect("parse");
        assert_eq!(ranges.len(), 1);
    }
}
