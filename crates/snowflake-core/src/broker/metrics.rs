//! Broker metrics: in-process counters, per-country proxy stats and the
//! periodic metrics log.
//!
//! The scalar counters back the operator-facing stats block that gets
//! appended to the metrics log (and served verbatim on `/metrics`); the
//! Prometheus side of every transition lives in
//! [`prometheus`](super::prometheus) and is driven from here so each event
//! is recorded in exactly one place.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use super::geoip::GeoIpResolver;
use super::prometheus;
use super::NatType;
use crate::error::BrokerResult;

/// How often a stats block is appended to the metrics log.
pub const SUMMARY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Counts are rounded up to the next multiple of this before they are
/// written out, to blunt fine-grained traffic observation.
const COUNT_BIN: u64 = 8;

#[derive(Default)]
struct CountryStats {
    /// Distinct proxy IPs seen since the last reset.
    ips: HashSet<IpAddr>,
    /// Distinct-IP count per ISO country code; `??` when unresolvable.
    countries: HashMap<String, u64>,
}

pub struct Metrics {
    client_denied_count: AtomicU64,
    client_restricted_denied_count: AtomicU64,
    client_unrestricted_denied_count: AtomicU64,
    client_proxy_match_count: AtomicU64,
    proxy_idle_count: AtomicU64,
    /// Last observed offer->answer round trip, milliseconds.
    client_roundtrip_estimate: AtomicU64,
    country_stats: Mutex<CountryStats>,
    geoip: RwLock<GeoIpResolver>,
    log_path: Option<PathBuf>,
}

impl Metrics {
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Metrics {
            client_denied_count: AtomicU64::new(0),
            client_restricted_denied_count: AtomicU64::new(0),
            client_unrestricted_denied_count: AtomicU64::new(0),
            client_proxy_match_count: AtomicU64::new(0),
            proxy_idle_count: AtomicU64::new(0),
            client_roundtrip_estimate: AtomicU64::new(0),
            country_stats: Mutex::new(CountryStats::default()),
            geoip: RwLock::new(GeoIpResolver::default()),
            log_path,
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    // ----- transition points -----

    pub fn record_client_denied(&self, client_nat: NatType) {
        self.client_denied_count.fetch_add(1, Ordering::Relaxed);
        if client_nat == NatType::Unrestricted {
            self.client_unrestricted_denied_count
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.client_restricted_denied_count
                .fetch_add(1, Ordering::Relaxed);
        }
        prometheus::record_client_poll(client_nat.as_str(), "denied");
    }

    pub fn record_client_matched(&self, client_nat: NatType, roundtrip_ms: u64) {
        self.client_proxy_match_count.fetch_add(1, Ordering::Relaxed);
        self.client_roundtrip_estimate
            .store(roundtrip_ms, Ordering::Relaxed);
        prometheus::record_client_poll(client_nat.as_str(), "matched");
        prometheus::record_roundtrip_estimate(roundtrip_ms);
    }

    pub fn record_proxy_idle(&self, proxy_nat: NatType) {
        self.proxy_idle_count.fetch_add(1, Ordering::Relaxed);
        prometheus::record_proxy_poll(proxy_nat.as_str(), "idle");
    }

    pub fn record_proxy_matched(&self, proxy_nat: NatType) {
        prometheus::record_proxy_poll(proxy_nat.as_str(), "matched");
    }

    pub fn available_proxies_inc(&self, nat: NatType, proxy_type: &str) {
        prometheus::available_proxies_inc(nat.as_str(), proxy_type);
    }

    pub fn available_proxies_dec(&self, nat: NatType, proxy_type: &str) {
        prometheus::available_proxies_dec(nat.as_str(), proxy_type);
    }

    /// Count a polling proxy's IP towards country stats, once per distinct
    /// address since the last summary reset.
    pub fn update_country_stats(&self, ip: IpAddr) {
        let mut stats = self.country_stats.lock();
        if !stats.ips.insert(ip) {
            return;
        }
        let country = self
            .geoip
            .read()
            .country(ip)
            .map(str::to_owned)
            .unwrap_or_else(|| "??".to_owned());
        *stats.countries.entry(country).or_insert(0) += 1;
    }

    // ----- scalar accessors -----

    pub fn client_denied_count(&self) -> u64 {
        self.client_denied_count.load(Ordering::Relaxed)
    }

    pub fn client_restricted_denied_count(&self) -> u64 {
        self.client_restricted_denied_count.load(Ordering::Relaxed)
    }

    pub fn client_unrestricted_denied_count(&self) -> u64 {
        self.client_unrestricted_denied_count.load(Ordering::Relaxed)
    }

    pub fn client_proxy_match_count(&self) -> u64 {
        self.client_proxy_match_count.load(Ordering::Relaxed)
    }

    pub fn proxy_idle_count(&self) -> u64 {
        self.proxy_idle_count.load(Ordering::Relaxed)
    }

    pub fn client_roundtrip_estimate(&self) -> u64 {
        self.client_roundtrip_estimate.load(Ordering::Relaxed)
    }

    // ----- geoip -----

    /// Load (or reload) the GeoIP databases. On failure the previous
    /// tables stay in effect.
    pub fn load_geoip(&self, v4_path: Option<&Path>, v6_path: Option<&Path>) -> BrokerResult<()> {
        let resolver = GeoIpResolver::load(v4_path, v6_path)?;
        info!(
            v4_ranges = resolver.v4_len(),
            v6_ranges = resolver.v6_len(),
            "geoip databases loaded"
        );
        *self.geoip.write() = resolver;
        Ok(())
    }

    // ----- metrics log -----

    /// Render the stats block and append it to the metrics log when one is
    /// configured. Per-IP state resets afterwards so each block covers one
    /// interval.
    pub fn write_summary(&self) -> BrokerResult<String> {
        let summary = self.render_summary();
        if let Some(path) = &self.log_path {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            file.write_all(summary.as_bytes())?;
        }
        self.country_stats.lock().ips.clear();
        Ok(summary)
    }

    fn render_summary(&self) -> String {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        let stats = self.country_stats.lock();
        let mut countries: Vec<(&String, &u64)> = stats.countries.iter().collect();
        countries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let ips_line = countries
            .iter()
            .map(|(code, count)| format!("{code}={count}"))
            .collect::<Vec<_>>()
            .join(",");
        let ips_total: u64 = stats.countries.values().sum();

        let mut s = format!(
            "snowflake-stats-end {now} ({} s)\n",
            SUMMARY_INTERVAL.as_secs()
        );
        s.push_str(&format!("snowflake-ips {ips_line}\n"));
        s.push_str(&format!("snowflake-ips-total {ips_total}\n"));
        s.push_str(&format!(
            "snowflake-idle-count {}\n",
            bin_count(self.proxy_idle_count())
        ));
        s.push_str(&format!(
            "client-denied-count {}\n",
            bin_count(self.client_denied_count())
        ));
        s.push_str(&format!(
            "client-restricted-denied-count {}\n",
            bin_count(self.client_restricted_denied_count())
        ));
        s.push_str(&format!(
            "client-unrestricted-denied-count {}\n",
            bin_count(self.client_unrestricted_denied_count())
        ));
        s.push_str(&format!(
            "client-snowflake-match-count {}\n",
            bin_count(self.client_proxy_match_count())
        ));
        s
    }

    /// Append a stats block every [`SUMMARY_INTERVAL`] until the context is
    /// dropped. Spawned from startup when a metrics log is configured.
    pub async fn run_summary_loop(&self) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + SUMMARY_INTERVAL,
            SUMMARY_INTERVAL,
        );
        loop {
            ticker.tick().await;
            if let Err(err) = self.write_summary() {
                warn!("failed to write metrics summary: {err}");
            }
        }
    }
}

/// Round up to the nearest multiple of [`COUNT_BIN`]; zero stays zero.
fn bin_count(count: u64) -> u64 {
    count.div_ceil(COUNT_BIN) * COUNT_BIN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_count_rounds_up() {
        assert_eq!(bin_count(0), 0);
        assert_eq!(bin_count(1), 8);
        assert_eq!(bin_count(8), 8);
        assert_eq!(bin_count(9), 16);
    }

    #[test]
    fn summary_contains_counters() {
        let metrics = Metrics::new(None);
        metrics.record_client_denied(NatType::Unknown);
        metrics.record_proxy_idle(NatType::Unrestricted);
        metrics.update_country_stats("192.0.2.1".parse().expect("addr"));
        metrics.update_country_stats("192.0.2.1".parse().expect("addr"));

        let summary = metrics.write_summary().expect("render");
        assert!(summary.contains("snowflake-ips ??=1\n"));
        assert!(summary.contains("snowflake-ips-total 1\n"));
        assert!(summary.contains("client-denied-count 8\n"));
        assert!(summary.contains("client-restricted-denied-count 8\n"));
        assert!(summary.contains("client-unrestricted-denied-count 0\n"));
        assert!(summary.contains("snowflake-idle-count 8\n"));
    }

    #[test]
    fn denied_split_tracks_client_class() {
        let metrics = Metrics::new(None);
        metrics.record_client_denied(NatType::Unrestricted);
        metrics.record_client_denied(NatType::Restricted);
        metrics.record_client_denied(NatType::Unknown);
        assert_eq!(metrics.client_denied_count(), 3);
        assert_eq!(metrics.client_unrestricted_denied_count(), 1);
        assert_eq!(metrics.client_restricted_denied_count(), 2);
    }
}
