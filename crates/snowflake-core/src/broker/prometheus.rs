//! Prometheus metrics for broker observability.
//!
//! Exposes metrics compatible with Prometheus/OpenMetrics format:
//! - `snowflake_available_proxies{nat,type}` - Gauge of registered proxies
//! - `snowflake_proxy_poll_total{nat,status}` - Counter of proxy polls (idle/matched)
//! - `snowflake_client_poll_total{nat,status}` - Counter of client polls (denied/matched)
//! - `snowflake_client_roundtrip_estimate_ms` - Gauge of the last offer->answer round trip

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
/// Must be called once at application startup before any metrics are recorded.
///
/// Returns the handle that can be used to render metrics as text.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PROMETHEUS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus metrics recorder");

        describe_gauge!(
            "snowflake_available_proxies",
            "Number of proxies currently registered with the broker"
        );
        describe_counter!(
            "snowflake_proxy_poll_total",
            "Total number of proxy polls by outcome"
        );
        describe_counter!(
            "snowflake_client_poll_total",
            "Total number of client offers by outcome"
        );
        describe_gauge!(
            "snowflake_client_roundtrip_estimate_ms",
            "Last observed client offer to answer round trip in milliseconds"
        );

        handle
    });

    handle.clone()
}

/// Get the Prometheus handle for rendering metrics.
/// Returns None if metrics have not been initialized.
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

pub fn available_proxies_inc(nat: &str, proxy_type: &str) {
    let labels = [("nat", nat.to_string()), ("type", proxy_type.to_string())];
    gauge!("snowflake_available_proxies", &labels).increment(1.0);
}

pub fn available_proxies_dec(nat: &str, proxy_type: &str) {
    let labels = [("nat", nat.to_string()), ("type", proxy_type.to_string())];
    gauge!("snowflake_available_proxies", &labels).decrement(1.0);
}

/// Record a settled proxy poll; `status` is `idle` or `matched`.
pub fn record_proxy_poll(nat: &str, status: &str) {
    let labels = [("nat", nat.to_string()), ("status", status.to_string())];
    counter!("snowflake_proxy_poll_total", &labels).increment(1);
}

/// Record a settled client offer; `status` is `denied` or `matched`.
pub fn record_client_poll(nat: &str, status: &str) {
    let labels = [("nat", nat.to_string()), ("status", status.to_string())];
    counter!("snowflake_client_poll_total", &labels).increment(1);
}

pub fn record_roundtrip_estimate(millis: u64) {
    gauge!("snowflake_client_roundtrip_estimate_ms").set(millis as f64);
}

/// Render all metrics in Prometheus text format.
pub fn render_metrics() -> String {
    if let Some(handle) = get_prometheus_handle() {
        handle.render()
    } else {
        String::from("# Metrics not initialized\n")
    }
}
