//! Prometheus Metrics Module
//!
//! Exposes hub metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames and parse errors per feed
//! - **Fan-out**: emissions per event kind, dropped subscribers
//! - **Population**: active groups and subscribers
//!
//! Metrics are exposed at `/metrics` on the HTTP edge. Every helper here is
//! fire-and-forget; recording failures never reach callers.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "hub_upstream_frames_total",
        "Frames received from upstream feeds"
    );
    describe_counter!(
        "hub_upstream_parse_errors_total",
        "Upstream frames that failed to decode"
    );
    describe_counter!(
        "hub_emissions_total",
        "SSE emissions that passed the fingerprint gate, by event kind"
    );
    describe_counter!(
        "hub_subscribers_dropped_total",
        "Subscribers removed after a failed write"
    );
    describe_gauge!("hub_active_groups", "Fan-out groups currently alive");
    describe_gauge!("hub_active_subscribers", "SSE subscribers currently attached");
    describe_gauge!(
        "hub_upstream_connected",
        "Whether an upstream feed is connected (1/0)"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one inbound frame from an upstream feed.
pub fn record_upstream_frame(feed: &'static str) {
    counter!("hub_upstream_frames_total", "feed" => feed).increment(1);
}

/// Record an undecodable upstream frame.
pub fn record_upstream_parse_error(feed: &'static str) {
    counter!("hub_upstream_parse_errors_total", "feed" => feed).increment(1);
}

/// Record one gated emission.
pub fn record_emission(kind: &'static str) {
    counter!("hub_emissions_total", "kind" => kind).increment(1);
}

/// Record subscribers dropped on write failure.
pub fn record_subscribers_dropped(count: u64) {
    if count > 0 {
        counter!("hub_subscribers_dropped_total").increment(count);
    }
}

/// Update the live group count.
pub fn set_active_groups(count: f64) {
    gauge!("hub_active_groups").set(count);
}

/// Update the live subscriber count.
pub fn set_active_subscribers(count: f64) {
    gauge!("hub_active_subscribers").set(count);
}

/// Update an upstream feed's connectivity gauge.
pub fn set_upstream_connected(feed: &'static str, connected: bool) {
    gauge!("hub_upstream_connected", "feed" => feed).set(if connected { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_absent_before_init() {
        // Recording without a recorder must be a silent no-op.
        record_upstream_frame("swarm");
        record_emission("games");
        record_subscribers_dropped(0);
        set_active_groups(0.0);
        set_upstream_connected("swarm", false);
    }
}
