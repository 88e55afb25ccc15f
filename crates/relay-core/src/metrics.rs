//! Prometheus metric recorders.
//!
//! Recorders are cheap, lock-free and safe to call from any task. The
//! exporter handle is process-wide; the server crate renders it on the
//! metrics listener.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the process-wide Prometheus recorder (idempotent) and returns
/// the render handle.
///
/// # Panics
/// Panics if the recorder cannot be installed on first use, which only
/// happens when another recorder was installed out of band.
pub fn init_prometheus() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder")
        })
        .clone()
}

/// Counts picks per backend node.
pub(crate) fn record_pick(addr: &str) {
    counter!("relay_backend_picks_total", "node" => addr.to_string()).increment(1);
}

/// Tracks whether a backend currently has a READY subchannel.
pub(crate) fn record_subchannel_state(addr: &str, up: bool) {
    gauge!("relay_backend_subchannel_up", "node" => addr.to_string())
        .set(if up { 1.0 } else { 0.0 });
}

/// Records one backend RPC: latency histogram plus an outcome counter.
pub(crate) fn record_rpc(method: &'static str, outcome: &'static str, elapsed: Duration) {
    histogram!("relay_grpc_request_duration_seconds", "method" => method)
        .record(elapsed.as_secs_f64());
    counter!("relay_grpc_requests_total", "method" => method, "outcome" => outcome).increment(1);
}

/// Records one handled HTTP request.
pub fn record_http_request(method: String, status: u16, elapsed: Duration) {
    counter!("http_requests_total", "method" => method.clone(), "code" => status.to_string())
        .increment(1);
    histogram!("http_request_duration_seconds", "method" => method)
        .record(elapsed.as_secs_f64());
}

/// Adjusts the in-flight HTTP request gauge.
pub fn http_in_flight(delta: f64) {
    gauge!("http_requests_in_flight").increment(delta);
}
