//! Prometheus metric collectors for the command API (§6) and the
//! background poller (§4.6), registered once at startup via `install`.

use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_histogram_vec, register_int_counter_vec, HistogramVec,
    IntCounterVec,
};

static RPC_REQUESTS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static RPC_REQUEST_DURATION_SECONDS: OnceCell<HistogramVec> = OnceCell::new();
static PROVIDER_CALLS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

macro_rules! get_metric {
    ($metric:ident) => {
        $metric
            .get()
            .expect("metrics not initialized; call m3d_telemetry::metrics::install() first")
    };
}

#[derive(Debug, Clone, Copy)]
pub struct Metrics;

#[allow(clippy::expect_used)]
impl Metrics {
    pub fn inc_request(&self, route: &str, status_code: u16) {
        get_metric!(RPC_REQUESTS_TOTAL)
            .with_label_values(&[route, &status_code.to_string()])
            .inc();
    }

    pub fn observe_request_duration(&self, route: &str, duration_secs: f64) {
        get_metric!(RPC_REQUEST_DURATION_SECONDS)
            .with_label_values(&[route])
            .observe(duration_secs);
    }

    pub fn inc_provider_call(&self, provider: &str, operation: &str, outcome: &str) {
        get_metric!(PROVIDER_CALLS_TOTAL)
            .with_label_values(&[provider, operation, outcome])
            .inc();
    }

    pub fn inc_error(&self, category: &str, code: &str) {
        get_metric!(ERRORS_TOTAL)
            .with_label_values(&[category, code])
            .inc();
    }
}

/// Registers all collectors. Must be called exactly once at startup, before
/// any handler or driver touches the gauges above.
#[allow(clippy::expect_used)]
pub fn install() -> Result<Metrics, prometheus::Error> {
    RPC_REQUESTS_TOTAL
        .set(register_int_counter_vec!(
            "m3d_rpc_requests_total",
            "Total command API requests.",
            &["route", "status"]
        )?)
        .expect("static already initialized");
    RPC_REQUEST_DURATION_SECONDS
        .set(register_histogram_vec!(
            "m3d_rpc_request_duration_seconds",
            "Latency of command API requests.",
            &["route"],
            exponential_buckets(0.001, 2.0, 15)?
        )?)
        .expect("static already initialized");
    PROVIDER_CALLS_TOTAL
        .set(register_int_counter_vec!(
            "m3d_provider_calls_total",
            "Total outbound calls to vision/mesh/retexture providers.",
            &["provider", "operation", "outcome"]
        )?)
        .expect("static already initialized");
    ERRORS_TOTAL
        .set(register_int_counter_vec!(
            "m3d_errors_total",
            "Total classified errors, by category and code.",
            &["category", "code"]
        )?)
        .expect("static already initialized");

    Ok(Metrics)
}
