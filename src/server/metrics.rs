use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all medtools metrics
const PREFIX: &str = "medtools";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Tool Metrics
    pub static ref TOOL_CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_tool_calls_total"), "Tool calls by operation and outcome"),
        &["operation", "outcome"]
    ).expect("Failed to create tool_calls_total metric");

    pub static ref TOOL_CALL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_tool_call_duration_seconds"),
            "Tool call duration in seconds, cache hits included"
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["operation"]
    ).expect("Failed to create tool_call_duration_seconds metric");

    // Cache Metrics
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_cache_lookups_total"), "Cache lookups by result"),
        &["result"]
    ).expect("Failed to create cache_lookups_total metric");

    pub static ref CACHE_ENTRIES: Gauge = Gauge::new(
        format!("{PREFIX}_cache_entries"),
        "Entries currently held by the tool result cache"
    ).expect("Failed to create cache_entries metric");

    // Session Metrics
    pub static ref ACTIVE_SESSIONS: IntGauge = IntGauge::new(
        format!("{PREFIX}_active_sessions"),
        "Number of live MCP sessions"
    ).expect("Failed to create active_sessions metric");

    pub static ref SESSIONS_CLOSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(format!("{PREFIX}_sessions_closed_total"), "Closed sessions by reason"),
        &["reason"]
    ).expect("Failed to create sessions_closed_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TOOL_CALLS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TOOL_CALL_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_LOOKUPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_ENTRIES.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_SESSIONS.clone()));
    let _ = REGISTRY.register(Box::new(SESSIONS_CLOSED_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record a finished tool call. `outcome` is one of `ok`, `cached`,
/// `invalid_params` or `failed`.
pub fn record_tool_call(operation: &str, outcome: &str, duration: Duration) {
    TOOL_CALLS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();

    TOOL_CALL_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    CACHE_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_cache_entries(count: usize) {
    CACHE_ENTRIES.set(count as f64);
}

pub fn session_opened() {
    ACTIVE_SESSIONS.inc();
}

pub fn session_closed(reason: &str) {
    ACTIVE_SESSIONS.dec();
    SESSIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
}

/// Collapse the request path into a low-cardinality label.
pub fn categorize_endpoint(path: &str, mcp_path: &str) -> &'static str {
    if path == mcp_path {
        "mcp"
    } else {
        "other"
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Router served on the dedicated metrics port.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}
