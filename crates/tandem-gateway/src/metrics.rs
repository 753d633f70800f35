//! Prometheus Metrics for the tandem gateway
//!
//! Exports metrics for:
//! - Statements accepted on the production path
//! - Shadow execution outcomes and latency
//! - Configuration reloads

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_int_gauge, CounterVec, Encoder, Histogram,
    IntGauge, TextEncoder,
};

// ═══════════════════════════════════════════════════════════════════════════
// STATEMENT METRICS
// ═══════════════════════════════════════════════════════════════════════════

/// Statements handled, by production response kind
pub static STATEMENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tandem_statements_total",
        "Statements handled by the gateway",
        &["result"]
    )
    .unwrap()
});

// ═══════════════════════════════════════════════════════════════════════════
// SHADOW METRICS
// ═══════════════════════════════════════════════════════════════════════════

/// Shadow executions by outcome
pub static SHADOW_QUERIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tandem_shadow_queries_total",
        "Shadow executions by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Submit-to-terminal latency of shadow executions
pub static SHADOW_QUERY_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "tandem_shadow_query_duration_seconds",
        "Shadow execution duration in seconds",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
    )
    .unwrap()
});

/// Shadow executions currently running
pub static SHADOW_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tandem_shadow_in_flight",
        "Shadow executions currently in flight"
    )
    .unwrap()
});

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION METRICS
// ═══════════════════════════════════════════════════════════════════════════

pub static CONFIG_RELOADS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tandem_config_reloads_total",
        "Configuration updates by result",
        &["result"]
    )
    .unwrap()
});

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

pub fn record_statement(result: &str) {
    STATEMENTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_shadow_outcome(outcome: &str, duration_secs: f64) {
    SHADOW_QUERIES_TOTAL.with_label_values(&[outcome]).inc();
    SHADOW_QUERY_DURATION.observe(duration_secs);
}

pub fn record_config_reload(result: &str) {
    CONFIG_RELOADS_TOTAL.with_label_values(&[result]).inc();
}

/// Encode all registered metrics in the text exposition format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
