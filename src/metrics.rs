//! Prometheus metrics for the wallet core
//!
//! Exposes metrics for:
//! - Transfer submission and settlement outcomes
//! - Pending set size
//! - Balance and fee estimation health
//!
//! The host application decides how to export them; `gather_text` renders the
//! default registry in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, register_int_gauge,
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, TextEncoder,
};
use tracing::warn;

lazy_static! {
    // Transfer metrics
    pub static ref TRANSFERS_SUBMITTED: CounterVec = register_counter_vec!(
        "wallet_transfers_submitted_total",
        "Total transfers broadcast by asset",
        &["asset"]
    ).unwrap();

    pub static ref TRANSFERS_REJECTED: CounterVec = register_counter_vec!(
        "wallet_transfers_rejected_total",
        "Total transfers refused before or at broadcast",
        &["reason"]
    ).unwrap();

    pub static ref TRANSFERS_SETTLED: CounterVec = register_counter_vec!(
        "wallet_transfers_settled_total",
        "Total transfers reaching a terminal state",
        &["outcome"]
    ).unwrap();

    pub static ref SETTLEMENT_LATENCY: HistogramVec = register_histogram_vec!(
        "wallet_settlement_latency_seconds",
        "Time from broadcast to terminal state",
        &["outcome"],
        vec![1.0, 3.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();

    pub static ref PENDING_TRANSFERS: IntGauge = register_int_gauge!(
        "wallet_pending_transfers",
        "Transfers currently awaiting settlement"
    ).unwrap();

    // Read-side metrics
    pub static ref BALANCE_FETCH_FAILURES: CounterVec = register_counter_vec!(
        "wallet_balance_fetch_failures_total",
        "Balance fetches that failed, by asset",
        &["asset"]
    ).unwrap();

    pub static ref FEE_ESTIMATES: CounterVec = register_counter_vec!(
        "wallet_fee_estimates_total",
        "Fee estimation passes by result",
        &["result"]
    ).unwrap();

    pub static ref BACKEND_LOG_FAILURES: IntCounter = register_int_counter!(
        "wallet_backend_log_failures_total",
        "Confirmed transfers the backend failed to record"
    ).unwrap();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_transfer_submitted(asset: &str) {
    TRANSFERS_SUBMITTED.with_label_values(&[asset]).inc();
}

pub fn record_transfer_rejected(reason: &str) {
    TRANSFERS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_transfer_settled(outcome: &str, latency_secs: f64) {
    TRANSFERS_SETTLED.with_label_values(&[outcome]).inc();
    SETTLEMENT_LATENCY
        .with_label_values(&[outcome])
        .observe(latency_secs);
}

pub fn record_pending_count(count: usize) {
    PENDING_TRANSFERS.set(count as i64);
}

pub fn record_balance_failure(asset: &str) {
    BALANCE_FETCH_FAILURES.with_label_values(&[asset]).inc();
}

pub fn record_fee_estimate(result: &str) {
    FEE_ESTIMATES.with_label_values(&[result]).inc();
}

pub fn record_backend_log_failure() {
    BACKEND_LOG_FAILURES.inc();
}
