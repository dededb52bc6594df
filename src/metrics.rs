// src/metrics.rs

#![cfg_attr(not(feature = "observability"), allow(unused_variables))]

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "aggregator_attempts_total",
        Unit::Count,
        "Total number of tryAggregate attempts, labeled by endpoint and outcome (success, failure)."
    );
    describe_gauge!(
        "aggregator_endpoint_cooldown",
        "Whether an endpoint is currently cooling down after exhausting its retries (1=cooling)."
    );
    describe_counter!(
        "aggregator_all_endpoints_failed_total",
        Unit::Count,
        "Total number of logical calls that failed because every endpoint was exhausted."
    );
    describe_counter!(
        "aggregator_restart_cycles_total",
        Unit::Count,
        "Total number of restart cycles entered after every endpoint failed."
    );
    describe_counter!(
        "aggregator_decode_anomalies_total",
        Unit::Count,
        "Sub-calls that reported success but returned undecodable data, labeled by decode shape."
    );
    describe_histogram!(
        "aggregator_batch_size",
        "Number of sub-calls per tryAggregate batch."
    );
    describe_histogram!(
        "aggregator_batch_latency_ms",
        "Latency of a single tryAggregate attempt in milliseconds, labeled by endpoint."
    );
}

pub fn increment_attempt(endpoint: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "aggregator_attempts_total",
        1,
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    );
}

/// 1 while the endpoint is skipped, back to 0 once it is eligible again.
pub fn set_endpoint_cooldown(endpoint: &str, cooling: bool) {
    gauge!(
        "aggregator_endpoint_cooldown",
        if cooling { 1.0 } else { 0.0 },
        "endpoint" => endpoint.to_string()
    );
}

pub fn increment_all_endpoints_failed() {
    counter!("aggregator_all_endpoints_failed_total", 1);
}

pub fn increment_restart_cycle() {
    counter!("aggregator_restart_cycles_total", 1);
}

pub fn increment_decode_anomaly(shape: &'static str) {
    counter!("aggregator_decode_anomalies_total", 1, "shape" => shape);
}

pub fn record_batch_size(size: usize) {
    histogram!("aggregator_batch_size", size as f64);
}

pub fn record_batch_latency(endpoint: &str, duration: std::time::Duration) {
    histogram!(
        "aggregator_batch_latency_ms",
        duration.as_secs_f64() * 1000.0,
        "endpoint" => endpoint.to_string()
    );
}
