//! Metrics for the gate
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding application.

use metrics::{counter, histogram};

use crate::types::Operation;

/// Record a gated session being opened
pub fn record_session_opened() {
    counter!("rowgate_sessions_total").increment(1);
}

/// Record a table filter being applied to a builder
pub fn record_filter_applied(table: &str, operation: Operation) {
    counter!(
        "rowgate_filters_applied_total",
        "table" => table.to_string(),
        "operation" => operation.as_str()
    )
    .increment(1);
}

/// Record the outcome of a deferred check
pub fn record_check(table: &str, operation: Operation, passed: bool, latency_us: f64) {
    let outcome = if passed { "passed" } else { "failed" };
    counter!(
        "rowgate_checks_total",
        "table" => table.to_string(),
        "operation" => operation.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("rowgate_check_duration_us", "operation" => operation.as_str()).record(latency_us);
}

/// Record an operation refused because it cannot be inspected
pub fn record_unsupported(reason: &'static str) {
    counter!("rowgate_unsupported_total", "reason" => reason).increment(1);
}
