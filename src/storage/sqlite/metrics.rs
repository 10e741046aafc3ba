//! Metrics recording for queued storage operations.

use crate::observability::{
    METRIC_OPERATION_DURATION_MS, METRIC_OPERATIONS_TOTAL, METRIC_QUEUE_DEPTH,
};
use std::time::Instant;

/// Records operation metrics for storage operations.
///
/// This function records two metrics for each operation:
/// 1. `storage_operations_total` - Counter for operation count by status
/// 2. `storage_operation_duration_ms` - Histogram for operation latency
///
/// # Arguments
///
/// * `backend` - Backend name (the dialect name, e.g. "sqlite")
/// * `operation` - Request operation name (e.g. "insert_record")
/// * `start` - Operation start time from `Instant::now()`
/// * `status` - Operation status ("success", "error" or "cancelled")
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        METRIC_OPERATIONS_TOTAL,
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        METRIC_OPERATION_DURATION_MS,
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Records the number of requests waiting in a database queue.
#[allow(clippy::cast_precision_loss)]
pub fn record_queue_depth(depth: usize) {
    metrics::gauge!(METRIC_QUEUE_DEPTH).set(depth as f64);
}
