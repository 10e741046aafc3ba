//! Shared `SQLite` infrastructure.
//!
//! - [`connection`]: opening and configuring the physical connection
//! - [`metrics`]: operation and queue metrics

mod connection;
mod metrics;

pub use connection::{IN_MEMORY_TARGET, acquire_lock, configure_connection, open_connection};
pub use metrics::{record_operation_metrics, record_queue_depth};
