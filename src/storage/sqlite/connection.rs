//! Connection handling for the `SQLite` backend.
//!
//! Opening and configuring the physical connection, plus a poison-tolerant
//! lock helper for the small bits of shared state around it.

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

/// Connection target that opens a private in-memory database.
pub const IN_MEMORY_TARGET: &str = ":memory:";

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// we recover the inner value and log a warning. This prevents cascading
/// failures when one operation panics.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("recordstore mutex was poisoned, recovering");
            metrics::counter!("recordstore_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Opens a connection to `target`, a file path or [`IN_MEMORY_TARGET`].
///
/// # Errors
///
/// Returns [`Error::Connection`] if the database cannot be opened or
/// configured.
pub fn open_connection(target: &str) -> Result<Connection> {
    let opened = if target == IN_MEMORY_TARGET {
        Connection::open_in_memory()
    } else {
        Connection::open(target)
    };
    let conn = opened.map_err(|e| Error::Connection {
        target: target.to_string(),
        cause: e.to_string(),
    })?;
    configure_connection(&conn).map_err(|e| Error::Connection {
        target: target.to_string(),
        cause: e.to_string(),
    })?;
    Ok(conn)
}

/// Configures a `SQLite` connection.
///
/// # Configuration Applied
///
/// - **WAL mode**: Write-Ahead Logging (in-memory databases keep `memory`)
/// - **NORMAL synchronous**: Balances durability with performance
/// - **`busy_timeout`**: 5 seconds, for files shared with other processes
///
/// The worker is the only user of the connection, so no in-process
/// contention exists; the pragmas matter for other processes opening the
/// same file.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the connection does not answer a
/// trivial query after configuration.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns a row, so pragma_update results are ignored.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");

    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map_err(|e| Error::OperationFailed {
            operation: "configure_connection".to_string(),
            cause: e.to_string(),
        })?;
    Ok(())
}
