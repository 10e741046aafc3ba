//! # Recordstore
//!
//! Backend-agnostic record storage over a serialized request queue.
//!
//! Typed entities ("records") are mapped to relational tables and
//! manipulated through [`TableSelection`]s. Every operation becomes a
//! request on its [`Database`]'s queue; one dedicated worker thread owns
//! the single connection and runs requests one at a time in submission
//! order. Callers get a [`RequestHandle`] back immediately and await it.
//!
//! ## Features
//!
//! - A [`DataType`] registry converting generic [`Value`]s to and from
//!   backend column values
//! - Table schemas with primary and foreign fields ([`RecordField`])
//! - Conjunctive equality [`Query`] matching with bound parameters only
//! - Atomic upsert through the queue's total ordering
//! - Connection lifecycle with reconnect that keeps the table registry
//! - Cancellation of requests that have not started
//!
//! ## Example
//!
//! ```rust,ignore
//! use recordstore::{DataType, Database, DatabaseConfig, Query, RecordField, Table};
//!
//! let db = Database::new(DatabaseConfig::in_memory());
//! db.connect().await?;
//! let settings = db
//!     .create_table(Table::<Setting>::new(
//!         "example",
//!         vec![
//!             RecordField::primary("identifier", DataType::String),
//!             RecordField::new("value", DataType::String),
//!         ],
//!     )?)
//!     .await?;
//!
//! settings.insert_record(&setting).await?;
//! let found = settings
//!     .get_first_record(Some(&Query::new().with_match("identifier", "a")))
//!     .await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod storage;
pub mod types;

pub use config::DatabaseConfig;
pub use models::{ForeignReference, PrimaryFieldMap, Record, RecordField, Section, Value};
pub use storage::{
    ConnectionState, Database, Query, Request, RequestHandle, Table, TableSelection,
    UpsertOutcome,
};
pub use types::DataType;

/// Error type for recordstore operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Connection` | The database cannot be opened, or closes with requests waiting |
/// | `Statement` | The backend rejects a generated statement |
/// | `SchemaMismatch` | A record, query or table definition disagrees with the registered schema |
/// | `UnsupportedType` | No `DataType` exists for a value kind or type name |
/// | `Cancelled` | An awaited request was cancelled or abandoned before it ran |
/// | `InvalidInput` | Malformed configuration, sections or values |
/// | `OperationFailed` | Infrastructure failures: config I/O, logging setup, worker spawn, panicking requests |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The connection could not be opened or was lost.
    ///
    /// Raised when:
    /// - The target path is unreachable or not a database
    /// - Connection pragmas cannot be applied
    /// - The database shuts down with requests waiting for a connection
    #[error("connection to '{target}' failed: {cause}")]
    Connection {
        /// The database target.
        target: String,
        /// The underlying cause.
        cause: String,
    },

    /// A generated statement failed.
    #[error("statement failed during '{operation}': {cause} (statement: {statement})")]
    Statement {
        /// The operation that issued the statement.
        operation: String,
        /// The statement text.
        statement: String,
        /// The underlying cause.
        cause: String,
    },

    /// A record or query does not fit the table schema.
    ///
    /// Raised when:
    /// - A record's field values miss a declared field or add an undeclared one
    /// - A query matches on a field the table does not declare
    /// - A primary key value is missing or null
    /// - A record type is registered twice with different definitions
    #[error("schema mismatch on table '{table}': {detail}")]
    SchemaMismatch {
        /// The table name.
        table: String,
        /// What did not match.
        detail: String,
    },

    /// No data type exists for a value.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// The request was cancelled before it ran.
    #[error("request '{operation}' was cancelled")]
    Cancelled {
        /// The cancelled operation.
        operation: String,
    },

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Configuration values are out of range, or a table prefix is not
    ///   identifier-safe
    /// - A section cannot be converted to or from JSON
    /// - A value cannot be converted to a column's data type
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Configuration files cannot be read or parsed
    /// - Logging is initialized twice
    /// - The queue worker thread cannot be spawned
    /// - A request body panics
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for recordstore operations.
pub type Result<T> = std::result::Result<T, Error>;
