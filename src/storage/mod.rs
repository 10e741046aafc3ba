//! Storage layer.
//!
//! Records are mapped to relational tables and manipulated through
//! [`TableSelection`]s. Every operation is a queued request that a
//! [`Database`]'s single worker runs against its one connection, in
//! submission order:
//!
//! - [`database`]: connection lifecycle, request queue and table registry
//! - [`table`]: table schemas bound to record types
//! - [`selection`]: record operations on one table
//! - [`query`]: conjunctive equality matching and `WHERE` compilation
//! - [`dialect`]: statement templates and column types per backend
//! - [`request`]: queued units of work and their handles
//! - [`sqlite`]: shared `SQLite` connection and metrics helpers

// Allow significant_drop_tightening - lock guards are held for a few
// statements at most.
#![allow(clippy::significant_drop_tightening)]

pub mod database;
pub mod dialect;
pub mod query;
pub mod request;
pub mod selection;
pub mod sqlite;
pub mod table;
mod worker;

pub use database::{ConnectionState, Database};
pub use dialect::{Dialect, SqliteDialect, StatementKind, render};
pub use query::{CompiledWhere, Query};
pub use request::{Request, RequestHandle};
pub use selection::{TableSelection, UpsertOutcome};
pub use table::Table;
pub(crate) use table::is_identifier;
pub use worker::WORKER_THREAD_NAME;
