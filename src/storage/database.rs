//! Database: connection lifecycle, request queue and table registry.

use super::dialect::{Dialect, SqliteDialect, StatementKind, render};
use super::request::{Request, RequestHandle};
use super::selection::TableSelection;
use super::sqlite::{acquire_lock, record_queue_depth};
use super::table::Table;
use super::worker::{Command, WorkerShared, spawn_worker};
use crate::config::DatabaseConfig;
use crate::models::Record;
use crate::{Error, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, mpsc};
use tokio::sync::oneshot;
use tracing::instrument;

/// Connection state of a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection is open.
    Disconnected,
    /// A connection is being opened.
    Connecting,
    /// A connection is open.
    Connected,
}

impl ConnectionState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct RegisteredTable {
    table: Arc<dyn Any + Send + Sync>,
    create_statement: String,
}

struct Inner {
    config: DatabaseConfig,
    dialect: Arc<dyn Dialect>,
    shared: Arc<WorkerShared>,
    sender: Mutex<Option<mpsc::Sender<Command>>>,
    sequence: AtomicU64,
    tables: RwLock<HashMap<TypeId, RegisteredTable>>,
}

/// A database reached through one physical connection.
///
/// All work runs on a single worker thread in submission order; submitting
/// never blocks. Cloning is cheap and every clone shares the same
/// connection, queue and table registry. The worker stops once every clone
/// is dropped.
///
/// Register tables with [`Database::create_table`] before issuing
/// concurrent requests: registration is not synchronized with traffic.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Creates a database using the `SQLite` dialect. No connection is
    /// opened until [`Database::connect`].
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_dialect(config, Arc::new(SqliteDialect))
    }

    /// Creates a database using `dialect` for statement generation.
    #[must_use]
    pub fn with_dialect(config: DatabaseConfig, dialect: Arc<dyn Dialect>) -> Self {
        if config.pool_size > 1 {
            tracing::debug!(
                pool_size = config.pool_size,
                "pool_size is reserved, a single connection is used"
            );
        }
        let shared = Arc::new(WorkerShared {
            backend: dialect.name(),
            state: Mutex::new(ConnectionState::Disconnected),
            pending: AtomicUsize::new(0),
        });
        Self {
            inner: Arc::new(Inner {
                config,
                dialect,
                shared,
                sender: Mutex::new(None),
                sequence: AtomicU64::new(1),
                tables: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Configuration the database was built from.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Dialect used for statement generation.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.inner.dialect.as_ref()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of submitted requests that have not run yet.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.shared.pending.load(Ordering::Acquire)
    }

    /// Opens the connection and starts the queue worker.
    ///
    /// Does nothing if already connected. Registered tables are created
    /// on the new connection before any queued request runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the connection cannot be opened.
    /// Queued requests stay queued.
    #[instrument(skip(self), fields(operation = "connect", db_target = %self.inner.config.target))]
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let (reply, response) = oneshot::channel();
        self.send_control(Command::Open {
            target: self.inner.config.target.clone(),
            schema: self.schema_statements(),
            reply,
        })?;
        self.await_control(response).await?;
        tracing::info!("database connected");
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Requests submitted before this call run first. With `reconnect`, a
    /// fresh connection is opened before returning; registered tables are
    /// kept and requests submitted afterwards run on the new connection.
    /// Without it, later requests wait until the next [`Database::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if reconnecting fails.
    #[instrument(skip(self), fields(operation = "disconnect"))]
    pub async fn disconnect(&self, reconnect: bool) -> Result<()> {
        if !reconnect && self.inner.sender_is_idle() {
            return Ok(());
        }
        let (reply, response) = oneshot::channel();
        let command = if reconnect {
            Command::Reopen {
                target: self.inner.config.target.clone(),
                schema: self.schema_statements(),
                reply,
            }
        } else {
            Command::Close { reply }
        };
        self.send_control(command)?;
        self.await_control(response).await?;
        tracing::info!(reconnect, "database disconnected");
        Ok(())
    }

    /// Submits a request and returns its handle without blocking.
    ///
    /// Failures, including a worker that cannot be started, are reported
    /// through the handle.
    pub fn add_request<T: Send + 'static>(&self, request: Request<T>) -> RequestHandle<T> {
        let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let (queued, handle) = request.into_queued(sequence);

        let depth = self.inner.shared.pending.fetch_add(1, Ordering::AcqRel) + 1;
        record_queue_depth(depth);
        if let Err(command) = self.dispatch(Command::Execute(queued)) {
            self.inner.shared.pending.fetch_sub(1, Ordering::AcqRel);
            if let Command::Execute(queued) = command {
                queued.fail(Error::OperationFailed {
                    operation: "add_request".to_string(),
                    cause: "queue worker is not running".to_string(),
                });
            }
        }
        handle
    }

    /// Runs a raw SQL statement through the queue, returning the number of
    /// changed rows.
    pub fn execute(&self, operation: &'static str, sql: impl Into<String>) -> RequestHandle<usize> {
        let sql = sql.into();
        self.add_request(Request::new(operation, move |conn| {
            conn.execute(&sql, []).map_err(|e| Error::Statement {
                operation: operation.to_string(),
                statement: sql.clone(),
                cause: e.to_string(),
            })
        }))
    }

    /// Registers a table and creates it in storage if it does not exist.
    ///
    /// The configured table prefix is applied to the table name. Calling
    /// this again with the same definition is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaMismatch`] if a different definition is
    /// already registered for `R`, or [`Error::Statement`] if creation
    /// fails.
    #[instrument(skip_all, fields(operation = "create_table", table = %table.name()))]
    pub async fn create_table<R: Record>(&self, table: Table<R>) -> Result<TableSelection<R>> {
        let table = match &self.inner.config.table_prefix {
            Some(prefix) => table.prefixed(prefix)?,
            None => table,
        };
        let table = self.register(table)?;
        let create_statement = self.create_statement(&table);
        self.execute("create_table", create_statement).await?;
        tracing::debug!(table = table.name(), "table created");
        Ok(TableSelection::new(self.clone(), table))
    }

    /// Returns the registered table for `R`.
    #[must_use]
    pub fn table<R: Record>(&self) -> Option<Arc<Table<R>>> {
        let tables = self
            .inner
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables
            .get(&TypeId::of::<R>())
            .and_then(|entry| Arc::clone(&entry.table).downcast::<Table<R>>().ok())
    }

    /// Returns an operation surface for the registered table of `R`.
    #[must_use]
    pub fn selection<R: Record>(&self) -> Option<TableSelection<R>> {
        self.table::<R>()
            .map(|table| TableSelection::new(self.clone(), table))
    }

    fn register<R: Record>(&self, table: Table<R>) -> Result<Arc<Table<R>>> {
        if let Some(existing) = self.table::<R>() {
            if existing.same_definition(&table) {
                return Ok(existing);
            }
            return Err(Error::SchemaMismatch {
                table: table.name().to_string(),
                detail: format!(
                    "record type is already registered as table '{}' with a different definition",
                    existing.name()
                ),
            });
        }
        let create_statement = self.create_statement(&table);
        let table = Arc::new(table);
        let mut tables = self
            .inner
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables.insert(
            TypeId::of::<R>(),
            RegisteredTable {
                table: Arc::clone(&table) as Arc<dyn Any + Send + Sync>,
                create_statement,
            },
        );
        Ok(table)
    }

    fn create_statement<R: Record>(&self, table: &Table<R>) -> String {
        let dialect = self.dialect();
        let columns: Vec<String> = table
            .fields()
            .iter()
            .map(|field| {
                format!(
                    "{} {}",
                    dialect.quote_identifier(field.name()),
                    dialect.column_type(field.data_type(), field.max_size())
                )
            })
            .collect();
        let keys: Vec<String> = table
            .primary_fields()
            .map(|field| dialect.quote_identifier(field.name()))
            .collect();
        render(
            dialect.template(StatementKind::CreateTable),
            &[
                ("table", dialect.quote_identifier(table.name()).as_str()),
                ("columns", columns.join(", ").as_str()),
                ("keys", keys.join(", ").as_str()),
            ],
        )
    }

    fn schema_statements(&self) -> Vec<String> {
        let tables = self
            .inner
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables
            .values()
            .map(|entry| entry.create_statement.clone())
            .collect()
    }

    /// Sends a command to the worker, starting one on first use or when
    /// the previous worker has stopped. Gives the command back if no worker
    /// could take it.
    ///
    /// Sending happens under the sender lock, so commands reach the worker
    /// in the order they were dispatched.
    fn dispatch(&self, command: Command) -> std::result::Result<(), Command> {
        let mut slot = acquire_lock(&self.inner.sender);
        let command = match slot.as_ref() {
            Some(sender) => match sender.send(command) {
                Ok(()) => return Ok(()),
                Err(mpsc::SendError(command)) => {
                    tracing::warn!("queue worker stopped, starting a new one");
                    command
                },
            },
            None => command,
        };

        let (sender, receiver) = mpsc::channel();
        if let Err(e) = spawn_worker(Arc::clone(&self.inner.shared), receiver) {
            tracing::error!(error = %e, "failed to start queue worker");
            *slot = None;
            return Err(command);
        }
        let sent = sender.send(command).map_err(|mpsc::SendError(command)| command);
        *slot = Some(sender);
        sent
    }

    fn send_control(&self, command: Command) -> Result<()> {
        self.dispatch(command).map_err(|_| self.worker_gone())
    }

    async fn await_control(&self, response: oneshot::Receiver<Result<()>>) -> Result<()> {
        response.await.map_err(|_| self.worker_gone())?
    }

    fn worker_gone(&self) -> Error {
        Error::Connection {
            target: self.inner.config.target.clone(),
            cause: "queue worker stopped".to_string(),
        }
    }
}

impl Inner {
    /// True when no worker was ever started, so there is nothing to close.
    fn sender_is_idle(&self) -> bool {
        acquire_lock(&self.sender).is_none()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("target", &self.inner.config.target)
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}
