//! Dedicated queue worker.
//!
//! One worker thread per database owns the physical connection and drains
//! a FIFO command channel. Requests run one at a time, to completion, in
//! submission order. Requests that arrive while no connection is open are
//! held in a backlog and run, still in order, once one is opened.

use super::request::QueuedRequest;
use super::sqlite::{open_connection, record_operation_metrics, record_queue_depth};
use crate::{Error, Result};
use rusqlite::Connection;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Instant;
use tokio::sync::oneshot;

use super::database::ConnectionState;
use super::sqlite::acquire_lock;

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "recordstore-queue";

/// Commands accepted by the worker, processed strictly in order.
pub(crate) enum Command {
    /// Run a request.
    Execute(QueuedRequest),
    /// Open a connection unless one is open, then run `schema`.
    Open {
        target: String,
        schema: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the connection if one is open.
    Close { reply: oneshot::Sender<Result<()>> },
    /// Close the connection and open a fresh one, then run `schema`.
    Reopen {
        target: String,
        schema: Vec<String>,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// State shared between the database front end and its worker.
pub(crate) struct WorkerShared {
    pub(crate) backend: &'static str,
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) pending: AtomicUsize,
}

impl WorkerShared {
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut guard = acquire_lock(&self.state);
        if *guard != state {
            tracing::info!(from = %*guard, to = %state, "connection state changed");
            *guard = state;
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *acquire_lock(&self.state)
    }
}

/// Spawns the worker thread.
///
/// The thread exits once every sender is dropped and the remaining
/// commands are processed.
pub(crate) fn spawn_worker(
    shared: Arc<WorkerShared>,
    receiver: mpsc::Receiver<Command>,
) -> Result<()> {
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let mut worker = Worker {
                shared,
                connection: None,
                backlog: VecDeque::new(),
            };
            worker.run(&receiver);
        })
        .map_err(|e| Error::OperationFailed {
            operation: "spawn_queue_worker".to_string(),
            cause: e.to_string(),
        })?;
    Ok(())
}

struct Worker {
    shared: Arc<WorkerShared>,
    connection: Option<Connection>,
    backlog: VecDeque<QueuedRequest>,
}

impl Worker {
    fn run(&mut self, receiver: &mpsc::Receiver<Command>) {
        tracing::debug!("queue worker started");
        while let Ok(command) = receiver.recv() {
            match command {
                Command::Execute(request) => self.submit(request),
                Command::Open {
                    target,
                    schema,
                    reply,
                } => {
                    let result = if self.connection.is_some() {
                        Ok(())
                    } else {
                        self.open(&target, &schema)
                    };
                    let _ = reply.send(result);
                    self.drain_backlog();
                },
                Command::Close { reply } => {
                    self.close();
                    let _ = reply.send(Ok(()));
                },
                Command::Reopen {
                    target,
                    schema,
                    reply,
                } => {
                    self.close();
                    let result = self.open(&target, &schema);
                    let _ = reply.send(result);
                    self.drain_backlog();
                },
            }
        }

        if !self.backlog.is_empty() {
            tracing::warn!(
                abandoned = self.backlog.len(),
                "queue worker stopping with requests waiting for a connection"
            );
        }
        for request in self.backlog.drain(..) {
            let operation = request.operation();
            request.fail(Error::Connection {
                target: String::new(),
                cause: format!("database closed before '{operation}' could run"),
            });
        }
        self.shared.pending.store(0, Ordering::Release);
        self.close();
        tracing::debug!("queue worker stopped");
    }

    fn submit(&mut self, request: QueuedRequest) {
        match self.connection.as_mut() {
            Some(connection) if self.backlog.is_empty() => {
                execute(&self.shared, connection, request);
            },
            _ => {
                tracing::debug!(
                    operation = request.operation(),
                    sequence = request.sequence,
                    "no connection, request held in backlog"
                );
                self.backlog.push_back(request);
            },
        }
    }

    fn drain_backlog(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        while let Some(request) = self.backlog.pop_front() {
            execute(&self.shared, connection, request);
        }
    }

    fn open(&mut self, target: &str, schema: &[String]) -> Result<()> {
        self.shared.set_state(ConnectionState::Connecting);
        let opened = open_connection(target).and_then(|connection| {
            for statement in schema {
                connection
                    .execute_batch(statement)
                    .map_err(|e| Error::Statement {
                        operation: "create_table".to_string(),
                        statement: statement.clone(),
                        cause: e.to_string(),
                    })?;
            }
            Ok(connection)
        });
        match opened {
            Ok(connection) => {
                self.connection = Some(connection);
                self.shared.set_state(ConnectionState::Connected);
                Ok(())
            },
            Err(e) => {
                tracing::warn!(target_path = target, error = %e, "failed to open connection");
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            },
        }
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take()
            && let Err((_, e)) = connection.close()
        {
            tracing::warn!(error = %e, "connection did not close cleanly");
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Also runs when the thread unwinds: a stopped worker never leaves
        // the state reported as connected.
        self.close();
    }
}

fn execute(shared: &WorkerShared, connection: &mut Connection, request: QueuedRequest) {
    let depth = shared
        .pending
        .fetch_sub(1, Ordering::AcqRel)
        .saturating_sub(1);
    record_queue_depth(depth);

    let operation = request.operation();
    let sequence = request.sequence;
    if !request.try_start() {
        tracing::debug!(operation, sequence, "skipping cancelled request");
        record_operation_metrics(shared.backend, operation, request.enqueued_at, "cancelled");
        return;
    }

    let start = Instant::now();
    let waited_ms = start.duration_since(request.enqueued_at).as_secs_f64() * 1000.0;
    tracing::debug!(operation, sequence, waited_ms, "executing request");
    let succeeded = request.run(connection);
    let status = if succeeded { "success" } else { "error" };
    if !succeeded {
        tracing::warn!(operation, sequence, "request failed");
    }
    record_operation_metrics(shared.backend, operation, start, status);
}
