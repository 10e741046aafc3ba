//! Queued requests and their completion handles.
//!
//! A [`Request`] is a unit of work run on the database worker with
//! exclusive access to the connection. Submitting it yields a
//! [`RequestHandle`], a future resolving to the work's result.
//!
//! A request can be cancelled until the worker starts it. Awaiting a
//! cancelled handle yields [`Error::Cancelled`]; use
//! [`RequestHandle::into_optional`] to observe that as `Ok(None)` instead.
//! Dropping a handle before its request starts abandons the request.

use crate::observability::METRIC_REQUESTS_CANCELLED_TOTAL;
use crate::{Error, Result};
use rusqlite::Connection;
use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::oneshot;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

type Job<T> = Box<dyn FnOnce(&mut Connection) -> Result<T> + Send>;

/// A unit of work for the database worker.
pub struct Request<T> {
    operation: &'static str,
    job: Job<T>,
}

impl<T: Send + 'static> Request<T> {
    /// Creates a request running `job` against the connection.
    ///
    /// `operation` names the request in logs, metrics and errors.
    pub fn new<F>(operation: &'static str, job: F) -> Self
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        Self {
            operation,
            job: Box::new(job),
        }
    }

    /// Operation name.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// Splits the request into its queued form and the caller's handle.
    pub(crate) fn into_queued(self, sequence: u64) -> (QueuedRequest, RequestHandle<T>) {
        let (responder, receiver) = oneshot::channel();
        let state = Arc::new(AtomicU8::new(PENDING));
        let queued = QueuedRequest {
            sequence,
            enqueued_at: Instant::now(),
            task: Box::new(PendingTask {
                operation: self.operation,
                job: self.job,
                responder,
                state: Arc::clone(&state),
            }),
        };
        let handle = RequestHandle {
            operation: self.operation,
            state,
            receiver,
        };
        (queued, handle)
    }
}

/// Type-erased request as held by the queue.
pub(crate) struct QueuedRequest {
    pub(crate) sequence: u64,
    pub(crate) enqueued_at: Instant,
    task: Box<dyn Task>,
}

impl QueuedRequest {
    pub(crate) fn operation(&self) -> &'static str {
        self.task.operation()
    }

    /// Marks the request running. Returns false if it was cancelled or its
    /// handle was dropped, in which case it must not run.
    pub(crate) fn try_start(&self) -> bool {
        self.task.try_start()
    }

    /// Runs the request and delivers its result. Returns whether it
    /// succeeded.
    pub(crate) fn run(self, connection: &mut Connection) -> bool {
        self.task.run(connection)
    }

    /// Resolves the handle with `error` without running.
    pub(crate) fn fail(self, error: Error) {
        self.task.fail(error);
    }
}

trait Task: Send {
    fn operation(&self) -> &'static str;
    fn try_start(&self) -> bool;
    fn run(self: Box<Self>, connection: &mut Connection) -> bool;
    fn fail(self: Box<Self>, error: Error);
}

struct PendingTask<T> {
    operation: &'static str,
    job: Job<T>,
    responder: oneshot::Sender<Result<T>>,
    state: Arc<AtomicU8>,
}

impl<T: Send + 'static> Task for PendingTask<T> {
    fn operation(&self) -> &'static str {
        self.operation
    }

    fn try_start(&self) -> bool {
        if self.responder.is_closed() {
            self.state.store(CANCELLED, Ordering::Release);
            return false;
        }
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn run(self: Box<Self>, connection: &mut Connection) -> bool {
        let Self {
            operation,
            job,
            responder,
            ..
        } = *self;
        // A panicking job must not take the worker thread down with it.
        let result = catch_unwind(AssertUnwindSafe(|| job(connection)))
            .unwrap_or_else(|panic_info| Err(panicked(operation, &*panic_info)));
        let succeeded = result.is_ok();
        // Receiver gone means the caller stopped waiting; the work still ran.
        let _ = responder.send(result);
        succeeded
    }

    fn fail(self: Box<Self>, error: Error) {
        let _ = self.responder.send(Err(error));
    }
}

fn panicked(operation: &'static str, panic_info: &(dyn Any + Send)) -> Error {
    let message = panic_info
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic_info.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(operation, panic_message = %message, "request panicked");
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("request panicked: {message}"),
    }
}

/// Future resolving to the result of a submitted [`Request`].
#[must_use = "dropping a handle before its request runs abandons the request"]
pub struct RequestHandle<T> {
    operation: &'static str,
    state: Arc<AtomicU8>,
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> RequestHandle<T> {
    /// Creates a handle that is already resolved with `error`.
    pub(crate) fn failed(operation: &'static str, error: Error) -> Self {
        let (responder, receiver) = oneshot::channel();
        let _ = responder.send(Err(error));
        Self {
            operation,
            state: Arc::new(AtomicU8::new(RUNNING)),
            receiver,
        }
    }

    /// Operation name of the request.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// Cancels the request if it has not started.
    ///
    /// Returns true if the request will not run. Cancelling a request that
    /// is running or finished has no effect and returns false.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            tracing::debug!(operation = self.operation, "request cancelled");
            metrics::counter!(METRIC_REQUESTS_CANCELLED_TOTAL, "operation" => self.operation)
                .increment(1);
        }
        cancelled
    }

    /// Whether the request was cancelled before running.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Awaits the result, mapping cancellation to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the request's error if it ran and failed.
    pub async fn into_optional(self) -> Result<Option<T>> {
        match self.await {
            Ok(value) => Ok(Some(value)),
            Err(Error::Cancelled { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<T> Future for RequestHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(Error::Cancelled {
                    operation: this.operation.to_string(),
                })
            })
        })
    }
}

impl<T> std::fmt::Debug for RequestHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("operation", &self.operation)
            .field("state", &self.state.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
