//! Job handles.
//!
//! A [`Job`] is the caller's side of one outstanding request on a
//! [`Connection`](crate::Connection). It settles exactly once, with either a
//! result payload or a [`JobFailure`], and may receive any number of
//! progress payloads before that.
//!
//! ```text
//! Submitted -> InProgress (0..n) -> Done | Failed | Cancelled
//! ```
//!
//! `Cancelled` is not a separate outcome on the wire: it is a failure whose
//! code is [`ErrorCode::CANCELLED`](crate::ErrorCode::CANCELLED).

use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::JobFailure;
use crate::shared::protocol::JobId;

/// Outcome of a settled job: the result payload XOR the failure payload.
pub type JobResult = std::result::Result<Value, JobFailure>;

/// Callback receiving progress payloads, in receipt order.
pub type ProgressObserver = Arc<dyn Fn(Value) + Send + Sync>;

/// Operations a job needs from the connection that created it.
pub(crate) trait JobControl: Send + Sync {
    /// Send a cancellation frame if the job is still registered.
    fn cancel(&self, id: JobId);

    /// Whether the job is still awaiting a terminal frame.
    fn is_pending(&self, id: JobId) -> bool;
}

/// Handle to one outstanding remote operation.
///
/// Consume it with [`outcome`](Job::outcome) or [`then`](Job::then). Take a
/// [`JobHandle`] first if the job must remain cancellable while something
/// else awaits it.
pub struct Job {
    id: JobId,
    method: String,
    params: Vec<Value>,
    completion: oneshot::Receiver<JobResult>,
    control: Weak<dyn JobControl>,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        method: String,
        params: Vec<Value>,
        completion: oneshot::Receiver<JobResult>,
        control: Weak<dyn JobControl>,
    ) -> Self {
        Self {
            id,
            method,
            params,
            completion,
            control,
        }
    }

    /// Job identifier, stable for the job's lifetime.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Remote method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Parameters sent with the request.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// A cloneable handle that can cancel or inspect this job.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            id: self.id,
            control: self.control.clone(),
        }
    }

    /// Ask the remote service to cancel the job.
    ///
    /// This does not settle the job. Settlement still arrives as a failure
    /// frame carrying the cancellation code. A no-op once the job settled or
    /// the connection was torn down.
    pub fn cancel(&self) {
        self.handle().cancel();
    }

    /// Whether the job is still awaiting its terminal frame.
    pub fn is_pending(&self) -> bool {
        self.handle().is_pending()
    }

    /// Wait for the job to settle.
    ///
    /// If the connection is dropped without settling the job, the outcome is
    /// a connection-closed failure.
    pub async fn outcome(self) -> JobResult {
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(_) => Err(JobFailure::connection_closed("connection dropped")),
        }
    }

    /// Register a completion pair.
    ///
    /// Exactly one of the two callbacks runs, exactly once, on a spawned
    /// task. Neither ever runs synchronously inside this call, even if the
    /// job has already settled.
    pub fn then<S, F>(self, on_success: S, on_failure: F) -> JoinHandle<()>
    where
        S: FnOnce(Value) + Send + 'static,
        F: FnOnce(JobFailure) + Send + 'static,
    {
        tokio::spawn(async move {
            match self.outcome().await {
                Ok(result) => on_success(result),
                Err(failure) => on_failure(failure),
            }
        })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Cloneable, non-consuming reference to a job.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    control: Weak<dyn JobControl>,
}

impl JobHandle {
    /// Job identifier.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// See [`Job::cancel`].
    pub fn cancel(&self) {
        if let Some(control) = self.control.upgrade() {
            control.cancel(self.id);
        }
    }

    /// See [`Job::is_pending`].
    pub fn is_pending(&self) -> bool {
        self.control
            .upgrade()
            .is_some_and(|control| control.is_pending(self.id))
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}
