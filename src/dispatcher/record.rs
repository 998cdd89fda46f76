//! Task records: the caller-visible projection of a job's lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::JobFailure;
use crate::shared::protocol::JobId;

/// Lifecycle status of a dispatched job.
///
/// # State Machine
///
/// ```text
/// Submitted  -> InProgress, Done, Failed, Cancelled
/// InProgress -> InProgress, Done, Failed, Cancelled
/// Done | Failed | Cancelled -> (terminal, no transitions)
/// ```
///
/// `InProgress -> InProgress` is allowed: every progress frame is a
/// transition that replaces the progress payload.
///
/// # Examples
///
/// ```
/// use jobwire::TaskStatus;
///
/// assert!(TaskStatus::Submitted.can_transition_to(&TaskStatus::Done));
/// assert!(TaskStatus::InProgress.can_transition_to(&TaskStatus::InProgress));
/// assert!(!TaskStatus::Cancelled.can_transition_to(&TaskStatus::InProgress));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Request sent, nothing heard back yet.
    Submitted,
    /// At least one progress frame arrived.
    InProgress,
    /// Settled successfully (terminal).
    Done,
    /// Settled with a failure (terminal).
    Failed,
    /// Settled with the cancellation code (terminal).
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskStatus {
    /// `Done`, `Failed` and `Cancelled` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from this status to `next` is valid.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        match self {
            Self::Submitted => *next != Self::Submitted,
            Self::InProgress => *next != Self::Submitted,
            Self::Done | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// Externally observable state of one dispatched job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Job identifier.
    pub job_id: JobId,
    /// Human-readable title supplied by the caller.
    pub title: String,
    /// Remote method name.
    pub method: String,
    /// Current status.
    pub status: TaskStatus,
    /// Latest progress payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
    /// Failure payload once failed or cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    /// Request lock the job was dispatched under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<String>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A freshly submitted record.
    pub fn submitted(
        job_id: JobId,
        title: impl Into<String>,
        method: impl Into<String>,
        lock: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            title: title.into(),
            method: method.into(),
            status: TaskStatus::Submitted,
            progress: None,
            failure: None,
            lock,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a progress payload. Ignored once terminal.
    pub fn record_progress(&mut self, progress: Value) -> bool {
        if !self.transition(TaskStatus::InProgress) {
            return false;
        }
        self.progress = Some(progress);
        true
    }

    /// Mark the job done.
    pub fn mark_done(&mut self) -> bool {
        self.transition(TaskStatus::Done)
    }

    /// Mark the job failed, or cancelled if the failure carries the
    /// cancellation code.
    pub fn mark_failed(&mut self, failure: JobFailure) -> bool {
        let next = if failure.is_cancelled() {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Failed
        };
        if !self.transition(next) {
            return false;
        }
        self.failure = Some(failure);
        true
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(&next) {
            tracing::debug!(
                job_id = self.job_id,
                from = %self.status,
                to = %next,
                "Ignoring invalid task record transition"
            );
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }
}
