//! Collaborators the dispatcher reports to.
//!
//! The dispatcher never renders anything itself. It hands task records,
//! notices and failure details to three sinks supplied through the
//! [`DispatchContext`](super::DispatchContext). Sinks are called from the
//! dispatcher's tracking task and must not block.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::JobFailure;
use crate::shared::protocol::JobId;

use super::record::{TaskRecord, TaskStatus};

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    Info,
    Success,
    Warning,
    Error,
}

/// Follow-up action offered alongside a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeAction {
    /// Open the failure detail view.
    ShowDetails,
    /// Copy a plain-text failure report.
    CopyReport,
}

/// A transient user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
    pub actions: Vec<NoticeAction>,
    /// Failure the actions refer to, if any.
    pub failure: Option<JobFailure>,
}

impl Notice {
    pub fn new(kind: NoticeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            actions: Vec::new(),
            failure: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(NoticeKind::Info, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(NoticeKind::Success, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NoticeKind::Error, text)
    }

    /// Offer `action` with this notice.
    pub fn with_action(mut self, action: NoticeAction) -> Self {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
        self
    }

    /// Attach the failure that `ShowDetails` and `CopyReport` act on.
    pub fn with_failure(mut self, failure: JobFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Receives transient notices.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Receives task record updates.
pub trait TaskRecordSink: Send + Sync {
    /// Insert or replace the record for `job_id`.
    fn set_task_record(&self, job_id: JobId, record: TaskRecord);

    /// Forget the record for `job_id`.
    fn clear_task_record(&self, job_id: JobId);
}

/// Presents a failure in a modal detail view.
pub trait FailureDetailsSink: Send + Sync {
    fn show_failure_details(&self, title: &str, failure: &JobFailure);
}

/// Task record sink that keeps records in memory.
///
/// Records stay until [`clear_task_record`](TaskRecordSink::clear_task_record)
/// or [`clear_finished`](InMemoryTaskBoard::clear_finished) removes them.
///
/// # Examples
///
/// ```
/// use jobwire::{InMemoryTaskBoard, TaskRecord, TaskRecordSink, TaskStatus};
///
/// let board = InMemoryTaskBoard::new();
/// board.set_task_record(1, TaskRecord::submitted(1, "Load", "load", None));
/// assert_eq!(board.get(1).unwrap().status, TaskStatus::Submitted);
/// assert_eq!(board.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskBoard {
    records: Arc<RwLock<HashMap<JobId, TaskRecord>>>,
    history: Arc<RwLock<Vec<(JobId, TaskStatus)>>>,
}

impl InMemoryTaskBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for `job_id`.
    pub fn get(&self, job_id: JobId) -> Option<TaskRecord> {
        self.records.read().get(&job_id).cloned()
    }

    /// All records, oldest job first.
    pub fn records(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.job_id);
        records
    }

    /// Records that have not reached a terminal status.
    pub fn active(&self) -> Vec<TaskRecord> {
        self.records()
            .into_iter()
            .filter(|r| !r.status.is_terminal())
            .collect()
    }

    /// Every status written for `job_id`, in order.
    pub fn history(&self, job_id: JobId) -> Vec<TaskStatus> {
        self.history
            .read()
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Remove terminal records and their history. Returns how many were
    /// removed.
    pub fn clear_finished(&self) -> usize {
        let mut records = self.records.write();
        let finished: Vec<JobId> = records
            .values()
            .filter(|r| r.status.is_terminal())
            .map(|r| r.job_id)
            .collect();
        records.retain(|_, r| !r.status.is_terminal());
        self.history
            .write()
            .retain(|(id, _)| !finished.contains(id));
        finished.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl TaskRecordSink for InMemoryTaskBoard {
    fn set_task_record(&self, job_id: JobId, record: TaskRecord) {
        self.history.write().push((job_id, record.status));
        self.records.write().insert(job_id, record);
    }

    fn clear_task_record(&self, job_id: JobId) {
        self.records.write().remove(&job_id);
        self.history.write().retain(|(id, _)| *id != job_id);
    }
}

/// Notification sink that logs notices.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.kind {
            NoticeKind::Error => tracing::error!(actions = ?notice.actions, "{}", notice.text),
            NoticeKind::Warning => tracing::warn!(actions = ?notice.actions, "{}", notice.text),
            NoticeKind::Info | NoticeKind::Success => {
                tracing::info!(kind = ?notice.kind, "{}", notice.text)
            },
        }
    }
}

/// Failure details sink that logs the full failure report.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureDetails;

impl FailureDetailsSink for TracingFailureDetails {
    fn show_failure_details(&self, title: &str, failure: &JobFailure) {
        tracing::warn!(title, code = %failure.code, report = %failure.report(), "Job failed");
    }
}
