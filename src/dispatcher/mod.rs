//! Dispatcher: the policy layer between callers and the connection.
//!
//! A [`Dispatcher`] starts jobs on behalf of callers and decides what the
//! outside world sees of them:
//!
//! - duplicate calls under an active [request lock](RequestLocks) are
//!   suppressed before any frame is sent,
//! - every lifecycle transition becomes a [`TaskRecord`] update,
//! - a "started" notice is held back for a short delay and dropped if the
//!   job settles first, so quick operations do not flash notices at the user.
//!
//! Failures are classified by [`JobFailure::kind`] and routed to the
//! notification or failure-details sink accordingly.
//!
//! # Examples
//!
//! ```no_run
//! use jobwire::{Connection, DispatchContext, DispatchRequest, Dispatcher, NoopConnectionObserver};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let connection = Connection::open("ws://localhost:8080/ws", Arc::new(NoopConnectionObserver));
//! let dispatcher = Dispatcher::new(DispatchContext::new(connection));
//!
//! let request = DispatchRequest::new("Loading data sources")
//!     .lock(jobwire::RequestLocks::key_for("loadDataSources", &[json!("local")]))
//!     .on_success(|sources| println!("{sources}"));
//! if let Some(handle) = dispatcher.call(request, "loadDataSources", vec![json!("local")]).into_handle() {
//!     handle.finished().await;
//! }
//! # }
//! ```

mod locks;
mod record;
mod sink;

pub use locks::{RequestLockGuard, RequestLocks};
pub use record::{TaskRecord, TaskStatus};
pub use sink::{
    FailureDetailsSink, InMemoryTaskBoard, Notice, NoticeAction, NoticeKind, NotificationSink,
    TaskRecordSink, TracingFailureDetails, TracingNotifier,
};

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::{Clock, TokioClock};
use crate::config::DispatcherConfig;
use crate::connection::Connection;
use crate::error::{FailureKind, JobFailure};
use crate::job::{Job, JobHandle, ProgressObserver};
use crate::shared::protocol::JobId;

type SuccessCallback = Box<dyn FnOnce(Value) + Send>;
type FailureCallback = Box<dyn FnOnce(JobFailure) + Send>;

/// Everything a dispatcher works with.
pub struct DispatchContext {
    pub connection: Connection,
    pub locks: RequestLocks,
    pub tasks: Arc<dyn TaskRecordSink>,
    pub notifier: Arc<dyn NotificationSink>,
    pub details: Arc<dyn FailureDetailsSink>,
    pub clock: Arc<dyn Clock>,
    pub config: DispatcherConfig,
}

impl DispatchContext {
    /// Context with an in-memory task board, log-backed sinks and the
    /// tokio clock.
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            locks: RequestLocks::new(),
            tasks: Arc::new(InMemoryTaskBoard::new()),
            notifier: Arc::new(TracingNotifier),
            details: Arc::new(TracingFailureDetails),
            clock: Arc::new(TokioClock),
            config: DispatcherConfig::default(),
        }
    }

    /// Share a lock table with other dispatchers.
    pub fn with_locks(mut self, locks: RequestLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_task_sink(mut self, tasks: Arc<dyn TaskRecordSink>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_failure_details(mut self, details: Arc<dyn FailureDetailsSink>) -> Self {
        self.details = details;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("connection", &self.connection)
            .field("locks", &self.locks)
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Per-call notification options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Emit the "finished" notice even if the "started" notice never fired.
    pub require_done_notification: bool,
    /// Suppress every notice. Task records and the invalid-parameters
    /// detail view are unaffected.
    pub disable_notifications: bool,
    /// Override the configured notice delay for this call.
    pub notice_delay: Option<Duration>,
}

/// What to dispatch and how to report it.
pub struct DispatchRequest {
    title: String,
    lock: Option<String>,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
    options: DispatchOptions,
}

impl DispatchRequest {
    /// A request titled `title`, used in notices and task records.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lock: None,
            on_success: None,
            on_failure: None,
            options: DispatchOptions::default(),
        }
    }

    /// Tag the call with a request lock key.
    pub fn lock(mut self, key: impl Into<String>) -> Self {
        self.lock = Some(key.into());
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(JobFailure) + Send + 'static,
    {
        self.on_failure = Some(Box::new(callback));
        self
    }

    pub fn require_done_notification(mut self) -> Self {
        self.options.require_done_notification = true;
        self
    }

    pub fn disable_notifications(mut self) -> Self {
        self.options.disable_notifications = true;
        self
    }

    pub fn notice_delay(mut self, delay: Duration) -> Self {
        self.options.notice_delay = Some(delay);
        self
    }

    pub fn options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn lock_key(&self) -> Option<&str> {
        self.lock.as_deref()
    }
}

impl fmt::Debug for DispatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("title", &self.title)
            .field("lock", &self.lock)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Result of [`Dispatcher::dispatch`].
#[derive(Debug)]
#[must_use = "a submitted dispatch should be awaited or explicitly detached"]
pub enum Submission {
    /// The lock key was active. Nothing was sent and no job exists.
    Suppressed,
    /// The job was started.
    Submitted(DispatchHandle),
}

impl Submission {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed)
    }

    pub fn handle(&self) -> Option<&DispatchHandle> {
        match self {
            Self::Suppressed => None,
            Self::Submitted(handle) => Some(handle),
        }
    }

    pub fn into_handle(self) -> Option<DispatchHandle> {
        match self {
            Self::Suppressed => None,
            Self::Submitted(handle) => Some(handle),
        }
    }
}

/// Handle to a dispatched job.
#[derive(Debug)]
pub struct DispatchHandle {
    job: JobHandle,
    tracker: JoinHandle<()>,
}

impl DispatchHandle {
    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    /// Request cancellation. The job settles as `Cancelled` once the remote
    /// service acknowledges.
    pub fn cancel(&self) {
        self.job.cancel();
    }

    /// Wait until the job settled and its callbacks ran.
    pub async fn finished(self) {
        if let Err(e) = self.tracker.await {
            if e.is_panic() {
                tracing::error!(job_id = self.job.id(), "Dispatch callback panicked");
            }
        }
    }
}

/// Starts jobs and reports their lifecycle.
///
/// Cloning is cheap; clones share the same context.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    context: Arc<DispatchContext>,
}

impl Dispatcher {
    pub fn new(context: DispatchContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &DispatchContext {
        &self.context
    }

    pub fn locks(&self) -> &RequestLocks {
        &self.context.locks
    }

    /// Call `method` on the context's connection.
    pub fn call(
        &self,
        request: DispatchRequest,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> Submission {
        let connection = self.context.connection.clone();
        let method = method.into();
        self.dispatch(request, move |observer| {
            connection.call_with_progress(method, params, observer)
        })
    }

    /// Start the job produced by `operation`.
    ///
    /// `operation` receives the progress observer it must install on the
    /// job. It is not invoked at all when the request's lock key is already
    /// active.
    pub fn dispatch<F>(&self, request: DispatchRequest, operation: F) -> Submission
    where
        F: FnOnce(ProgressObserver) -> Job,
    {
        let DispatchRequest {
            title,
            lock,
            on_success,
            on_failure,
            options,
        } = request;

        let guard = match &lock {
            Some(key) => match self.context.locks.try_acquire(key) {
                Some(guard) => Some(guard),
                None => {
                    tracing::debug!(lock = %key, title = %title, "Dispatch suppressed by active lock");
                    return Submission::Suppressed;
                },
            },
            None => None,
        };

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let observer: ProgressObserver = Arc::new(move |progress| {
            let _ = progress_tx.send(progress);
        });
        let job = operation(observer);
        let handle = job.handle();

        let record = TaskRecord::submitted(job.id(), title.clone(), job.method(), lock);
        tracing::debug!(job_id = job.id(), method = job.method(), title = %title, "Dispatched");
        self.context.tasks.set_task_record(job.id(), record.clone());

        let delay = options
            .notice_delay
            .unwrap_or_else(|| self.context.config.notice_delay());
        let tracking = Tracking {
            context: self.context.clone(),
            record,
            title,
            guard,
            on_success,
            on_failure,
            policy: NoticePolicy::new(options),
            delay,
        };
        let tracker = tokio::spawn(tracking.run(job, progress_rx));

        Submission::Submitted(DispatchHandle {
            job: handle,
            tracker,
        })
    }
}

/// When notices may fire for one call.
#[derive(Debug)]
struct NoticePolicy {
    options: DispatchOptions,
    started_fired: bool,
}

impl NoticePolicy {
    fn new(options: DispatchOptions) -> Self {
        Self {
            options,
            started_fired: false,
        }
    }

    fn enabled(&self) -> bool {
        !self.options.disable_notifications
    }

    fn wants_finished(&self) -> bool {
        self.enabled() && (self.started_fired || self.options.require_done_notification)
    }
}

struct Tracking {
    context: Arc<DispatchContext>,
    record: TaskRecord,
    title: String,
    guard: Option<RequestLockGuard>,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
    policy: NoticePolicy,
    delay: Duration,
}

impl Tracking {
    async fn run(mut self, job: Job, mut progress: mpsc::UnboundedReceiver<Value>) {
        let clock = self.context.clock.clone();
        let mut timer = clock.sleep(self.delay);
        let mut timer_done = false;
        let outcome = job.outcome();
        tokio::pin!(outcome);

        // Progress is sent before the terminal frame, so polling it first
        // keeps record updates in receipt order.
        let outcome = loop {
            tokio::select! {
                biased;
                Some(payload) = progress.recv() => self.progress(payload),
                outcome = &mut outcome => break outcome,
                () = &mut timer, if !timer_done => {
                    timer_done = true;
                    self.started();
                },
            }
        };
        while let Ok(payload) = progress.try_recv() {
            self.progress(payload);
        }

        if let Some(guard) = self.guard.take() {
            tracing::trace!(lock = guard.key(), "Releasing request lock");
            drop(guard);
        }

        match outcome {
            Ok(result) => self.succeeded(result),
            Err(failure) => self.failed(failure),
        }
    }

    fn publish(&self) {
        self.context
            .tasks
            .set_task_record(self.record.job_id, self.record.clone());
    }

    fn notify(&self, notice: Notice) {
        self.context.notifier.notify(notice);
    }

    fn progress(&mut self, payload: Value) {
        if self.record.record_progress(payload) {
            self.publish();
        }
    }

    fn started(&mut self) {
        self.policy.started_fired = true;
        if self.policy.enabled() {
            self.notify(Notice::info(format!("{} started", self.title)));
        }
    }

    fn succeeded(mut self, result: Value) {
        tracing::debug!(job_id = self.record.job_id, "Dispatched job done");
        if self.record.mark_done() {
            self.publish();
        }
        if self.policy.wants_finished() {
            self.notify(Notice::success(format!("{} finished", self.title)));
        }
        if let Some(on_success) = self.on_success.take() {
            on_success(result);
        }
    }

    fn failed(mut self, failure: JobFailure) {
        let kind = failure.kind();
        tracing::debug!(
            job_id = self.record.job_id,
            code = %failure.code,
            kind = ?kind,
            "Dispatched job failed"
        );

        let enabled = self.policy.enabled();
        match kind {
            FailureKind::Cancelled => {
                if enabled {
                    self.notify(Notice::info(format!("{} cancelled", self.title)));
                }
            },
            FailureKind::InvalidParams => {
                self.context.details.show_failure_details(&self.title, &failure);
            },
            FailureKind::ConnectionLost => {},
            FailureKind::Remote | FailureKind::Developer => {
                if enabled {
                    let mut notice =
                        Notice::error(format!("{} failed: {}", self.title, failure.message))
                            .with_action(NoticeAction::ShowDetails);
                    if kind == FailureKind::Developer {
                        notice = notice.with_action(NoticeAction::CopyReport);
                    }
                    self.notify(notice.with_failure(failure.clone()));
                }
            },
        }

        if self.record.mark_failed(failure.clone()) {
            self.publish();
        }
        if let Some(on_failure) = self.on_failure.take() {
            on_failure(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NoopConnectionObserver;
    use crate::error::ErrorCode;
    use crate::shared::memory::{MemoryPeer, MemoryTransport};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Notices(Mutex<Vec<Notice>>);

    impl NotificationSink for Notices {
        fn notify(&self, notice: Notice) {
            self.0.lock().push(notice);
        }
    }

    #[derive(Default)]
    struct Details(Mutex<Vec<String>>);

    impl FailureDetailsSink for Details {
        fn show_failure_details(&self, title: &str, failure: &JobFailure) {
            self.0.lock().push(format!("{title}: {}", failure.message));
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        peer: MemoryPeer,
        board: InMemoryTaskBoard,
        notices: Arc<Notices>,
        details: Arc<Details>,
    }

    fn harness() -> Harness {
        let (transport, peer) = MemoryTransport::pair();
        let connection = Connection::with_transport(transport, Arc::new(NoopConnectionObserver));
        let board = InMemoryTaskBoard::new();
        let notices = Arc::new(Notices::default());
        let details = Arc::new(Details::default());
        let context = DispatchContext::new(connection)
            .with_task_sink(Arc::new(board.clone()))
            .with_notifier(notices.clone())
            .with_failure_details(details.clone());
        Harness {
            dispatcher: Dispatcher::new(context),
            peer,
            board,
            notices,
            details,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_job_gets_started_and_finished_notices() {
        let mut h = harness();
        let handle = h
            .dispatcher
            .call(DispatchRequest::new("Export"), "export", vec![])
            .into_handle()
            .unwrap();
        let id = h.peer.next_frame().await.unwrap()["id"].as_u64().unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        h.peer.result(id, json!(null)).unwrap();
        handle.finished().await;

        let texts: Vec<String> = h.notices.0.lock().iter().map(|n| n.text.clone()).collect();
        assert_eq!(texts, vec!["Export started", "Export finished"]);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_params_reach_details_even_when_disabled() {
        let mut h = harness();
        let handle = h
            .dispatcher
            .call(
                DispatchRequest::new("Open").disable_notifications(),
                "open",
                vec![json!("/nope")],
            )
            .into_handle()
            .unwrap();
        let id = h.peer.next_frame().await.unwrap()["id"].as_u64().unwrap();
        h.peer
            .error(id, ErrorCode::INVALID_PARAMS.as_i32(), "no such path")
            .unwrap();
        handle.finished().await;

        assert_eq!(*h.details.0.lock(), vec!["Open: no such path".to_string()]);
        assert!(h.notices.0.lock().is_empty());
        assert_eq!(h.board.get(id).unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn developer_error_offers_copy_report() {
        let mut h = harness();
        let handle = h
            .dispatcher
            .call(DispatchRequest::new("Render"), "render", vec![])
            .into_handle()
            .unwrap();
        let id = h.peer.next_frame().await.unwrap()["id"].as_u64().unwrap();
        h.peer
            .send(json!({
                "id": id,
                "error": {
                    "code": -32603,
                    "message": "boom",
                    "data": { "traceback": "Traceback ..." }
                }
            }))
            .unwrap();
        handle.finished().await;

        let notices = h.notices.0.lock();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Error);
        assert_eq!(notices[0].text, "Render failed: boom");
        assert_eq!(
            notices[0].actions,
            vec![NoticeAction::ShowDetails, NoticeAction::CopyReport]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_records_failure_without_notice() {
        let mut h = harness();
        let handle = h
            .dispatcher
            .call(DispatchRequest::new("Sync").require_done_notification(), "sync", vec![])
            .into_handle()
            .unwrap();
        let id = h.peer.next_frame().await.unwrap()["id"].as_u64().unwrap();
        h.peer.close();
        handle.finished().await;

        let record = h.board.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.failure.unwrap().code, ErrorCode::CONNECTION_CLOSED);
        assert!(h.notices.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_is_released_before_success_callback() {
        let mut h = harness();
        let locks = h.dispatcher.locks().clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let request = DispatchRequest::new("Refresh")
            .lock("refresh()")
            .on_success(move |_| {
                let _ = tx.send(locks.is_active("refresh()"));
            });
        let handle = h
            .dispatcher
            .call(request, "refresh", vec![])
            .into_handle()
            .unwrap();
        let id = h.peer.next_frame().await.unwrap()["id"].as_u64().unwrap();
        h.peer.result(id, json!(true)).unwrap();
        handle.finished().await;

        assert!(!rx.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_failure_still_releases_the_lock() {
        let mut h = harness();
        let locks = h.dispatcher.locks().clone();
        let handle = h
            .dispatcher
            .call(DispatchRequest::new("Render").lock("render()"), "render", vec![])
            .into_handle()
            .unwrap();
        let id = h.peer.next_frame().await.unwrap()["id"].as_u64().unwrap();
        assert!(locks.is_active("render()"));

        h.peer.send(json!({ "id": id, "error": { "code": -32800 } })).unwrap();
        handle.finished().await;

        assert!(!locks.is_active("render()"));
        assert_eq!(h.board.get(id).unwrap().status, TaskStatus::Cancelled);
    }
}
