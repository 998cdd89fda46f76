//! Cancellable, progress-reporting remote jobs over one persistent connection.
//!
//! jobwire lets a client start long-running operations on a remote service
//! through a single JSON channel, watch their progress, cancel them, and
//! report their lifecycle to the user without duplicate work or noisy
//! notices.
//!
//! # Overview
//!
//! A [`Connection`] multiplexes any number of [`Job`]s by numeric id. Each
//! job settles exactly once, with a result or a [`JobFailure`], after zero
//! or more progress payloads.
//!
//! A [`Dispatcher`] sits on top and decides what callers and users see:
//! request locks suppress duplicate concurrent calls, every transition
//! becomes a [`TaskRecord`], and "started" notices are delayed so quick
//! operations stay quiet.
//!
//! A [`Poller`] waits for externally observed conditions with a bounded
//! retry loop.
//!
//! # Module Organization
//!
//! - [`connection`] - Connection lifecycle and request routing
//! - [`job`] - Job handles and completion
//! - [`dispatcher`] - Request locks, task records and notification policy
//! - [`poller`] - Bounded convergence loop
//! - [`shared`] - Wire frames and transports
//! - [`error`] - Local errors and remote failure payloads
//! - [`config`] - TOML configuration with environment overrides
//!
//! # Example
//!
//! ```no_run
//! use jobwire::{ClientConfig, Connection, DispatchContext, DispatchRequest, Dispatcher};
//! use jobwire::NoopConnectionObserver;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> jobwire::Result<()> {
//! let config = ClientConfig::from_env()?;
//! let connection = Connection::open_with_config(&config.connection, Arc::new(NoopConnectionObserver));
//! let dispatcher = Dispatcher::new(
//!     DispatchContext::new(connection).with_config(config.dispatcher.clone()),
//! );
//!
//! let submission = dispatcher.call(
//!     DispatchRequest::new("Indexing workspace").require_done_notification(),
//!     "indexWorkspace",
//!     vec![json!("ws-1")],
//! );
//! if let Some(handle) = submission.into_handle() {
//!     handle.finished().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod job;
#[cfg(feature = "logging")]
pub mod logging;
pub mod poller;
pub mod shared;

// Re-exports for ergonomic access
pub use clock::{Clock, TokioClock};
pub use config::{
    ClientConfig, ConfigError, ConnectionConfig, DispatcherConfig, LoggingConfig, PollerConfig,
};
pub use connection::{Connection, ConnectionObserver, ConnectionState, NoopConnectionObserver};
pub use dispatcher::{
    DispatchContext, DispatchHandle, DispatchOptions, DispatchRequest, Dispatcher,
    FailureDetailsSink, InMemoryTaskBoard, Notice, NoticeAction, NoticeKind, NotificationSink,
    RequestLockGuard, RequestLocks, Submission, TaskRecord, TaskRecordSink, TaskStatus,
    TracingFailureDetails, TracingNotifier,
};
pub use error::{Error, ErrorCode, FailureData, FailureKind, JobFailure, Result};
pub use job::{Job, JobHandle, JobResult, ProgressObserver};
#[cfg(feature = "logging")]
pub use logging::init_logging;
pub use poller::{PollError, Poller};
pub use shared::{JobId, MemoryPeer, MemoryTransport, Transport};
