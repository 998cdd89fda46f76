//! The persistent connection and its request registry.
//!
//! A [`Connection`] owns one duplex channel to the remote service and
//! multiplexes any number of [`Job`]s over it by numeric id. It is driven by
//! two background tasks: a writer draining the outbound queue, so that
//! [`call`](Connection::call) and [`cancel`](Connection::cancel) never
//! block, and a reader routing inbound frames to the registry in receipt
//! order.
//!
//! # Failure model
//!
//! When the channel drops, fails, or is torn down with
//! [`close`](Connection::close), every job still pending is settled with a
//! [`ErrorCode::CONNECTION_CLOSED`](crate::ErrorCode::CONNECTION_CLOSED)
//! failure. The connection-level event itself is reported once through the
//! [`ConnectionObserver`], from the driver task after both loops have
//! stopped. There is no automatic reconnect; callers open a new connection.

mod registry;

use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, ErrorCode, JobFailure, Result};
use crate::job::{Job, JobControl, ProgressObserver};
use crate::shared::protocol::{CancelFrame, InboundFrame, JobId, OutboundFrame, RequestFrame};
use crate::shared::transport::Transport;

use registry::{PendingJob, RequestRegistry, Routed};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The channel is being established. Calls are queued.
    Connecting,
    /// Frames flow in both directions.
    Open,
    /// Closed by either side.
    Closed,
    /// The channel failed.
    Error,
}

impl ConnectionState {
    /// `Closed` and `Error` are final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Receives connection lifecycle events.
///
/// Each callback runs at most once per event, on the connection's driver
/// task, and never from inside a job's completion.
pub trait ConnectionObserver: Send + Sync {
    /// The channel is established.
    fn on_open(&self) {}

    /// The channel was closed by either side.
    fn on_close(&self, _reason: &str) {}

    /// The channel could not be established or failed.
    fn on_error(&self, _reason: &str) {}

    /// Something non-fatal went wrong, such as a malformed inbound frame.
    fn on_warning(&self, _reason: &str) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConnectionObserver;

impl ConnectionObserver for NoopConnectionObserver {}

/// A persistent connection to the remote service.
///
/// Cloning is cheap; all clones share the same channel and registry.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    state: Mutex<ConnectionState>,
    next_id: AtomicU64,
    registry: RequestRegistry,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    shutdown: watch::Sender<bool>,
    /// Terminal event waiting for the driver to report it.
    terminal_event: Mutex<Option<(ConnectionState, String)>>,
    observer: Arc<dyn ConnectionObserver>,
}

impl Connection {
    /// Open a WebSocket connection to `url` with default settings.
    ///
    /// Never fails synchronously: connection failures are reported through
    /// [`ConnectionObserver::on_error`]. Must be called within a tokio
    /// runtime.
    #[cfg(feature = "websocket")]
    pub fn open(url: impl Into<String>, observer: Arc<dyn ConnectionObserver>) -> Self {
        let config = crate::config::ConnectionConfig {
            url: url.into(),
            ..Default::default()
        };
        Self::open_with_config(&config, observer)
    }

    /// Open a WebSocket connection described by `config`.
    #[cfg(feature = "websocket")]
    pub fn open_with_config(
        config: &crate::config::ConnectionConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        let url = config.url.clone();
        let timeout = config.connect_timeout();
        Self::connect_with(
            async move {
                let url = url::Url::parse(&url)
                    .map_err(|e| Error::transport(format!("invalid URL {url:?}: {e}")))?;
                let transport =
                    crate::shared::websocket::WebSocketTransport::connect(&url, timeout).await?;
                Ok(Arc::new(transport) as Arc<dyn Transport>)
            },
            observer,
        )
    }

    /// Drive an already-established transport.
    pub fn with_transport<T>(transport: T, observer: Arc<dyn ConnectionObserver>) -> Self
    where
        T: Transport + 'static,
    {
        Self::connect_with(
            async move { Ok(Arc::new(transport) as Arc<dyn Transport>) },
            observer,
        )
    }

    /// Drive whatever transport `connector` produces.
    ///
    /// Calls made before the connector finishes are queued and sent once the
    /// channel opens.
    pub fn connect_with<C>(connector: C, observer: Arc<dyn ConnectionObserver>) -> Self
    where
        C: Future<Output = Result<Arc<dyn Transport>>> + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(ConnectionInner {
            state: Mutex::new(ConnectionState::Connecting),
            next_id: AtomicU64::new(1),
            registry: RequestRegistry::default(),
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            terminal_event: Mutex::new(None),
            observer,
        });

        tokio::spawn(drive(
            Arc::downgrade(&inner),
            connector,
            outbound_rx,
            shutdown_rx,
        ));

        Self { inner }
    }

    /// Start a remote operation.
    ///
    /// Allocates the next id, registers the job and queues the request frame.
    /// Returns immediately; resolution happens through the returned [`Job`].
    pub fn call(&self, method: impl Into<String>, params: Vec<Value>) -> Job {
        self.submit(method.into(), params, None)
    }

    /// Start a remote operation whose progress frames go to `observer`.
    pub fn call_with_progress(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        observer: ProgressObserver,
    ) -> Job {
        self.submit(method.into(), params, Some(observer))
    }

    /// Send a cancellation frame for `id`.
    ///
    /// A silent no-op unless the connection is open and the job is still
    /// pending.
    pub fn cancel(&self, id: JobId) {
        self.inner.cancel(id);
    }

    /// Tear the connection down.
    ///
    /// Pending jobs are failed with a connection-closed failure and later
    /// cancels become no-ops before this returns. The observer hears about
    /// the close afterwards, from the driver task. Idempotent.
    pub fn close(&self) {
        self.inner
            .terminate(ConnectionState::Closed, "closed by client");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Whether frames currently flow.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Number of jobs awaiting a terminal frame.
    pub fn pending_jobs(&self) -> usize {
        self.inner.registry.len()
    }

    fn submit(&self, method: String, params: Vec<Value>, progress: Option<ProgressObserver>) -> Job {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (completion_tx, completion_rx) = oneshot::channel();
        let control: Weak<dyn JobControl> = Arc::downgrade(&self.inner) as Weak<dyn JobControl>;
        let job = Job::new(id, method.clone(), params.clone(), completion_rx, control);

        {
            // Registration happens under the state lock so a concurrent
            // teardown either sees this job in the registry or we see the
            // terminal state.
            let state = self.inner.state.lock();
            let current = *state;
            if current.is_terminal() {
                tracing::debug!(job_id = id, method = %method, state = %current, "Call on closed connection");
                let _ = completion_tx.send(Err(JobFailure::connection_closed(format!(
                    "connection is {current}"
                ))));
                return job;
            }
            self.inner.registry.register(
                id,
                PendingJob {
                    method: method.clone(),
                    progress,
                    completion: completion_tx,
                },
            );
        }

        tracing::debug!(job_id = id, method = %method, "Job submitted");
        let frame = OutboundFrame::Request(RequestFrame { id, method, params });
        if self.inner.outbound.send(frame).is_err() {
            self.inner.registry.route(InboundFrame::Failure {
                id,
                error: JobFailure::connection_closed("connection driver stopped"),
            });
        }
        job
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending_jobs", &self.pending_jobs())
            .finish()
    }
}

impl ConnectionInner {
    /// Move from `Connecting` to `Open`. Returns `false` if the connection
    /// was torn down while connecting.
    fn mark_open(&self, transport_type: &str) -> bool {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connecting {
                return false;
            }
            *state = ConnectionState::Open;
        }
        tracing::info!(transport = transport_type, "Connection open");
        self.observer.on_open();
        true
    }

    /// Move to a terminal state, stop both loops and fail pending jobs.
    /// Only the first call has any effect.
    ///
    /// The observer is not called here. The event is parked for the driver,
    /// which reports it through [`report_terminal_event`](Self::report_terminal_event)
    /// once the loops have exited.
    fn terminate(&self, next: ConnectionState, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = next;
            *self.terminal_event.lock() = Some((next, reason.to_string()));
        }
        let _ = self.shutdown.send(true);

        let failed = self
            .registry
            .fail_all(&JobFailure::connection_closed(reason));

        if next == ConnectionState::Error {
            tracing::warn!(reason, failed_jobs = failed, "Connection failed");
        } else {
            tracing::info!(reason, failed_jobs = failed, "Connection closed");
        }
        true
    }

    /// Deliver the parked terminal event, if any. Runs on the driver task.
    fn report_terminal_event(&self) {
        let Some((state, reason)) = self.terminal_event.lock().take() else {
            return;
        };
        if state == ConnectionState::Error {
            self.observer.on_error(&reason);
        } else {
            self.observer.on_close(&reason);
        }
    }

    fn handle_text(&self, text: &str) {
        let frame = match InboundFrame::parse_lenient(text) {
            Ok((frame, None)) => frame,
            Ok((frame, Some(problem))) => {
                tracing::warn!(job_id = frame.id(), problem = %problem, "Repaired inbound frame");
                self.observer.on_warning(&problem);
                frame
            },
            Err(e) => {
                tracing::warn!(error = %e, "Dropping inbound frame");
                self.observer
                    .on_warning(&format!("dropped inbound frame: {e}"));
                return;
            },
        };

        let id = frame.id();
        let terminal = frame.is_terminal();
        match self.registry.route(frame) {
            Routed::Unknown => {
                tracing::debug!(job_id = id, terminal, "Dropping frame for unknown or settled job");
            },
            Routed::Progress => tracing::trace!(job_id = id, "Progress routed"),
            Routed::Settled => {},
        }
    }
}

impl JobControl for ConnectionInner {
    fn cancel(&self, id: JobId) {
        if *self.state.lock() != ConnectionState::Open {
            tracing::debug!(job_id = id, "Cancel ignored: connection not open");
            return;
        }
        if !self.registry.contains(id) {
            tracing::debug!(job_id = id, "Cancel ignored: job not pending");
            return;
        }
        tracing::debug!(job_id = id, "Requesting cancellation");
        let _ = self.outbound.send(OutboundFrame::Cancel(CancelFrame::new(id)));
    }

    fn is_pending(&self, id: JobId) -> bool {
        self.registry.contains(id)
    }
}

/// Resolves once shutdown is requested or the connection is dropped.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Run the connection to completion, then report how it ended.
async fn drive<C>(
    inner: Weak<ConnectionInner>,
    connector: C,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    shutdown: watch::Receiver<bool>,
) where
    C: Future<Output = Result<Arc<dyn Transport>>> + Send + 'static,
{
    run(inner.clone(), connector, outbound, shutdown).await;
    if let Some(inner) = inner.upgrade() {
        inner.report_terminal_event();
    }
}

async fn run<C>(
    inner: Weak<ConnectionInner>,
    connector: C,
    outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    mut shutdown: watch::Receiver<bool>,
) where
    C: Future<Output = Result<Arc<dyn Transport>>> + Send + 'static,
{
    let connected = tokio::select! {
        connected = connector => connected,
        () = shutdown_requested(&mut shutdown) => return,
    };

    let transport = match connected {
        Ok(transport) => transport,
        Err(e) => {
            if let Some(inner) = inner.upgrade() {
                inner.terminate(ConnectionState::Error, &e.to_string());
            }
            return;
        },
    };

    let opened = inner
        .upgrade()
        .is_some_and(|inner| inner.mark_open(transport.transport_type()));
    if !opened {
        let _ = transport.close().await;
        return;
    }

    let writer = tokio::spawn(write_loop(
        inner.clone(),
        transport.clone(),
        outbound,
        shutdown.clone(),
    ));
    read_loop(inner, transport.clone(), shutdown).await;
    let _ = writer.await;

    if let Err(e) = transport.close().await {
        tracing::debug!(error = %e, "Error closing transport");
    }
}

async fn read_loop(
    inner: Weak<ConnectionInner>,
    transport: Arc<dyn Transport>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            received = transport.receive() => received,
            () = shutdown_requested(&mut shutdown) => break,
        };
        let Some(strong) = inner.upgrade() else {
            break;
        };
        match received {
            Ok(Some(text)) => strong.handle_text(&text),
            Ok(None) => {
                strong.terminate(ConnectionState::Closed, "closed by remote service");
                break;
            },
            Err(e) => {
                strong.terminate(ConnectionState::Error, &e.to_string());
                break;
            },
        }
    }
}

async fn write_loop(
    inner: Weak<ConnectionInner>,
    transport: Arc<dyn Transport>,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            frame = outbound.recv() => frame,
            () = shutdown_requested(&mut shutdown) => break,
        };
        let Some(frame) = frame else {
            break;
        };

        let id = frame.id();
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(job_id = id, error = %e, "Failed to encode frame");
                if let (OutboundFrame::Request(_), Some(strong)) = (&frame, inner.upgrade()) {
                    strong.registry.route(InboundFrame::Failure {
                        id,
                        error: JobFailure::new(ErrorCode::INTERNAL_ERROR, e.to_string()),
                    });
                }
                continue;
            },
        };

        if let Err(e) = transport.send(text).await {
            if let Some(strong) = inner.upgrade() {
                strong.terminate(ConnectionState::Error, &format!("send failed: {e}"));
            }
            break;
        }
    }
}
