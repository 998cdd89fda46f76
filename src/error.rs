//! Error types for jobwire.
//!
//! Two kinds of failure live here. [`Error`] is the crate-level error for
//! things that go wrong locally (transport I/O, malformed frames, bad
//! configuration). [`JobFailure`] is the payload of a remote job that settled
//! unsuccessfully; it is data carried by a [`JobResult`](crate::JobResult),
//! never raised through `?` by the connection itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::ConfigError;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Local errors raised by the connection, transports and configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The channel is closed and cannot carry further frames.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be interpreted.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Create a transport error from anything displayable.
    pub fn transport(message: impl fmt::Display) -> Self {
        Self::Transport(message.to_string())
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame(message.into())
    }
}

/// Numeric error code carried by a failure frame.
///
/// The remote service reserves two codes with special meaning for callers:
/// [`ErrorCode::CANCELLED`] and [`ErrorCode::INVALID_PARAMS`]. Every other
/// code is treated as a generic remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// The operation was cancelled at the caller's request.
    pub const CANCELLED: Self = Self(-32800);
    /// The parameters supplied with the request were rejected.
    pub const INVALID_PARAMS: Self = Self(-32602);
    /// Generic server-side failure.
    pub const INTERNAL_ERROR: Self = Self(-32603);
    /// Produced locally when a pending job is failed because its connection
    /// went away. Never sent by the remote service.
    pub const CONNECTION_CLOSED: Self = Self(-32000);

    /// The raw integer value.
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

/// Optional diagnostic data attached to a failure frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureData {
    /// Remote method that raised the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Exception class name on the remote side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Remote stack trace, present for developer errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Failure payload of a job that did not succeed.
///
/// # Examples
///
/// ```
/// use jobwire::{ErrorCode, FailureKind, JobFailure};
///
/// let failure = JobFailure::new(ErrorCode::CANCELLED, "cancelled by user");
/// assert!(failure.is_cancelled());
/// assert_eq!(failure.kind(), FailureKind::Cancelled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Error code reported by the remote service.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional diagnostic data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FailureData>,
}

impl JobFailure {
    /// Create a failure with no diagnostic data.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach diagnostic data.
    pub fn with_data(mut self, data: FailureData) -> Self {
        self.data = Some(data);
        self
    }

    /// Failure used to settle jobs orphaned by a dropped or torn-down
    /// connection.
    pub fn connection_closed(reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::CONNECTION_CLOSED,
            format!("connection closed: {reason}"),
        )
    }

    /// Whether the failure carries the reserved cancellation code.
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::CANCELLED
    }

    /// Whether the failure carries the reserved invalid-parameters code.
    pub fn is_invalid_params(&self) -> bool {
        self.code == ErrorCode::INVALID_PARAMS
    }

    /// Remote stack trace, if one was supplied.
    pub fn traceback(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.traceback.as_deref())
    }

    /// Classify the failure for user-facing treatment.
    ///
    /// Reserved codes win over the presence of a traceback, so an
    /// invalid-parameters failure with a stack trace is still routed to the
    /// detail view.
    pub fn kind(&self) -> FailureKind {
        match self.code {
            ErrorCode::CANCELLED => FailureKind::Cancelled,
            ErrorCode::INVALID_PARAMS => FailureKind::InvalidParams,
            ErrorCode::CONNECTION_CLOSED => FailureKind::ConnectionLost,
            _ if self.traceback().is_some() => FailureKind::Developer,
            _ => FailureKind::Remote,
        }
    }

    /// Plain-text report suitable for pasting into a bug tracker.
    pub fn report(&self) -> String {
        let mut report = format!("error {}: {}", self.code, self.message);
        if let Some(data) = &self.data {
            if let Some(method) = &data.method {
                report.push_str(&format!("\nmethod: {method}"));
            }
            if let Some(exception) = &data.exception {
                report.push_str(&format!("\nexception: {exception}"));
            }
            if let Some(traceback) = &data.traceback {
                report.push_str("\n\n");
                report.push_str(traceback);
            }
        }
        report
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for JobFailure {}

/// How a failed job is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The caller cancelled the job. Informational, not an error.
    Cancelled,
    /// The caller supplied bad parameters. Shown in a detail view.
    InvalidParams,
    /// The connection went away while the job was pending.
    ConnectionLost,
    /// A remote failure carrying a stack trace.
    Developer,
    /// Any other remote failure.
    Remote,
}
