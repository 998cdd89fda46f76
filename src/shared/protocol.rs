//! Wire frames exchanged over the persistent channel.
//!
//! Every frame is a single JSON object keyed by a numeric job id:
//!
//! ```text
//! request   { "id": 7, "method": "loadDataSources", "params": ["local"] }
//! cancel    { "id": 7, "cancel": true }
//! progress  { "id": 7, "progress": { "done": 3, "total": 10 } }
//! result    { "id": 7, "result": [ ... ] }
//! failure   { "id": 7, "error": { "code": -32800, "message": "cancelled" } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ErrorCode, JobFailure, Result};

/// Identifier correlating a request with its progress and terminal frames.
pub type JobId = u64;

/// Outbound request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Job identifier.
    pub id: JobId,
    /// Remote method name.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

/// Outbound cancellation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelFrame {
    /// Job identifier.
    pub id: JobId,
    /// Always `true` on the wire.
    pub cancel: bool,
}

impl CancelFrame {
    /// Cancellation request for `id`.
    pub fn new(id: JobId) -> Self {
        Self { id, cancel: true }
    }
}

/// Any frame the client sends.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Start a job.
    Request(RequestFrame),
    /// Ask the service to cancel a job.
    Cancel(CancelFrame),
}

impl OutboundFrame {
    /// Job id the frame refers to.
    pub fn id(&self) -> JobId {
        match self {
            Self::Request(frame) => frame.id,
            Self::Cancel(frame) => frame.id,
        }
    }

    /// Encode as JSON text.
    pub fn to_text(&self) -> Result<String> {
        let text = match self {
            Self::Request(frame) => serde_json::to_string(frame)?,
            Self::Cancel(frame) => serde_json::to_string(frame)?,
        };
        Ok(text)
    }
}

/// Any frame the service sends.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Intermediate progress; does not settle the job.
    Progress {
        /// Job identifier.
        id: JobId,
        /// Opaque progress payload.
        progress: Value,
    },
    /// Successful completion.
    Result {
        /// Job identifier.
        id: JobId,
        /// Opaque result payload.
        result: Value,
    },
    /// Unsuccessful completion, including cancellation.
    Failure {
        /// Job identifier.
        id: JobId,
        /// Failure payload.
        error: JobFailure,
    },
}

impl InboundFrame {
    /// Job id the frame refers to.
    pub fn id(&self) -> JobId {
        match self {
            Self::Progress { id, .. } | Self::Result { id, .. } | Self::Failure { id, .. } => *id,
        }
    }

    /// Whether the frame settles its job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    /// Parse a JSON text frame and determine its kind.
    ///
    /// A frame carrying `error` is a failure even if it also carries
    /// `result`; a frame carrying neither but with `progress` is progress.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_lenient(text).map(|(frame, _)| frame)
    }

    /// Like [`parse`](Self::parse), but also reports a payload that had to
    /// be repaired.
    ///
    /// A frame with a valid id and an unreadable `error` payload still
    /// settles its job: it becomes a failure carrying the payload's code if
    /// one can be read, [`ErrorCode::INTERNAL_ERROR`] otherwise. The second
    /// element describes what was wrong with the payload.
    pub fn parse_lenient(text: &str) -> Result<(Self, Option<String>)> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| Error::invalid_frame(format!("invalid JSON: {e}")))?;

        let id = value
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::invalid_frame("missing or non-numeric id"))?;

        let Some(object) = value.as_object_mut() else {
            return Err(Error::invalid_frame("frame is not an object"));
        };

        if let Some(error) = object.remove("error") {
            return Ok(match JobFailure::deserialize(&error) {
                Ok(error) => (Self::Failure { id, error }, None),
                Err(e) => {
                    let code = error
                        .get("code")
                        .and_then(Value::as_i64)
                        .and_then(|code| i32::try_from(code).ok())
                        .map_or(ErrorCode::INTERNAL_ERROR, ErrorCode);
                    let problem = format!("invalid error payload for job {id}: {e}");
                    let error = JobFailure::new(code, problem.clone());
                    (Self::Failure { id, error }, Some(problem))
                },
            });
        }
        if let Some(result) = object.remove("result") {
            return Ok((Self::Result { id, result }, None));
        }
        if let Some(progress) = object.remove("progress") {
            return Ok((Self::Progress { id, progress }, None));
        }

        Err(Error::invalid_frame(format!(
            "frame {id} has no result, error or progress"
        )))
    }
}
