//! Request registry: pending jobs keyed by id.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;

use crate::error::JobFailure;
use crate::job::{JobResult, ProgressObserver};
use crate::shared::protocol::{InboundFrame, JobId};

/// A job awaiting its terminal frame.
pub(crate) struct PendingJob {
    pub method: String,
    pub progress: Option<ProgressObserver>,
    pub completion: oneshot::Sender<JobResult>,
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Progress delivered; the job remains pending.
    Progress,
    /// The job settled and its entry was removed.
    Settled,
    /// No pending job has this id.
    Unknown,
}

/// Maps job ids to pending jobs.
///
/// The lock is held only for map updates. Progress observers and completion
/// sends happen after it is released.
#[derive(Default)]
pub(crate) struct RequestRegistry {
    pending: Mutex<HashMap<JobId, PendingJob>>,
}

impl RequestRegistry {
    /// Register a job. Returns `false` if the id is already taken.
    pub fn register(&self, id: JobId, job: PendingJob) -> bool {
        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return false;
        }
        pending.insert(id, job);
        true
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Route an inbound frame to its job.
    pub fn route(&self, frame: InboundFrame) -> Routed {
        match frame {
            InboundFrame::Progress { id, progress } => self.progress(id, progress),
            InboundFrame::Result { id, result } => self.settle(id, Ok(result)),
            InboundFrame::Failure { id, error } => self.settle(id, Err(error)),
        }
    }

    fn progress(&self, id: JobId, progress: Value) -> Routed {
        let observer = {
            let pending = self.pending.lock();
            match pending.get(&id) {
                Some(job) => job.progress.clone(),
                None => return Routed::Unknown,
            }
        };
        if let Some(observer) = observer {
            observer(progress);
        }
        Routed::Progress
    }

    fn settle(&self, id: JobId, outcome: JobResult) -> Routed {
        let Some(job) = self.pending.lock().remove(&id) else {
            return Routed::Unknown;
        };
        tracing::debug!(
            job_id = id,
            method = %job.method,
            success = outcome.is_ok(),
            "Job settled"
        );
        // The caller may have dropped the job without awaiting it.
        let _ = job.completion.send(outcome);
        Routed::Settled
    }

    /// Settle every pending job with `failure`. Returns how many were failed.
    pub fn fail_all(&self, failure: &JobFailure) -> usize {
        let drained: Vec<(JobId, PendingJob)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, job) in drained {
            tracing::debug!(job_id = id, method = %job.method, "Failing orphaned job");
            let _ = job.completion.send(Err(failure.clone()));
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;
    use std::sync::Arc;

    fn pending(observer: Option<ProgressObserver>) -> (PendingJob, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingJob {
                method: "m".to_string(),
                progress: observer,
                completion: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn terminal_frame_removes_entry() {
        let registry = RequestRegistry::default();
        let (job, rx) = pending(None);
        assert!(registry.register(1, job));
        assert!(registry.contains(1));

        let routed = registry.route(InboundFrame::Result {
            id: 1,
            result: json!([1, 2]),
        });
        assert_eq!(routed, Routed::Settled);
        assert!(!registry.contains(1));
        assert_eq!(rx.await.unwrap().unwrap(), json!([1, 2]));

        let again = registry.route(InboundFrame::Progress {
            id: 1,
            progress: json!(5),
        });
        assert_eq!(again, Routed::Unknown);
    }

    #[tokio::test]
    async fn progress_keeps_job_pending() {
        let registry = RequestRegistry::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let observer: ProgressObserver = {
            let seen = seen.clone();
            Arc::new(move |value| seen.lock().push(value))
        };
        let (job, _rx) = pending(Some(observer));
        registry.register(2, job);

        for step in 0..3 {
            let routed = registry.route(InboundFrame::Progress {
                id: 2,
                progress: json!(step),
            });
            assert_eq!(routed, Routed::Progress);
        }
        assert!(registry.contains(2));
        assert_eq!(*seen.lock(), vec![json!(0), json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = RequestRegistry::default();
        let (first, _rx1) = pending(None);
        let (second, _rx2) = pending(None);
        assert!(registry.register(3, first));
        assert!(!registry.register(3, second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn fail_all_settles_everything() {
        let registry = RequestRegistry::default();
        let (a, rx_a) = pending(None);
        let (b, rx_b) = pending(None);
        registry.register(10, a);
        registry.register(11, b);

        let failed = registry.fail_all(&JobFailure::connection_closed("gone"));
        assert_eq!(failed, 2);
        assert_eq!(registry.len(), 0);
        for rx in [rx_a, rx_b] {
            assert_eq!(rx.await.unwrap().unwrap_err().code, ErrorCode::CONNECTION_CLOSED);
        }
    }
}
