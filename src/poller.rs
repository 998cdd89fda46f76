//! Bounded convergence loop.
//!
//! A [`Poller`] waits for some externally observed condition, such as a
//! freshly provisioned service becoming reachable, by repeatedly producing a
//! value and testing it. It knows nothing about connections or jobs.
//!
//! Each round waits one interval and then calls the producer. A produced
//! value that passes the readiness check ends the loop. Producer errors are
//! remembered and the loop continues. Once the time elapsed since the first
//! attempt reaches the timeout, the loop gives up with the last error, or a
//! plain timeout if every attempt succeeded without being ready.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::clock::{Clock, TokioClock};
use crate::config::PollerConfig;

/// Why a poll gave up.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    /// The deadline passed and the most recent attempt failed.
    #[error("gave up after {attempts} attempts in {elapsed:?}: {last_error}")]
    Exhausted {
        last_error: E,
        attempts: u32,
        elapsed: Duration,
    },

    /// The deadline passed without a ready value and without any failure.
    #[error("condition not met after {attempts} attempts in {elapsed:?}")]
    TimedOut { attempts: u32, elapsed: Duration },
}

impl<E> PollError<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::TimedOut { attempts, .. } => *attempts,
        }
    }

    /// Time from the first attempt to giving up.
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Exhausted { elapsed, .. } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }

    /// The error from the last attempt, if it failed.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last_error, .. } => Some(last_error),
            Self::TimedOut { .. } => None,
        }
    }
}

/// Polls a producer until its value is ready or the timeout elapses.
///
/// # Examples
///
/// ```
/// use jobwire::{PollerConfig, Poller};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let poller = Poller::new(PollerConfig::new(Duration::from_millis(10), Duration::from_secs(1)));
/// let calls = &AtomicU32::new(0);
/// let value = poller
///     .poll(
///         move || async move { Ok::<_, std::io::Error>(calls.fetch_add(1, Ordering::SeqCst) + 1) },
///         |n| *n >= 3,
///     )
///     .await
///     .unwrap();
/// assert_eq!(value, 3);
/// # }
/// ```
#[derive(Clone)]
pub struct Poller {
    config: PollerConfig,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Poll until `is_ready` accepts a produced value.
    pub async fn poll<T, E, P, Fut, R>(&self, mut produce: P, is_ready: R) -> Result<T, PollError<E>>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&T) -> bool,
    {
        let interval = self.config.interval();
        let timeout = self.config.timeout();
        let mut first_attempt = None;
        let mut attempts = 0u32;
        let mut last_error = None;

        loop {
            self.clock.sleep(interval).await;
            let started = *first_attempt.get_or_insert_with(|| self.clock.now());
            attempts += 1;

            match produce().await {
                Ok(value) if is_ready(&value) => {
                    tracing::debug!(attempts, "Poll condition met");
                    return Ok(value);
                },
                Ok(_) => {
                    tracing::trace!(attempts, "Poll value not ready");
                    last_error = None;
                },
                Err(e) => {
                    tracing::trace!(attempts, "Poll attempt failed");
                    last_error = Some(e);
                },
            }

            let elapsed = self.clock.now() - started;
            if elapsed >= timeout {
                tracing::debug!(attempts, ?elapsed, "Giving up polling");
                return Err(match last_error {
                    Some(last_error) => PollError::Exhausted {
                        last_error,
                        attempts,
                        elapsed,
                    },
                    None => PollError::TimedOut { attempts, elapsed },
                });
            }
        }
    }

    /// Spawn [`poll`](Self::poll) and report through a callback pair.
    ///
    /// Exactly one of `on_ready` and `on_give_up` runs, exactly once.
    pub fn poll_until<T, E, P, Fut, R, OnReady, OnGiveUp>(
        &self,
        produce: P,
        is_ready: R,
        on_ready: OnReady,
        on_give_up: OnGiveUp,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        E: Send + 'static,
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send,
        R: Fn(&T) -> bool + Send + Sync + 'static,
        OnReady: FnOnce(T) + Send + 'static,
        OnGiveUp: FnOnce(PollError<E>) + Send + 'static,
    {
        let poller = self.clone();
        tokio::spawn(async move {
            match poller.poll(produce, is_ready).await {
                Ok(value) => on_ready(value),
                Err(e) => on_give_up(e),
            }
        })
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
