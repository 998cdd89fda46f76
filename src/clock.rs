//! Schedulable clock abstraction.
//!
//! The dispatcher's notice delay and the poller's interval both wait on a
//! [`Clock`]. [`TokioClock`] delegates to `tokio::time`, so tests running
//! with paused time (`#[tokio::test(start_paused = true)]`) advance it
//! deterministically instead of sleeping.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::Instant;

/// Source of time and delays.
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Wait for `duration` to elapse.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
