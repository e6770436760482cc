//! Time source for the confirmation poll loop.

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Monotonic clock plus a non-blocking sleep. Swapped for a manual clock in
/// tests so poll loops run without wall-clock waits.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

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
