//! Production clock for the tracker, on Tokio's timer.

use crate::FleetContext;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Live tracker clock.
///
/// `now()` counts from construction on the monotonic clock. Wall-clock
/// stamps are derived from the same instant, so `system_time()` and `now()`
/// never disagree about ordering even if the OS clock is stepped.
#[derive(Debug, Clone, Copy)]
pub struct TokioContext {
    started: Instant,
    started_wall: SystemTime,
}

impl TokioContext {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_wall: SystemTime::now(),
        }
    }

    /// Arc-wrapped context, the form `FleetTracker` takes.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Wall-clock time the tracker clock reads zero.
    pub fn started_at(&self) -> SystemTime {
        self.started_wall
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FleetContext for TokioContext {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.started_wall + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_moves_tracker_clock() {
        let ctx = TokioContext::new();
        let before = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;

        assert!(ctx.now() - before >= Duration::from_millis(10));
        assert_eq!(ctx.seed(), 0);
    }

    #[test]
    fn test_wall_stamps_follow_monotonic_clock() {
        let ctx = TokioContext::new();
        let stamp = ctx.system_time();
        let elapsed = stamp.duration_since(ctx.started_at()).unwrap();

        assert!(elapsed <= ctx.now());
        assert!(ctx.system_time() >= stamp);
    }

    #[tokio::test]
    async fn test_spawn_runs_task() {
        let ctx = TokioContext::shared();
        let (tx, rx) = tokio::sync::oneshot::channel();

        ctx.spawn("ping", async move {
            let _ = tx.send(7u8);
        });

        assert_eq!(rx.await.unwrap(), 7);
    }
}
