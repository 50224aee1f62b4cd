use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::types::Timestamp;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Source of time and delayed execution for every timer-driven activity:
/// replication latency, WAL apply delay and the retry tick.
pub trait Scheduler: Send + Sync + 'static {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> Timestamp;

    /// A future that resolves once `delay` has elapsed
    fn sleep(&self, delay: Duration) -> BoxFuture;

    /// Run `action` in the background once `delay` has elapsed
    fn after(&self, delay: Duration, action: BoxFuture);

    /// Run `action` in the background as soon as possible
    fn spawn(&self, action: BoxFuture) {
        self.after(Duration::ZERO, action);
    }

    /// Fixed-period ticker whose first tick fires one `period` from now.
    ///
    /// A tick that runs late delays the following ones instead of bursting
    /// to catch up.
    fn interval(&self, period: Duration) -> Interval {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }
}

/// Scheduler backed by the tokio timer wheel.
///
/// Wall-clock time is anchored once at construction and then advanced by the
/// tokio clock, so pausing tokio time (`start_paused`) makes every delay and
/// every timestamp deterministic.
pub struct TokioScheduler {
    epoch_ms: Timestamp,
    started: Instant,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            epoch_ms: Utc::now().timestamp_millis(),
            started: Instant::now(),
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn now_ms(&self) -> Timestamp {
        self.epoch_ms + self.started.elapsed().as_millis() as Timestamp
    }

    fn sleep(&self, delay: Duration) -> BoxFuture {
        Box::pin(tokio::time::sleep(delay))
    }

    fn after(&self, delay: Duration, action: BoxFuture) {
        // Deadline is fixed at call time, not when the task is first polled
        let timer = tokio::time::sleep(delay);
        tokio::spawn(async move {
            timer.await;
            action.await;
        });
    }
}
