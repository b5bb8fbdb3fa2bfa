//! Clock & Scheduler (spec.md §4.1). Fires cycle-start ticks aligned to
//! wall-clock cadence boundaries and enforces a hard per-cycle deadline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CycleId(pub u64);

#[derive(Debug, Clone, Copy)]
pub struct CycleTick {
    pub cycle_id: CycleId,
    pub deadline: Instant,
    pub safe_execution_cutoff: Instant,
}

pub struct Scheduler {
    interval: Duration,
    deadline: Duration,
    next_id: AtomicU64,
    in_flight: Arc<Mutex<()>>,
    shutdown: CancellationToken,
}

/// Reason a cycle never ran to completion (spec.md §4.1 "SKIPPED").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PriorCycleStillRunning,
    DeadlineExceeded,
}

impl Scheduler {
    pub fn new(interval: Duration, deadline: Duration, shutdown: CancellationToken) -> Self {
        Self {
            interval,
            deadline,
            next_id: AtomicU64::new(1),
            in_flight: Arc::new(Mutex::new(())),
            shutdown,
        }
    }

    /// Aligns the first tick to the next wall-clock cadence boundary, e.g.
    /// the 00/03/06-minute marks for a 180s interval.
    fn first_tick_delay(&self) -> Duration {
        let now = chrono::Utc::now();
        let secs_since_midnight = now.num_seconds_from_midnight() as u64;
        let interval_secs = self.interval.as_secs().max(1);
        let remainder = secs_since_midnight % interval_secs;
        if remainder == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(interval_secs - remainder)
        }
    }

    /// Runs `body` once per aligned tick, skipping (not queuing) a tick if
    /// the previous cycle is still in flight. Returns when `shutdown` fires,
    /// waiting up to 30s for the in-flight cycle to drain first.
    pub async fn run<F, Fut>(&self, mut body: F)
    where
        F: FnMut(CycleTick) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        tokio::time::sleep(self.first_tick_delay()).await;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("scheduler shutting down, waiting for in-flight cycle to drain");
                    let _ = tokio::time::timeout(Duration::from_secs(30), self.in_flight.lock()).await;
                    break;
                }
                _ = ticker.tick() => {
                    let Ok(guard) = self.in_flight.clone().try_lock_owned() else {
                        warn!(reason = ?SkipReason::PriorCycleStillRunning, "cycle skipped");
                        continue;
                    };
                    let cycle_id = CycleId(self.next_id.fetch_add(1, Ordering::SeqCst));
                    let now = Instant::now();
                    let deadline = now + self.deadline;
                    let safe_execution_cutoff = deadline
                        .checked_sub(Duration::from_millis(200))
                        .unwrap_or(now);
                    let tick = CycleTick { cycle_id, deadline, safe_execution_cutoff };
                    body(tick).await;
                    drop(guard);
                }
            }
        }
    }
}

use chrono::Timelike;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn skips_tick_when_prior_cycle_still_running() {
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(Duration::from_millis(10), Duration::from_secs(1), shutdown.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let shutdown2 = shutdown.clone();

        let handle = tokio::spawn(async move {
            scheduler
                .run(|_tick| {
                    let count = count2.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
                .await;
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        shutdown2.cancel();
        handle.await.unwrap();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
