//! Token-bucket limiter in front of the exchange gateway (spec.md §4.2).
//!
//! Capacity is 80% of the exchange's published per-minute request limit.
//! CRITICAL requests (orders, position queries) bypass the bucket and are
//! never delayed; NON_CRITICAL requests wait for a token. A rate-limit
//! response drains the bucket immediately and pauses every request,
//! CRITICAL included, until `retry_after + 10%` has elapsed. Repeated trips
//! within a sliding window raise a CRITICAL alert.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::ports::{AlertSeverity, AlertSink};
use crate::domain::types::RequestClass;

const REFILL_INTERVAL: Duration = Duration::from_secs(60);
const TRIP_WINDOW: Duration = Duration::from_secs(5 * 60);
const TRIPS_BEFORE_ALERT: usize = 3;
const RETRY_AFTER_MARGIN: f64 = 1.10;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Inner {
    tokens: f64,
    last_refill: Instant,
    paused_until: Option<Instant>,
    recent_trips: Vec<Instant>,
}

/// One bucket per (exchange, endpoint-class), per spec.md's shared-resources
/// note; in this crate one `RateLimiter` guards the single paper gateway.
pub struct RateLimiter {
    name: String,
    capacity: f64,
    alert_sink: Arc<dyn AlertSink>,
    inner: RwLock<Inner>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, published_limit_per_minute: u32, alert_sink: Arc<dyn AlertSink>) -> Self {
        let capacity = f64::from(published_limit_per_minute) * 0.80;
        Self {
            name: name.into(),
            capacity,
            alert_sink,
            inner: RwLock::new(Inner {
                tokens: capacity,
                last_refill: Instant::now(),
                paused_until: None,
                recent_trips: Vec::new(),
            }),
        }
    }

    fn refill(inner: &mut Inner, capacity: f64) {
        if inner.last_refill.elapsed() >= REFILL_INTERVAL {
            inner.tokens = capacity;
            inner.last_refill = Instant::now();
        }
    }

    /// Blocks until `class` may proceed. Never returns early for a pause in
    /// effect, even for CRITICAL, since that pause reflects an explicit
    /// rate-limit response from the exchange rather than routine pressure.
    pub async fn acquire(&self, class: RequestClass) {
        loop {
            let wait = {
                let mut inner = self.inner.write().await;
                Self::refill(&mut inner, self.capacity);
                match inner.paused_until {
                    Some(until) if Instant::now() < until => Some(until - Instant::now()),
                    Some(_) => {
                        inner.paused_until = None;
                        None
                    }
                    None => None,
                }
            };
            if let Some(wait) = wait {
                tokio::time::sleep(wait).await;
                continue;
            }

            if class == RequestClass::Critical {
                return;
            }

            let mut inner = self.inner.write().await;
            Self::refill(&mut inner, self.capacity);
            if inner.tokens >= 1.0 {
                inner.tokens -= 1.0;
                return;
            }
            drop(inner);
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Called when the gateway observes a rate-limit response. Drains the
    /// bucket and pauses all requests until `retry_after + 10%`; raises a
    /// CRITICAL alert once trips within the sliding window reach the
    /// threshold.
    pub async fn on_rate_limited(&self, retry_after: Duration) {
        let pause_until = Instant::now() + retry_after.mul_f64(RETRY_AFTER_MARGIN);
        let trip_count = {
            let mut inner = self.inner.write().await;
            inner.tokens = 0.0;
            inner.paused_until = Some(pause_until);
            let now = Instant::now();
            inner.recent_trips.retain(|t| now.duration_since(*t) < TRIP_WINDOW);
            inner.recent_trips.push(now);
            inner.recent_trips.len()
        };

        warn!(limiter = %self.name, retry_after_ms = retry_after.as_millis(), trip_count, "rate limit hit, pausing requests");
        if trip_count >= TRIPS_BEFORE_ALERT {
            self.alert_sink.emit(
                AlertSeverity::Critical,
                "rate_limit_repeated",
                &format!(
                    "{} hit its exchange rate limit {trip_count} times within {}s",
                    self.name,
                    TRIP_WINDOW.as_secs()
                ),
            );
        }
    }
}
