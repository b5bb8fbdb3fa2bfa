//! Short-TTL hot cache for snapshots/indicator values, keyed by
//! `symbol:timeframe` (spec.md §4.3). A miss falls through to the ring
//! buffer / exchange.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    inserted_at: Instant,
}

pub struct TtlCache<T: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry<T>>>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        assert!(ttl <= Duration::from_secs(5 * 60), "TTL must be <= 5 minutes per spec");
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            entries.remove(key);
        }
        self.misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: impl Into<String>, value: T) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.into(), Entry { value, inserted_at: Instant::now() });
    }

    /// Fraction of `get` calls that hit, for the cache hit-rate gauge.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(std::sync::atomic::Ordering::Relaxed) as f64;
        let misses = self.misses.load(std::sync::atomic::Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_secs(1));
        assert_eq!(cache.get("BTCUSDT:1m"), None);
        cache.put("BTCUSDT:1m", 42);
        assert_eq!(cache.get("BTCUSDT:1m"), Some(42));
        assert!(cache.hit_rate() > 0.0);
    }

    #[test]
    fn entry_expires_after_ttl() {
        let cache: TtlCache<i32> = TtlCache::new(Duration::from_millis(10));
        cache.put("k", 1);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), None);
    }
}
