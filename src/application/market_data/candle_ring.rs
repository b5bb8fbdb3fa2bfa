//! Single-writer/multi-reader candle ring buffer. Writes are atomic pointer
//! swaps of a snapshot `Arc`, so readers never take a lock (spec.md §5).

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::domain::types::Candle;

const MIN_RETAINED: usize = 200;

pub struct CandleRing {
    capacity: usize,
    candles: ArcSwap<Vec<Candle>>,
}

impl CandleRing {
    pub fn new() -> Self {
        Self {
            capacity: MIN_RETAINED.max(200),
            candles: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Candle>> {
        self.candles.load_full()
    }

    /// Appends `candle`, dropping from the front once over capacity.
    /// Out-of-order candles (open_time not after the last stored one) are
    /// rejected by the caller before this is reached (spec.md §5 ordering).
    pub fn push(&self, candle: Candle) {
        let current = self.candles.load_full();
        let mut next = (*current).clone();
        next.push(candle);
        if next.len() > self.capacity {
            let overflow = next.len() - self.capacity;
            next.drain(0..overflow);
        }
        self.candles.store(Arc::new(next));
    }

    pub fn seed(&self, candles: Vec<Candle>) {
        let mut trimmed = candles;
        if trimmed.len() > self.capacity {
            let overflow = trimmed.len() - self.capacity;
            trimmed.drain(0..overflow);
        }
        self.candles.store(Arc::new(trimmed));
    }

    pub fn is_warmed_up(&self) -> bool {
        self.candles.load().len() >= MIN_RETAINED
    }

    pub fn last_n_closes(&self, n: usize) -> Vec<rust_decimal::Decimal> {
        let snap = self.candles.load();
        let start = snap.len().saturating_sub(n);
        snap[start..].iter().map(|c| c.close).collect()
    }
}

impl Default for CandleRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn candle(close: rust_decimal::Decimal) -> Candle {
        Candle {
            open_time: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            exchange_timestamp: Utc::now(),
        }
    }

    #[test]
    fn not_warmed_up_below_200() {
        let ring = CandleRing::new();
        for i in 0..150 {
            ring.push(candle(dec!(1) * rust_decimal::Decimal::from(i + 1)));
        }
        assert!(!ring.is_warmed_up());
    }

    #[test]
    fn warmed_up_at_200() {
        let ring = CandleRing::new();
        for i in 0..200 {
            ring.push(candle(rust_decimal::Decimal::from(i + 1)));
        }
        assert!(ring.is_warmed_up());
    }

    #[test]
    fn ring_evicts_oldest_beyond_capacity() {
        let ring = CandleRing::new();
        for i in 0..250 {
            ring.push(candle(rust_decimal::Decimal::from(i)));
        }
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 200);
        assert_eq!(snap.first().unwrap().close, rust_decimal::Decimal::from(50));
    }
}
