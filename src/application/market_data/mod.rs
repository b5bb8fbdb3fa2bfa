pub mod cache;
pub mod candle_ring;
pub mod indicators;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::errors::MarketDataError;
use crate::domain::types::{Candle, DataQuality, IndicatorSet, MarketSnapshot};

use cache::TtlCache;
use candle_ring::CandleRing;

const GAP_PAUSE_THRESHOLD: Duration = Duration::from_secs(3 * 60);
const GAP_ALERT_THRESHOLD: Duration = Duration::from_secs(10 * 60);
/// Staleness tolerance for open-interest / funding-rate fields carried on a
/// snapshot, per spec.md §4.3 ("OI and funding rate... tolerance 15 min").
/// Distinct from `WS_STALENESS_MAX`, which governs the ticker/trade stream.
const OI_FUNDING_STALENESS_TOLERANCE: Duration = Duration::from_secs(15 * 60);
const MAX_CANDLE_CHANGE_PCT: Decimal = Decimal::from_parts(50, 0, 0, false, 2); // 0.50

/// Validates an incoming tick/candle against spec.md §4.3's consistency
/// rules. Rejections are logged by the caller and the tick is dropped.
pub fn validate_candle(candle: &Candle, previous_close: Option<Decimal>) -> Result<(), MarketDataError> {
    if candle.close <= Decimal::ZERO {
        return Err(MarketDataError::InvalidCandle("price must be > 0".into()));
    }
    if candle.volume < Decimal::ZERO {
        return Err(MarketDataError::InvalidCandle("volume must be >= 0".into()));
    }
    if !candle.is_consistent() {
        return Err(MarketDataError::InvalidCandle("high/low/open/close inconsistent".into()));
    }
    if let Some(prev) = previous_close {
        if prev > Decimal::ZERO {
            let change = ((candle.close - prev) / prev).abs();
            if change > MAX_CANDLE_CHANGE_PCT {
                return Err(MarketDataError::InvalidCandle(format!(
                    "candle-to-candle change {change} exceeds 50% tolerance"
                )));
            }
        }
    }
    Ok(())
}

/// Owns the per-symbol ring buffers and assembles immutable `MarketSnapshot`s.
pub struct MarketDataService {
    rings: HashMap<String, Arc<CandleRing>>,
    snapshot_cache: TtlCache<MarketSnapshot>,
    last_tick_at: Arc<std::sync::Mutex<HashMap<String, std::time::Instant>>>,
    ws_staleness_max: Duration,
}

impl MarketDataService {
    pub fn new(symbols: &[String], ws_staleness_max: Duration) -> Self {
        let rings = symbols
            .iter()
            .map(|s| (s.clone(), Arc::new(CandleRing::new())))
            .collect();
        Self {
            rings,
            snapshot_cache: TtlCache::new(Duration::from_secs(60)),
            last_tick_at: Arc::new(std::sync::Mutex::new(HashMap::new())),
            ws_staleness_max,
        }
    }

    pub fn ring(&self, symbol: &str) -> Option<Arc<CandleRing>> {
        self.rings.get(symbol).cloned()
    }

    pub fn seed(&self, symbol: &str, candles: Vec<Candle>) {
        if let Some(ring) = self.rings.get(symbol) {
            ring.seed(candles);
        }
    }

    pub fn record_tick(&self, symbol: &str) {
        self.last_tick_at
            .lock()
            .unwrap()
            .insert(symbol.to_string(), std::time::Instant::now());
    }

    pub fn on_candle_close(&self, symbol: &str, candle: Candle) -> Result<(), MarketDataError> {
        let ring = self
            .rings
            .get(symbol)
            .ok_or_else(|| MarketDataError::InvalidCandle(format!("unknown symbol {symbol}")))?;
        let prev_close = ring.snapshot().last().map(|c| c.close);
        if let Some(last) = ring.snapshot().last() {
            if candle.open_time <= last.open_time {
                return Err(MarketDataError::InvalidCandle("open_time not monotonic".into()));
            }
        }
        validate_candle(&candle, prev_close)?;
        ring.push(candle);
        self.record_tick(symbol);
        Ok(())
    }

    fn gap_since_last_tick(&self, symbol: &str) -> Option<Duration> {
        self.last_tick_at.lock().unwrap().get(symbol).map(|t| t.elapsed())
    }

    /// Builds the frozen snapshot consumed by one advisor call (spec.md §4.3).
    /// Falls through the cache to the ring buffer on a miss.
    pub fn build_snapshot(
        &self,
        symbol: &str,
        open_interest: Option<Decimal>,
        funding_rate: Option<Decimal>,
    ) -> Result<MarketSnapshot, MarketDataError> {
        let cache_key = format!("{symbol}:1m");
        if let Some(cached) = self.snapshot_cache.get(&cache_key) {
            return Ok(cached);
        }

        let ring = self
            .rings
            .get(symbol)
            .ok_or_else(|| MarketDataError::InvalidCandle(format!("unknown symbol {symbol}")))?;
        let candles = ring.snapshot();
        let current_candle = *candles
            .last()
            .ok_or_else(|| MarketDataError::WarmingUp(symbol.to_string()))?;

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
        let last_20: Vec<Decimal> = closes[closes.len().saturating_sub(20)..].to_vec();

        let macd = indicators::macd(&closes, 12, 26, 9);
        let bollinger = indicators::bollinger(&closes, 20, 2.0);
        let indicators = IndicatorSet {
            ema_9: indicators::ema(&closes, 9),
            ema_20: indicators::ema(&closes, 20),
            ema_50: indicators::ema(&closes, 50),
            macd_line: macd.as_ref().map(|m| m.line),
            macd_signal: macd.as_ref().map(|m| m.signal),
            macd_histogram: macd.as_ref().map(|m| m.histogram),
            rsi_7: indicators::rsi(&closes, 7),
            rsi_14: indicators::rsi(&closes, 14),
            bollinger_upper: bollinger.as_ref().map(|b| b.upper),
            bollinger_middle: bollinger.as_ref().map(|b| b.middle),
            bollinger_lower: bollinger.as_ref().map(|b| b.lower),
        };

        let gap = self.gap_since_last_tick(symbol);
        let stale_websocket = gap.map(|g| g >= self.ws_staleness_max).unwrap_or(true);
        let gap_detected = gap.map(|g| g >= GAP_PAUSE_THRESHOLD).unwrap_or(false);
        if gap.map(|g| g >= GAP_ALERT_THRESHOLD).unwrap_or(false) {
            warn!(symbol, "data gap exceeded 10 minutes, alert required");
        }

        let mut warnings = Vec::new();
        if stale_websocket {
            warnings.push("stale_websocket".to_string());
        }
        if gap_detected {
            warnings.push("gap_detected".to_string());
        }
        if indicators.is_warming_up() {
            warnings.push("warming_up".to_string());
        }

        let snapshot = MarketSnapshot {
            symbol: symbol.to_string(),
            last_closes: last_20,
            current_candle,
            indicators,
            open_interest,
            funding_rate,
            staleness: gap.unwrap_or(Duration::MAX),
            data_quality: DataQuality {
                stale_websocket,
                gap_detected,
                warming_up: indicators.is_warming_up(),
                warnings,
            },
            captured_at: Utc::now(),
        };

        self.snapshot_cache.put(cache_key, snapshot.clone());
        Ok(snapshot)
    }

    pub fn is_warmed_up(&self, symbol: &str) -> bool {
        self.rings.get(symbol).map(|r| r.is_warmed_up()).unwrap_or(false)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.snapshot_cache.hit_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open_time: chrono::DateTime<Utc>, close: Decimal) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            exchange_timestamp: open_time,
        }
    }

    #[test]
    fn rejects_candle_to_candle_change_over_50_pct() {
        let c0 = candle(Utc::now(), dec!(100));
        let c1 = candle(Utc::now() + chrono::Duration::minutes(1), dec!(160));
        assert!(validate_candle(&c1, Some(c0.close)).is_err());
    }

    #[test]
    fn accepts_reasonable_move() {
        let c1 = candle(Utc::now(), dec!(105));
        assert!(validate_candle(&c1, Some(dec!(100))).is_ok());
    }

    #[test]
    fn snapshot_unavailable_before_any_candle() {
        let svc = MarketDataService::new(&["BTCUSDT".to_string()], Duration::from_secs(30));
        assert!(svc.build_snapshot("BTCUSDT", None, None).is_err());
    }

    #[test]
    fn not_warmed_up_until_200_candles() {
        let svc = MarketDataService::new(&["BTCUSDT".to_string()], Duration::from_secs(30));
        assert!(!svc.is_warmed_up("BTCUSDT"));
    }

    #[test]
    fn stale_websocket_follows_configured_tolerance_not_the_oi_constant() {
        let svc = MarketDataService::new(&["BTCUSDT".to_string()], Duration::from_millis(1));
        for i in 0..200 {
            svc.on_candle_close("BTCUSDT", candle(Utc::now() + chrono::Duration::minutes(i), dec!(100))).unwrap();
        }
        std::thread::sleep(Duration::from_millis(5));
        let snapshot = svc.build_snapshot("BTCUSDT", None, None).unwrap();
        assert!(snapshot.data_quality.stale_websocket);
    }
}
