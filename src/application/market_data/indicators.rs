//! Pure indicator functions over closing prices / candles (spec.md §4.3).
//! Each returns `None` ("warming_up") when insufficient history exists.

use rust_decimal::Decimal;

fn to_f64(d: Decimal) -> f64 {
    d.try_into().unwrap_or(0.0)
}

fn from_f64(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or(Decimal::ZERO).round_dp(8)
}

/// Exponential moving average over the trailing `period` closes.
pub fn ema(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if closes.len() < period || period == 0 {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut iter = closes.iter();
    let seed: f64 = iter.by_ref().take(period).map(|d| to_f64(*d)).sum::<f64>() / period as f64;
    let mut value = seed;
    for c in iter {
        value = alpha * to_f64(*c) + (1.0 - alpha) * value;
    }
    Some(from_f64(value))
}

pub struct Macd {
    pub line: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

/// MACD(fast, slow, signal) computed via EMA-of-EMA-difference.
pub fn macd(closes: &[Decimal], fast: usize, slow: usize, signal_period: usize) -> Option<Macd> {
    if closes.len() < slow + signal_period {
        return None;
    }
    let mut macd_series = Vec::with_capacity(closes.len() - slow + 1);
    for end in slow..=closes.len() {
        let window = &closes[..end];
        let fast_ema = ema(window, fast)?;
        let slow_ema = ema(window, slow)?;
        macd_series.push(fast_ema - slow_ema);
    }
    if macd_series.len() < signal_period {
        return None;
    }
    let signal = ema(&macd_series, signal_period)?;
    let line = *macd_series.last()?;
    Some(Macd { line, signal, histogram: line - signal })
}

/// Wilder's RSI over `period` closes.
pub fn rsi(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if closes.len() < period + 1 {
        return None;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for window in closes.windows(2).take(period) {
        let delta = to_f64(window[1]) - to_f64(window[0]);
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;

    for window in closes.windows(2).skip(period) {
        let delta = to_f64(window[1]) - to_f64(window[0]);
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(Decimal::ONE_HUNDRED);
    }
    let rs = avg_gain / avg_loss;
    Some(from_f64(100.0 - (100.0 / (1.0 + rs))))
}

pub struct Bollinger {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

/// Bollinger bands over `period` closes at `std_devs` standard deviations.
pub fn bollinger(closes: &[Decimal], period: usize, std_devs: f64) -> Option<Bollinger> {
    if closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let values: Vec<f64> = window.iter().map(|d| to_f64(*d)).collect();
    let mean = values.iter().sum::<f64>() / period as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    let stddev = variance.sqrt();
    Some(Bollinger {
        upper: from_f64(mean + std_devs * stddev),
        middle: from_f64(mean),
        lower: from_f64(mean - std_devs * stddev),
    })
}
