//! Core data types shared across the trading core (spec data model).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One perpetual-futures contract. Immutable after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub tick_size: Decimal,
    pub lot_size: Decimal,
    pub min_notional: Decimal,
    pub max_exchange_leverage: u32,
}

/// OHLCV for a fixed timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub exchange_timestamp: DateTime<Utc>,
}

impl Candle {
    /// Invariant check: high >= {open, close} >= low, volume >= 0.
    pub fn is_consistent(&self) -> bool {
        self.volume >= Decimal::ZERO
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.high >= self.low
    }
}

/// Indicator values for one symbol at one instant. `None` means `warming_up`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub ema_9: Option<Decimal>,
    pub ema_20: Option<Decimal>,
    pub ema_50: Option<Decimal>,
    pub macd_line: Option<Decimal>,
    pub macd_signal: Option<Decimal>,
    pub macd_histogram: Option<Decimal>,
    pub rsi_7: Option<Decimal>,
    pub rsi_14: Option<Decimal>,
    pub bollinger_upper: Option<Decimal>,
    pub bollinger_middle: Option<Decimal>,
    pub bollinger_lower: Option<Decimal>,
}

impl IndicatorSet {
    pub fn is_warming_up(&self) -> bool {
        self.ema_9.is_none()
            || self.ema_20.is_none()
            || self.ema_50.is_none()
            || self.macd_line.is_none()
            || self.rsi_7.is_none()
            || self.rsi_14.is_none()
            || self.bollinger_middle.is_none()
    }
}

/// Data-quality annotations attached to a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub stale_websocket: bool,
    pub gap_detected: bool,
    pub warming_up: bool,
    pub warnings: Vec<String>,
}

/// The frozen input to one advisor call for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_closes: Vec<Decimal>,
    pub current_candle: Candle,
    pub indicators: IndicatorSet,
    pub open_interest: Option<Decimal>,
    pub funding_rate: Option<Decimal>,
    pub staleness: std::time::Duration,
    pub data_quality: DataQuality,
    pub captured_at: DateTime<Utc>,
}

/// Advisor-proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    BuyToEnter,
    SellToEnter,
    Hold,
    ClosePosition,
}

/// The validated output of the advisor for one symbol. Lifetime: one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    pub confidence: Decimal,
    pub risk_usd: Decimal,
    pub leverage: u32,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Option<Decimal>,
    pub invalidation_conditions: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(self) -> i8 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    StopMarket,
    StopLimit,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected)
    }
}

/// A pending or completed exchange instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_id: String,
    pub exchange_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity_requested: Decimal,
    pub quantity_filled: Decimal,
    pub average_fill_price: Option<Decimal>,
    pub fees: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-exchange declared capabilities, consulted explicitly by callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCapabilities {
    pub supports_stop_market: bool,
    pub supports_stop_limit: bool,
    pub supports_trailing: bool,
}

/// Request classification for gateway rate limiting (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Critical,
    NonCritical,
}

/// One append-only audit entry per cycle per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub cycle_id: u64,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub snapshot_hash: String,
    pub advisor_model: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub raw_response: Option<String>,
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Executed { order_client_id: String },
    Rejected { reason: String },
    SafeDefault { reason: String },
    Skipped { reason: String },
}

/// Rebuilt each cycle from exchange truth + local positions; never persisted as authoritative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Decimal,
    pub available_margin: Decimal,
    pub total_unrealized_pnl: Decimal,
}

impl AccountState {
    pub fn equity(&self) -> Decimal {
        self.balance + self.total_unrealized_pnl
    }
}

pub fn new_position_id() -> Uuid {
    Uuid::new_v4()
}
