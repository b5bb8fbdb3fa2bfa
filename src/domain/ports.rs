//! Capability interfaces at the system's boundaries (spec.md §4.2, §4.4, §6).
//!
//! One capability-rich trait per collaborator, consulted explicitly at the
//! call site rather than hidden behind layers of dynamic dispatch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::errors::{CoreError, GatewayError};
use crate::domain::position::Position;
use crate::domain::types::{
    AccountState, Candle, DecisionRecord, Order, OrderCapabilities, OrderType, RequestClass, Side,
};

/// Unified REST+WS exchange client (spec.md §4.2).
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn capabilities(&self) -> OrderCapabilities;

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe_seconds: u32,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    async fn fetch_positions(&self) -> Result<Vec<Position>, GatewayError>;

    async fn fetch_account_state(&self) -> Result<AccountState, GatewayError>;

    async fn create_order(
        &self,
        idempotency_key: &str,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        stop_price: Option<Decimal>,
        class: RequestClass,
    ) -> Result<Order, GatewayError>;

    async fn cancel_order(&self, client_id: &str) -> Result<(), GatewayError>;

    async fn fetch_order(&self, client_id: &str) -> Result<Order, GatewayError>;

    /// Subscribes to the ticker/trade stream for `symbol`; each tick is the
    /// last-traded price paired with the exchange-assigned timestamp.
    fn subscribe_stream(&self, symbol: &str) -> tokio::sync::broadcast::Receiver<(Decimal, DateTime<Utc>)>;
}

/// A single LLM advisor backend (one of the configured, priority-ordered models).
#[async_trait]
pub trait AdvisorProvider: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<AdvisorCompletion, CoreError>;
}

#[derive(Debug, Clone)]
pub struct AdvisorCompletion {
    pub text: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Append-only decision audit log (spec.md §4.8). No update/delete method is
/// exposed at all, so append-only is a type-level guarantee.
#[async_trait]
pub trait DecisionLogRepository: Send + Sync {
    async fn append(&self, record: &DecisionRecord) -> Result<(), CoreError>;
}

/// Crash-safe position storage keyed by position-id.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn upsert(&self, position: &Position) -> Result<(), CoreError>;
    async fn load_all(&self) -> Result<Vec<Position>, CoreError>;
}

/// Tracks realized P&L accumulated over the current UTC day, the source of
/// truth the daily-loss circuit breaker trips on (spec.md §4.5).
#[async_trait]
pub trait DailyCounterRepository: Send + Sync {
    async fn record_realized_pnl(&self, amount: Decimal) -> Result<(), CoreError>;
    async fn realized_pnl_today(&self) -> Result<Decimal, CoreError>;
}

/// Severity-tagged alert emitter (spec.md §6 outbound sinks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

pub trait AlertSink: Send + Sync {
    fn emit(&self, severity: AlertSeverity, category: &str, message: &str);
}
