//! In-memory exchange simulator used when `PAPER_TRADING=true` (the default).
//! Fills market orders immediately at last-seen price and deduplicates
//! `create_order` calls by idempotency key, exactly as spec.md §4.2 requires
//! of a real gateway.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, RwLock};

use crate::application::audit::alerts::TracingAlertSink;
use crate::domain::errors::GatewayError;
use crate::domain::ports::AlertSink;
use crate::domain::position::Position;
use crate::domain::ports::ExchangeGateway;
use crate::domain::types::{
    AccountState, Candle, Order, OrderCapabilities, OrderStatus, OrderType, RequestClass, Side,
};
use crate::infrastructure::core::rate_limiter::RateLimiter;

/// Binance's default REST weight limit is 1200/min; used when no published
/// limit is configured.
const DEFAULT_PUBLISHED_LIMIT_PER_MIN: u32 = 1200;

struct SymbolBook {
    last_price: Decimal,
    candles: Vec<Candle>,
    tx: broadcast::Sender<(Decimal, DateTime<Utc>)>,
}

pub struct PaperExchange {
    books: Arc<RwLock<HashMap<String, SymbolBook>>>,
    orders: Arc<RwLock<HashMap<String, Order>>>,
    account: Arc<RwLock<AccountState>>,
    limiter: RateLimiter,
}

impl PaperExchange {
    pub fn new(starting_balance: Decimal) -> Self {
        Self::new_with_rate_limit(starting_balance, DEFAULT_PUBLISHED_LIMIT_PER_MIN, Arc::new(TracingAlertSink))
    }

    /// Builds with the exchange's published per-minute request limit and the
    /// alert sink the rate limiter raises CRITICAL alerts through on
    /// repeated trips (spec.md §4.2).
    pub fn new_with_rate_limit(starting_balance: Decimal, published_limit_per_min: u32, alert_sink: Arc<dyn AlertSink>) -> Self {
        Self {
            books: Arc::new(RwLock::new(HashMap::new())),
            orders: Arc::new(RwLock::new(HashMap::new())),
            account: Arc::new(RwLock::new(AccountState {
                balance: starting_balance,
                available_margin: starting_balance,
                total_unrealized_pnl: Decimal::ZERO,
            })),
            limiter: RateLimiter::new("paper-exchange", published_limit_per_min, alert_sink),
        }
    }

    /// Seeds or updates the simulated last-traded price for `symbol`; test
    /// harnesses and the warm-up loader use this to drive the book.
    pub async fn push_tick(&self, symbol: &str, price: Decimal, at: DateTime<Utc>) {
        let mut books = self.books.write().await;
        let book = books.entry(symbol.to_string()).or_insert_with(|| SymbolBook {
            last_price: price,
            candles: Vec::new(),
            tx: broadcast::channel(256).0,
        });
        book.last_price = price;
        let _ = book.tx.send((price, at));
    }

    pub async fn seed_candles(&self, symbol: &str, candles: Vec<Candle>) {
        let mut books = self.books.write().await;
        let book = books.entry(symbol.to_string()).or_insert_with(|| SymbolBook {
            last_price: candles.last().map(|c| c.close).unwrap_or(Decimal::ZERO),
            candles: Vec::new(),
            tx: broadcast::channel(256).0,
        });
        book.candles = candles;
    }

    pub async fn set_account_state(&self, state: AccountState) {
        *self.account.write().await = state;
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    fn capabilities(&self) -> OrderCapabilities {
        OrderCapabilities {
            supports_stop_market: true,
            supports_stop_limit: true,
            supports_trailing: false,
        }
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        _timeframe_seconds: u32,
        _since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        self.limiter.acquire(RequestClass::NonCritical).await;
        let books = self.books.read().await;
        let book = books.get(symbol).ok_or(GatewayError::Timeout)?;
        let start = book.candles.len().saturating_sub(limit as usize);
        Ok(book.candles[start..].to_vec())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, GatewayError> {
        self.limiter.acquire(RequestClass::NonCritical).await;
        let books = self.books.read().await;
        books.get(symbol).map(|b| b.last_price).ok_or(GatewayError::Timeout)
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, GatewayError> {
        self.limiter.acquire(RequestClass::Critical).await;
        Ok(Vec::new())
    }

    async fn fetch_account_state(&self) -> Result<AccountState, GatewayError> {
        self.limiter.acquire(RequestClass::Critical).await;
        Ok(*self.account.read().await)
    }

    async fn create_order(
        &self,
        idempotency_key: &str,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        stop_price: Option<Decimal>,
        class: RequestClass,
    ) -> Result<Order, GatewayError> {
        self.limiter.acquire(class).await;
        let mut orders = self.orders.write().await;
        if let Some(existing) = orders.get(idempotency_key) {
            return Ok(existing.clone());
        }

        let price = match order_type {
            OrderType::StopMarket | OrderType::StopLimit => {
                stop_price.ok_or_else(|| GatewayError::OrderRejected("stop price required".into()))?
            }
            _ => {
                let books = self.books.read().await;
                books
                    .get(symbol)
                    .map(|b| b.last_price)
                    .ok_or(GatewayError::Timeout)?
            }
        };

        let now = Utc::now();
        let order = Order {
            client_id: idempotency_key.to_string(),
            exchange_id: Some(uuid::Uuid::new_v4().to_string()),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity_requested: quantity,
            quantity_filled: if order_type == OrderType::Market { quantity } else { Decimal::ZERO },
            average_fill_price: if order_type == OrderType::Market { Some(price) } else { None },
            fees: Decimal::ZERO,
            status: if order_type == OrderType::Market {
                OrderStatus::Filled
            } else {
                OrderStatus::New
            },
            created_at: now,
            updated_at: now,
        };
        orders.insert(idempotency_key.to_string(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, client_id: &str) -> Result<(), GatewayError> {
        self.limiter.acquire(RequestClass::Critical).await;
        let mut orders = self.orders.write().await;
        if let Some(order) = orders.get_mut(client_id) {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Canceled;
                order.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn fetch_order(&self, client_id: &str) -> Result<Order, GatewayError> {
        self.limiter.acquire(RequestClass::Critical).await;
        let orders = self.orders.read().await;
        orders.get(client_id).cloned().ok_or(GatewayError::Timeout)
    }

    fn subscribe_stream(&self, symbol: &str) -> broadcast::Receiver<(Decimal, DateTime<Utc>)> {
        let books = self.books.try_read();
        match books {
            Ok(books) => match books.get(symbol) {
                Some(book) => book.tx.subscribe(),
                None => broadcast::channel(1).1,
            },
            Err(_) => broadcast::channel(1).1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn market_order_fills_immediately_at_last_price() {
        let ex = PaperExchange::new(dec!(10000));
        ex.push_tick("BTCUSDT", dec!(50000), Utc::now()).await;
        let order = ex
            .create_order(
                "key-1",
                "BTCUSDT",
                Side::Long,
                OrderType::Market,
                dec!(0.02),
                None,
                RequestClass::Critical,
            )
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.average_fill_price, Some(dec!(50000)));
    }

    #[tokio::test]
    async fn replaying_idempotency_key_returns_same_order() {
        let ex = PaperExchange::new(dec!(10000));
        ex.push_tick("BTCUSDT", dec!(50000), Utc::now()).await;
        let o1 = ex
            .create_order("same-key", "BTCUSDT", Side::Long, OrderType::Market, dec!(0.01), None, RequestClass::Critical)
            .await
            .unwrap();
        ex.push_tick("BTCUSDT", dec!(51000), Utc::now()).await;
        let o2 = ex
            .create_order("same-key", "BTCUSDT", Side::Long, OrderType::Market, dec!(0.01), None, RequestClass::Critical)
            .await
            .unwrap();
        assert_eq!(o1.exchange_id, o2.exchange_id);
        assert_eq!(o1.average_fill_price, o2.average_fill_price);
    }
}
