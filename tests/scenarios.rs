use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use rustrade_core::application::execution::{ExecutionOutcome, Executor};
use rustrade_core::application::position::liquidator;
use rustrade_core::application::position::store::PositionStore;
use rustrade_core::application::position::PositionManager;
use rustrade_core::domain::errors::{CoreError, GatewayError};
use rustrade_core::domain::ports::{AlertSeverity, AlertSink, DailyCounterRepository, ExchangeGateway, PositionRepository};
use rustrade_core::domain::position::{Position, PositionState, PositionTransition};
use rustrade_core::domain::types::{AccountState, Candle, Order, OrderCapabilities, OrderStatus, OrderType, RequestClass, Side};
use rustrade_core::infrastructure::exchange::paper::PaperExchange;
use tokio_util::sync::CancellationToken;

struct NullRepository;

#[async_trait]
impl PositionRepository for NullRepository {
    async fn upsert(&self, _position: &Position) -> Result<(), CoreError> {
        Ok(())
    }
    async fn load_all(&self) -> Result<Vec<Position>, CoreError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct NullDailyCounterRepository;

#[async_trait]
impl DailyCounterRepository for NullDailyCounterRepository {
    async fn record_realized_pnl(&self, _amount: Decimal) -> Result<(), CoreError> {
        Ok(())
    }
    async fn realized_pnl_today(&self) -> Result<Decimal, CoreError> {
        Ok(Decimal::ZERO)
    }
}

#[derive(Default)]
struct RecordingAlertSink {
    categories: Mutex<Vec<String>>,
}

impl AlertSink for RecordingAlertSink {
    fn emit(&self, _severity: AlertSeverity, category: &str, _message: &str) {
        self.categories.lock().unwrap().push(category.to_string());
    }
}

/// Always returns a `PartiallyFilled` order from `create_order`, then flips it
/// to `Canceled` on the first `fetch_order` poll, simulating an exchange that
/// fills what liquidity it has and cancels the remainder.
struct PartialFillGateway {
    fill_ratio: Decimal,
    price: Decimal,
    orders: Mutex<HashMap<String, Order>>,
}

impl PartialFillGateway {
    fn new(fill_ratio: Decimal, price: Decimal) -> Self {
        Self { fill_ratio, price, orders: Mutex::new(HashMap::new()) }
    }
}

#[async_trait]
impl ExchangeGateway for PartialFillGateway {
    fn capabilities(&self) -> OrderCapabilities {
        OrderCapabilities::default()
    }

    async fn fetch_ohlcv(&self, _symbol: &str, _timeframe_seconds: u32, _since: Option<DateTime<Utc>>, _limit: u32) -> Result<Vec<Candle>, GatewayError> {
        Ok(Vec::new())
    }

    async fn fetch_ticker(&self, _symbol: &str) -> Result<Decimal, GatewayError> {
        Ok(self.price)
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, GatewayError> {
        Ok(Vec::new())
    }

    async fn fetch_account_state(&self) -> Result<AccountState, GatewayError> {
        Ok(AccountState { balance: dec!(100000), available_margin: dec!(100000), total_unrealized_pnl: dec!(0) })
    }

    async fn create_order(
        &self,
        idempotency_key: &str,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
        _stop_price: Option<Decimal>,
        _class: RequestClass,
    ) -> Result<Order, GatewayError> {
        let filled = quantity * self.fill_ratio;
        let now = Utc::now();
        let order = Order {
            client_id: idempotency_key.to_string(),
            exchange_id: Some("partial-1".to_string()),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity_requested: quantity,
            quantity_filled: filled,
            average_fill_price: Some(self.price),
            fees: Decimal::ZERO,
            status: OrderStatus::PartiallyFilled,
            created_at: now,
            updated_at: now,
        };
        self.orders.lock().unwrap().insert(idempotency_key.to_string(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, _client_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn fetch_order(&self, client_id: &str) -> Result<Order, GatewayError> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(client_id) {
            Some(order) => {
                order.status = OrderStatus::Canceled;
                order.updated_at = Utc::now();
                Ok(order.clone())
            }
            None => Err(GatewayError::Timeout),
        }
    }

    fn subscribe_stream(&self, _symbol: &str) -> tokio::sync::broadcast::Receiver<(Decimal, DateTime<Utc>)> {
        tokio::sync::broadcast::channel(1).1
    }
}

#[tokio::test]
async fn happy_path_buy_executes_and_arms_protective_layers() {
    let gateway = Arc::new(PaperExchange::new(dec!(100000)));
    gateway.push_tick("BTCUSDT", dec!(50000), Utc::now()).await;

    let executor = Executor::new(gateway.clone() as Arc<dyn ExchangeGateway>, Duration::from_secs(2));
    let outcome = executor
        .execute(1, "BTCUSDT", Side::Long, dec!(0.02), dec!(50000), dec!(49000), None, vec![], 10)
        .await
        .unwrap();
    let ExecutionOutcome::Filled { position, .. } = outcome;
    assert_eq!(position.quantity, dec!(0.02));

    let store = Arc::new(PositionStore::new(Arc::new(NullRepository)));
    let alerts = Arc::new(RecordingAlertSink::default());
    let manager = PositionManager::new(
        store.clone(),
        gateway.clone() as Arc<dyn ExchangeGateway>,
        alerts.clone() as Arc<dyn AlertSink>,
        Arc::new(NullDailyCounterRepository) as Arc<dyn DailyCounterRepository>,
        dec!(0.15),
        CancellationToken::new(),
    );

    let id = manager.open_and_arm(position, dec!(50000)).await.unwrap();
    let persisted = store.get(id).await.unwrap();
    assert_eq!(persisted.state, PositionState::Open);
    assert!(persisted.arming.satisfies_invariant());
    assert!(persisted.arming.l1_exchange_stop);
}

#[tokio::test]
async fn partial_fill_below_half_is_rejected() {
    let gateway = Arc::new(PartialFillGateway::new(dec!(0.40), dec!(50000)));
    let executor = Executor::new(gateway as Arc<dyn ExchangeGateway>, Duration::from_secs(2));
    let result = executor
        .execute(1, "BTCUSDT", Side::Long, dec!(1.0), dec!(50000), dec!(49000), None, vec![], 10)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn partial_fill_at_sixty_percent_is_accepted() {
    let gateway = Arc::new(PartialFillGateway::new(dec!(0.60), dec!(50000)));
    let executor = Executor::new(gateway as Arc<dyn ExchangeGateway>, Duration::from_secs(2));
    let outcome = executor
        .execute(1, "BTCUSDT", Side::Long, dec!(1.0), dec!(50000), dec!(49000), None, vec![], 10)
        .await
        .unwrap();
    let ExecutionOutcome::Filled { position, slippage_flagged } = outcome;
    assert_eq!(position.quantity, dec!(0.60));
    assert!(!slippage_flagged);
}

#[tokio::test]
async fn emergency_liquidation_fires_when_loss_exceeds_threshold() {
    let gateway = Arc::new(PaperExchange::new(dec!(100000)));
    gateway.push_tick("BTCUSDT", dec!(50000), Utc::now()).await;

    let store = Arc::new(PositionStore::new(Arc::new(NullRepository)));
    let mut position = Position::new_opening("BTCUSDT".to_string(), Side::Long, dec!(1.0), 10, dec!(45000), None, vec![]);
    position.transition(PositionTransition::Fill).unwrap();
    position.entry_price = dec!(50000);
    let id = position.id;
    store.insert(position).await;

    gateway.push_tick("BTCUSDT", dec!(40000), Utc::now()).await;

    let alerts = Arc::new(RecordingAlertSink::default());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let store = store.clone();
        let gateway = gateway.clone() as Arc<dyn ExchangeGateway>;
        let alerts = alerts.clone() as Arc<dyn AlertSink>;
        let shutdown = shutdown.clone();
        async move {
            let daily_counters = Arc::new(NullDailyCounterRepository) as Arc<dyn DailyCounterRepository>;
            liquidator::run(store, gateway, alerts, daily_counters, dec!(0.15), shutdown).await;
        }
    });

    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let persisted = store.get(id).await.unwrap();
    assert_eq!(persisted.state, PositionState::Liquidated);
    assert!(alerts.categories.lock().unwrap().contains(&"emergency_liquidation".to_string()));

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}
