pub mod liquidator;
pub mod reconciliation;
pub mod store;
pub mod stop_monitor;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use crate::domain::ports::{AlertSeverity, AlertSink, DailyCounterRepository, ExchangeGateway};
use crate::domain::position::{Position, PositionTransition};
use crate::domain::types::{OrderType, RequestClass};

use store::PositionStore;

const L1_ARMING_DEADLINE: Duration = Duration::from_secs(5);

/// Owns position lifecycle + the three protective layers (spec.md §4.6).
pub struct PositionManager {
    pub store: Arc<PositionStore>,
    gateway: Arc<dyn ExchangeGateway>,
    alert_sink: Arc<dyn AlertSink>,
    daily_counters: Arc<dyn DailyCounterRepository>,
    emergency_liquidation_pct: Decimal,
    shutdown: CancellationToken,
}

impl PositionManager {
    pub fn new(
        store: Arc<PositionStore>,
        gateway: Arc<dyn ExchangeGateway>,
        alert_sink: Arc<dyn AlertSink>,
        daily_counters: Arc<dyn DailyCounterRepository>,
        emergency_liquidation_pct: Decimal,
        shutdown: CancellationToken,
    ) -> Self {
        Self { store, gateway, alert_sink, daily_counters, emergency_liquidation_pct, shutdown }
    }

    pub fn spawn_emergency_liquidator(&self) {
        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let alert_sink = self.alert_sink.clone();
        let daily_counters = self.daily_counters.clone();
        let pct = self.emergency_liquidation_pct;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            liquidator::run(store, gateway, alert_sink, daily_counters, pct, shutdown).await;
        });
    }

    /// Opens a position (OPENING -> OPEN via Fill) and arms all protective
    /// layers within the 5s deadline. If L1 placement fails, the position is
    /// immediately closed at market and a CRITICAL alert is raised.
    pub async fn open_and_arm(&self, mut position: Position, entry_price: Decimal) -> Option<Uuid> {
        let id = position.id;
        position.entry_price = entry_price;
        self.store.insert(position).await;
        if !self.store.transition(id, PositionTransition::Fill).await {
            return None;
        }
        self.store.update(id, |p| p.opened_at = Some(Utc::now())).await;

        let deadline = tokio::time::Instant::now() + L1_ARMING_DEADLINE;
        let armed_l1 = tokio::time::timeout_at(deadline, self.arm_l1(id)).await.unwrap_or(false);

        if !armed_l1 {
            error!(position_id = %id, "L1 stop-loss placement failed, closing position immediately");
            self.alert_sink.emit(
                AlertSeverity::Critical,
                "stop_loss_placement_failed",
                &format!("position {id} closed at market: L1 placement failed"),
            );
            self.close_at_market(id).await;
            return None;
        }

        self.arm_l2(id).await;
        Some(id)
    }

    async fn arm_l1(&self, id: Uuid) -> bool {
        let Some(position) = self.store.get(id).await else { return false };
        let key = format!("l1-stop-{id}");
        let order_type = if self.gateway.capabilities().supports_stop_market {
            OrderType::StopMarket
        } else if self.gateway.capabilities().supports_stop_limit {
            OrderType::StopLimit
        } else {
            return false;
        };
        match self
            .gateway
            .create_order(&key, &position.symbol, position.side, order_type, position.quantity, Some(position.stop_loss_price), RequestClass::Critical)
            .await
        {
            Ok(order) => {
                self.store.update(id, |p| {
                    p.stop_order_id = order.exchange_id.clone();
                    p.arming.l1_exchange_stop = true;
                }).await;
                true
            }
            Err(e) => {
                error!(position_id = %id, error = %e, "L1 placement request failed");
                false
            }
        }
    }

    /// L2 is always armed even when L1 is present (spec.md §9 open question).
    async fn arm_l2(&self, id: Uuid) {
        let Some(position) = self.store.get(id).await else { return };
        self.store.update(id, |p| {
            p.arming.l2_app_monitor = true;
            p.arming.l3_emergency_liquidator = true;
        }).await;

        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let alert_sink = self.alert_sink.clone();
        let daily_counters = self.daily_counters.clone();
        let shutdown = self.shutdown.clone();
        let symbol = position.symbol.clone();
        tokio::spawn(async move {
            stop_monitor::run(id, symbol, store, gateway, alert_sink, daily_counters, shutdown).await;
        });
    }

    async fn close_at_market(&self, id: Uuid) {
        let Some(position) = self.store.get(id).await else { return };
        let opposite = match position.side {
            crate::domain::types::Side::Long => crate::domain::types::Side::Short,
            crate::domain::types::Side::Short => crate::domain::types::Side::Long,
        };
        let key = format!("force-close-{id}");
        if let Ok(order) = self
            .gateway
            .create_order(&key, &position.symbol, opposite, OrderType::Market, position.quantity, None, RequestClass::Critical)
            .await
        {
            let fill = order.average_fill_price.unwrap_or(position.entry_price);
            let realized = position.unrealized_pnl(fill);
            self.store.update(id, |p| p.realized_pnl = realized).await;
            if let Err(e) = self.daily_counters.record_realized_pnl(realized).await {
                error!(position_id = %id, error = %e, "failed to record realized pnl for forced close");
            }
        }
        self.store.transition(id, PositionTransition::Close).await;
        self.store.transition(id, PositionTransition::Confirm).await;
    }
}
