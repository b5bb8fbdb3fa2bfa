//! L3 emergency liquidator: an independent monitor closing any OPEN position
//! unconditionally once unrealized loss reaches `EMERGENCY_LIQUIDATION_PCT`,
//! irrespective of L1/L2 status (spec.md §4.6).

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::domain::ports::{AlertSeverity, AlertSink, DailyCounterRepository, ExchangeGateway};
use crate::domain::position::{PositionState, PositionTransition};
use crate::domain::types::{OrderType, RequestClass, Side};

use super::store::PositionStore;

const POLL_INTERVAL: Duration = Duration::from_secs(3);

pub async fn run(
    store: Arc<PositionStore>,
    gateway: Arc<dyn ExchangeGateway>,
    alert_sink: Arc<dyn AlertSink>,
    daily_counters: Arc<dyn DailyCounterRepository>,
    emergency_liquidation_pct: Decimal,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }
        for position in store.all().await {
            if position.state != PositionState::Open {
                continue;
            }
            let Ok(price) = gateway.fetch_ticker(&position.symbol).await else {
                continue;
            };
            let unrealized = position.unrealized_pnl(price);
            let notional = position.notional(position.entry_price);
            if notional <= Decimal::ZERO {
                continue;
            }
            let loss_pct = (-unrealized / notional).max(Decimal::ZERO);
            if loss_pct < emergency_liquidation_pct {
                continue;
            }

            let opposite = match position.side {
                Side::Long => Side::Short,
                Side::Short => Side::Long,
            };
            let key = format!("l3-liquidate-{}", position.id);
            match gateway
                .create_order(&key, &position.symbol, opposite, OrderType::Market, position.quantity, None, RequestClass::Critical)
                .await
            {
                Ok(order) => {
                    let fill_price = order.average_fill_price.unwrap_or(price);
                    let realized = position.unrealized_pnl(fill_price);
                    store.update(position.id, |p| p.realized_pnl = realized).await;
                    if let Err(e) = daily_counters.record_realized_pnl(realized).await {
                        error!(position_id = %position.id, error = %e, "failed to record realized pnl for L3 liquidation");
                    }
                    if store.transition(position.id, PositionTransition::Liquidation).await {
                        alert_sink.emit(
                            AlertSeverity::Critical,
                            "emergency_liquidation",
                            &format!("L3 liquidated position {} at {loss_pct}", position.id),
                        );
                    }
                }
                Err(e) => {
                    error!(position_id = %position.id, error = %e, "emergency liquidation order failed");
                    alert_sink.emit(AlertSeverity::Critical, "emergency_liquidation_failed", &format!("{e}"));
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
