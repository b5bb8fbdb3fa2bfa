//! L2 application-level stop monitor: a per-position polling task that
//! closes the position if price crosses the stop and L1 hasn't fired within
//! a grace window (spec.md §4.6).

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::domain::errors::GatewayError;
use crate::domain::ports::{AlertSeverity, AlertSink, DailyCounterRepository, ExchangeGateway};
use crate::domain::position::PositionTransition;
use crate::domain::types::{OrderType, RequestClass, Side};

use super::store::PositionStore;

const NORMAL_POLL_INTERVAL: Duration = Duration::from_secs(5);
const FAST_POLL_INTERVAL: Duration = Duration::from_secs(1);
const FAST_POLL_LOSS_THRESHOLD: Decimal = Decimal::from_parts(10, 0, 0, false, 2); // 0.10
const L1_GRACE_WINDOW: Duration = Duration::from_secs(10);

/// Spawned once per OPEN position; exits once the position leaves OPEN.
pub async fn run(
    position_id: Uuid,
    symbol: String,
    store: Arc<PositionStore>,
    gateway: Arc<dyn ExchangeGateway>,
    alert_sink: Arc<dyn AlertSink>,
    daily_counters: Arc<dyn DailyCounterRepository>,
    shutdown: CancellationToken,
) {
    let mut stop_crossed_at: Option<tokio::time::Instant> = None;

    loop {
        if shutdown.is_cancelled() {
            return;
        }
        let Some(position) = store.get(position_id).await else {
            return;
        };
        if position.state != crate::domain::position::PositionState::Open {
            return;
        }

        let price = match gateway.fetch_ticker(&symbol).await {
            Ok(p) => p,
            Err(GatewayError::Timeout) => {
                tokio::time::sleep(NORMAL_POLL_INTERVAL).await;
                continue;
            }
            Err(_) => {
                tokio::time::sleep(NORMAL_POLL_INTERVAL).await;
                continue;
            }
        };

        let unrealized = position.unrealized_pnl(price);
        let notional = position.notional(position.entry_price);
        let loss_pct = if notional > Decimal::ZERO { (-unrealized / notional).max(Decimal::ZERO) } else { Decimal::ZERO };

        let stop_crossed = match position.side {
            Side::Long => price <= position.stop_loss_price,
            Side::Short => price >= position.stop_loss_price,
        };

        if stop_crossed {
            let crossed_at = *stop_crossed_at.get_or_insert_with(tokio::time::Instant::now);
            if crossed_at.elapsed() >= L1_GRACE_WINDOW {
                warn!(position_id = %position_id, "L2 monitor firing: L1 did not close within grace window");
                if let Some(stop_order_id) = position.stop_order_id.clone() {
                    let _ = gateway.cancel_order(&stop_order_id).await;
                }
                let key = format!("l2-close-{position_id}");
                match gateway
                    .create_order(&key, &symbol, opposite(position.side), OrderType::Market, position.quantity, None, RequestClass::Critical)
                    .await
                {
                    Ok(order) => {
                        let realized = position.unrealized_pnl(order.average_fill_price.unwrap_or(price));
                        store.update(position_id, |p| p.realized_pnl = realized).await;
                        if let Err(e) = daily_counters.record_realized_pnl(realized).await {
                            warn!(position_id = %position_id, error = %e, "failed to record realized pnl for L2 close");
                        }
                        store.transition(position_id, PositionTransition::Close).await;
                        store.transition(position_id, PositionTransition::Confirm).await;
                        alert_sink.emit(AlertSeverity::Critical, "l2_stop_fired", &format!("L2 closed position {position_id}"));
                    }
                    Err(e) => {
                        alert_sink.emit(AlertSeverity::Critical, "l2_close_failed", &format!("{e}"));
                    }
                }
                return;
            }
        } else {
            stop_crossed_at = None;
        }

        let interval = if loss_pct > FAST_POLL_LOSS_THRESHOLD { FAST_POLL_INTERVAL } else { NORMAL_POLL_INTERVAL };
        tokio::time::sleep(interval).await;
    }
}

fn opposite(side: Side) -> Side {
    match side {
        Side::Long => Side::Short,
        Side::Short => Side::Long,
    }
}
