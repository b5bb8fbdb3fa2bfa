//! Reconciliation (spec.md §4.6): every 30 minutes, and immediately after any
//! CRITICAL exchange error or gateway reconnect, diff exchange truth against
//! local state. Exchange always wins.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::ports::{AlertSeverity, AlertSink, ExchangeGateway};
use crate::domain::position::{Position, PositionState, PositionTransition};

use super::store::PositionStore;

const QUANTITY_MISMATCH_TOLERANCE_PCT: Decimal = Decimal::from_parts(1, 0, 0, false, 4); // 0.0001
const VALUE_DELTA_ALERT_THRESHOLD_USD: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

pub struct ReconciliationReport {
    pub orphans_inserted: usize,
    pub ghosts_closed: usize,
    pub quantity_mismatches_adjusted: usize,
}

/// Diffs `exchange_positions` (truth) against the local store and applies
/// the orphan/ghost/mismatch rules, exchange-wins.
pub async fn reconcile(
    store: &PositionStore,
    gateway: &dyn ExchangeGateway,
    alert_sink: &dyn AlertSink,
    exchange_positions: &[Position],
) -> ReconciliationReport {
    let local = store.all().await;
    let mut report = ReconciliationReport { orphans_inserted: 0, ghosts_closed: 0, quantity_mismatches_adjusted: 0 };

    for exch_pos in exchange_positions {
        match local.iter().find(|p| p.symbol == exch_pos.symbol && p.state == PositionState::Open) {
            None => {
                let mut position = exch_pos.clone();
                position.state = PositionState::Open;
                if position.stop_order_id.is_none() {
                    let key = format!("reconcile-stop-{}", position.id);
                    if let Ok(order) = gateway
                        .create_order(
                            &key,
                            &position.symbol,
                            position.side,
                            crate::domain::types::OrderType::StopMarket,
                            position.quantity,
                            Some(position.stop_loss_price),
                            crate::domain::types::RequestClass::Critical,
                        )
                        .await
                    {
                        position.stop_order_id = order.exchange_id;
                    }
                }
                store.insert(position).await;
                report.orphans_inserted += 1;
                alert_sink.emit(AlertSeverity::Warning, "reconciliation_orphan", &format!("inserted orphan position for {}", exch_pos.symbol));
            }
            Some(local_pos) => {
                let diff = (local_pos.quantity - exch_pos.quantity).abs();
                let denom = local_pos.quantity.max(exch_pos.quantity);
                if denom > Decimal::ZERO && diff / denom > QUANTITY_MISMATCH_TOLERANCE_PCT {
                    let value_delta = diff * exch_pos.entry_price;

                    if let Some(old_stop_id) = &local_pos.stop_order_id {
                        let _ = gateway.cancel_order(old_stop_id).await;
                    }
                    let key = format!("reconcile-stop-resize-{}", local_pos.id);
                    let new_stop_order_id = match gateway
                        .create_order(
                            &key,
                            &local_pos.symbol,
                            local_pos.side,
                            crate::domain::types::OrderType::StopMarket,
                            exch_pos.quantity,
                            Some(local_pos.stop_loss_price),
                            crate::domain::types::RequestClass::Critical,
                        )
                        .await
                    {
                        Ok(order) => order.exchange_id,
                        Err(_) => None,
                    };

                    store
                        .update(local_pos.id, |p| {
                            p.quantity = exch_pos.quantity;
                            p.stop_order_id = new_stop_order_id.clone();
                        })
                        .await;
                    report.quantity_mismatches_adjusted += 1;
                    if value_delta > VALUE_DELTA_ALERT_THRESHOLD_USD {
                        alert_sink.emit(
                            AlertSeverity::Warning,
                            "reconciliation_mismatch",
                            &format!("quantity mismatch for {} adjusted, value delta ${value_delta}", exch_pos.symbol),
                        );
                    } else {
                        warn!(symbol = %exch_pos.symbol, "quantity mismatch adjusted below alert threshold");
                    }
                }
            }
        }
    }

    for local_pos in local.iter().filter(|p| p.state == PositionState::Open) {
        if !exchange_positions.iter().any(|e| e.symbol == local_pos.symbol) {
            if store.transition(local_pos.id, PositionTransition::ReconcileGhost).await {
                report.ghosts_closed += 1;
                alert_sink.emit(AlertSeverity::Warning, "reconciliation_ghost", &format!("closed ghost position for {}", local_pos.symbol));
            }
        }
    }

    report
}
