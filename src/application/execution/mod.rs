//! Execution Pipeline (spec.md §4.7): pre-flight recheck, idempotent
//! submission, fill-wait, and the three-way full/partial/failed dispatch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use tracing::warn;

use crate::domain::errors::ExecutionError;
use crate::domain::ports::ExchangeGateway;
use crate::domain::position::Position;
use crate::domain::types::{AccountState, Order, OrderType, RequestClass, Side};

const PARTIAL_FILL_ACCEPT_THRESHOLD: Decimal = Decimal::from_parts(50, 0, 0, false, 2); // 0.50
const SLIPPAGE_FLAG_THRESHOLD: Decimal = Decimal::from_parts(2, 0, 0, false, 2); // 0.02

pub enum ExecutionOutcome {
    Filled { position: Position, slippage_flagged: bool },
}

/// Deterministic idempotency key: the same `(cycle_id, symbol, side,
/// quantity, timestamp_minute)` tuple always yields the same key (spec.md
/// §3, §4.7).
pub fn idempotency_key(cycle_id: u64, symbol: &str, side: Side, quantity: Decimal, at: DateTime<Utc>) -> String {
    let minute_bucket = at.with_second(0).unwrap().with_nanosecond(0).unwrap();
    let payload = format!("{cycle_id}:{symbol}:{side:?}:{quantity}:{}", minute_bucket.timestamp());
    let mut mac = Hmac::<Sha256>::new_from_slice(b"rustrade-core-idempotency").expect("hmac accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub struct Executor {
    gateway: Arc<dyn ExchangeGateway>,
    order_fill_timeout: Duration,
}

impl Executor {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, order_fill_timeout: Duration) -> Self {
        Self { gateway, order_fill_timeout }
    }

    /// Rechecks margin/exposure against the freshest account state (which
    /// may have changed since the Risk check), then submits and waits for a
    /// fill up to `order_fill_timeout`.
    pub async fn execute(
        &self,
        cycle_id: u64,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        expected_price: Decimal,
        stop_loss_price: Decimal,
        take_profit_price: Option<Decimal>,
        invalidation_conditions: Vec<String>,
        leverage: u32,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let account = self
            .gateway
            .fetch_account_state()
            .await
            .map_err(|_| ExecutionError::FillTimeout)?;
        self.preflight_recheck(&account, quantity, expected_price, leverage)?;

        let key = idempotency_key(cycle_id, symbol, side, quantity, Utc::now());

        let order = self
            .gateway
            .create_order(&key, symbol, side, OrderType::Market, quantity, None, RequestClass::Critical)
            .await
            .map_err(|e| ExecutionError::Rejected(e.to_string()))?;

        let filled_order = match tokio::time::timeout(self.order_fill_timeout, self.wait_for_fill(&key, order)).await {
            Ok(order) => order,
            Err(_) => {
                let _ = self.gateway.cancel_order(&key).await;
                return Err(ExecutionError::FillTimeout);
            }
        };

        let fill_ratio = if quantity > Decimal::ZERO { filled_order.quantity_filled / quantity } else { Decimal::ZERO };

        if filled_order.quantity_filled == Decimal::ZERO {
            return Err(ExecutionError::Rejected("no fill before timeout".into()));
        }
        if fill_ratio < PARTIAL_FILL_ACCEPT_THRESHOLD {
            let _ = self.gateway.cancel_order(&key).await;
            return Err(ExecutionError::Rejected(format!("partial fill {fill_ratio} below 50% threshold")));
        }
        if fill_ratio < Decimal::ONE {
            let _ = self.gateway.cancel_order(&key).await;
        }

        let fill_price = filled_order.average_fill_price.unwrap_or(expected_price);
        let slippage = ((fill_price - expected_price) / expected_price).abs();
        let slippage_flagged = slippage > SLIPPAGE_FLAG_THRESHOLD;
        if slippage_flagged {
            warn!(symbol, %slippage, "realized slippage exceeded 2%, order honored but flagged");
        }

        let position = Position::new_opening(
            symbol.to_string(),
            side,
            filled_order.quantity_filled,
            leverage,
            stop_loss_price,
            take_profit_price,
            invalidation_conditions,
        );

        Ok(ExecutionOutcome::Filled { position, slippage_flagged })
    }

    fn preflight_recheck(&self, account: &AccountState, quantity: Decimal, price: Decimal, leverage: u32) -> Result<(), ExecutionError> {
        if leverage == 0 {
            return Err(ExecutionError::Rejected("leverage must be positive".into()));
        }
        let required_margin = (quantity * price) / Decimal::from(leverage);
        if required_margin > account.available_margin {
            return Err(ExecutionError::Rejected("insufficient margin at execution time".into()));
        }
        Ok(())
    }

    async fn wait_for_fill(&self, key: &str, mut order: Order) -> Order {
        loop {
            if order.status.is_terminal() {
                return order;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            match self.gateway.fetch_order(key).await {
                Ok(updated) => order = updated,
                Err(_) => continue,
            }
            if order.status.is_terminal() {
                return order;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn idempotency_key_is_deterministic_for_same_inputs() {
        let at = Utc::now();
        let k1 = idempotency_key(1, "BTCUSDT", Side::Long, dec!(0.02), at);
        let k2 = idempotency_key(1, "BTCUSDT", Side::Long, dec!(0.02), at);
        assert_eq!(k1, k2);
    }

    #[test]
    fn idempotency_key_differs_across_symbols() {
        let at = Utc::now();
        let k1 = idempotency_key(1, "BTCUSDT", Side::Long, dec!(0.02), at);
        let k2 = idempotency_key(1, "ETHUSDT", Side::Long, dec!(0.02), at);
        assert_ne!(k1, k2);
    }

    #[test]
    fn idempotency_key_ignores_sub_minute_timestamp_differences() {
        let at1 = Utc::now().with_second(10).unwrap().with_nanosecond(0).unwrap();
        let at2 = Utc::now().with_second(59).unwrap().with_nanosecond(0).unwrap();
        let at1 = at1.with_nanosecond(0).unwrap();
        let at2 = at1.with_second(59).unwrap();
        let k1 = idempotency_key(1, "BTCUSDT", Side::Long, dec!(0.02), at1);
        let k2 = idempotency_key(1, "BTCUSDT", Side::Long, dec!(0.02), at2);
        assert_eq!(k1, k2);
    }
}
