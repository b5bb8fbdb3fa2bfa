//! Daily-loss circuit breaker (spec.md §4.5, §9 scenario 6). Resume requires
//! a manual reset; it is not time-based like the advisor's per-model breaker.

use rust_decimal::Decimal;
use tokio::sync::RwLock;

pub struct CircuitBreakerService {
    daily_loss_limit_pct: Decimal,
    tripped: RwLock<bool>,
}

impl CircuitBreakerService {
    pub fn new(daily_loss_limit_pct: Decimal) -> Self {
        Self { daily_loss_limit_pct, tripped: RwLock::new(false) }
    }

    /// Evaluates today's realized P&L against the limit and latches TRIPPED
    /// on the transition; returns true if the breaker is tripped (either
    /// already, or newly, as of this call).
    pub async fn evaluate(&self, realized_pnl_pct_today: Decimal) -> bool {
        let mut tripped = self.tripped.write().await;
        if !*tripped && realized_pnl_pct_today <= -self.daily_loss_limit_pct {
            *tripped = true;
        }
        *tripped
    }

    pub async fn is_tripped(&self) -> bool {
        *self.tripped.read().await
    }

    /// Manual reset, the only way out of TRIPPED (spec.md §4.5).
    pub async fn reset(&self) {
        *self.tripped.write().await = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn trips_at_limit() {
        let svc = CircuitBreakerService::new(dec!(0.07));
        assert!(!svc.evaluate(dec!(-0.05)).await);
        assert!(svc.evaluate(dec!(-0.071)).await);
        assert!(svc.is_tripped().await);
    }

    #[tokio::test]
    async fn stays_tripped_until_manual_reset() {
        let svc = CircuitBreakerService::new(dec!(0.07));
        svc.evaluate(dec!(-0.08)).await;
        assert!(svc.evaluate(dec!(0.01)).await);
        svc.reset().await;
        assert!(!svc.is_tripped().await);
    }
}
