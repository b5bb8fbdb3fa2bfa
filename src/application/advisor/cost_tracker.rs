//! Guarded daily advisor-cost counter, reset by a scheduled task at 00:00 UTC
//! (spec.md §4.4, §5's "no global mutable state other than the daily
//! counters" carve-out).

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

pub struct CostTracker {
    daily_budget: Decimal,
    state: RwLock<CostState>,
}

struct CostState {
    date: NaiveDate,
    spent_today: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    Ok,
    Warning,
    Exceeded,
}

impl CostTracker {
    pub fn new(daily_budget: Decimal) -> Self {
        Self {
            daily_budget,
            state: RwLock::new(CostState { date: Utc::now().date_naive(), spent_today: Decimal::ZERO }),
        }
    }

    async fn roll_if_new_day(&self, state: &mut CostState) {
        let today = Utc::now().date_naive();
        if today != state.date {
            state.date = today;
            state.spent_today = Decimal::ZERO;
        }
    }

    pub async fn record_cost(&self, cost_usd: Decimal) -> BudgetStatus {
        let mut state = self.state.write().await;
        self.roll_if_new_day(&mut state).await;
        state.spent_today += cost_usd;
        self.status_locked(&state)
    }

    pub async fn status(&self) -> BudgetStatus {
        let mut state = self.state.write().await;
        self.roll_if_new_day(&mut state).await;
        self.status_locked(&state)
    }

    fn status_locked(&self, state: &CostState) -> BudgetStatus {
        if self.daily_budget <= Decimal::ZERO {
            return BudgetStatus::Ok;
        }
        let ratio = state.spent_today / self.daily_budget;
        if ratio >= Decimal::ONE {
            BudgetStatus::Exceeded
        } else if ratio >= Decimal::new(70, 2) {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        }
    }

    pub async fn spent_today(&self) -> Decimal {
        let mut state = self.state.write().await;
        self.roll_if_new_day(&mut state).await;
        state.spent_today
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn ok_below_70_pct() {
        let tracker = CostTracker::new(dec!(10));
        let status = tracker.record_cost(dec!(5)).await;
        assert_eq!(status, BudgetStatus::Ok);
    }

    #[tokio::test]
    async fn warning_at_70_pct() {
        let tracker = CostTracker::new(dec!(10));
        let status = tracker.record_cost(dec!(7)).await;
        assert_eq!(status, BudgetStatus::Warning);
    }

    #[tokio::test]
    async fn exceeded_at_100_pct() {
        let tracker = CostTracker::new(dec!(10));
        let status = tracker.record_cost(dec!(10)).await;
        assert_eq!(status, BudgetStatus::Exceeded);
    }
}
