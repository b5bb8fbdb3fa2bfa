//! Position state machine (spec.md §4.6).
//!
//! ```text
//! NONE --open--> OPENING --fill--> OPEN --close--> CLOSING --confirm--> CLOSED
//!                   |                  |
//!                   +-- reject --> FAILED --retry-allowed--> OPENING
//!                                      |
//!                       liquidation --> LIQUIDATED (terminal)
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    None,
    Opening,
    Open,
    Closing,
    Closed,
    ClosedReconciled,
    Failed,
    Liquidated,
}

impl PositionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PositionState::Closed | PositionState::ClosedReconciled | PositionState::Liquidated
        )
    }
}

/// The only legal edges of the state machine, named so call sites read as intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionTransition {
    Open,
    Fill,
    Close,
    Confirm,
    Reject,
    RetryAllowed,
    Liquidation,
    ReconcileGhost,
}

#[derive(Debug, Error)]
#[error("illegal transition {transition:?} from state {from:?}")]
pub struct IllegalTransition {
    pub from: PositionState,
    pub transition: PositionTransition,
}

/// Independent protective mechanism currently armed for an OPEN position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectiveArming {
    pub l1_exchange_stop: bool,
    pub l2_app_monitor: bool,
    pub l3_emergency_liquidator: bool,
}

impl ProtectiveArming {
    /// Invariant (spec.md §3): a position OPEN always has L1, or L2+L3.
    pub fn satisfies_invariant(&self) -> bool {
        self.l1_exchange_stop || (self.l2_app_monitor && self.l3_emergency_liquidator)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Option<Decimal>,
    pub invalidation_conditions: Vec<String>,
    pub state: PositionState,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Decimal,
    pub stop_order_id: Option<String>,
    pub source_signal_symbol: String,
    #[serde(skip)]
    pub arming: ProtectiveArming,
}

impl Position {
    pub fn new_opening(
        symbol: String,
        side: Side,
        quantity: Decimal,
        leverage: u32,
        stop_loss_price: Decimal,
        take_profit_price: Option<Decimal>,
        invalidation_conditions: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.clone(),
            side,
            quantity,
            entry_price: Decimal::ZERO,
            leverage,
            stop_loss_price,
            take_profit_price,
            invalidation_conditions,
            state: PositionState::Opening,
            opened_at: None,
            closed_at: None,
            realized_pnl: Decimal::ZERO,
            stop_order_id: None,
            source_signal_symbol: symbol,
            arming: ProtectiveArming::default(),
        }
    }

    /// Validates and applies a transition. Illegal transitions are returned as an
    /// error and must not mutate state; callers log and continue.
    pub fn transition(&mut self, t: PositionTransition) -> Result<(), IllegalTransition> {
        use PositionState::*;
        use PositionTransition as T;
        let next = match (self.state, t) {
            (Opening, T::Fill) => Open,
            (Opening, T::Reject) => Failed,
            (Open, T::Close) => Closing,
            (Closing, T::Confirm) => Closed,
            (Failed, T::RetryAllowed) => Opening,
            (Open, T::Liquidation) => Liquidated,
            (Closing, T::Liquidation) => Liquidated,
            (Open, T::ReconcileGhost) => ClosedReconciled,
            (from, transition) => {
                return Err(IllegalTransition { from, transition });
            }
        };
        self.state = next;
        Ok(())
    }

    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        let delta = current_price - self.entry_price;
        Decimal::from(self.side.sign()) * delta * self.quantity
    }

    pub fn notional(&self, current_price: Decimal) -> Decimal {
        self.quantity * current_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_pos() -> Position {
        Position::new_opening(
            "BTCUSDT".into(),
            Side::Long,
            dec!(0.02),
            10,
            dec!(49000),
            None,
            vec![],
        )
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut p = new_pos();
        assert_eq!(p.state, PositionState::Opening);
        p.transition(PositionTransition::Fill).unwrap();
        assert_eq!(p.state, PositionState::Open);
        p.transition(PositionTransition::Close).unwrap();
        assert_eq!(p.state, PositionState::Closing);
        p.transition(PositionTransition::Confirm).unwrap();
        assert_eq!(p.state, PositionState::Closed);
        assert!(p.state.is_terminal());
    }

    #[test]
    fn reject_then_retry() {
        let mut p = new_pos();
        p.transition(PositionTransition::Reject).unwrap();
        assert_eq!(p.state, PositionState::Failed);
        p.transition(PositionTransition::RetryAllowed).unwrap();
        assert_eq!(p.state, PositionState::Opening);
    }

    #[test]
    fn liquidation_from_open_is_terminal() {
        let mut p = new_pos();
        p.transition(PositionTransition::Fill).unwrap();
        p.transition(PositionTransition::Liquidation).unwrap();
        assert_eq!(p.state, PositionState::Liquidated);
        assert!(p.state.is_terminal());
    }

    #[test]
    fn illegal_transition_does_not_mutate_state() {
        let mut p = new_pos();
        let before = p.state;
        let err = p.transition(PositionTransition::Confirm).unwrap_err();
        assert_eq!(err.from, before);
        assert_eq!(p.state, before);
    }

    #[test]
    fn closed_and_liquidated_reject_everything() {
        let mut p = new_pos();
        p.transition(PositionTransition::Fill).unwrap();
        p.transition(PositionTransition::Close).unwrap();
        p.transition(PositionTransition::Confirm).unwrap();
        assert!(p.transition(PositionTransition::Fill).is_err());
    }

    #[test]
    fn arming_invariant() {
        let mut arming = ProtectiveArming::default();
        assert!(!arming.satisfies_invariant());
        arming.l1_exchange_stop = true;
        assert!(arming.satisfies_invariant());
        arming.l1_exchange_stop = false;
        arming.l2_app_monitor = true;
        assert!(!arming.satisfies_invariant());
        arming.l3_emergency_liquidator = true;
        assert!(arming.satisfies_invariant());
    }
}
