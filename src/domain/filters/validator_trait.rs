//! Shape shared by every stage of the risk pipeline (spec.md §4.5). Each
//! validator inspects a candidate signal against the current account/position
//! context and returns `Approve` or `Reject`; the pipeline runs them in a
//! fixed order and short-circuits on the first rejection.

use rust_decimal::Decimal;

use crate::domain::position::Position;
use crate::domain::types::{AccountState, Instrument, Signal};

/// Read-only context a validator is evaluated against. Built fresh per signal
/// so validators never see stale account/position state across a cycle.
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    pub signal: &'a Signal,
    pub instrument: &'a Instrument,
    pub account: &'a AccountState,
    pub open_positions: &'a [Position],
    pub entry_price: Decimal,
    pub high_volatility: bool,
    pub circuit_breaker_tripped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Approve,
    Reject(String),
}

impl ValidationResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, ValidationResult::Approve)
    }
}

/// One stage of the risk pipeline. Implementors are stateless or hold only
/// their own guarded counters (e.g. the circuit breaker's daily-loss state).
pub trait RiskValidator: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult;
}
