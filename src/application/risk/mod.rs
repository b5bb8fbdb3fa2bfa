pub mod circuit_breaker_service;
pub mod sizing;
pub mod validators;

use rust_decimal::Decimal;

use crate::domain::filters::validator_trait::{RiskValidator, ValidationContext, ValidationResult};
use crate::domain::position::Position;
use crate::domain::types::{AccountState, Instrument, Signal};

use circuit_breaker_service::CircuitBreakerService;

pub enum RiskDecision {
    Approved { quantity: Decimal, notional: Decimal },
    Rejected { reason: String },
}

/// Owns the ordered validator pipeline and the daily circuit breaker
/// (spec.md §4.5). `MAX_POSITIONS`/exposure/leverage/confidence/margin run
/// in the fixed order named by the spec, after the circuit breaker gate.
pub struct RiskManager {
    validators: Vec<Box<dyn RiskValidator>>,
    pub circuit_breaker: CircuitBreakerService,
}

impl RiskManager {
    pub fn new(
        max_positions: u32,
        max_exposure_pct: Decimal,
        min_leverage: u32,
        max_leverage: u32,
        entry_confidence: Decimal,
        exit_confidence: Decimal,
        max_margin_utilization_pct: Decimal,
        daily_loss_limit_pct: Decimal,
    ) -> Self {
        let validators: Vec<Box<dyn RiskValidator>> = vec![
            Box::new(validators::CircuitBreakerValidator),
            Box::new(validators::MaxPositionsValidator { max_positions }),
            Box::new(validators::ExposureValidator { max_exposure_pct }),
            Box::new(validators::LeverageBoundsValidator { min_leverage, max_leverage }),
            Box::new(validators::ConfidenceThresholdValidator {
                entry_confidence,
                exit_confidence,
                volatility_bump: Decimal::new(10, 2),
            }),
            Box::new(validators::MarginValidator { max_margin_utilization_pct }),
        ];
        Self { validators, circuit_breaker: CircuitBreakerService::new(daily_loss_limit_pct) }
    }

    pub async fn evaluate(
        &self,
        signal: &Signal,
        instrument: &Instrument,
        account: &AccountState,
        open_positions: &[Position],
        entry_price: Decimal,
        high_volatility: bool,
    ) -> RiskDecision {
        let tripped = self.circuit_breaker.is_tripped().await;
        let ctx = ValidationContext {
            signal,
            instrument,
            account,
            open_positions,
            entry_price,
            high_volatility,
            circuit_breaker_tripped: tripped,
        };

        match validators::run_pipeline(&self.validators, &ctx) {
            ValidationResult::Reject(reason) => RiskDecision::Rejected { reason },
            ValidationResult::Approve => match sizing::size_position(signal, entry_price, instrument) {
                Ok(sized) => RiskDecision::Approved { quantity: sized.quantity, notional: sized.notional },
                Err(e) => RiskDecision::Rejected { reason: e.to_string() },
            },
        }
    }
}
