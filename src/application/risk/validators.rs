//! The ordered pipeline of risk validators (spec.md §4.5). First rejection
//! short-circuits the remaining stages.

use rust_decimal::Decimal;

use crate::domain::filters::validator_trait::{RiskValidator, ValidationContext, ValidationResult};
use crate::domain::types::SignalAction;

pub struct CircuitBreakerValidator;
impl RiskValidator for CircuitBreakerValidator {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }
    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if ctx.circuit_breaker_tripped {
            ValidationResult::Reject("circuit_breaker".into())
        } else {
            ValidationResult::Approve
        }
    }
}

pub struct MaxPositionsValidator {
    pub max_positions: u32,
}
impl RiskValidator for MaxPositionsValidator {
    fn name(&self) -> &'static str {
        "max_positions"
    }
    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if !matches!(ctx.signal.action, SignalAction::BuyToEnter | SignalAction::SellToEnter) {
            return ValidationResult::Approve;
        }
        if ctx.open_positions.len() as u32 >= self.max_positions {
            ValidationResult::Reject("max_positions".into())
        } else {
            ValidationResult::Approve
        }
    }
}

pub struct ExposureValidator {
    pub max_exposure_pct: Decimal,
}
impl RiskValidator for ExposureValidator {
    fn name(&self) -> &'static str {
        "exposure"
    }
    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if !matches!(ctx.signal.action, SignalAction::BuyToEnter | SignalAction::SellToEnter) {
            return ValidationResult::Approve;
        }
        let existing: Decimal = ctx
            .open_positions
            .iter()
            .map(|p| p.notional(ctx.entry_price))
            .sum();
        let candidate_notional = ctx.signal.risk_usd * Decimal::from(ctx.signal.leverage);
        let equity = ctx.account.equity();
        if equity <= Decimal::ZERO {
            return ValidationResult::Reject("exposure".into());
        }
        let total_pct = (existing + candidate_notional) / equity;
        if total_pct > self.max_exposure_pct {
            ValidationResult::Reject("exposure".into())
        } else {
            ValidationResult::Approve
        }
    }
}

pub struct LeverageBoundsValidator {
    pub min_leverage: u32,
    pub max_leverage: u32,
}
impl RiskValidator for LeverageBoundsValidator {
    fn name(&self) -> &'static str {
        "leverage_bounds"
    }
    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if !matches!(ctx.signal.action, SignalAction::BuyToEnter | SignalAction::SellToEnter) {
            return ValidationResult::Approve;
        }
        if ctx.signal.leverage < self.min_leverage || ctx.signal.leverage > self.max_leverage {
            ValidationResult::Reject("leverage_out_of_bounds".into())
        } else {
            ValidationResult::Approve
        }
    }
}

pub struct ConfidenceThresholdValidator {
    pub entry_confidence: Decimal,
    pub exit_confidence: Decimal,
    pub volatility_bump: Decimal,
}
impl RiskValidator for ConfidenceThresholdValidator {
    fn name(&self) -> &'static str {
        "confidence_threshold"
    }
    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        let threshold = match ctx.signal.action {
            SignalAction::BuyToEnter | SignalAction::SellToEnter => {
                let mut t = self.entry_confidence;
                if ctx.high_volatility {
                    t += self.volatility_bump;
                }
                t
            }
            SignalAction::ClosePosition => self.exit_confidence,
            SignalAction::Hold => return ValidationResult::Approve,
        };
        if ctx.signal.confidence >= threshold {
            ValidationResult::Approve
        } else {
            ValidationResult::Reject("low_confidence".into())
        }
    }
}

pub struct MarginValidator {
    pub max_margin_utilization_pct: Decimal,
}
impl RiskValidator for MarginValidator {
    fn name(&self) -> &'static str {
        "margin"
    }
    fn validate(&self, ctx: &ValidationContext<'_>) -> ValidationResult {
        if !matches!(ctx.signal.action, SignalAction::BuyToEnter | SignalAction::SellToEnter) {
            return ValidationResult::Approve;
        }
        let notional = ctx.signal.risk_usd * Decimal::from(ctx.signal.leverage);
        let required_margin = notional / Decimal::from(ctx.signal.leverage.max(1));
        if ctx.account.available_margin <= Decimal::ZERO {
            return ValidationResult::Reject("insufficient_margin".into());
        }
        if required_margin > ctx.account.available_margin * self.max_margin_utilization_pct {
            ValidationResult::Reject("insufficient_margin".into())
        } else {
            ValidationResult::Approve
        }
    }
}

/// Runs the full ordered pipeline, stopping at the first rejection.
pub fn run_pipeline(validators: &[Box<dyn RiskValidator>], ctx: &ValidationContext<'_>) -> ValidationResult {
    for v in validators {
        match v.validate(ctx) {
            ValidationResult::Approve => continue,
            rejection => return rejection,
        }
    }
    ValidationResult::Approve
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AccountState, Instrument, Signal};
    use rust_decimal_macros::dec;

    fn instrument() -> Instrument {
        Instrument {
            symbol: "BTCUSDT".into(),
            tick_size: dec!(0.1),
            lot_size: dec!(0.001),
            min_notional: dec!(10),
            max_exchange_leverage: 125,
        }
    }

    fn signal(confidence: Decimal) -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            action: SignalAction::BuyToEnter,
            confidence,
            risk_usd: dec!(100),
            leverage: 10,
            stop_loss_pct: dec!(0.02),
            take_profit_pct: None,
            invalidation_conditions: vec![],
            reasoning: "x".repeat(60),
        }
    }

    fn account() -> AccountState {
        AccountState { balance: dec!(10000), available_margin: dec!(10000), total_unrealized_pnl: dec!(0) }
    }

    #[test]
    fn confidence_exactly_at_threshold_is_accepted() {
        let validator = ConfidenceThresholdValidator {
            entry_confidence: dec!(0.60),
            exit_confidence: dec!(0.50),
            volatility_bump: dec!(0.10),
        };
        let instrument = instrument();
        let acct = account();
        let sig = signal(dec!(0.60));
        let ctx = ValidationContext {
            signal: &sig,
            instrument: &instrument,
            account: &acct,
            open_positions: &[],
            entry_price: dec!(50000),
            high_volatility: false,
            circuit_breaker_tripped: false,
        };
        assert_eq!(validator.validate(&ctx), ValidationResult::Approve);
    }

    #[test]
    fn pipeline_short_circuits_on_first_rejection() {
        let validators: Vec<Box<dyn RiskValidator>> = vec![
            Box::new(CircuitBreakerValidator),
            Box::new(MaxPositionsValidator { max_positions: 6 }),
        ];
        let instrument = instrument();
        let acct = account();
        let sig = signal(dec!(0.75));
        let ctx = ValidationContext {
            signal: &sig,
            instrument: &instrument,
            account: &acct,
            open_positions: &[],
            entry_price: dec!(50000),
            high_volatility: false,
            circuit_breaker_tripped: true,
        };
        assert_eq!(run_pipeline(&validators, &ctx), ValidationResult::Reject("circuit_breaker".into()));
    }
}
