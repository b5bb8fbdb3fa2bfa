//! Position sizing (spec.md §4.5). Rounding is always down to avoid
//! insufficient-margin errors.

use rust_decimal::Decimal;

use crate::domain::errors::RiskError;
use crate::domain::types::{Instrument, Signal};

pub struct SizingResult {
    pub notional: Decimal,
    pub quantity: Decimal,
}

pub fn size_position(signal: &Signal, entry_price: Decimal, instrument: &Instrument) -> Result<SizingResult, RiskError> {
    let notional = signal.risk_usd * Decimal::from(signal.leverage);
    let raw_quantity = notional / entry_price;
    let lot = instrument.lot_size;
    let quantity = if lot > Decimal::ZERO {
        (raw_quantity / lot).floor() * lot
    } else {
        raw_quantity
    };

    let rounded_notional = quantity * entry_price;
    if rounded_notional < instrument.min_notional {
        return Err(RiskError::BelowMinNotional);
    }

    Ok(SizingResult { notional: rounded_notional, quantity })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SignalAction;
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

    fn signal(risk_usd: Decimal, leverage: u32) -> Signal {
        Signal {
            symbol: "BTCUSDT".into(),
            action: SignalAction::BuyToEnter,
            confidence: dec!(0.75),
            risk_usd,
            leverage,
            stop_loss_pct: dec!(0.02),
            take_profit_pct: None,
            invalidation_conditions: vec![],
            reasoning: "x".repeat(60),
        }
    }

    #[test]
    fn happy_path_sizing_matches_spec_example() {
        let s = signal(dec!(100), 10);
        let result = size_position(&s, dec!(50000), &instrument()).unwrap();
        assert_eq!(result.quantity, dec!(0.020));
    }

    #[test]
    fn rounds_down_to_lot_step() {
        let s = signal(dec!(101), 10);
        let result = size_position(&s, dec!(50000), &instrument()).unwrap();
        assert!(result.quantity <= dec!(0.0202));
        assert_eq!(result.quantity % dec!(0.001), dec!(0));
    }

    #[test]
    fn rejects_below_min_notional() {
        let s = signal(dec!(1), 1);
        let result = size_position(&s, dec!(50000), &instrument());
        assert!(matches!(result, Err(RiskError::BelowMinNotional)));
    }
}
