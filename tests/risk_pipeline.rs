use rust_decimal_macros::dec;
use rustrade_core::application::risk::{RiskDecision, RiskManager};
use rustrade_core::domain::types::{AccountState, Instrument, Signal, SignalAction};

fn instrument() -> Instrument {
    Instrument {
        symbol: "BTCUSDT".into(),
        tick_size: dec!(0.1),
        lot_size: dec!(0.001),
        min_notional: dec!(10),
        max_exchange_leverage: 125,
    }
}

fn account() -> AccountState {
    AccountState { balance: dec!(100000), available_margin: dec!(100000), total_unrealized_pnl: dec!(0) }
}

fn buy_signal(confidence: rust_decimal::Decimal) -> Signal {
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

fn manager() -> RiskManager {
    RiskManager::new(6, dec!(0.80), 5, 40, dec!(0.60), dec!(0.50), dec!(0.90), dec!(0.07))
}

#[tokio::test]
async fn happy_path_buy_is_approved_and_sized() {
    let risk = manager();
    let instrument = instrument();
    let acct = account();
    let signal = buy_signal(dec!(0.75));

    let decision = risk.evaluate(&signal, &instrument, &acct, &[], dec!(50000), false).await;
    match decision {
        RiskDecision::Approved { quantity, .. } => assert_eq!(quantity, dec!(0.020)),
        RiskDecision::Rejected { reason } => panic!("expected approval, got rejection: {reason}"),
    }
}

#[tokio::test]
async fn low_confidence_is_rejected() {
    let risk = manager();
    let instrument = instrument();
    let acct = account();
    let signal = buy_signal(dec!(0.50));

    let decision = risk.evaluate(&signal, &instrument, &acct, &[], dec!(50000), false).await;
    match decision {
        RiskDecision::Rejected { reason } => assert_eq!(reason, "low_confidence"),
        RiskDecision::Approved { .. } => panic!("expected rejection"),
    }
}

#[tokio::test]
async fn circuit_breaker_trip_rejects_every_new_signal() {
    let risk = manager();
    let instrument = instrument();
    let acct = account();
    let signal = buy_signal(dec!(0.90));

    assert!(risk.circuit_breaker.evaluate(dec!(-0.071)).await);

    let decision = risk.evaluate(&signal, &instrument, &acct, &[], dec!(50000), false).await;
    match decision {
        RiskDecision::Rejected { reason } => assert_eq!(reason, "circuit_breaker"),
        RiskDecision::Approved { .. } => panic!("expected rejection after circuit breaker trip"),
    }
}

#[tokio::test]
async fn exposure_limit_rejects_when_over_80_pct_of_equity() {
    let risk = manager();
    let instrument = instrument();
    let acct = AccountState { balance: dec!(1000), available_margin: dec!(1000), total_unrealized_pnl: dec!(0) };
    let signal = buy_signal(dec!(0.90));

    let decision = risk.evaluate(&signal, &instrument, &acct, &[], dec!(50000), false).await;
    match decision {
        RiskDecision::Rejected { reason } => assert_eq!(reason, "exposure"),
        RiskDecision::Approved { .. } => panic!("expected exposure rejection"),
    }
}
