//! Template-driven, token-budgeted prompt construction (spec.md §4.4).

use rust_decimal::Decimal;

use crate::domain::position::Position;
use crate::domain::types::{AccountState, MarketSnapshot};

pub const PROMPT_TEMPLATE_VERSION: &str = "v1";

#[derive(Debug, Clone)]
pub struct PromptInputs {
    pub snapshots: Vec<MarketSnapshot>,
    pub open_positions: Vec<Position>,
    pub account: AccountState,
}

/// Rough token estimate: ~4 characters per token, matching common BPE
/// tokenizers closely enough to budget against without a real tokenizer.
pub fn estimate_tokens(text: &str) -> u32 {
    ((text.chars().count() as f64) / 4.0).ceil() as u32
}

fn render_snapshot(s: &MarketSnapshot) -> String {
    format!(
        "{{\"symbol\":\"{}\",\"closes\":{:?},\"candle\":{{\"o\":{},\"h\":{},\"l\":{},\"c\":{}}},\"indicators\":{{\"ema9\":{:?},\"ema20\":{:?},\"ema50\":{:?},\"rsi14\":{:?},\"macd\":{:?}}},\"oi\":{:?},\"funding\":{:?}}}",
        s.symbol,
        s.last_closes,
        s.current_candle.open,
        s.current_candle.high,
        s.current_candle.low,
        s.current_candle.close,
        s.indicators.ema_9,
        s.indicators.ema_20,
        s.indicators.ema_50,
        s.indicators.rsi_14,
        s.indicators.macd_line,
        s.open_interest,
        s.funding_rate,
    )
}

fn render_position(p: &Position, current_price: Decimal) -> String {
    format!(
        "{{\"symbol\":\"{}\",\"side\":\"{:?}\",\"size\":{},\"entry\":{},\"pnl\":{}}}",
        p.symbol,
        p.side,
        p.quantity,
        p.entry_price,
        p.unrealized_pnl(current_price)
    )
}

const SYSTEM_MESSAGE: &str = r#"You are a perpetual-futures trading advisor. Respond with strict JSON only, matching: {"decisions":[{"coin":string,"action":"buy_to_enter"|"sell_to_enter"|"hold"|"close_position","confidence":number,"reasoning":string,"risk_usd":number,"leverage":integer,"stop_loss_pct":number,"take_profit_pct":number?,"invalidation_conditions":[string]?}]}. No prose outside the JSON."#;

/// Builds the prompt, trimming in the fixed order of spec.md §4.4 until it
/// fits `max_tokens`, or returning `None` if it still doesn't (caller should
/// then SKIP the cycle with `prompt_too_large`).
pub fn build_prompt(
    inputs: &PromptInputs,
    current_prices: &[(String, Decimal)],
    max_tokens: u32,
) -> Option<String> {
    let mut snapshots = inputs.snapshots.clone();
    let mut positions = inputs.open_positions.clone();
    let mut closes_cap = 20usize;
    let mut drop_non_actionable_indicators = false;

    for attempt in 0..4 {
        if attempt == 1 {
            closes_cap = 10;
        }
        if attempt == 2 {
            drop_non_actionable_indicators = true;
        }
        if attempt == 3 && !positions.is_empty() {
            positions.sort_by_key(|p| {
                let price = current_prices
                    .iter()
                    .find(|(sym, _)| sym == &p.symbol)
                    .map(|(_, px)| *px)
                    .unwrap_or(p.entry_price);
                p.unrealized_pnl(price).abs()
            });
            positions.remove(0);
        }

        let market_block: String = snapshots
            .iter()
            .map(|s| {
                let mut s = s.clone();
                if s.last_closes.len() > closes_cap {
                    let start = s.last_closes.len() - closes_cap;
                    s.last_closes = s.last_closes[start..].to_vec();
                }
                if drop_non_actionable_indicators {
                    s.indicators.bollinger_upper = None;
                    s.indicators.bollinger_lower = None;
                }
                render_snapshot(&s)
            })
            .collect::<Vec<_>>()
            .join(",");

        let portfolio_block: String = positions
            .iter()
            .map(|p| {
                let price = current_prices
                    .iter()
                    .find(|(sym, _)| sym == &p.symbol)
                    .map(|(_, px)| *px)
                    .unwrap_or(p.entry_price);
                render_position(p, price)
            })
            .collect::<Vec<_>>()
            .join(",");

        let account_block = format!(
            "{{\"balance\":{},\"available_margin\":{}}}",
            inputs.account.balance, inputs.account.available_margin
        );

        let prompt = format!(
            "{SYSTEM_MESSAGE}\nMARKET:[{market_block}]\nPORTFOLIO:[{portfolio_block}]\nACCOUNT:{account_block}"
        );

        if estimate_tokens(&prompt) <= max_tokens {
            return Some(prompt);
        }
        snapshots = inputs.snapshots.clone();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot(symbol: &str) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            last_closes: vec![dec!(100); 20],
            current_candle: crate::domain::types::Candle {
                open_time: Utc::now(),
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100),
                volume: dec!(10),
                exchange_timestamp: Utc::now(),
            },
            indicators: Default::default(),
            open_interest: None,
            funding_rate: None,
            staleness: std::time::Duration::ZERO,
            data_quality: Default::default(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn fits_within_budget_for_small_input() {
        let inputs = PromptInputs {
            snapshots: vec![snapshot("BTCUSDT")],
            open_positions: vec![],
            account: AccountState { balance: dec!(10000), available_margin: dec!(10000), total_unrealized_pnl: dec!(0) },
        };
        let prompt = build_prompt(&inputs, &[], 8000).unwrap();
        assert!(estimate_tokens(&prompt) <= 8000);
    }

    #[test]
    fn returns_none_when_impossibly_small_budget() {
        let inputs = PromptInputs {
            snapshots: (0..20).map(|i| snapshot(&format!("SYM{i}"))).collect(),
            open_positions: vec![],
            account: AccountState { balance: dec!(10000), available_margin: dec!(10000), total_unrealized_pnl: dec!(0) },
        };
        assert!(build_prompt(&inputs, &[], 1).is_none());
    }
}
