//! Response parsing: JSON extraction fallback chain, then per-field schema
//! validation with partial acceptance (spec.md §4.4).

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::types::{Signal, SignalAction};

#[derive(Debug, Deserialize)]
struct RawDecisions {
    decisions: Vec<RawDecision>,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    coin: String,
    action: String,
    confidence: f64,
    reasoning: String,
    risk_usd: f64,
    leverage: i64,
    stop_loss_pct: f64,
    take_profit_pct: Option<f64>,
    #[serde(default)]
    invalidation_conditions: Vec<String>,
}

/// Tries, in order: direct parse, fenced ```json block, first balanced
/// `{...}` substring, then a tolerant trailing-comma/unquoted-key fixup.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    if let Some(fenced) = extract_fenced_block(text) {
        if let Ok(v) = serde_json::from_str::<Value>(&fenced) {
            return Some(v);
        }
    }
    if let Some(braces) = extract_balanced_braces(text) {
        if let Ok(v) = serde_json::from_str::<Value>(&braces) {
            return Some(v);
        }
        let tolerant = tolerant_fixup(&braces);
        if let Ok(v) = serde_json::from_str::<Value>(&tolerant) {
            return Some(v);
        }
    }
    None
}

fn extract_fenced_block(text: &str) -> Option<String> {
    let start_marker = "```json";
    let start = text.find(start_marker)?;
    let after = &text[start + start_marker.len()..];
    let end = after.find("```")?;
    Some(after[..end].trim().to_string())
}

fn extract_balanced_braces(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Fixes trailing commas before `}`/`]` and quotes bare identifier keys.
fn tolerant_fixup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    let mut result = String::with_capacity(out.len());
    let chars: Vec<char> = out.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let prev_is_boundary = i == 0 || matches!(chars[i - 1], '{' | ',' | ' ' | '\n' | '\t');
        if prev_is_boundary && (c.is_alphabetic() || c == '_') {
            let start = i;
            let mut j = i;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let mut k = j;
            while k < chars.len() && chars[k].is_whitespace() {
                k += 1;
            }
            if k < chars.len() && chars[k] == ':' {
                result.push('"');
                result.extend(&chars[start..j]);
                result.push('"');
                i = j;
                continue;
            }
        }
        result.push(c);
        i += 1;
    }
    result
}

#[derive(Debug, Clone)]
pub struct RejectedDecision {
    pub coin: String,
    pub reason: String,
}

/// Validates each decision against spec.md §4.4's per-field rules. Invalid
/// decisions are discarded individually; valid ones are returned alongside
/// the rejections, so partial acceptance is possible.
pub fn parse_and_validate(
    value: &Value,
    configured_symbols: &[String],
    max_risk_usd: Decimal,
    min_leverage: u32,
    max_leverage: u32,
) -> (Vec<Signal>, Vec<RejectedDecision>) {
    let raw: RawDecisions = match serde_json::from_value(value.clone()) {
        Ok(r) => r,
        Err(_) => return (Vec::new(), Vec::new()),
    };

    let mut signals = Vec::new();
    let mut rejections = Vec::new();

    for d in raw.decisions {
        if let Err(reason) = validate_fields(
            &d,
            configured_symbols,
            max_risk_usd,
            min_leverage,
            max_leverage,
        ) {
            rejections.push(RejectedDecision { coin: d.coin, reason });
            continue;
        }

        let action = match d.action.as_str() {
            "buy_to_enter" => SignalAction::BuyToEnter,
            "sell_to_enter" => SignalAction::SellToEnter,
            "hold" => SignalAction::Hold,
            "close_position" => SignalAction::ClosePosition,
            _ => unreachable!("validated above"),
        };

        signals.push(Signal {
            symbol: d.coin,
            action,
            confidence: Decimal::try_from(d.confidence).unwrap_or_default(),
            risk_usd: Decimal::try_from(d.risk_usd).unwrap_or_default(),
            leverage: d.leverage as u32,
            stop_loss_pct: Decimal::try_from(d.stop_loss_pct).unwrap_or_default(),
            take_profit_pct: d.take_profit_pct.and_then(|v| Decimal::try_from(v).ok()),
            invalidation_conditions: d.invalidation_conditions,
            reasoning: d.reasoning,
        });
    }

    (signals, rejections)
}

fn validate_fields(
    d: &RawDecision,
    configured_symbols: &[String],
    max_risk_usd: Decimal,
    min_leverage: u32,
    max_leverage: u32,
) -> Result<(), String> {
    if !configured_symbols.iter().any(|s| s == &d.coin) {
        return Err("coin not in configured symbol universe".to_string());
    }
    if !matches!(d.action.as_str(), "buy_to_enter" | "sell_to_enter" | "hold" | "close_position") {
        return Err("unknown action".to_string());
    }
    if !(0.0..=1.0).contains(&d.confidence) {
        return Err("confidence out of [0,1]".to_string());
    }
    let len = d.reasoning.chars().count();
    if !(50..=500).contains(&len) {
        return Err("reasoning length out of [50,500]".to_string());
    }
    let risk_usd = Decimal::try_from(d.risk_usd).map_err(|_| "risk_usd not representable".to_string())?;
    if risk_usd <= Decimal::ZERO || risk_usd > max_risk_usd {
        return Err("risk_usd out of (0, MAX_RISK_USD]".to_string());
    }
    if d.leverage < min_leverage as i64 || d.leverage > max_leverage as i64 {
        return Err("leverage out of configured window".to_string());
    }
    if !(0.01..=0.10).contains(&d.stop_loss_pct) {
        return Err("stop_loss_pct out of [0.01,0.10]".to_string());
    }
    if let Some(tp) = d.take_profit_pct {
        if !(0.02..=0.30).contains(&tp) {
            return Err("take_profit_pct out of [0.02,0.30]".to_string());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn direct_parse_succeeds() {
        let text = r#"{"decisions":[]}"#;
        assert!(extract_json(text).is_some());
    }

    #[test]
    fn fenced_block_extracted() {
        let text = "here you go\n```json\n{\"decisions\":[]}\n```\nthanks";
        let v = extract_json(text).unwrap();
        assert_eq!(v["decisions"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn balanced_braces_extracted_from_prose() {
        let text = "Sure! {\"decisions\":[]} Let me know if you need more.";
        assert!(extract_json(text).is_some());
    }

    #[test]
    fn tolerant_fixup_handles_trailing_comma_and_unquoted_keys() {
        let text = r#"{decisions: [{"coin":"BTCUSDT",},]}"#;
        let v = extract_json(text).unwrap();
        assert!(v["decisions"].is_array());
    }

    #[test]
    fn valid_decision_is_accepted() {
        let value: Value = serde_json::from_str(
            r#"{"decisions":[{"coin":"BTCUSDT","action":"buy_to_enter","confidence":0.75,
               "reasoning":"Strong bullish momentum confirmed by EMA crossover and rising volume across recent candles.",
               "risk_usd":100,"leverage":10,"stop_loss_pct":0.02}]}"#,
        )
        .unwrap();
        let (signals, rejections) =
            parse_and_validate(&value, &["BTCUSDT".to_string()], dec!(5000), 5, 40);
        assert_eq!(signals.len(), 1);
        assert!(rejections.is_empty());
    }

    #[test]
    fn low_confidence_decision_rejected_individually_others_kept() {
        let value: Value = serde_json::from_str(
            r#"{"decisions":[
                {"coin":"BTCUSDT","action":"buy_to_enter","confidence":2.0,
                 "reasoning":"This confidence value is out of range and must be rejected by the validator.",
                 "risk_usd":100,"leverage":10,"stop_loss_pct":0.02},
                {"coin":"ETHUSDT","action":"hold","confidence":0.5,
                 "reasoning":"Holding steady, no clear directional signal present in the current indicator set today.",
                 "risk_usd":100,"leverage":10,"stop_loss_pct":0.02}
            ]}"#,
        )
        .unwrap();
        let (signals, rejections) = parse_and_validate(
            &value,
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            dec!(5000),
            5,
            40,
        );
        assert_eq!(signals.len(), 1);
        assert_eq!(rejections.len(), 1);
    }
}
