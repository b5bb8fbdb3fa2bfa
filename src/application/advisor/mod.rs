pub mod client;
pub mod cost_tracker;
pub mod parser;
pub mod prompt;

use rust_decimal::Decimal;
use tracing::{error, warn};

use crate::domain::errors::AdvisorError;
use crate::domain::types::{Signal, SignalAction};
use crate::domain::ports::AlertSeverity;

use client::AdvisorClient;
use cost_tracker::{BudgetStatus, CostTracker};
use prompt::PromptInputs;

/// Appended to the prompt before the retry attempt, after a response yielded
/// zero usable decisions (spec.md §4.4).
const RETRY_JSON_ONLY_ADDENDUM: &str =
    "\n\nYour previous response could not be used. Return ONLY a single JSON object matching the schema above, with no surrounding prose or markdown fences.";

/// Orchestrates one advisor call for a cycle: build prompt, invoke the
/// model chain, parse+validate, retry once on zero usable decisions, and
/// fall back to a synthetic hold for every symbol on total failure.
pub struct AdvisorService {
    client: AdvisorClient,
    cost_tracker: CostTracker,
    max_prompt_tokens: u32,
    max_risk_usd: Decimal,
    min_leverage: u32,
    max_leverage: u32,
}

pub struct AdvisorCycleResult {
    pub signals: Vec<Signal>,
    pub safe_default: bool,
    pub model_used: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub raw_response: Option<String>,
}

impl AdvisorService {
    pub fn new(
        client: AdvisorClient,
        cost_tracker: CostTracker,
        max_prompt_tokens: u32,
        max_risk_usd: Decimal,
        min_leverage: u32,
        max_leverage: u32,
    ) -> Self {
        Self { client, cost_tracker, max_prompt_tokens, max_risk_usd, min_leverage, max_leverage }
    }

    fn synthetic_hold(&self, configured_symbols: &[String]) -> Vec<Signal> {
        configured_symbols
            .iter()
            .map(|symbol| Signal {
                symbol: symbol.clone(),
                action: SignalAction::Hold,
                confidence: Decimal::ONE,
                risk_usd: Decimal::ZERO,
                leverage: self.min_leverage,
                stop_loss_pct: Decimal::new(1, 2),
                take_profit_pct: None,
                invalidation_conditions: Vec::new(),
                reasoning: "safe_default: advisor unavailable".to_string(),
            })
            .collect()
    }

    pub async fn run_cycle(
        &self,
        inputs: &PromptInputs,
        current_prices: &[(String, Decimal)],
        configured_symbols: &[String],
        alert_sink: &dyn crate::domain::ports::AlertSink,
    ) -> Result<AdvisorCycleResult, AdvisorError> {
        let cheapest_only = self.cost_tracker.status().await == BudgetStatus::Exceeded;
        if self.cost_tracker.status().await == BudgetStatus::Warning {
            alert_sink.emit(AlertSeverity::Warning, "advisor_budget", "daily LLM budget at or above 70%");
        }

        let Some(mut prompt_text) = prompt::build_prompt(inputs, current_prices, self.max_prompt_tokens) else {
            warn!("prompt_too_large");
            return Err(AdvisorError::ParseFailed);
        };

        let mut last_raw: Option<String> = None;
        let mut last_model: Option<String> = None;
        let mut last_tokens = (None, None);

        for attempt in 0..2 {
            let outcome = match self.client.complete(&prompt_text, cheapest_only).await {
                Ok(o) => o,
                Err(e) => {
                    error!(error = %e, "advisor_unavailable");
                    alert_sink.emit(AlertSeverity::Critical, "advisor_unavailable", "all advisor models are open");
                    return Ok(AdvisorCycleResult {
                        signals: self.synthetic_hold(configured_symbols),
                        safe_default: true,
                        model_used: None,
                        prompt_tokens: None,
                        completion_tokens: None,
                        raw_response: None,
                    });
                }
            };

            self.cost_tracker.record_cost(outcome.cost_usd).await;
            last_raw = Some(outcome.completion.text.clone());
            last_model = Some(outcome.model_name.clone());
            last_tokens = (outcome.completion.prompt_tokens, outcome.completion.completion_tokens);

            let Some(value) = parser::extract_json(&outcome.completion.text) else {
                if attempt == 0 {
                    prompt_text.push_str(RETRY_JSON_ONLY_ADDENDUM);
                    continue;
                }
                break;
            };
            let (signals, _rejections) = parser::parse_and_validate(
                &value,
                configured_symbols,
                self.max_risk_usd,
                self.min_leverage,
                self.max_leverage,
            );
            if !signals.is_empty() {
                return Ok(AdvisorCycleResult {
                    signals,
                    safe_default: false,
                    model_used: last_model,
                    prompt_tokens: last_tokens.0,
                    completion_tokens: last_tokens.1,
                    raw_response: last_raw,
                });
            }
            if attempt == 0 {
                prompt_text.push_str(RETRY_JSON_ONLY_ADDENDUM);
            }
        }

        warn!("advisor returned zero usable decisions after retry, falling back to safe default");
        Ok(AdvisorCycleResult {
            signals: self.synthetic_hold(configured_symbols),
            safe_default: true,
            model_used: last_model,
            prompt_tokens: last_tokens.0,
            completion_tokens: last_tokens.1,
            raw_response: last_raw,
        })
    }
}
