//! Calls the configured LLM endpoint(s) in priority order with a per-model
//! circuit breaker and a failback cooldown (spec.md §4.4).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, warn};

use crate::domain::errors::{AdvisorError, CoreError};
use crate::domain::ports::{AdvisorCompletion, AdvisorProvider};
use crate::infrastructure::core::circuit_breaker::CircuitBreaker;

const MODEL_FAILURE_THRESHOLD: u32 = 2;
const MODEL_SUCCESS_THRESHOLD: u32 = 2;
const MODEL_COOLDOWN: Duration = Duration::from_secs(10 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 2;

/// One HTTP-backed LLM model, called through a plain (non-retrying) client;
/// this module owns its own retry loop so it can fail over between models.
pub struct HttpAdvisorModel {
    name: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpAdvisorModel {
    pub fn new(name: impl Into<String>, api_base: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.into(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            client: crate::infrastructure::core::http_client_factory::build_plain_client(REQUEST_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl AdvisorProvider for HttpAdvisorModel {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<AdvisorCompletion, CoreError> {
        let body = json!({
            "model": self.name,
            "temperature": 0.3,
            "messages": [{"role": "user", "content": prompt}],
        });
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::from(AdvisorError::Transport(e.to_string())))?;

        if resp.status().as_u16() == 429 {
            return Err(CoreError::from(AdvisorError::Transport("rate limited".into())));
        }
        if resp.status().is_server_error() {
            return Err(CoreError::from(AdvisorError::Transport(format!(
                "server error {}",
                resp.status()
            ))));
        }
        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::from(AdvisorError::Transport(e.to_string())))?;

        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let prompt_tokens = value["usage"]["prompt_tokens"].as_u64().map(|n| n as u32);
        let completion_tokens = value["usage"]["completion_tokens"].as_u64().map(|n| n as u32);

        Ok(AdvisorCompletion { text, prompt_tokens, completion_tokens })
    }
}

struct ModelSlot {
    provider: Arc<dyn AdvisorProvider>,
    breaker: CircuitBreaker,
    price_prompt: rust_decimal::Decimal,
    price_completion: rust_decimal::Decimal,
}

/// Priority-ordered advisor backends with per-model circuit breakers. If
/// every model is OPEN, the caller should emit a synthetic hold decision and
/// raise a CRITICAL alert (spec.md §4.4).
pub struct AdvisorClient {
    models: Vec<ModelSlot>,
}

pub struct AdvisorOutcome {
    pub model_name: String,
    pub completion: AdvisorCompletion,
    pub cost_usd: rust_decimal::Decimal,
}

impl AdvisorClient {
    pub fn new(models: Vec<(Arc<dyn AdvisorProvider>, rust_decimal::Decimal, rust_decimal::Decimal)>) -> Self {
        let models = models
            .into_iter()
            .map(|(provider, price_prompt, price_completion)| ModelSlot {
                breaker: CircuitBreaker::new(
                    provider.model_name().to_string(),
                    MODEL_FAILURE_THRESHOLD,
                    MODEL_SUCCESS_THRESHOLD,
                    MODEL_COOLDOWN,
                ),
                provider,
                price_prompt,
                price_completion,
            })
            .collect();
        Self { models }
    }

    /// Calls the highest-priority available model, retrying transient
    /// failures up to `MAX_RETRIES` before falling over to the next model.
    pub async fn complete(&self, prompt: &str, cheapest_only: bool) -> Result<AdvisorOutcome, AdvisorError> {
        let mut candidates: Vec<&ModelSlot> = self.models.iter().collect();
        if cheapest_only {
            candidates.sort_by_key(|m| m.price_prompt + m.price_completion);
            if let Some(cheapest) = candidates.first().copied() {
                candidates = vec![cheapest];
            }
        }

        for slot in candidates {
            if !slot.breaker.allow_request().await {
                continue;
            }
            let mut last_err = None;
            for attempt in 0..=MAX_RETRIES {
                match slot.provider.complete(prompt).await {
                    Ok(completion) => {
                        slot.breaker.record_success().await;
                        let cost = slot.price_prompt
                            * rust_decimal::Decimal::from(completion.prompt_tokens.unwrap_or(0))
                            + slot.price_completion
                                * rust_decimal::Decimal::from(completion.completion_tokens.unwrap_or(0));
                        return Ok(AdvisorOutcome {
                            model_name: slot.provider.model_name().to_string(),
                            completion,
                            cost_usd: cost,
                        });
                    }
                    Err(e) => {
                        warn!(model = slot.provider.model_name(), attempt, error = %e, "advisor call failed");
                        last_err = Some(e);
                        if attempt < MAX_RETRIES {
                            tokio::time::sleep(Duration::from_millis(200 * 2u64.pow(attempt))).await;
                        }
                    }
                }
            }
            slot.breaker.record_failure().await;
            let _ = last_err;
        }

        error!("all configured advisor models are open or failed");
        Err(AdvisorError::AllModelsOpen)
    }
}
