//! Frozen configuration, loaded once at startup (spec.md §6).

use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AdvisorModelConfig {
    pub name: String,
    pub price_per_prompt_token_usd: Decimal,
    pub price_per_completion_token_usd: Decimal,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub trading_symbols: Vec<String>,
    pub trading_cycle_interval: Duration,
    pub cycle_deadline: Duration,
    pub max_positions: u32,
    pub max_exposure_pct: Decimal,
    pub max_risk_usd: Decimal,
    pub min_leverage: u32,
    pub max_leverage: u32,
    pub daily_loss_limit_pct: Decimal,
    pub emergency_liquidation_pct: Decimal,
    pub entry_confidence: Decimal,
    pub exit_confidence: Decimal,
    pub ws_staleness_max: Duration,
    pub order_fill_timeout: Duration,
    pub exchange_rate_limit_per_min: u32,
    pub max_prompt_tokens: u32,
    pub daily_llm_budget_usd: Decimal,
    pub advisor_models: Vec<AdvisorModelConfig>,
    pub paper_trading: bool,
    pub max_symbol_concurrency: usize,
    pub database_url: String,
    pub exchange_api_key: String,
    pub exchange_api_secret: String,
    pub advisor_api_key: String,
    pub advisor_api_base: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("failed to parse {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list_or(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) => v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        Err(_) => default,
    }
}

impl Config {
    /// Mirrors the long-standing pattern: each key read via `env::var`,
    /// parsed with a contextual error, defaulted per the table in spec.md §6.
    pub fn from_env() -> anyhow::Result<Self> {
        let default_symbols = vec![
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
            "SOLUSDT".to_string(),
            "BNBUSDT".to_string(),
            "XRPUSDT".to_string(),
            "ADAUSDT".to_string(),
        ];
        let trading_symbols = env_list_or("TRADING_SYMBOLS", default_symbols);

        let trading_cycle_interval = Duration::from_secs(
            env_or::<u64>("TRADING_CYCLE_INTERVAL_SECONDS", 180)
                .context("Failed to parse TRADING_CYCLE_INTERVAL_SECONDS")?,
        );
        let cycle_deadline = Duration::from_millis(
            env_or::<u64>("CYCLE_DEADLINE_MS", 2000).context("Failed to parse CYCLE_DEADLINE_MS")?,
        );
        let max_positions =
            env_or::<u32>("MAX_POSITIONS", 6).context("Failed to parse MAX_POSITIONS")?;
        let max_exposure_pct = Decimal::from_str(&env_or_string("MAX_EXPOSURE_PCT", "0.80"))
            .context("Failed to parse MAX_EXPOSURE_PCT")?;
        let max_risk_usd = Decimal::from_str(&env_or_string("MAX_RISK_USD", "5000"))
            .context("Failed to parse MAX_RISK_USD")?;
        let min_leverage =
            env_or::<u32>("MIN_LEVERAGE", 5).context("Failed to parse MIN_LEVERAGE")?;
        let max_leverage =
            env_or::<u32>("MAX_LEVERAGE", 40).context("Failed to parse MAX_LEVERAGE")?;
        let daily_loss_limit_pct = Decimal::from_str(&env_or_string("DAILY_LOSS_LIMIT_PCT", "0.05"))
            .context("Failed to parse DAILY_LOSS_LIMIT_PCT")?;
        let emergency_liquidation_pct =
            Decimal::from_str(&env_or_string("EMERGENCY_LIQUIDATION_PCT", "0.15"))
                .context("Failed to parse EMERGENCY_LIQUIDATION_PCT")?;
        let entry_confidence = Decimal::from_str(&env_or_string("ENTRY_CONFIDENCE", "0.60"))
            .context("Failed to parse ENTRY_CONFIDENCE")?;
        let exit_confidence = Decimal::from_str(&env_or_string("EXIT_CONFIDENCE", "0.50"))
            .context("Failed to parse EXIT_CONFIDENCE")?;
        let ws_staleness_max = Duration::from_secs(
            env_or::<u64>("WS_STALENESS_MAX_SEC", 30).context("Failed to parse WS_STALENESS_MAX_SEC")?,
        );
        let order_fill_timeout = Duration::from_secs(
            env_or::<u64>("ORDER_FILL_TIMEOUT_SEC", 5)
                .context("Failed to parse ORDER_FILL_TIMEOUT_SEC")?,
        );
        let exchange_rate_limit_per_min = env_or::<u32>("EXCHANGE_RATE_LIMIT_PER_MIN", 1200)
            .context("Failed to parse EXCHANGE_RATE_LIMIT_PER_MIN")?;
        let max_prompt_tokens =
            env_or::<u32>("MAX_PROMPT_TOKENS", 8000).context("Failed to parse MAX_PROMPT_TOKENS")?;
        let daily_llm_budget_usd = Decimal::from_str(&env_or_string("DAILY_LLM_BUDGET_USD", "3.33"))
            .context("Failed to parse DAILY_LLM_BUDGET_USD")?;
        let paper_trading =
            env_or::<bool>("PAPER_TRADING", true).context("Failed to parse PAPER_TRADING")?;
        let max_symbol_concurrency = env_or::<usize>("MAX_SYMBOL_CONCURRENCY", trading_symbols.len())
            .context("Failed to parse MAX_SYMBOL_CONCURRENCY")?;

        let advisor_models = parse_advisor_models(&env_or_string(
            "ADVISOR_MODELS",
            "primary:0.000003:0.000015",
        ))?;

        Ok(Self {
            trading_symbols,
            trading_cycle_interval,
            cycle_deadline,
            max_positions,
            max_exposure_pct,
            max_risk_usd,
            min_leverage,
            max_leverage,
            daily_loss_limit_pct,
            emergency_liquidation_pct,
            entry_confidence,
            exit_confidence,
            ws_staleness_max,
            order_fill_timeout,
            exchange_rate_limit_per_min,
            max_prompt_tokens,
            daily_llm_budget_usd,
            advisor_models,
            paper_trading,
            max_symbol_concurrency,
            database_url: env_or_string("DATABASE_URL", "sqlite://rustrade-core.db"),
            exchange_api_key: env_or_string("EXCHANGE_API_KEY", ""),
            exchange_api_secret: env_or_string("EXCHANGE_API_SECRET", ""),
            advisor_api_key: env_or_string("ADVISOR_API_KEY", ""),
            advisor_api_base: env_or_string("ADVISOR_API_BASE", "https://api.openai.com/v1"),
        })
    }
}

/// `name:prompt_price:completion_price,...`, priority order left-to-right.
fn parse_advisor_models(spec: &str) -> anyhow::Result<Vec<AdvisorModelConfig>> {
    spec.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|entry| {
            let mut parts = entry.trim().splitn(3, ':');
            let name = parts
                .next()
                .ok_or_else(|| anyhow::anyhow!("ADVISOR_MODELS entry missing name"))?
                .to_string();
            let prompt_price = parts
                .next()
                .unwrap_or("0")
                .parse::<Decimal>()
                .context("Failed to parse advisor model prompt price")?;
            let completion_price = parts
                .next()
                .unwrap_or("0")
                .parse::<Decimal>()
                .context("Failed to parse advisor model completion price")?;
            Ok(AdvisorModelConfig {
                name,
                price_per_prompt_token_usd: prompt_price,
                price_per_completion_token_usd: completion_price,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_model() {
        let models = parse_advisor_models("gpt-main:0.000003:0.000015").unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "gpt-main");
    }

    #[test]
    fn parses_multiple_models_preserving_priority_order() {
        let models = parse_advisor_models("a:0.1:0.2,b:0.01:0.02").unwrap();
        assert_eq!(models[0].name, "a");
        assert_eq!(models[1].name, "b");
    }
}
