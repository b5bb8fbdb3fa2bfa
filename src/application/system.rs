//! Wires every component into one running `Application` (grounded on the
//! long-standing build/start pattern: construct from `Config`, spawn
//! background tasks, run the scheduler loop, shut down gracefully).

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::application::advisor::client::{AdvisorClient, HttpAdvisorModel};
use crate::application::advisor::cost_tracker::CostTracker;
use crate::application::advisor::prompt::PromptInputs;
use crate::application::advisor::AdvisorService;
use crate::application::audit::alerts::TracingAlertSink;
use crate::application::audit::metrics::Metrics;
use crate::application::audit::{hash_snapshot, Audit};
use crate::application::execution::{Executor, ExecutionOutcome};
use crate::application::market_data::MarketDataService;
use crate::application::position::reconciliation;
use crate::application::position::store::PositionStore;
use crate::application::position::PositionManager;
use crate::application::risk::{RiskDecision, RiskManager};
use crate::application::scheduler::{CycleTick, Scheduler};
use crate::config::Config;
use crate::domain::ports::{AlertSeverity, AlertSink, DailyCounterRepository, DecisionLogRepository, ExchangeGateway, PositionRepository};
use crate::domain::types::{DecisionOutcome, IndicatorSet, Instrument, MarketSnapshot, SignalAction};
use crate::infrastructure::exchange::paper::PaperExchange;
use crate::infrastructure::persistence::database::Database;
use crate::infrastructure::persistence::repositories::{SqliteDailyCounterRepository, SqliteDecisionLogRepository, SqlitePositionRepository};

const RECONCILE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30 * 60);

pub struct Application {
    config: Config,
    gateway: Arc<dyn ExchangeGateway>,
    market_data: Arc<MarketDataService>,
    advisor: Arc<AdvisorService>,
    risk: Arc<RiskManager>,
    position_manager: Arc<PositionManager>,
    executor: Arc<Executor>,
    audit: Arc<Audit>,
    metrics: Arc<Metrics>,
    alert_sink: Arc<dyn AlertSink>,
    daily_counters: Arc<dyn DailyCounterRepository>,
    instruments: HashMap<String, Instrument>,
    shutdown: CancellationToken,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();
        let alert_sink: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);
        let metrics = Arc::new(Metrics::new()?);

        let db = Database::new(&config.database_url).await?;
        let decision_log: Arc<dyn DecisionLogRepository> = Arc::new(SqliteDecisionLogRepository::new(db.clone()));
        let position_repo: Arc<dyn PositionRepository> = Arc::new(SqlitePositionRepository::new(db.clone()));
        let daily_counters: Arc<dyn DailyCounterRepository> = Arc::new(SqliteDailyCounterRepository::new(db.clone()));

        let gateway: Arc<dyn ExchangeGateway> = Arc::new(PaperExchange::new_with_rate_limit(
            Decimal::from(100_000),
            config.exchange_rate_limit_per_min,
            alert_sink.clone(),
        ));

        let market_data = Arc::new(MarketDataService::new(&config.trading_symbols, config.ws_staleness_max));
        for symbol in &config.trading_symbols {
            let candles = gateway.fetch_ohlcv(symbol, 60, None, 200).await.unwrap_or_default();
            market_data.seed(symbol, candles);
        }

        let models: Vec<_> = config
            .advisor_models
            .iter()
            .map(|m| {
                let provider: Arc<dyn crate::domain::ports::AdvisorProvider> = Arc::new(
                    HttpAdvisorModel::new(m.name.clone(), config.advisor_api_base.clone(), config.advisor_api_key.clone())
                        .expect("advisor http client builds"),
                );
                (provider, m.price_per_prompt_token_usd, m.price_per_completion_token_usd)
            })
            .collect();
        let advisor_client = AdvisorClient::new(models);
        let cost_tracker = CostTracker::new(config.daily_llm_budget_usd);
        let advisor = Arc::new(AdvisorService::new(
            advisor_client,
            cost_tracker,
            config.max_prompt_tokens,
            config.max_risk_usd,
            config.min_leverage,
            config.max_leverage,
        ));

        let risk = Arc::new(RiskManager::new(
            config.max_positions,
            config.max_exposure_pct,
            config.min_leverage,
            config.max_leverage,
            config.entry_confidence,
            config.exit_confidence,
            Decimal::new(90, 2),
            config.daily_loss_limit_pct,
        ));

        let position_store = Arc::new(PositionStore::new(position_repo));
        position_store.load_from_repository().await?;
        let position_manager = Arc::new(PositionManager::new(
            position_store.clone(),
            gateway.clone(),
            alert_sink.clone(),
            daily_counters.clone(),
            config.emergency_liquidation_pct,
            shutdown.clone(),
        ));

        let executor = Arc::new(Executor::new(gateway.clone(), config.order_fill_timeout));
        let audit = Arc::new(Audit::new(decision_log));

        let instruments = config
            .trading_symbols
            .iter()
            .map(|s| {
                (
                    s.clone(),
                    Instrument {
                        symbol: s.clone(),
                        tick_size: Decimal::new(1, 1),
                        lot_size: Decimal::new(1, 3),
                        min_notional: Decimal::from(10),
                        max_exchange_leverage: 125,
                    },
                )
            })
            .collect();

        Ok(Self {
            config,
            gateway,
            market_data,
            advisor,
            risk,
            position_manager,
            executor,
            audit,
            metrics,
            alert_sink,
            daily_counters,
            instruments,
            shutdown,
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn start(self: Arc<Self>) {
        self.position_manager.spawn_emergency_liquidator();
        self.clone().spawn_reconciliation_loop();

        let scheduler = Scheduler::new(self.config.trading_cycle_interval, self.config.cycle_deadline, self.shutdown.clone());
        let app = self.clone();
        scheduler
            .run(move |tick| {
                let app = app.clone();
                async move { app.run_cycle(tick).await }
            })
            .await;
    }

    fn spawn_reconciliation_loop(self: Arc<Self>) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(RECONCILE_INTERVAL) => {
                        if let Ok(exchange_positions) = self.gateway.fetch_positions().await {
                            reconciliation::reconcile(&self.position_manager.store, self.gateway.as_ref(), self.alert_sink.as_ref(), &exchange_positions).await;
                        }
                    }
                }
            }
        });
    }

    async fn run_cycle(&self, tick: CycleTick) {
        let account = match self.gateway.fetch_account_state().await {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "failed to fetch account state, skipping cycle");
                self.metrics.cycles_skipped_total.with_label_values(&["account_fetch_failed"]).inc();
                return;
            }
        };

        let realized_pnl_today = self.daily_counters.realized_pnl_today().await.unwrap_or_else(|e| {
            error!(error = %e, "failed to read realized pnl, treating as zero for this cycle");
            Decimal::ZERO
        });
        let realized_pnl_pct = if account.balance > Decimal::ZERO { realized_pnl_today / account.balance } else { Decimal::ZERO };
        self.risk.circuit_breaker.evaluate(realized_pnl_pct).await;
        if self.risk.circuit_breaker.is_tripped().await {
            self.liquidate_all_on_trip(tick.cycle_id.0).await;
        }

        let mut snapshots = Vec::new();
        let mut current_prices = Vec::new();
        for symbol in &self.config.trading_symbols {
            if !self.market_data.is_warmed_up(symbol) {
                continue;
            }
            if let Ok(price) = self.gateway.fetch_ticker(symbol).await {
                current_prices.push((symbol.clone(), price));
            }
            if let Ok(snapshot) = self.market_data.build_snapshot(symbol, None, None) {
                snapshots.push(snapshot);
            }
        }

        if snapshots.is_empty() {
            self.metrics.cycles_skipped_total.with_label_values(&["no_warmed_up_symbols"]).inc();
            return;
        }

        let open_positions = self.position_manager.store.open_positions().await;
        let prompt_inputs = PromptInputs { snapshots: snapshots.clone(), open_positions: open_positions.clone(), account };

        let cycle_result = self
            .advisor
            .run_cycle(&prompt_inputs, &current_prices, &self.config.trading_symbols, self.alert_sink.as_ref())
            .await;

        let Ok(result) = cycle_result else {
            self.metrics.cycles_skipped_total.with_label_values(&["advisor_error"]).inc();
            return;
        };

        if tokio::time::Instant::now() >= tick.safe_execution_cutoff {
            warn!(cycle_id = tick.cycle_id.0, "cycle past safe execution cutoff, skipping execution phase");
            self.metrics.cycles_skipped_total.with_label_values(&["deadline_exceeded"]).inc();
            return;
        }

        for signal in &result.signals {
            let snapshot_hash = snapshots
                .iter()
                .find(|s| s.symbol == signal.symbol)
                .map(hash_snapshot)
                .unwrap_or_default();

            let snapshot = snapshots.iter().find(|s| s.symbol == signal.symbol);
            let outcome = self
                .dispatch_signal(tick.cycle_id.0, signal, &current_prices, &open_positions, &account, snapshot)
                .await;

            let _ = self
                .audit
                .record(
                    tick.cycle_id.0,
                    &signal.symbol,
                    snapshot_hash,
                    result.model_used.clone(),
                    result.prompt_tokens,
                    result.completion_tokens,
                    result.raw_response.clone(),
                    outcome,
                )
                .await;
        }
    }

    async fn dispatch_signal(
        &self,
        cycle_id: u64,
        signal: &crate::domain::types::Signal,
        current_prices: &[(String, Decimal)],
        open_positions: &[crate::domain::position::Position],
        account: &crate::domain::types::AccountState,
        snapshot: Option<&MarketSnapshot>,
    ) -> DecisionOutcome {
        if matches!(signal.action, SignalAction::Hold) {
            return DecisionOutcome::Rejected { reason: "hold".into() };
        }

        let Some(instrument) = self.instruments.get(&signal.symbol) else {
            return DecisionOutcome::Rejected { reason: "unknown_instrument".into() };
        };
        let entry_price = current_prices
            .iter()
            .find(|(sym, _)| sym == &signal.symbol)
            .map(|(_, p)| *p)
            .unwrap_or_default();
        if entry_price <= Decimal::ZERO {
            return DecisionOutcome::Rejected { reason: "no_price".into() };
        }

        if matches!(signal.action, SignalAction::ClosePosition) {
            return self.close_position_for_symbol(&signal.symbol, open_positions).await;
        }

        let high_volatility = snapshot.map(|s| snapshot_high_volatility(&s.indicators)).unwrap_or(false);

        let decision = self
            .risk
            .evaluate(signal, instrument, account, open_positions, entry_price, high_volatility)
            .await;

        match decision {
            RiskDecision::Rejected { reason } => DecisionOutcome::Rejected { reason },
            RiskDecision::Approved { quantity, .. } => {
                let stop_loss_price = match signal.action {
                    SignalAction::BuyToEnter => entry_price * (Decimal::ONE - signal.stop_loss_pct),
                    _ => entry_price * (Decimal::ONE + signal.stop_loss_pct),
                };
                let take_profit_price = signal.take_profit_pct.map(|pct| match signal.action {
                    SignalAction::BuyToEnter => entry_price * (Decimal::ONE + pct),
                    _ => entry_price * (Decimal::ONE - pct),
                });
                let side = match signal.action {
                    SignalAction::BuyToEnter => crate::domain::types::Side::Long,
                    _ => crate::domain::types::Side::Short,
                };

                match self
                    .executor
                    .execute(
                        cycle_id,
                        &signal.symbol,
                        side,
                        quantity,
                        entry_price,
                        stop_loss_price,
                        take_profit_price,
                        signal.invalidation_conditions.clone(),
                        signal.leverage,
                    )
                    .await
                {
                    Ok(ExecutionOutcome::Filled { position, .. }) => {
                        let client_id = position.id.to_string();
                        match self.position_manager.open_and_arm(position, entry_price).await {
                            Some(_) => DecisionOutcome::Executed { order_client_id: client_id },
                            None => DecisionOutcome::Rejected { reason: "stop_loss_placement_failed".into() },
                        }
                    }
                    Err(e) => DecisionOutcome::Rejected { reason: e.to_string() },
                }
            }
        }
    }

    async fn close_position_for_symbol(
        &self,
        symbol: &str,
        open_positions: &[crate::domain::position::Position],
    ) -> DecisionOutcome {
        let Some(position) = open_positions.iter().find(|p| p.symbol == symbol) else {
            return DecisionOutcome::Rejected { reason: "no_open_position".into() };
        };
        if self
            .position_manager
            .store
            .transition(position.id, crate::domain::position::PositionTransition::Close)
            .await
        {
            self.position_manager.store.transition(position.id, crate::domain::position::PositionTransition::Confirm).await;
            DecisionOutcome::Executed { order_client_id: position.id.to_string() }
        } else {
            DecisionOutcome::Rejected { reason: "illegal_transition".into() }
        }
    }

    async fn liquidate_all_on_trip(&self, cycle_id: u64) {
        let open = self.position_manager.store.open_positions().await;
        for position in open {
            let key = format!("cb-trip-close-{cycle_id}-{}", position.id);
            let opposite = match position.side {
                crate::domain::types::Side::Long => crate::domain::types::Side::Short,
                crate::domain::types::Side::Short => crate::domain::types::Side::Long,
            };
            if let Ok(order) = self
                .gateway
                .create_order(&key, &position.symbol, opposite, crate::domain::types::OrderType::Market, position.quantity, None, crate::domain::types::RequestClass::Critical)
                .await
            {
                let fill = order.average_fill_price.unwrap_or(position.entry_price);
                let realized = position.unrealized_pnl(fill);
                self.position_manager.store.update(position.id, |p| p.realized_pnl = realized).await;
                if let Err(e) = self.daily_counters.record_realized_pnl(realized).await {
                    error!(position_id = %position.id, error = %e, "failed to record realized pnl for circuit-breaker liquidation");
                }
            }
            self.position_manager.store.transition(position.id, crate::domain::position::PositionTransition::Close).await;
            self.position_manager.store.transition(position.id, crate::domain::position::PositionTransition::Confirm).await;
        }
        self.alert_sink.emit(AlertSeverity::Critical, "circuit_breaker", "daily loss limit tripped, all positions closed");
    }
}

/// Bollinger band width relative to the middle band, flagged once it exceeds
/// this fraction. 4% is wide enough that only genuinely expanding volatility
/// trips it, not routine chop.
const HIGH_VOLATILITY_BAND_WIDTH_PCT: Decimal = Decimal::from_parts(4, 0, 0, false, 2);

fn snapshot_high_volatility(indicators: &IndicatorSet) -> bool {
    let (Some(upper), Some(middle), Some(lower)) = (indicators.bollinger_upper, indicators.bollinger_middle, indicators.bollinger_lower) else {
        return false;
    };
    if middle <= Decimal::ZERO {
        return false;
    }
    (upper - lower) / middle > HIGH_VOLATILITY_BAND_WIDTH_PCT
}
