//! Prometheus registry for the metrics sink named in spec.md §4.8/§6.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Registry};

pub struct Metrics {
    pub registry: Registry,
    pub cycle_latency_ms: HistogramVec,
    pub cycles_skipped_total: IntCounterVec,
    pub advisor_tokens_total: IntCounterVec,
    pub order_outcomes_total: IntCounterVec,
    pub open_positions: IntGauge,
    pub realized_pnl_usd: prometheus::Gauge,
    pub unrealized_pnl_usd: prometheus::Gauge,
    pub cache_hit_rate: prometheus::Gauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cycle_latency_ms = HistogramVec::new(
            HistogramOpts::new("cycle_latency_ms", "Cycle latency in milliseconds"),
            &["phase"],
        )?;
        let cycles_skipped_total =
            IntCounterVec::new(prometheus::Opts::new("cycles_skipped_total", "Cycles skipped by reason"), &["reason"])?;
        let advisor_tokens_total = IntCounterVec::new(
            prometheus::Opts::new("advisor_tokens_total", "Advisor token usage by model and kind"),
            &["model", "kind"],
        )?;
        let order_outcomes_total = IntCounterVec::new(
            prometheus::Opts::new("order_outcomes_total", "Order outcomes by result"),
            &["outcome"],
        )?;
        let open_positions = IntGauge::new("open_positions", "Currently open positions")?;
        let realized_pnl_usd = prometheus::Gauge::new("realized_pnl_usd", "Realized P&L in USD")?;
        let unrealized_pnl_usd = prometheus::Gauge::new("unrealized_pnl_usd", "Unrealized P&L in USD")?;
        let cache_hit_rate = prometheus::Gauge::new("cache_hit_rate", "Snapshot cache hit rate")?;

        registry.register(Box::new(cycle_latency_ms.clone()))?;
        registry.register(Box::new(cycles_skipped_total.clone()))?;
        registry.register(Box::new(advisor_tokens_total.clone()))?;
        registry.register(Box::new(order_outcomes_total.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;
        registry.register(Box::new(realized_pnl_usd.clone()))?;
        registry.register(Box::new(unrealized_pnl_usd.clone()))?;
        registry.register(Box::new(cache_hit_rate.clone()))?;

        Ok(Self {
            registry,
            cycle_latency_ms,
            cycles_skipped_total,
            advisor_tokens_total,
            order_outcomes_total,
            open_positions,
            realized_pnl_usd,
            unrealized_pnl_usd,
            cache_hit_rate,
        })
    }

    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
