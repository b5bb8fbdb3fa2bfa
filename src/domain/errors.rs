//! Error taxonomy (spec.md §7). Every component-local error type implements
//! `Into<CoreError>` and classifies itself into one of the kinds below;
//! unclassified errors default to `Integrity` (fail-safe, not fail-open).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Capacity,
    Validation,
    Policy,
    Integrity,
    Fatal,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("capacity: {0}")]
    Capacity(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("policy: {0}")]
    Policy(String),
    #[error("integrity: {0}")]
    Integrity(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Transient(_) => ErrorKind::Transient,
            CoreError::Capacity(_) => ErrorKind::Capacity,
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::Policy(_) => ErrorKind::Policy,
            CoreError::Integrity(_) => ErrorKind::Integrity,
            CoreError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,
    #[error("server error: {0}")]
    ServerError(u16),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("authentication failed")]
    AuthFailed,
    #[error("permission denied for endpoint {0}")]
    PermissionDenied(String),
    #[error("websocket stale for {0}")]
    StaleStream(String),
    #[error("order rejected: {0}")]
    OrderRejected(String),
}

impl From<GatewayError> for CoreError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Timeout | GatewayError::ServerError(_) | GatewayError::StaleStream(_) => {
                CoreError::Transient(e.to_string())
            }
            GatewayError::RateLimited { .. } => CoreError::Capacity(e.to_string()),
            GatewayError::AuthFailed | GatewayError::PermissionDenied(_) => {
                CoreError::Fatal(e.to_string())
            }
            GatewayError::OrderRejected(_) => CoreError::Policy(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("invalid candle: {0}")]
    InvalidCandle(String),
    #[error("data gap exceeded tolerance for {0}")]
    GapExceeded(String),
    #[error("symbol {0} still warming up")]
    WarmingUp(String),
}

impl From<MarketDataError> for CoreError {
    fn from(e: MarketDataError) -> Self {
        CoreError::Validation(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("request timed out")]
    Timeout,
    #[error("all configured models are open")]
    AllModelsOpen,
    #[error("response did not parse as valid JSON")]
    ParseFailed,
    #[error("response had zero usable decisions")]
    NoUsableDecisions,
    #[error("daily advisor budget exceeded")]
    BudgetExceeded,
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<AdvisorError> for CoreError {
    fn from(e: AdvisorError) -> Self {
        match e {
            AdvisorError::Timeout | AdvisorError::Transport(_) => CoreError::Transient(e.to_string()),
            AdvisorError::AllModelsOpen => CoreError::Fatal(e.to_string()),
            AdvisorError::ParseFailed | AdvisorError::NoUsableDecisions => {
                CoreError::Validation(e.to_string())
            }
            AdvisorError::BudgetExceeded => CoreError::Capacity(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("circuit breaker tripped")]
    CircuitBreakerTripped,
    #[error("max positions reached")]
    MaxPositions,
    #[error("exposure limit exceeded")]
    ExposureExceeded,
    #[error("leverage out of bounds")]
    LeverageOutOfBounds,
    #[error("confidence below threshold")]
    LowConfidence,
    #[error("insufficient margin")]
    InsufficientMargin,
    #[error("below minimum notional")]
    BelowMinNotional,
}

impl From<RiskError> for CoreError {
    fn from(e: RiskError) -> Self {
        CoreError::Policy(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("fill timed out")]
    FillTimeout,
    #[error("submission ambiguous, must resubmit with same idempotency key")]
    AmbiguousSubmission,
}

impl From<ExecutionError> for CoreError {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::Rejected(_) => CoreError::Policy(e.to_string()),
            ExecutionError::FillTimeout => CoreError::Transient(e.to_string()),
            ExecutionError::AmbiguousSubmission => CoreError::Transient(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error(transparent)]
    IllegalTransition(#[from] crate::domain::position::IllegalTransition),
    #[error("reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),
    #[error("stop-loss placement failed: {0}")]
    StopLossPlacementFailed(String),
}

impl From<PositionError> for CoreError {
    fn from(e: PositionError) -> Self {
        CoreError::Integrity(e.to_string())
    }
}
