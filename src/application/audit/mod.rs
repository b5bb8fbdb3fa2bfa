pub mod alerts;
pub mod metrics;

use std::sync::Arc;

use chrono::Utc;

use crate::domain::errors::CoreError;
use crate::domain::ports::DecisionLogRepository;
use crate::domain::types::{DecisionOutcome, DecisionRecord};

/// Thin façade over the append-only decision log, computing the snapshot
/// hash the record carries (spec.md §3).
pub struct Audit {
    repository: Arc<dyn DecisionLogRepository>,
}

impl Audit {
    pub fn new(repository: Arc<dyn DecisionLogRepository>) -> Self {
        Self { repository }
    }

    pub async fn record(
        &self,
        cycle_id: u64,
        symbol: &str,
        snapshot_hash: String,
        advisor_model: Option<String>,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        raw_response: Option<String>,
        outcome: DecisionOutcome,
    ) -> Result<(), CoreError> {
        let record = DecisionRecord {
            cycle_id,
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            snapshot_hash,
            advisor_model,
            prompt_tokens,
            completion_tokens,
            raw_response,
            outcome,
        };
        self.repository.append(&record).await
    }
}

pub fn hash_snapshot(snapshot: &crate::domain::types::MarketSnapshot) -> String {
    use sha2::{Digest, Sha256};
    let serialized = serde_json::to_string(snapshot).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)
}
