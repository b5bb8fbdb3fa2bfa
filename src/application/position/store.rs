//! Single-writer position table: a mutex held only across state-transition
//! validation + mutation + protective-order side effect (spec.md §5).

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

use crate::domain::position::{Position, PositionTransition};
use crate::domain::ports::PositionRepository;

pub struct PositionStore {
    positions: Mutex<HashMap<Uuid, Position>>,
    repository: std::sync::Arc<dyn PositionRepository>,
}

impl PositionStore {
    pub fn new(repository: std::sync::Arc<dyn PositionRepository>) -> Self {
        Self { positions: Mutex::new(HashMap::new()), repository }
    }

    pub async fn load_from_repository(&self) -> anyhow::Result<()> {
        let loaded = self
            .repository
            .load_all()
            .await
            .map_err(|e| anyhow::anyhow!("failed to load positions: {e}"))?;
        let mut guard = self.positions.lock().await;
        for p in loaded {
            guard.insert(p.id, p);
        }
        Ok(())
    }

    pub async fn insert(&self, position: Position) {
        let mut guard = self.positions.lock().await;
        let _ = self.repository.upsert(&position).await;
        guard.insert(position.id, position);
    }

    /// Applies `transition` under the single-writer lock; illegal attempts
    /// are logged and leave state untouched (spec.md §4.6).
    pub async fn transition(&self, id: Uuid, t: PositionTransition) -> bool {
        let mut guard = self.positions.lock().await;
        let Some(position) = guard.get_mut(&id) else {
            error!(position_id = %id, "transition attempted on unknown position");
            return false;
        };
        match position.transition(t) {
            Ok(()) => {
                let _ = self.repository.upsert(position).await;
                true
            }
            Err(e) => {
                error!(position_id = %id, error = %e, "illegal position state transition rejected");
                false
            }
        }
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        use crate::domain::position::PositionState;
        self.positions
            .lock()
            .await
            .values()
            .filter(|p| p.state == PositionState::Open)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<Position> {
        self.positions.lock().await.get(&id).cloned()
    }

    pub async fn all(&self) -> Vec<Position> {
        self.positions.lock().await.values().cloned().collect()
    }

    pub async fn update<F: FnOnce(&mut Position)>(&self, id: Uuid, f: F) {
        let mut guard = self.positions.lock().await;
        if let Some(position) = guard.get_mut(&id) {
            f(position);
            let _ = self.repository.upsert(position).await;
        }
    }
}
