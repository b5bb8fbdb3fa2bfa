//! sqlx-backed implementations of the domain repository traits. The decision
//! log exposes only `append`, so append-only is a type-level guarantee, not
//! a convention callers must honor.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::errors::CoreError;
use crate::domain::ports::{DailyCounterRepository, DecisionLogRepository, PositionRepository};
use crate::domain::position::Position;
use crate::domain::types::DecisionRecord;

use super::database::Database;

pub struct SqliteDecisionLogRepository {
    db: Database,
}

impl SqliteDecisionLogRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DecisionLogRepository for SqliteDecisionLogRepository {
    async fn append(&self, record: &DecisionRecord) -> Result<(), CoreError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| CoreError::Integrity(format!("failed to serialize decision record: {e}")))?;
        sqlx::query(
            "INSERT INTO decision_records (cycle_id, symbol, timestamp, payload) VALUES (?, ?, ?, ?)",
        )
        .bind(record.cycle_id as i64)
        .bind(&record.symbol)
        .bind(record.timestamp.to_rfc3339())
        .bind(payload)
        .execute(&self.db.pool)
        .await
        .map_err(|e| CoreError::Integrity(format!("failed to append decision record: {e}")))?;
        Ok(())
    }
}

pub struct SqlitePositionRepository {
    db: Database,
}

impl SqlitePositionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn upsert(&self, position: &Position) -> Result<(), CoreError> {
        let payload = serde_json::to_string(position)
            .map_err(|e| CoreError::Integrity(format!("failed to serialize position: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO positions
                (id, symbol, side, quantity, entry_price, leverage, stop_loss_price,
                 take_profit_price, state, opened_at, closed_at, realized_pnl,
                 stop_order_id, payload, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                quantity = excluded.quantity,
                entry_price = excluded.entry_price,
                stop_loss_price = excluded.stop_loss_price,
                take_profit_price = excluded.take_profit_price,
                state = excluded.state,
                opened_at = excluded.opened_at,
                closed_at = excluded.closed_at,
                realized_pnl = excluded.realized_pnl,
                stop_order_id = excluded.stop_order_id,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(position.id.to_string())
        .bind(format!("{:?}", position.side))
        .bind(position.quantity.to_string())
        .bind(position.entry_price.to_string())
        .bind(position.leverage as i64)
        .bind(position.stop_loss_price.to_string())
        .bind(position.take_profit_price.map(|d| d.to_string()))
        .bind(format!("{:?}", position.state))
        .bind(position.opened_at.map(|t| t.to_rfc3339()))
        .bind(position.closed_at.map(|t| t.to_rfc3339()))
        .bind(position.realized_pnl.to_string())
        .bind(position.stop_order_id.clone())
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db.pool)
        .await
        .map_err(|e| CoreError::Integrity(format!("failed to upsert position: {e}")))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Position>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT payload FROM positions")
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| CoreError::Integrity(format!("failed to load positions: {e}")))?;
        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_str(&payload)
                    .map_err(|e| CoreError::Integrity(format!("failed to deserialize position: {e}")))
            })
            .collect()
    }
}

pub struct SqliteDailyCounterRepository {
    db: Database,
}

impl SqliteDailyCounterRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DailyCounterRepository for SqliteDailyCounterRepository {
    /// Read-modify-write under a transaction, since the column is a TEXT
    /// decimal sqlite can't add to in-place.
    async fn record_realized_pnl(&self, amount: Decimal) -> Result<(), CoreError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Integrity(format!("failed to open transaction: {e}")))?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT realized_pnl_usd FROM daily_counters WHERE utc_date = ?")
                .bind(&today)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| CoreError::Integrity(format!("failed to read daily counter: {e}")))?;

        let current = match &existing {
            Some((s,)) => Decimal::from_str(s).unwrap_or(Decimal::ZERO),
            None => Decimal::ZERO,
        };
        let updated = current + amount;

        sqlx::query(
            r#"
            INSERT INTO daily_counters (utc_date, realized_pnl_usd) VALUES (?, ?)
            ON CONFLICT(utc_date) DO UPDATE SET realized_pnl_usd = excluded.realized_pnl_usd
            "#,
        )
        .bind(&today)
        .bind(updated.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Integrity(format!("failed to write daily counter: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::Integrity(format!("failed to commit daily counter update: {e}")))?;
        Ok(())
    }

    async fn realized_pnl_today(&self) -> Result<Decimal, CoreError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let row: Option<(String,)> =
            sqlx::query_as("SELECT realized_pnl_usd FROM daily_counters WHERE utc_date = ?")
                .bind(&today)
                .fetch_optional(&self.db.pool)
                .await
                .map_err(|e| CoreError::Integrity(format!("failed to read daily counter: {e}")))?;
        Ok(match row {
            Some((s,)) => Decimal::from_str(&s).unwrap_or(Decimal::ZERO),
            None => Decimal::ZERO,
        })
    }
}
