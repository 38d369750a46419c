use crate::error::DbError;
use crate::store::StateStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Kline, SpecId, StrategyRecord, StrategyState};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, Postgres};
use sqlx::{Row, Transaction};
use std::collections::HashSet;

/// A re-archived spec (rejected again after its recency window expired)
/// takes the new archive time, so deduplication sees it as recent again.
const ARCHIVE_UPSERT: &str = r#"
    INSERT INTO strategy_archive (spec_id, state, reason, record, archived_at)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (spec_id) DO UPDATE SET
        state = EXCLUDED.state,
        reason = EXCLUDED.reason,
        record = EXCLUDED.record,
        archived_at = EXCLUDED.archived_at
"#;

/// The `PgStateStore` keeps strategy records as JSONB documents in PostgreSQL,
/// with the state, timeframe and timestamps lifted into columns for querying.
#[derive(Debug, Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Fetches all klines for a given symbol and interval within `[start, end)`.
    pub async fn get_klines_by_date_range(
        &self,
        symbol: &str,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Kline>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT open_time, open, high, low, close, volume, close_time
            FROM klines
            WHERE symbol = $1 AND interval = $2 AND open_time >= $3 AND open_time < $4
            ORDER BY open_time ASC
            "#,
        )
        .bind(symbol)
        .bind(interval)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let klines = rows
            .into_iter()
            .map(|row| Kline {
                open_time: row.get("open_time"),
                open: row.get("open"),
                high: row.get("high"),
                low: row.get("low"),
                close: row.get("close"),
                volume: row.get("volume"),
                close_time: row.get("close_time"),
            })
            .collect();

        Ok(klines)
    }

    /// Saves a single Kline. Uses `ON CONFLICT DO NOTHING` to be idempotent.
    pub async fn save_kline(&self, symbol: &str, interval: &str, kline: &Kline) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO klines (symbol, interval, open_time, close_time, open, high, low, close, volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (symbol, interval, open_time) DO NOTHING
            "#,
        )
        .bind(symbol)
        .bind(interval)
        .bind(kline.open_time)
        .bind(kline.close_time)
        .bind(kline.open)
        .bind(kline.high)
        .bind(kline.low)
        .bind(kline.close)
        .bind(kline.volume)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stores an operator configuration override.
    pub async fn save_config(&self, value: &JsonValue) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO engine_config (key, value, updated_at)
            VALUES ('current', $1, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_record(
        tx: &mut Transaction<'_, Postgres>,
        record: &StrategyRecord,
    ) -> Result<(), DbError> {
        let document = serde_json::to_value(record)?;
        sqlx::query(
            r#"
            INSERT INTO strategy_records (spec_id, state, timeframe, record, activated_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (spec_id) DO UPDATE SET
                state = EXCLUDED.state,
                record = EXCLUDED.record,
                activated_at = EXCLUDED.activated_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id().as_str())
        .bind(record.state.as_str())
        .bind(record.spec.timeframe().as_str())
        .bind(document)
        .bind(record.activated_at)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn archive_record(
        tx: &mut Transaction<'_, Postgres>,
        record: &StrategyRecord,
    ) -> Result<(), DbError> {
        if !record.state.is_terminal() {
            return Err(DbError::Corrupt(format!(
                "refusing to archive {} in state {}",
                record.id().short(),
                record.state
            )));
        }
        let document = serde_json::to_value(record)?;
        sqlx::query("DELETE FROM strategy_records WHERE spec_id = $1")
            .bind(record.id().as_str())
            .execute(&mut **tx)
            .await?;
        sqlx::query(ARCHIVE_UPSERT)
        .bind(record.id().as_str())
        .bind(record.state.as_str())
        .bind(record.reason.map(|r| r.as_str()))
        .bind(document)
        .bind(record.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    fn decode(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<StrategyRecord>, DbError> {
        rows.into_iter()
            .map(|row| {
                let document: JsonValue = row.try_get("record")?;
                let record: StrategyRecord = serde_json::from_value(document)?;
                if !record.spec.verify_id() {
                    return Err(DbError::Corrupt(format!(
                        "identity mismatch for {}",
                        record.id()
                    )));
                }
                Ok(record)
            })
            .collect()
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn load_active_portfolio(&self) -> Result<Vec<StrategyRecord>, DbError> {
        self.load_records_in_states(&[StrategyState::Active]).await
    }

    async fn load_records_in_states(
        &self,
        states: &[StrategyState],
    ) -> Result<Vec<StrategyRecord>, DbError> {
        let names: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(
            "SELECT record FROM strategy_records WHERE state = ANY($1) ORDER BY updated_at ASC, spec_id ASC",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;
        Self::decode(rows)
    }

    async fn known_spec_ids(&self, archived_since: DateTime<Utc>) -> Result<HashSet<SpecId>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT spec_id FROM strategy_records
            UNION
            SELECT spec_id FROM strategy_archive WHERE archived_at >= $1
            "#,
        )
        .bind(archived_since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("spec_id").map(SpecId::from).map_err(DbError::from))
            .collect()
    }

    async fn persist(&self, record: &StrategyRecord) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_record(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn archive(&self, record: &StrategyRecord) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        Self::archive_record(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_admission(
        &self,
        admitted: &StrategyRecord,
        retired: Option<&StrategyRecord>,
    ) -> Result<(), DbError> {
        // Dropping the transaction without commit rolls back both writes.
        let mut tx = self.pool.begin().await?;
        if let Some(retired) = retired {
            Self::archive_record(&mut tx, retired).await?;
        }
        Self::upsert_record(&mut tx, admitted).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_config(&self) -> Result<Option<JsonValue>, DbError> {
        let row = sqlx::query("SELECT value FROM engine_config WHERE key = 'current'")
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<JsonValue, _>("value").map_err(DbError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_upsert_refreshes_every_column() {
        let update = ARCHIVE_UPSERT
            .split("DO UPDATE SET")
            .nth(1)
            .unwrap_or_default();
        for column in ["state", "reason", "record", "archived_at"] {
            assert!(
                update.contains(&format!("{column} = EXCLUDED.{column}")),
                "{column} not refreshed on conflict"
            );
        }
    }
}
