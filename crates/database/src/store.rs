use crate::error::DbError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{SpecId, StrategyRecord, StrategyState};
use std::collections::HashSet;

/// Durable home of every `StrategyRecord`, keyed by `SpecId`.
///
/// All writes are upserts, so replaying a write after an ambiguous failure
/// leaves the store unchanged.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Every record currently in state `ACTIVE`.
    async fn load_active_portfolio(&self) -> Result<Vec<StrategyRecord>, DbError>;

    /// Non-archived records whose state is one of `states`.
    async fn load_records_in_states(
        &self,
        states: &[StrategyState],
    ) -> Result<Vec<StrategyRecord>, DbError>;

    /// Identities the generator must not propose again: every live record plus
    /// archived records archived at or after `archived_since`.
    async fn known_spec_ids(&self, archived_since: DateTime<Utc>) -> Result<HashSet<SpecId>, DbError>;

    /// Inserts or replaces a non-terminal record.
    async fn persist(&self, record: &StrategyRecord) -> Result<(), DbError>;

    /// Moves a `REJECTED` or `RETIRED` record into the read-only archive.
    async fn archive(&self, record: &StrategyRecord) -> Result<(), DbError>;

    /// Atomically activates `admitted` and, if given, archives `retired`.
    ///
    /// Either both writes become visible or neither does.
    async fn commit_admission(
        &self,
        admitted: &StrategyRecord,
        retired: Option<&StrategyRecord>,
    ) -> Result<(), DbError>;

    /// Operator configuration overrides as a JSON document, if any were stored.
    async fn load_config(&self) -> Result<Option<serde_json::Value>, DbError>;
}
