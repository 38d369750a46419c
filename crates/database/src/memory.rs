use crate::error::DbError;
use crate::store::StateStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{SpecId, StrategyRecord, StrategyState};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<SpecId, StrategyRecord>,
    archive: BTreeMap<SpecId, (StrategyRecord, DateTime<Utc>)>,
    config: Option<JsonValue>,
    failing_writes: u32,
    unavailable: bool,
    writes: u64,
}

impl Inner {
    fn check_read(&self) -> Result<(), DbError> {
        if self.unavailable {
            return Err(DbError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn check_write(&mut self) -> Result<(), DbError> {
        self.check_read()?;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(DbError::Unavailable("injected write failure".to_string()));
        }
        self.writes += 1;
        Ok(())
    }

    fn archive(&mut self, record: &StrategyRecord) -> Result<(), DbError> {
        if !record.state.is_terminal() {
            return Err(DbError::Corrupt(format!(
                "refusing to archive {} in state {}",
                record.id().short(),
                record.state
            )));
        }
        self.records.remove(record.id());
        self.archive
            .insert(record.id().clone(), (record.clone(), record.updated_at));
        Ok(())
    }
}

/// A process-local `StateStore` for tests and dry runs.
///
/// Writes can be made to fail on demand to exercise retry paths.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` writes fail with `DbError::Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.lock().failing_writes = count;
    }

    /// Makes every read and write fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn set_config(&self, value: JsonValue) {
        self.lock().config = Some(value);
    }

    /// Number of writes that were applied.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    pub fn record(&self, id: &SpecId) -> Option<StrategyRecord> {
        self.lock().records.get(id).cloned()
    }

    pub fn archived(&self, id: &SpecId) -> Option<StrategyRecord> {
        self.lock().archive.get(id).map(|(r, _)| r.clone())
    }

    pub fn archived_count(&self) -> usize {
        self.lock().archive.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Every mutation of `Inner` is a single insert or remove.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load_active_portfolio(&self) -> Result<Vec<StrategyRecord>, DbError> {
        self.load_records_in_states(&[StrategyState::Active]).await
    }

    async fn load_records_in_states(
        &self,
        states: &[StrategyState],
    ) -> Result<Vec<StrategyRecord>, DbError> {
        let inner = self.lock();
        inner.check_read()?;
        let mut records: Vec<StrategyRecord> = inner
            .records
            .values()
            .filter(|r| states.contains(&r.state))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id().cmp(b.id())));
        Ok(records)
    }

    async fn known_spec_ids(&self, archived_since: DateTime<Utc>) -> Result<HashSet<SpecId>, DbError> {
        let inner = self.lock();
        inner.check_read()?;
        let live = inner.records.keys().cloned();
        let recent = inner
            .archive
            .iter()
            .filter(|(_, (_, archived_at))| *archived_at >= archived_since)
            .map(|(id, _)| id.clone());
        Ok(live.chain(recent).collect())
    }

    async fn persist(&self, record: &StrategyRecord) -> Result<(), DbError> {
        let mut inner = self.lock();
        inner.check_write()?;
        inner.records.insert(record.id().clone(), record.clone());
        Ok(())
    }

    async fn archive(&self, record: &StrategyRecord) -> Result<(), DbError> {
        let mut inner = self.lock();
        inner.check_write()?;
        inner.archive(record)
    }

    async fn commit_admission(
        &self,
        admitted: &StrategyRecord,
        retired: Option<&StrategyRecord>,
    ) -> Result<(), DbError> {
        let mut inner = self.lock();
        if let Some(retired) = retired.filter(|r| !r.state.is_terminal()) {
            return Err(DbError::Corrupt(format!(
                "retired record {} is in state {}",
                retired.id().short(),
                retired.state
            )));
        }
        inner.check_write()?;
        if let Some(retired) = retired {
            inner.archive(retired)?;
        }
        inner.records.insert(admitted.id().clone(), admitted.clone());
        Ok(())
    }

    async fn load_config(&self) -> Result<Option<JsonValue>, DbError> {
        let inner = self.lock();
        inner.check_read()?;
        Ok(inner.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use core_types::{Indicator, ReasonCode, StrategySpec, Timeframe};

    fn record(indicator: Indicator) -> StrategyRecord {
        let spec = StrategySpec::new(Timeframe::H4, [indicator], &BTreeMap::new(), 5).unwrap();
        StrategyRecord::new(spec, 30, Utc::now())
    }

    fn activate(r: &mut StrategyRecord) {
        for s in [
            StrategyState::Backtesting,
            StrategyState::Evaluated,
            StrategyState::PortfolioPending,
            StrategyState::Active,
        ] {
            r.transition(s, Utc::now()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_persist_is_an_upsert() {
        let store = InMemoryStateStore::new();
        let mut r = record(Indicator::Rsi);
        store.persist(&r).await.unwrap();
        r.transition(StrategyState::Backtesting, Utc::now()).unwrap();
        store.persist(&r).await.unwrap();
        store.persist(&r).await.unwrap();

        let loaded = store
            .load_records_in_states(&[StrategyState::Backtesting])
            .await
            .unwrap();
        assert_eq!(loaded, vec![r]);
    }

    #[tokio::test]
    async fn test_commit_admission_moves_retired_to_archive() {
        let store = InMemoryStateStore::new();
        let mut old = record(Indicator::Sma);
        activate(&mut old);
        store.persist(&old).await.unwrap();

        let mut new = record(Indicator::Ema);
        activate(&mut new);
        old.retire(ReasonCode::Outperformed, Utc::now()).unwrap();
        store.commit_admission(&new, Some(&old)).await.unwrap();

        let active = store.load_active_portfolio().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), new.id());
        assert_eq!(
            store.archived(old.id()).map(|r| r.state),
            Some(StrategyState::Retired)
        );
    }

    #[tokio::test]
    async fn test_failed_commit_changes_nothing() {
        let store = InMemoryStateStore::new();
        let mut new = record(Indicator::Ema);
        activate(&mut new);
        store.fail_next_writes(1);
        assert!(store.commit_admission(&new, None).await.is_err());
        assert!(store.load_active_portfolio().await.unwrap().is_empty());

        store.commit_admission(&new, None).await.unwrap();
        assert_eq!(store.load_active_portfolio().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_known_ids_respect_archive_recency() {
        let store = InMemoryStateStore::new();
        let live = record(Indicator::Atr);
        store.persist(&live).await.unwrap();

        let mut rejected = record(Indicator::Obv);
        rejected
            .reject(ReasonCode::ThresholdNotMet, "pf", Utc::now())
            .unwrap();
        store.archive(&rejected).await.unwrap();

        let recent = store
            .known_spec_ids(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert!(recent.contains(live.id()));
        assert!(recent.contains(rejected.id()));

        let future = store
            .known_spec_ids(Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert!(future.contains(live.id()));
        assert!(!future.contains(rejected.id()));
    }

    #[tokio::test]
    async fn test_rearchived_spec_counts_as_recent_again() {
        let store = InMemoryStateStore::new();
        let now = Utc::now();

        let mut first = record(Indicator::Obv);
        first
            .reject(ReasonCode::ThresholdNotMet, "pf", now - Duration::days(60))
            .unwrap();
        store.archive(&first).await.unwrap();
        let since = now - Duration::days(30);
        assert!(!store.known_spec_ids(since).await.unwrap().contains(first.id()));

        // Regenerated once the window expired, then rejected again.
        let mut second = record(Indicator::Obv);
        assert_eq!(second.id(), first.id());
        second.reject(ReasonCode::ThresholdNotMet, "pf", now).unwrap();
        store.archive(&second).await.unwrap();

        assert!(store.known_spec_ids(since).await.unwrap().contains(second.id()));
        assert_eq!(store.archived_count(), 1);
    }

    #[tokio::test]
    async fn test_non_terminal_records_cannot_be_archived() {
        let store = InMemoryStateStore::new();
        let r = record(Indicator::Vwap);
        assert!(matches!(store.archive(&r).await, Err(DbError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let store = InMemoryStateStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.load_active_portfolio().await,
            Err(DbError::Unavailable(_))
        ));
    }
}
