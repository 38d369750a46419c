use crate::error::PortfolioError;
use analytics::{MetricEvaluator, correlation};
use chrono::{DateTime, Utc};
use configuration::Config;
use core_types::{
    BacktestWindow, ReasonCode, SpecId, StrategyRecord, StrategySpec, StrategyState, TradeRecord,
};
use database::{RetryPolicy, StateStore};
use gate::CompositeScore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// What happened to a candidate offered to the portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmitOutcome {
    Admitted,
    RejectedCorrelation,
    RejectedCapacityNoWeaker,
}

impl AdmitOutcome {
    /// The reason recorded on a candidate refused with this outcome.
    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            AdmitOutcome::Admitted => None,
            AdmitOutcome::RejectedCorrelation => Some(ReasonCode::CorrelationViolation),
            AdmitOutcome::RejectedCapacityNoWeaker => Some(ReasonCode::CapacityNoWeaker),
        }
    }
}

/// The full result of one admission attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Admission {
    pub outcome: AdmitOutcome,
    /// Highest defined correlation with any active strategy.
    pub max_correlation: Option<Decimal>,
    /// The active strategy that `max_correlation` was measured against.
    pub correlated_with: Option<SpecId>,
    /// The strategy retired to make room, if any.
    pub retired: Option<SpecId>,
}

impl Admission {
    fn new(outcome: AdmitOutcome) -> Self {
        Self {
            outcome,
            max_correlation: None,
            correlated_with: None,
            retired: None,
        }
    }
}

/// Sole owner of the set of `ACTIVE` strategies.
///
/// Every change is committed to the state store first; the in-memory set only
/// moves once the store has accepted the change.
pub struct PortfolioManager {
    store: Arc<dyn StateStore>,
    active: BTreeMap<SpecId, StrategyRecord>,
    capacity: usize,
    min_correlation: Decimal,
    max_correlation: Decimal,
    min_overlap: usize,
    score_window_days: i64,
    capital_base: Decimal,
    evaluator: MetricEvaluator,
    retry: RetryPolicy,
}

impl PortfolioManager {
    pub fn new(store: Arc<dyn StateStore>, config: &Config) -> Self {
        Self {
            store,
            active: BTreeMap::new(),
            capacity: config.system.max_concurrent_strategies,
            min_correlation: config.strategy.min_correlation_threshold,
            max_correlation: config.strategy.max_correlation_threshold,
            min_overlap: config.portfolio.min_correlation_overlap_days,
            score_window_days: config.portfolio.score_window_days,
            capital_base: config.portfolio.capital_base,
            evaluator: MetricEvaluator::new(
                config.metrics.annualization_days,
                config.system.min_backtest_period_days,
            ),
            retry: RetryPolicy::new(
                config.portfolio.persistence_retry_attempts,
                Duration::from_millis(config.portfolio.persistence_backoff_ms),
            ),
        }
    }

    /// Rebuilds the active set from the store, replacing whatever was in memory.
    pub async fn load(&mut self) -> Result<usize, PortfolioError> {
        let records = self.store.load_active_portfolio().await?;
        if records.len() > self.capacity {
            tracing::warn!(
                loaded = records.len(),
                capacity = self.capacity,
                "stored portfolio exceeds capacity; no admissions until it shrinks"
            );
        }
        self.active = records.into_iter().map(|r| (r.id().clone(), r)).collect();
        tracing::info!(active = self.active.len(), "portfolio loaded");
        Ok(self.active.len())
    }

    pub fn active(&self) -> impl Iterator<Item = &StrategyRecord> {
        self.active.values()
    }

    pub fn active_specs(&self) -> Vec<StrategySpec> {
        self.active.values().map(|r| r.spec.clone()).collect()
    }

    pub fn get(&self, id: &SpecId) -> Option<&StrategyRecord> {
        self.active.get(id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Offers a `PORTFOLIO_PENDING` candidate to the portfolio.
    ///
    /// On `Admitted` the candidate has been moved to `ACTIVE`. On either
    /// rejection, and on error, it is left exactly as it was passed in.
    pub async fn admit(
        &mut self,
        candidate: &mut StrategyRecord,
        now: DateTime<Utc>,
    ) -> Result<Admission, PortfolioError> {
        let id = candidate.id().clone();

        if let Some(existing) = self.active.get(&id) {
            tracing::debug!(spec_id = %id.short(), "candidate already active; admission is a no-op");
            *candidate = existing.clone();
            return Ok(Admission::new(AdmitOutcome::Admitted));
        }
        if candidate.state != StrategyState::PortfolioPending {
            return Err(PortfolioError::NotPending {
                id,
                state: candidate.state,
            });
        }

        // 1. Correlation against every active strategy.
        let mut admission = Admission::new(AdmitOutcome::Admitted);
        for (active_id, record) in &self.active {
            let Some(rho) = correlation(&candidate.return_series, &record.return_series, self.min_overlap)
            else {
                tracing::debug!(
                    spec_id = %id.short(),
                    with = %active_id.short(),
                    min_overlap = self.min_overlap,
                    "correlation undefined (short overlap or flat series); not checked against this strategy"
                );
                continue;
            };
            if admission.max_correlation.is_none_or(|max| rho > max) {
                admission.max_correlation = Some(rho);
                admission.correlated_with = Some(active_id.clone());
            }
        }
        if let Some(rho) = admission.max_correlation {
            if rho > self.max_correlation {
                tracing::info!(
                    spec_id = %id.short(),
                    correlation = %rho.round_dp(3),
                    with = %admission.correlated_with.as_ref().map(|i| i.short()).unwrap_or_default(),
                    "candidate rejected: correlation above threshold"
                );
                admission.outcome = AdmitOutcome::RejectedCorrelation;
                return Ok(admission);
            }
        }

        let mut admitted = candidate.clone();
        admitted.transition(StrategyState::Active, now)?;

        // 2. Free slot.
        if self.active.len() < self.capacity {
            self.commit(&admitted, None).await?;
            self.log_admission(&admitted, &admission);
            self.active.insert(id, admitted.clone());
            *candidate = admitted;
            return Ok(admission);
        }

        // 3. Over capacity (the limit was lowered): nothing is admitted until
        //    retirements bring the set back within it.
        if self.active.len() > self.capacity {
            tracing::info!(
                spec_id = %id.short(),
                active = self.active.len(),
                capacity = self.capacity,
                "candidate rejected: portfolio exceeds capacity"
            );
            admission.outcome = AdmitOutcome::RejectedCapacityNoWeaker;
            return Ok(admission);
        }

        // 4. Full: replace the weakest only if strictly outperformed.
        let candidate_score = candidate
            .metrics
            .as_ref()
            .map(CompositeScore::of)
            .unwrap_or_else(CompositeScore::floor);
        let Some((weakest_id, weakest_score)) = self.weakest(now) else {
            admission.outcome = AdmitOutcome::RejectedCapacityNoWeaker;
            return Ok(admission);
        };

        if candidate_score <= weakest_score {
            tracing::info!(
                spec_id = %id.short(),
                candidate = %candidate_score,
                weakest = %weakest_score,
                "candidate rejected: portfolio full and no weaker strategy"
            );
            admission.outcome = AdmitOutcome::RejectedCapacityNoWeaker;
            return Ok(admission);
        }

        let mut retired = self
            .active
            .get(&weakest_id)
            .cloned()
            .ok_or_else(|| PortfolioError::NotActive(weakest_id.clone()))?;
        retired.retire(ReasonCode::Outperformed, now)?;
        retired.reason_detail = Some(format!(
            "replaced by {} ({} > {})",
            id.short(),
            candidate_score,
            weakest_score
        ));

        self.commit(&admitted, Some(&retired)).await?;
        tracing::info!(
            spec_id = %weakest_id.short(),
            score = %weakest_score,
            replaced_by = %id.short(),
            "strategy retired"
        );
        self.active.remove(&weakest_id);
        admission.retired = Some(weakest_id);
        self.log_admission(&admitted, &admission);
        self.active.insert(id, admitted.clone());
        *candidate = admitted;
        Ok(admission)
    }

    /// Appends realized live/paper trades to an active strategy.
    pub async fn record_live_trades(
        &mut self,
        id: &SpecId,
        trades: &[TradeRecord],
        now: DateTime<Utc>,
    ) -> Result<(), PortfolioError> {
        let mut updated = self
            .active
            .get(id)
            .cloned()
            .ok_or_else(|| PortfolioError::NotActive(id.clone()))?;
        updated.append_live_trades(trades, self.capital_base, now);

        let store = &self.store;
        let record = &updated;
        self.retry
            .run("persist_live_trades", move || store.persist(record))
            .await?;

        tracing::debug!(spec_id = %id.short(), trades = trades.len(), "live trades recorded");
        self.active.insert(id.clone(), updated);
        Ok(())
    }

    /// Retires an active strategy outside of an admission, e.g. by operator request.
    pub async fn retire(
        &mut self,
        id: &SpecId,
        reason: ReasonCode,
        now: DateTime<Utc>,
    ) -> Result<StrategyRecord, PortfolioError> {
        let mut retired = self
            .active
            .get(id)
            .cloned()
            .ok_or_else(|| PortfolioError::NotActive(id.clone()))?;
        retired.retire(reason, now)?;

        let store = &self.store;
        let record = &retired;
        self.retry
            .run("archive_retired", move || store.archive(record))
            .await?;

        tracing::info!(spec_id = %id.short(), reason = %reason, "strategy retired");
        self.active.remove(id);
        Ok(retired)
    }

    /// Score of an active strategy over its trailing live window, falling back
    /// to its latest backtest when no live trade falls inside the window.
    pub fn score(&self, record: &StrategyRecord, now: DateTime<Utc>) -> CompositeScore {
        let window = BacktestWindow::ending_at(now, self.score_window_days);
        let live: Vec<TradeRecord> = record
            .live_trades_since(window.start)
            .into_iter()
            .filter(|t| t.exit_time < window.end)
            .collect();

        if !live.is_empty() {
            match self.evaluator.evaluate_trades(&live, self.capital_base, window) {
                Ok(metrics) => return CompositeScore::of(&metrics),
                Err(e) => {
                    tracing::warn!(spec_id = %record.id().short(), error = %e, "live scoring failed; using backtest")
                }
            }
        }
        record
            .metrics
            .as_ref()
            .map(CompositeScore::of)
            .unwrap_or_else(CompositeScore::floor)
    }

    /// Every active strategy with its current score, weakest first.
    pub fn ranking(&self, now: DateTime<Utc>) -> Vec<(&StrategyRecord, CompositeScore)> {
        let mut ranked: Vec<_> = self
            .active
            .values()
            .map(|r| (r, self.score(r, now)))
            .collect();
        ranked.sort_by(|(a, sa), (b, sb)| {
            sa.cmp(sb)
                .then_with(|| a.activated_at.cmp(&b.activated_at))
                .then_with(|| a.id().cmp(b.id()))
        });
        ranked
    }

    /// The lowest-scoring active strategy. Among equals, the earliest activated.
    fn weakest(&self, now: DateTime<Utc>) -> Option<(SpecId, CompositeScore)> {
        self.ranking(now)
            .into_iter()
            .next()
            .map(|(r, score)| (r.id().clone(), score))
    }

    async fn commit(
        &self,
        admitted: &StrategyRecord,
        retired: Option<&StrategyRecord>,
    ) -> Result<(), PortfolioError> {
        let store = &self.store;
        self.retry
            .run("commit_admission", move || store.commit_admission(admitted, retired))
            .await?;
        Ok(())
    }

    fn log_admission(&self, admitted: &StrategyRecord, admission: &Admission) {
        let diversified = admission
            .max_correlation
            .is_none_or(|rho| rho < self.min_correlation);
        tracing::info!(
            spec_id = %admitted.id().short(),
            label = %admitted.spec.label(),
            max_correlation = ?admission.max_correlation.map(|r| r.round_dp(3)),
            diversified,
            active = self.active.len() + 1 - usize::from(admission.retired.is_some()),
            capacity = self.capacity,
            "strategy admitted"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone};
    use core_types::{Indicator, MetricValue, PerformanceMetrics, Timeframe};
    use database::InMemoryStateStore;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.portfolio.persistence_backoff_ms = 1;
        config.portfolio.persistence_retry_attempts = 3;
        config
    }

    fn metrics(pf: Decimal, sharpe: Decimal) -> PerformanceMetrics {
        PerformanceMetrics {
            total_trades: 150,
            winning_trades: 80,
            losing_trades: 70,
            gross_profit: dec!(2000),
            gross_loss: dec!(1000),
            net_profit: dec!(1000),
            profit_factor: MetricValue::Finite(pf),
            win_rate: dec!(0.53),
            max_drawdown: dec!(0.1),
            sharpe_ratio: MetricValue::Finite(sharpe),
            daily_losses: vec![],
            worst_daily_loss: dec!(0.02),
            trades_per_day: dec!(5),
            period_days: 30,
        }
    }

    /// A pending candidate using the `n`-th indicator on the `tf` timeframe.
    fn pending(n: usize, tf: Timeframe, pf: Decimal) -> StrategyRecord {
        let spec = StrategySpec::new(tf, [Indicator::ALL[n]], &BTreeMap::new(), 5).unwrap();
        let mut r = StrategyRecord::new(spec, 30, now());
        for s in [
            StrategyState::Backtesting,
            StrategyState::Evaluated,
            StrategyState::PortfolioPending,
        ] {
            r.transition(s, now()).unwrap();
        }
        r.metrics = Some(metrics(pf, dec!(1.5)));
        r
    }

    fn returns(values: &[Decimal]) -> BTreeMap<NaiveDate, Decimal> {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (start + ChronoDuration::days(i as i64), *v))
            .collect()
    }

    /// A manager filled to capacity (5) with profit factors 1.6, 1.7, ... 2.0.
    async fn full_portfolio() -> (PortfolioManager, Arc<InMemoryStateStore>) {
        let store = Arc::new(InMemoryStateStore::new());
        let mut manager = PortfolioManager::new(store.clone(), &config());
        for i in 0..5 {
            let mut c = pending(i, Timeframe::H1, dec!(1.6) + Decimal::new(i as i64, 1));
            let t = now() + ChronoDuration::minutes(i as i64);
            let admission = manager.admit(&mut c, t).await.unwrap();
            assert_eq!(admission.outcome, AdmitOutcome::Admitted);
        }
        assert_eq!(manager.len(), 5);
        (manager, store)
    }

    #[tokio::test]
    async fn test_stronger_candidate_replaces_weakest_at_capacity() {
        let (mut manager, store) = full_portfolio().await;
        let weakest = manager.ranking(now()).first().map(|(r, _)| r.id().clone()).unwrap();

        let mut candidate = pending(5, Timeframe::H1, dec!(2.5));
        let admission = manager.admit(&mut candidate, now()).await.unwrap();

        assert_eq!(admission.outcome, AdmitOutcome::Admitted);
        assert_eq!(admission.retired.as_ref(), Some(&weakest));
        assert_eq!(candidate.state, StrategyState::Active);
        assert_eq!(manager.len(), 5);
        assert!(manager.get(&weakest).is_none());

        let archived = store.archived(&weakest).unwrap();
        assert_eq!(archived.state, StrategyState::Retired);
        assert_eq!(archived.reason, Some(ReasonCode::Outperformed));
        assert_eq!(store.load_active_portfolio().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_weaker_candidate_is_refused_at_capacity() {
        let (mut manager, store) = full_portfolio().await;
        let writes = store.write_count();
        let before: Vec<SpecId> = manager.active().map(|r| r.id().clone()).collect();

        let mut candidate = pending(5, Timeframe::H1, dec!(1.55));
        let admission = manager.admit(&mut candidate, now()).await.unwrap();

        assert_eq!(admission.outcome, AdmitOutcome::RejectedCapacityNoWeaker);
        assert_eq!(candidate.state, StrategyState::PortfolioPending);
        assert_eq!(store.write_count(), writes);
        let after: Vec<SpecId> = manager.active().map(|r| r.id().clone()).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_over_capacity_portfolio_admits_nothing() {
        let (_, store) = full_portfolio().await;
        let mut lowered = config();
        lowered.system.max_concurrent_strategies = 3;
        let mut manager = PortfolioManager::new(store.clone(), &lowered);
        assert_eq!(manager.load().await.unwrap(), 5);
        let writes = store.write_count();

        let mut candidate = pending(5, Timeframe::H1, dec!(9.0));
        let admission = manager.admit(&mut candidate, now()).await.unwrap();

        assert_eq!(admission.outcome, AdmitOutcome::RejectedCapacityNoWeaker);
        assert!(admission.retired.is_none());
        assert_eq!(candidate.state, StrategyState::PortfolioPending);
        assert_eq!(manager.len(), 5);
        assert_eq!(store.write_count(), writes);

        // Operator retirements shrink it back; then admissions resume.
        let ids: Vec<SpecId> = manager.ranking(now()).iter().take(3).map(|(r, _)| r.id().clone()).collect();
        for id in &ids {
            manager.retire(id, ReasonCode::OperatorRetired, now()).await.unwrap();
        }
        assert_eq!(manager.len(), 2);
        let admission = manager.admit(&mut candidate, now()).await.unwrap();
        assert_eq!(admission.outcome, AdmitOutcome::Admitted);
        assert!(manager.len() <= manager.capacity());
    }

    #[tokio::test]
    async fn test_incumbent_without_overlapping_returns_does_not_constrain() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut manager = PortfolioManager::new(store.clone(), &config());

        let series = [
            dec!(0.01), dec!(-0.02), dec!(0.015), dec!(0.03), dec!(-0.01),
            dec!(0.02), dec!(-0.005), dec!(0.01), dec!(0.0), dec!(-0.02),
        ];
        let mut incumbent = pending(0, Timeframe::H1, dec!(2.0));
        incumbent.return_series = returns(&series);
        manager.admit(&mut incumbent, now()).await.unwrap();

        // Identical shape, but on dates the incumbent has no returns for.
        let mut candidate = pending(1, Timeframe::H1, dec!(3.0));
        candidate.return_series = returns(&series)
            .into_iter()
            .map(|(d, v)| (d + ChronoDuration::days(60), v))
            .collect();

        let admission = manager.admit(&mut candidate, now()).await.unwrap();
        assert_eq!(admission.outcome, AdmitOutcome::Admitted);
        assert_eq!(admission.max_correlation, None);
    }

    #[tokio::test]
    async fn test_equal_score_keeps_incumbent() {
        let (mut manager, _store) = full_portfolio().await;
        let mut candidate = pending(5, Timeframe::H1, dec!(1.6));
        let admission = manager.admit(&mut candidate, now()).await.unwrap();
        assert_eq!(admission.outcome, AdmitOutcome::RejectedCapacityNoWeaker);
    }

    #[tokio::test]
    async fn test_highly_correlated_candidate_is_refused_regardless_of_capacity() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut manager = PortfolioManager::new(store.clone(), &config());

        let series = [
            dec!(0.01), dec!(-0.02), dec!(0.015), dec!(0.03), dec!(-0.01),
            dec!(0.02), dec!(-0.005), dec!(0.01), dec!(0.0), dec!(-0.02),
        ];
        let mut incumbent = pending(0, Timeframe::H1, dec!(2.0));
        incumbent.return_series = returns(&series);
        manager.admit(&mut incumbent, now()).await.unwrap();

        // Same shape, slightly perturbed: correlation is about 0.97.
        let noise = [
            dec!(0.005), dec!(0.005), dec!(-0.005), dec!(-0.005), dec!(0.005),
            dec!(-0.005), dec!(0.005), dec!(-0.005), dec!(0.005), dec!(0.005),
        ];
        let perturbed: Vec<Decimal> = series.iter().zip(noise).map(|(s, n)| *s + n).collect();
        let mut candidate = pending(1, Timeframe::H1, dec!(3.0));
        candidate.return_series = returns(&perturbed);

        let rho = correlation(&candidate.return_series, &incumbent.return_series, 10).unwrap();
        assert!(rho > dec!(0.8), "fixture correlation {rho}");

        let admission = manager.admit(&mut candidate, now()).await.unwrap();
        assert_eq!(admission.outcome, AdmitOutcome::RejectedCorrelation);
        assert_eq!(admission.correlated_with.as_ref(), Some(incumbent.id()));
        assert_eq!(manager.len(), 1);
        assert_eq!(candidate.state, StrategyState::PortfolioPending);
    }

    #[tokio::test]
    async fn test_admitting_an_active_strategy_is_a_no_op() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut manager = PortfolioManager::new(store.clone(), &config());
        let mut candidate = pending(2, Timeframe::H4, dec!(2.0));
        manager.admit(&mut candidate, now()).await.unwrap();
        let writes = store.write_count();

        let mut again = pending(2, Timeframe::H4, dec!(2.0));
        let admission = manager.admit(&mut again, now()).await.unwrap();
        assert_eq!(admission.outcome, AdmitOutcome::Admitted);
        assert_eq!(again.state, StrategyState::Active);
        assert_eq!(store.write_count(), writes);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_is_never_exceeded() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut manager = PortfolioManager::new(store.clone(), &config());
        for (i, tf) in Timeframe::ALL.iter().enumerate() {
            for n in 0..9 {
                let pf = dec!(1.5) + Decimal::new(((n * 7 + i * 3) % 11) as i64, 1);
                let mut c = pending(n, *tf, pf);
                manager.admit(&mut c, now()).await.unwrap();
                assert!(manager.len() <= manager.capacity());
            }
        }
        assert_eq!(manager.len(), 5);
        assert_eq!(store.load_active_portfolio().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_tied_weakest_retires_earliest_activated() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut cfg = config();
        cfg.system.max_concurrent_strategies = 2;
        let mut manager = PortfolioManager::new(store.clone(), &cfg);

        let mut first = pending(0, Timeframe::D1, dec!(1.8));
        manager.admit(&mut first, now()).await.unwrap();
        let mut second = pending(1, Timeframe::D1, dec!(1.8));
        manager
            .admit(&mut second, now() + ChronoDuration::hours(1))
            .await
            .unwrap();

        let mut challenger = pending(2, Timeframe::D1, dec!(2.2));
        let admission = manager
            .admit(&mut challenger, now() + ChronoDuration::hours(2))
            .await
            .unwrap();
        assert_eq!(admission.retired.as_ref(), Some(first.id()));
        assert!(manager.get(second.id()).is_some());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_everything_unchanged() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut manager = PortfolioManager::new(store.clone(), &config());
        store.fail_next_writes(10);

        let mut candidate = pending(3, Timeframe::M15, dec!(2.0));
        let result = manager.admit(&mut candidate, now()).await;
        assert!(matches!(result, Err(PortfolioError::Store(_))));
        assert!(manager.is_empty());
        assert_eq!(candidate.state, StrategyState::PortfolioPending);
        assert!(store.record(candidate.id()).is_none());
    }

    #[tokio::test]
    async fn test_transient_store_failure_is_retried() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut manager = PortfolioManager::new(store.clone(), &config());
        store.fail_next_writes(2);

        let mut candidate = pending(3, Timeframe::M15, dec!(2.0));
        let admission = manager.admit(&mut candidate, now()).await.unwrap();
        assert_eq!(admission.outcome, AdmitOutcome::Admitted);
        assert_eq!(store.record(candidate.id()).map(|r| r.state), Some(StrategyState::Active));
    }

    #[tokio::test]
    async fn test_live_losses_make_a_strategy_the_weakest() {
        let (mut manager, _store) = full_portfolio().await;
        // The strongest by backtest (pf 2.0) starts losing live.
        let strongest = manager.ranking(now()).last().map(|(r, _)| r.id().clone()).unwrap();
        let day = now() - ChronoDuration::days(2);
        let trades = vec![
            TradeRecord { entry_time: day, exit_time: day, pnl: dec!(10) },
            TradeRecord { entry_time: day, exit_time: day + ChronoDuration::hours(1), pnl: dec!(-40) },
        ];
        manager.record_live_trades(&strongest, &trades, now()).await.unwrap();

        let ranking = manager.ranking(now());
        assert_eq!(ranking.first().map(|(r, _)| r.id()), Some(&strongest));
        assert_eq!(manager.get(&strongest).unwrap().live_trades.len(), 2);
    }

    #[tokio::test]
    async fn test_operator_retirement_archives_and_frees_slot() {
        let (mut manager, store) = full_portfolio().await;
        let id = manager.active().next().map(|r| r.id().clone()).unwrap();

        let retired = manager.retire(&id, ReasonCode::OperatorRetired, now()).await.unwrap();
        assert_eq!(retired.state, StrategyState::Retired);
        assert_eq!(manager.len(), 4);
        assert!(store.archived(&id).is_some());

        assert!(matches!(
            manager.retire(&id, ReasonCode::OperatorRetired, now()).await,
            Err(PortfolioError::NotActive(_))
        ));
    }

    #[tokio::test]
    async fn test_load_rebuilds_from_store() {
        let (_manager, store) = full_portfolio().await;
        let mut fresh = PortfolioManager::new(store.clone(), &config());
        assert_eq!(fresh.load().await.unwrap(), 5);
        assert!(fresh.active().all(|r| r.state == StrategyState::Active));
    }

    #[tokio::test]
    async fn test_only_pending_candidates_are_admitted() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut manager = PortfolioManager::new(store, &config());
        let spec = StrategySpec::new(Timeframe::H1, [Indicator::Rsi], &BTreeMap::new(), 5).unwrap();
        let mut fresh = StrategyRecord::new(spec, 30, now());
        assert!(matches!(
            manager.admit(&mut fresh, now()).await,
            Err(PortfolioError::NotPending { .. })
        ));
    }
}
