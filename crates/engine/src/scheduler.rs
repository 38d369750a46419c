use crate::admission::AdmissionWorker;
use crate::error::EngineError;
use crate::event::EvolutionEvent;
use crate::report::CycleReport;
use analytics::{AnalyticsError, MetricEvaluator, daily_returns};
use backtester::{BacktestSimulator, SimulationError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use configuration::Config;
use core_types::{BacktestResult, BacktestWindow, ReasonCode, StrategyRecord, StrategyState};
use database::{DbError, RetryPolicy, StateStore};
use futures::stream::{self, StreamExt};
use gate::{Breach, GateDecision, PromotionGate};
use generator::CandidateGenerator;
use portfolio::PortfolioManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::{MissedTickBehavior, error::Elapsed, interval, timeout};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 256;

/// States a record can be left in between cycles. Everything else is either
/// `ACTIVE` (owned by the portfolio) or archived.
const CARRIED_STATES: [StrategyState; 5] = [
    StrategyState::PortfolioPending,
    StrategyState::Evaluated,
    StrategyState::Hold,
    StrategyState::Backtesting,
    StrategyState::Generated,
];

type BacktestOutcome = Result<Result<BacktestResult, SimulationError>, Elapsed>;

/// Drives evolution cycles: generate, backtest, evaluate, gate, admit.
pub struct EvolutionScheduler {
    config: Config,
    store: Arc<dyn StateStore>,
    simulator: Arc<dyn BacktestSimulator>,
    generator: CandidateGenerator,
    evaluator: MetricEvaluator,
    gate: PromotionGate,
    portfolio: Arc<Mutex<PortfolioManager>>,
    retry: RetryPolicy,
    events: broadcast::Sender<EvolutionEvent>,
    cycle: u64,
}

impl EvolutionScheduler {
    pub fn new(
        config: Config,
        store: Arc<dyn StateStore>,
        simulator: Arc<dyn BacktestSimulator>,
    ) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        let generator = CandidateGenerator::new(&config.strategy, &config.generator)?;
        let evaluator = MetricEvaluator::new(
            config.metrics.annualization_days,
            config.system.min_backtest_period_days,
        );
        let gate = PromotionGate::new(config.thresholds.clone());
        let portfolio = Arc::new(Mutex::new(PortfolioManager::new(store.clone(), &config)));
        let retry = RetryPolicy::new(
            config.portfolio.persistence_retry_attempts,
            Duration::from_millis(config.portfolio.persistence_backoff_ms),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            store,
            simulator,
            generator,
            evaluator,
            gate,
            portfolio,
            retry,
            events,
            cycle: 0,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the portfolio, e.g. for reporting live trades.
    pub fn portfolio(&self) -> Arc<Mutex<PortfolioManager>> {
        self.portfolio.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EvolutionEvent> {
        self.events.subscribe()
    }

    /// Runs a cycle immediately and then every `evolution_cycle_hours` until
    /// `shutdown` turns `true`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let loaded = self.portfolio.lock().await.load().await?;
        let hours = self.config.system.evolution_cycle_hours;
        info!(active = loaded, every_hours = hours, "evolution scheduler started");

        let mut ticker = interval(Duration::from_secs(hours.saturating_mul(3600)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }
            match self.run_cycle(shutdown.clone()).await {
                Ok(report) if report.cancelled => break,
                Ok(_) => {}
                // Already reported; the next tick tries again.
                Err(_) => {}
            }
        }

        info!("evolution scheduler stopped");
        Ok(())
    }

    pub async fn run_cycle(&mut self, shutdown: watch::Receiver<bool>) -> Result<CycleReport, EngineError> {
        self.run_cycle_at(Utc::now(), shutdown).await
    }

    /// Runs one cycle with backtest windows ending at `now`.
    ///
    /// Fails only when the cycle cannot start: the portfolio and the carried
    /// records could not be loaded. In that case nothing has changed.
    pub async fn run_cycle_at(
        &mut self,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CycleReport, EngineError> {
        self.cycle += 1;
        let cycle = self.cycle;
        let _ = self.events.send(EvolutionEvent::CycleStarted { cycle, at: now });
        info!(cycle, "evolution cycle started");

        match self.execute_cycle(cycle, now, shutdown).await {
            Ok(report) => {
                info!(
                    cycle,
                    recovered = report.recovered,
                    generated = report.generated,
                    backtested = report.backtested,
                    promoted = report.promoted,
                    held = report.held.len(),
                    rejected = report.rejected(),
                    admitted = report.admitted.len(),
                    retired = report.retired.len(),
                    portfolio_size = report.portfolio_size,
                    cancelled = report.cancelled,
                    "evolution cycle finished"
                );
                let _ = self
                    .events
                    .send(EvolutionEvent::CycleCompleted(Box::new(report.clone())));
                Ok(report)
            }
            Err(e) => {
                error!(cycle, error = %e, "evolution cycle aborted");
                let _ = self.events.send(EvolutionEvent::CycleFailed {
                    cycle,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute_cycle(
        &mut self,
        cycle: u64,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<CycleReport, EngineError> {
        let mut report = CycleReport {
            cycle,
            started_at: Some(now),
            ..Default::default()
        };

        // 1. Everything the cycle depends on is read up front.
        let active_specs = {
            let mut portfolio = self.portfolio.lock().await;
            portfolio.load().await?;
            portfolio.active_specs()
        };
        let carried = self.store.load_records_in_states(&CARRIED_STATES).await?;
        let since = now - ChronoDuration::days(self.config.generator.dedup_recency_days);
        let known = self.store.known_spec_ids(since).await?;
        report.recovered = carried.len();

        // 2. The admission loop consumes promoted candidates in order.
        let capacity = carried.len() + self.config.scheduler.candidates_per_cycle + 1;
        let (queue, queue_rx) = mpsc::channel(capacity);
        let worker = AdmissionWorker {
            cycle,
            portfolio: self.portfolio.clone(),
            store: self.store.clone(),
            retry: self.retry,
            events: self.events.clone(),
            shutdown: shutdown.clone(),
        };
        let admissions = tokio::spawn(worker.run(queue_rx, now));

        // 3. Carried records go first: evaluated ones straight back to the
        //    gate, unfinished ones back into the backtest queue.
        let mut pending_backtests = Vec::new();
        for mut record in carried {
            match record.state {
                StrategyState::PortfolioPending | StrategyState::Evaluated => {
                    if record.state == StrategyState::PortfolioPending {
                        debug!(spec_id = %record.id().short(), "recovering pending candidate as evaluated");
                        if let Err(e) = record.transition(StrategyState::Evaluated, now) {
                            error!(spec_id = %record.id().short(), error = %e, "candidate dropped from cycle");
                            continue;
                        }
                    }
                    self.decide(record, now, &queue, &mut report).await;
                }
                _ => pending_backtests.push(record),
            }
        }

        // 4. New candidates.
        let batch = self.generator.generate(
            self.config.scheduler.candidates_per_cycle,
            &known,
            &active_specs,
        );
        report.generated = batch.specs.len();
        report.search_space_exhausted = batch.exhausted;
        let window_days = self.config.system.min_backtest_period_days;
        pending_backtests.extend(
            batch
                .specs
                .into_iter()
                .map(|spec| StrategyRecord::new(spec, window_days, now)),
        );

        let mut runnable = Vec::with_capacity(pending_backtests.len());
        for mut record in pending_backtests {
            if record.state != StrategyState::Backtesting {
                if let Err(e) = record.transition(StrategyState::Backtesting, now) {
                    error!(spec_id = %record.id().short(), error = %e, "candidate dropped from cycle");
                    continue;
                }
            }
            match self.persist(&record).await {
                Ok(()) => runnable.push(record),
                Err(e) => self.fail_persistence(record, e, now, &mut report).await,
            }
        }

        // 5. Backtests, bounded and individually timed out.
        let limit = Duration::from_secs(self.config.scheduler.backtest_timeout_secs);
        let simulator = &self.simulator;
        let mut outcomes = stream::iter(runnable)
            .map(move |record| async move {
                let window = BacktestWindow::ending_at(now, record.window_days);
                let outcome = timeout(limit, simulator.run(&record.spec, window)).await;
                (record, outcome)
            })
            .buffer_unordered(self.config.scheduler.worker_concurrency.max(1));

        let mut stop = shutdown.clone();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut stop) => {
                    warn!(cycle, "shutdown requested; abandoning in-flight backtests");
                    report.cancelled = true;
                    None
                }
                next = outcomes.next() => next,
            };
            let Some((record, outcome)) = next else {
                break;
            };
            report.backtested += 1;
            self.judge(record, outcome, now, &queue, &mut report).await;
        }
        drop(outcomes);
        drop(queue);

        // 6. Wait for the admission loop to drain.
        let summary = admissions.await?;
        report.admitted = summary.admitted;
        report.retired = summary.retired;
        report.rejections.extend(summary.rejections);
        report.cancelled |= summary.deferred > 0;
        report.portfolio_size = self.portfolio.lock().await.len();
        report.finished_at = Some(Utc::now());
        Ok(report)
    }

    /// Scores a finished backtest and hands the record to the gate.
    async fn judge(
        &self,
        mut record: StrategyRecord,
        outcome: BacktestOutcome,
        now: DateTime<Utc>,
        queue: &mpsc::Sender<StrategyRecord>,
        report: &mut CycleReport,
    ) {
        let result = match outcome {
            Err(_) => {
                let detail = format!(
                    "no result within {}s",
                    self.config.scheduler.backtest_timeout_secs
                );
                return self.reject(record, ReasonCode::BacktestTimeout, detail, now, report).await;
            }
            Ok(Err(e @ SimulationError::DataGap { .. })) => {
                return self.reject(record, ReasonCode::DataGap, e.to_string(), now, report).await;
            }
            Ok(Err(e @ SimulationError::DataUnavailable)) => {
                return self.hold(record, e.to_string(), now, report).await;
            }
            Ok(Err(e)) => {
                return self.reject(record, ReasonCode::BacktestFailed, e.to_string(), now, report).await;
            }
            Ok(Ok(result)) => result,
        };

        match self.evaluator.evaluate(&result) {
            Err(e @ (AnalyticsError::PartialWindow { .. } | AnalyticsError::WindowTooShort { .. })) => {
                self.hold(record, e.to_string(), now, report).await
            }
            Err(e) => {
                self.reject(record, ReasonCode::BacktestFailed, e.to_string(), now, report)
                    .await
            }
            Ok(metrics) => {
                record.return_series = daily_returns(&result.equity_curve);
                record.metrics = Some(metrics);
                if let Err(e) = record.transition(StrategyState::Evaluated, now) {
                    error!(spec_id = %record.id().short(), error = %e, "candidate dropped from cycle");
                    return;
                }
                self.decide(record, now, queue, report).await
            }
        }
    }

    /// Applies the promotion gate to an `EVALUATED` record.
    async fn decide(
        &self,
        mut record: StrategyRecord,
        now: DateTime<Utc>,
        queue: &mpsc::Sender<StrategyRecord>,
        report: &mut CycleReport,
    ) {
        let Some(metrics) = record.metrics.as_ref() else {
            let detail = "evaluated without metrics".to_string();
            return self.reject(record, ReasonCode::InsufficientData, detail, now, report).await;
        };

        let decision = self.gate.evaluate(metrics);
        match decision {
            GateDecision::Promote => {
                if let Err(e) = record.transition(StrategyState::PortfolioPending, now) {
                    error!(spec_id = %record.id().short(), error = %e, "candidate dropped from cycle");
                    return;
                }
                if let Err(e) = self.persist(&record).await {
                    return self.fail_persistence(record, e, now, report).await;
                }
                debug!(spec_id = %record.id().short(), label = %record.spec.label(), "candidate promoted");
                report.promoted += 1;
                if queue.send(record).await.is_err() {
                    warn!("admission loop gone; candidate stays pending until the next cycle");
                }
            }
            GateDecision::Hold { .. } => self.hold(record, decision.describe(), now, report).await,
            GateDecision::Reject { ref breaches } => {
                let reason = if breaches
                    .iter()
                    .any(|b| matches!(b, Breach::InsufficientData { .. }))
                {
                    ReasonCode::InsufficientData
                } else {
                    ReasonCode::ThresholdNotMet
                };
                self.reject(record, reason, decision.describe(), now, report).await
            }
        }
    }

    /// Parks a record for a retry next cycle over a longer window, or rejects
    /// it once its retries are used up.
    async fn hold(&self, mut record: StrategyRecord, detail: String, now: DateTime<Utc>, report: &mut CycleReport) {
        let max_retries = self.config.scheduler.max_hold_retries;
        if record.hold_retries >= max_retries {
            let detail = format!("{} after {} retries", detail, record.hold_retries);
            return self
                .reject(record, ReasonCode::HoldRetriesExhausted, detail, now, report)
                .await;
        }

        if let Err(e) = record.transition(StrategyState::Hold, now) {
            error!(spec_id = %record.id().short(), error = %e, "candidate dropped from cycle");
            return;
        }
        record.hold_retries += 1;
        record.window_days += self.config.scheduler.hold_window_extension_days;
        record.reason_detail = Some(detail);

        if let Err(e) = self.persist(&record).await {
            return self.fail_persistence(record, e, now, report).await;
        }
        debug!(
            spec_id = %record.id().short(),
            retry = record.hold_retries,
            next_window_days = record.window_days,
            "candidate on hold"
        );
        report.held.push(record.id().clone());
    }

    /// Moves a record to `REJECTED` and archives it.
    async fn reject(
        &self,
        mut record: StrategyRecord,
        reason: ReasonCode,
        detail: String,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let id = record.id().clone();
        if let Err(e) = record.reject(reason, detail.clone(), now) {
            error!(spec_id = %id.short(), error = %e, "candidate could not be rejected");
            return;
        }

        let store = &self.store;
        let archived = &record;
        if let Err(e) = self.retry.run("archive_rejected", move || store.archive(archived)).await {
            error!(spec_id = %id.short(), error = %e, "rejected candidate could not be archived");
        }

        info!(spec_id = %id.short(), reason = %reason, detail = %detail, "candidate rejected");
        let _ = self.events.send(EvolutionEvent::CandidateRejected {
            cycle: self.cycle,
            spec_id: id.clone(),
            reason,
            detail: detail.clone(),
        });
        report.reject(&id, reason, detail);
    }

    async fn fail_persistence(
        &self,
        record: StrategyRecord,
        error: DbError,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        self.reject(record, ReasonCode::PersistenceFailure, error.to_string(), now, report)
            .await
    }

    async fn persist(&self, record: &StrategyRecord) -> Result<(), DbError> {
        let store = &self.store;
        self.retry.run("persist_record", move || store.persist(record)).await
    }
}

/// Resolves once `shutdown` is `true`. Never resolves if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
