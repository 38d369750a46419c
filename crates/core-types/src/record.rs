use crate::backtest::TradeRecord;
use crate::enums::{ReasonCode, StrategyState};
use crate::error::CoreError;
use crate::metrics::PerformanceMetrics;
use crate::spec::{SpecId, StrategySpec};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The mutable lifecycle wrapper around a `StrategySpec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub spec: StrategySpec,
    pub state: StrategyState,
    /// Metrics of the most recent backtest.
    pub metrics: Option<PerformanceMetrics>,
    /// Daily returns keyed by UTC date. Backtest-derived, overwritten by live reports.
    pub return_series: BTreeMap<NaiveDate, Decimal>,
    /// Realized live/paper trades, append-only.
    pub live_trades: Vec<TradeRecord>,
    pub hold_retries: u32,
    /// Length of the next backtest window.
    pub window_days: i64,
    pub reason: Option<ReasonCode>,
    pub reason_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl StrategyRecord {
    pub fn new(spec: StrategySpec, window_days: i64, now: DateTime<Utc>) -> Self {
        Self {
            spec,
            state: StrategyState::Generated,
            metrics: None,
            return_series: BTreeMap::new(),
            live_trades: Vec::new(),
            hold_retries: 0,
            window_days,
            reason: None,
            reason_detail: None,
            created_at: now,
            updated_at: now,
            activated_at: None,
            retired_at: None,
        }
    }

    pub fn id(&self) -> &SpecId {
        self.spec.id()
    }

    /// Moves the record to `next`, refusing moves the state machine does not allow.
    pub fn transition(&mut self, next: StrategyState, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(spec_id = %self.id().short(), from = %self.state, to = %next, "state transition");
        self.state = next;
        self.updated_at = now;
        match next {
            StrategyState::Active => self.activated_at = Some(now),
            StrategyState::Retired => self.retired_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    /// Transitions to `REJECTED`, recording why.
    pub fn reject(
        &mut self,
        reason: ReasonCode,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.transition(StrategyState::Rejected, now)?;
        self.reason = Some(reason);
        self.reason_detail = Some(detail.into());
        Ok(())
    }

    /// Transitions to `RETIRED`, recording why.
    pub fn retire(&mut self, reason: ReasonCode, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.transition(StrategyState::Retired, now)?;
        self.reason = Some(reason);
        Ok(())
    }

    /// Appends realized trades and refreshes the return series for every day they touch.
    ///
    /// A day's live return is the sum of that day's P&L over `capital_base`; it
    /// replaces any backtest-derived value for the same date.
    pub fn append_live_trades(&mut self, trades: &[TradeRecord], capital_base: Decimal, now: DateTime<Utc>) {
        if trades.is_empty() {
            return;
        }
        self.live_trades.extend_from_slice(trades);
        self.updated_at = now;

        if capital_base <= Decimal::ZERO {
            return;
        }
        let touched: BTreeSet<NaiveDate> = trades.iter().map(|t| t.exit_time.date_naive()).collect();
        for date in touched {
            let day_pnl: Decimal = self
                .live_trades
                .iter()
                .filter(|t| t.exit_time.date_naive() == date)
                .map(|t| t.pnl)
                .sum();
            self.return_series.insert(date, day_pnl / capital_base);
        }
    }

    /// Live trades that closed at or after `since`.
    pub fn live_trades_since(&self, since: DateTime<Utc>) -> Vec<TradeRecord> {
        self.live_trades
            .iter()
            .filter(|t| t.exit_time >= since)
            .cloned()
            .collect()
    }
}
