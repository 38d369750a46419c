use crate::error::SimulationError;
use crate::signals::VoteAggregator;
use crate::source::MarketDataSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{BacktestResult, BacktestWindow, Kline, StrategySpec, Timeframe, TradeRecord};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Replays a `StrategySpec` over a historical window.
#[async_trait]
pub trait BacktestSimulator: Send + Sync {
    async fn run(&self, spec: &StrategySpec, window: BacktestWindow) -> Result<BacktestResult, SimulationError>;
}

/// A long-only reference simulator.
///
/// Each bar, every indicator of the spec votes long, short or flat. A position
/// is opened when a strict majority votes long and closed once the summed vote
/// turns negative. Entries and exits fill at the bar close, less `fee_rate`.
pub struct IndicatorSimulator {
    source: Arc<dyn MarketDataSource>,
    initial_capital: Decimal,
    fee_rate: Decimal,
}

struct OpenPosition {
    entry_time: DateTime<Utc>,
    quantity: Decimal,
    cost: Decimal,
}

impl IndicatorSimulator {
    pub fn new(source: Arc<dyn MarketDataSource>, initial_capital: Decimal, fee_rate: Decimal) -> Self {
        Self {
            source,
            initial_capital,
            fee_rate,
        }
    }

    /// Refuses data with missing bars; a strategy must not be judged on a hole.
    fn check_continuity(klines: &[Kline], timeframe: Timeframe) -> Result<(), SimulationError> {
        let step = timeframe.bar_duration();
        let mut missing = 0usize;
        let mut first_gap = None;
        for pair in klines.windows(2) {
            let gap = pair[1].open_time - pair[0].open_time;
            if gap > step {
                missing += (gap.num_seconds() / step.num_seconds()).saturating_sub(1) as usize;
                first_gap.get_or_insert(pair[0].open_time);
            }
        }
        match first_gap {
            Some(after) => Err(SimulationError::DataGap { missing, after }),
            None => Ok(()),
        }
    }

    fn close_position(
        &self,
        position: OpenPosition,
        price: Decimal,
        exit_time: DateTime<Utc>,
        cash: &mut Decimal,
        trades: &mut Vec<TradeRecord>,
    ) {
        let proceeds = position.quantity * price * (Decimal::ONE - self.fee_rate);
        *cash += proceeds;
        trades.push(TradeRecord {
            entry_time: position.entry_time,
            exit_time,
            pnl: proceeds - position.cost,
        });
    }
}

#[async_trait]
impl BacktestSimulator for IndicatorSimulator {
    async fn run(&self, spec: &StrategySpec, window: BacktestWindow) -> Result<BacktestResult, SimulationError> {
        let klines = self.source.klines(spec.timeframe(), window).await?;
        if klines.is_empty() {
            return Err(SimulationError::DataUnavailable);
        }
        Self::check_continuity(&klines, spec.timeframe())?;

        let mut votes = VoteAggregator::new(spec)?;
        let quorum = votes.len() as i32;

        let mut cash = self.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(klines.len() + 1);
        equity_curve.push((klines[0].open_time, cash));

        for kline in &klines {
            let score = votes.next(kline)?;

            match position.take() {
                None if score * 2 > quorum && kline.close > Decimal::ZERO => {
                    let quantity = cash * (Decimal::ONE - self.fee_rate) / kline.close;
                    position = Some(OpenPosition {
                        entry_time: kline.close_time,
                        quantity,
                        cost: cash,
                    });
                    cash = Decimal::ZERO;
                }
                Some(open) if score < 0 => {
                    self.close_position(open, kline.close, kline.close_time, &mut cash, &mut trades);
                }
                other => position = other,
            }

            let marked = position
                .as_ref()
                .map(|p| p.quantity * kline.close)
                .unwrap_or(Decimal::ZERO);
            equity_curve.push((kline.close_time, cash + marked));
        }

        if let (Some(open), Some(last)) = (position.take(), klines.last()) {
            self.close_position(open, last.close, last.close_time, &mut cash, &mut trades);
            if let Some(point) = equity_curve.last_mut() {
                point.1 = cash;
            }
        }

        tracing::debug!(
            spec = %spec.label(),
            bars = klines.len(),
            trades = trades.len(),
            final_equity = %cash,
            "simulation finished"
        );

        Ok(BacktestResult {
            window,
            trades,
            equity_curve,
        })
    }
}
