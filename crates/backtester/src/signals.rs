use crate::error::SimulationError;
use core_types::{Indicator, IndicatorParams, Kline, StrategySpec};
use rust_decimal::prelude::*;
use std::collections::VecDeque;
use ta::indicators::{
    AverageTrueRange as Atr, BollingerBands, ExponentialMovingAverage as Ema, FastStochastic,
    MovingAverageConvergenceDivergence as Macd, OnBalanceVolume as Obv, RelativeStrengthIndex as Rsi,
    SimpleMovingAverage as Sma,
};
use ta::{DataItem, Next};

/// A directional opinion of one indicator on one bar.
pub type Vote = i8;

const LONG: Vote = 1;
const FLAT: Vote = 0;
const SHORT: Vote = -1;

/// Streaming state of one indicator.
enum IndicatorState {
    Sma(Sma),
    Ema(Ema),
    Rsi(Rsi),
    Macd(Macd),
    Bollinger(BollingerBands),
    Atr { atr: Atr, prev_close: Option<f64> },
    Stochastic(FastStochastic),
    Obv { obv: Obv, smoothing: Ema },
    Vwap { period: usize, window: VecDeque<(f64, f64)> },
}

impl IndicatorState {
    fn new(indicator: Indicator, params: Option<&IndicatorParams>) -> Result<Self, SimulationError> {
        let default = IndicatorParams::new();
        let p = params.unwrap_or(&default);
        Ok(match indicator {
            Indicator::Sma => IndicatorState::Sma(Sma::new(p.period("period", 20))?),
            Indicator::Ema => IndicatorState::Ema(Ema::new(p.period("period", 21))?),
            Indicator::Rsi => IndicatorState::Rsi(Rsi::new(p.period("period", 14))?),
            Indicator::Macd => IndicatorState::Macd(Macd::new(
                p.period("fast", 12),
                p.period("slow", 26),
                p.period("signal", 9),
            )?),
            Indicator::BollingerBands => {
                let multiplier = p
                    .get("std_dev")
                    .and_then(|v| v.to_f64())
                    .unwrap_or(2.0);
                IndicatorState::Bollinger(BollingerBands::new(p.period("period", 20), multiplier)?)
            }
            Indicator::Atr => IndicatorState::Atr {
                atr: Atr::new(p.period("period", 14))?,
                prev_close: None,
            },
            Indicator::Stochastic => IndicatorState::Stochastic(FastStochastic::new(p.period("period", 14))?),
            Indicator::Obv => IndicatorState::Obv {
                obv: Obv::new(),
                smoothing: Ema::new(p.period("period", 20))?,
            },
            Indicator::Vwap => IndicatorState::Vwap {
                period: p.period("period", 24),
                window: VecDeque::new(),
            },
        })
    }

    fn vote(&mut self, bar: &DataItem, close: f64, typical: f64, volume: f64) -> Vote {
        let above = |level: f64| {
            if close > level {
                LONG
            } else if close < level {
                SHORT
            } else {
                FLAT
            }
        };
        match self {
            IndicatorState::Sma(ma) => above(ma.next(close)),
            IndicatorState::Ema(ma) => above(ma.next(close)),
            IndicatorState::Rsi(rsi) => match rsi.next(close) {
                v if v < 30.0 => LONG,
                v if v > 70.0 => SHORT,
                _ => FLAT,
            },
            IndicatorState::Macd(macd) => {
                let out = macd.next(close);
                if out.macd > out.signal {
                    LONG
                } else if out.macd < out.signal {
                    SHORT
                } else {
                    FLAT
                }
            }
            IndicatorState::Bollinger(bb) => {
                let out = bb.next(close);
                if close < out.lower {
                    LONG
                } else if close > out.upper {
                    SHORT
                } else {
                    FLAT
                }
            }
            IndicatorState::Atr { atr, prev_close } => {
                let range = atr.next(bar);
                let vote = match *prev_close {
                    Some(prev) if close > prev + range => LONG,
                    Some(prev) if close < prev - range => SHORT,
                    _ => FLAT,
                };
                *prev_close = Some(close);
                vote
            }
            IndicatorState::Stochastic(stoch) => match stoch.next(bar) {
                v if v < 20.0 => LONG,
                v if v > 80.0 => SHORT,
                _ => FLAT,
            },
            IndicatorState::Obv { obv, smoothing } => {
                let value = obv.next(bar);
                let average = smoothing.next(value);
                if value > average {
                    LONG
                } else if value < average {
                    SHORT
                } else {
                    FLAT
                }
            }
            IndicatorState::Vwap { period, window } => {
                window.push_back((typical * volume, volume));
                if window.len() > *period {
                    window.pop_front();
                }
                let (value, vol) = window
                    .iter()
                    .fold((0.0, 0.0), |(pv, v), (x, y)| (pv + x, v + y));
                if vol > 0.0 { above(value / vol) } else { FLAT }
            }
        }
    }
}

/// Combines the votes of every indicator in a spec into one position signal.
pub struct VoteAggregator {
    states: Vec<IndicatorState>,
}

impl VoteAggregator {
    pub fn new(spec: &StrategySpec) -> Result<Self, SimulationError> {
        let states = spec
            .indicators()
            .iter()
            .map(|ind| IndicatorState::new(*ind, spec.params(*ind)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { states })
    }

    /// The summed vote of all indicators for `kline`.
    pub fn next(&mut self, kline: &Kline) -> Result<i32, SimulationError> {
        let f = |v: Decimal, field: &str| {
            v.to_f64()
                .ok_or_else(|| SimulationError::Numeric(format!("{} {} out of f64 range", field, v)))
        };
        let (open, high, low, close, volume) = (
            f(kline.open, "open")?,
            f(kline.high, "high")?,
            f(kline.low, "low")?,
            f(kline.close, "close")?,
            f(kline.volume, "volume")?,
        );
        let bar = DataItem::builder()
            .open(open)
            .high(high)
            .low(low)
            .close(close)
            .volume(volume)
            .build()?;
        let typical = (high + low + close) / 3.0;

        Ok(self
            .states
            .iter_mut()
            .map(|s| i32::from(s.vote(&bar, close, typical, volume)))
            .sum())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
