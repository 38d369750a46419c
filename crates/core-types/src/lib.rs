//! # ASES Core Types
//!
//! Layer 0 of the workspace: the vocabulary every other crate speaks. Strategy
//! specs and their identity hash, backtest inputs and outputs, performance
//! metrics, and the `StrategyRecord` lifecycle state machine.

pub mod backtest;
pub mod enums;
pub mod error;
pub mod metrics;
pub mod record;
pub mod spec;

// Re-export the core types to provide a clean public API.
pub use backtest::{BacktestResult, BacktestWindow, Kline, TradeRecord};
pub use enums::{Indicator, ReasonCode, StrategyState, Timeframe};
pub use error::CoreError;
pub use metrics::{DailyLoss, MetricValue, PerformanceMetrics};
pub use record::StrategyRecord;
pub use spec::{IndicatorParams, SpecId, StrategySpec};
