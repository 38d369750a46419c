//! # ASES Analytics
//!
//! The metric evaluator: turns a `BacktestResult` into `PerformanceMetrics`,
//! and measures how closely two strategies' daily returns move together.
//!
//! ## Architectural Principles
//!
//! - **Layer 1 Logic:** This is a pure logic crate. It has no knowledge of external systems.
//!   It depends only on `core-types` (Layer 0).
//! - **Stateless Calculation:** `MetricEvaluator` holds only its parameters, so it can be
//!   shared between concurrent backtest workers without locking.
//!
//! ## Public API
//!
//! - `MetricEvaluator`: computes profit factor, win rate, drawdown, Sharpe, trade frequency
//!   and the daily-loss distribution.
//! - `correlation`: Pearson correlation over overlapping dates.
//! - `AnalyticsError`: partial or too-short windows and numeric failures.

// Declare the modules that constitute this crate.
pub mod correlation;
pub mod error;
pub mod evaluator;

// Re-export the key components to create a clean, public-facing API.
pub use correlation::correlation;
pub use error::AnalyticsError;
pub use evaluator::{MetricEvaluator, daily_returns, max_drawdown};
