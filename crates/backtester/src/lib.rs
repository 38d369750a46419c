//! # ASES Backtester
//!
//! The boundary to historical simulation. The engine only sees the
//! `BacktestSimulator` and `MarketDataSource` traits; `IndicatorSimulator` is a
//! reference implementation that trades on indicator votes.

pub mod error;
pub mod signals;
pub mod simulator;
pub mod source;

pub use error::SimulationError;
pub use simulator::{BacktestSimulator, IndicatorSimulator};
pub use source::{InMemoryKlineSource, MarketDataSource, PgKlineSource};
