//! # ASES Evolution Engine
//!
//! The orchestrator of the workspace. An `EvolutionScheduler` runs one cycle per
//! `evolution_cycle_hours`: it draws candidates from the generator, backtests
//! them concurrently under a timeout, scores and gates the results, and feeds
//! promoted candidates one by one to the portfolio manager.
//!
//! A failing candidate never fails its cycle. A cycle fails only when its
//! inputs cannot be loaded, and then leaves the portfolio untouched.

mod admission;
pub mod error;
pub mod event;
pub mod report;
pub mod scheduler;

pub use error::EngineError;
pub use event::EvolutionEvent;
pub use report::{CycleReport, Rejection};
pub use scheduler::EvolutionScheduler;
