//! # ASES Candidate Generator
//!
//! Proposes new `StrategySpec`s each cycle from the combinatorial space of
//! timeframes and indicator subsets, skipping anything already known.

pub mod error;
pub mod generator;

pub use error::GeneratorError;
pub use generator::{CandidateBatch, CandidateGenerator, indicator_overlap};
