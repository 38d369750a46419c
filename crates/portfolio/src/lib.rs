//! # ASES Portfolio Manager
//!
//! Owns the set of live strategies. Admission checks correlation against every
//! incumbent, fills free slots, and at capacity replaces the weakest strategy
//! only when a candidate strictly outscores it.

pub mod error;
pub mod manager;

pub use error::PortfolioError;
pub use manager::{Admission, AdmitOutcome, PortfolioManager};
