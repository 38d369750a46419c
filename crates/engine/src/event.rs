use crate::report::CycleReport;
use chrono::{DateTime, Utc};
use core_types::{ReasonCode, SpecId};
use serde::Serialize;

/// Everything an operator-facing channel can observe about the scheduler.
///
/// Published on a `tokio::sync::broadcast` channel; subscribers that lag simply
/// miss events, the scheduler never waits for them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EvolutionEvent {
    CycleStarted {
        cycle: u64,
        at: DateTime<Utc>,
    },
    StrategyAdmitted {
        cycle: u64,
        spec_id: SpecId,
        label: String,
        replaced: Option<SpecId>,
    },
    CandidateRejected {
        cycle: u64,
        spec_id: SpecId,
        reason: ReasonCode,
        detail: String,
    },
    CycleCompleted(Box<CycleReport>),
    /// The cycle aborted before changing the portfolio.
    CycleFailed {
        cycle: u64,
        error: String,
    },
}
