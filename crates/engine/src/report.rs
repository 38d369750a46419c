use chrono::{DateTime, Utc};
use core_types::{ReasonCode, SpecId};
use serde::Serialize;

/// A candidate that left the cycle in `REJECTED`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub spec_id: SpecId,
    pub reason: ReasonCode,
    pub detail: String,
}

/// The outcome of one evolution cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Records carried over from earlier cycles or a previous process.
    pub recovered: usize,
    pub generated: usize,
    pub search_space_exhausted: bool,
    pub backtested: usize,
    pub promoted: usize,
    pub held: Vec<SpecId>,
    pub rejections: Vec<Rejection>,
    pub admitted: Vec<SpecId>,
    pub retired: Vec<SpecId>,
    pub portfolio_size: usize,
    /// Shutdown arrived mid-cycle. Unfinished candidates stay durable and are
    /// picked up by the next cycle.
    pub cancelled: bool,
}

impl CycleReport {
    pub fn rejected(&self) -> usize {
        self.rejections.len()
    }

    pub fn rejected_with(&self, reason: ReasonCode) -> usize {
        self.rejections.iter().filter(|r| r.reason == reason).count()
    }

    pub(crate) fn reject(&mut self, spec_id: &SpecId, reason: ReasonCode, detail: impl Into<String>) {
        self.rejections.push(Rejection {
            spec_id: spec_id.clone(),
            reason,
            detail: detail.into(),
        });
    }
}
