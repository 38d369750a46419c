use crate::event::EvolutionEvent;
use crate::report::Rejection;
use chrono::{DateTime, Utc};
use core_types::{ReasonCode, SpecId, StrategyRecord};
use database::{RetryPolicy, StateStore};
use portfolio::{Admission, AdmitOutcome, PortfolioError, PortfolioManager};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// What the admission loop did with the candidates of one cycle.
#[derive(Debug, Default)]
pub(crate) struct AdmissionSummary {
    pub admitted: Vec<SpecId>,
    pub retired: Vec<SpecId>,
    pub rejections: Vec<Rejection>,
    /// Candidates left `PORTFOLIO_PENDING` because shutdown was requested.
    pub deferred: usize,
}

/// The single consumer of promoted candidates.
///
/// Candidates arrive in promotion order and are offered to the portfolio one at
/// a time, each under its own lock acquisition.
pub(crate) struct AdmissionWorker {
    pub cycle: u64,
    pub portfolio: Arc<Mutex<PortfolioManager>>,
    pub store: Arc<dyn StateStore>,
    pub retry: RetryPolicy,
    pub events: broadcast::Sender<EvolutionEvent>,
    pub shutdown: watch::Receiver<bool>,
}

impl AdmissionWorker {
    pub async fn run(
        self,
        mut queue: mpsc::Receiver<StrategyRecord>,
        now: DateTime<Utc>,
    ) -> AdmissionSummary {
        let mut summary = AdmissionSummary::default();

        while let Some(mut candidate) = queue.recv().await {
            if *self.shutdown.borrow() {
                debug!(spec_id = %candidate.id().short(), "shutdown requested; candidate stays pending");
                summary.deferred += 1;
                continue;
            }

            let result = {
                let mut portfolio = self.portfolio.lock().await;
                portfolio.admit(&mut candidate, now).await
            };

            match result {
                Ok(admission) if admission.outcome == AdmitOutcome::Admitted => {
                    self.admitted(&candidate, admission, &mut summary);
                }
                Ok(admission) => {
                    let reason = admission
                        .outcome
                        .reason()
                        .unwrap_or(ReasonCode::CapacityNoWeaker);
                    let detail = describe_refusal(&admission);
                    self.reject(candidate, reason, detail, now, &mut summary).await;
                }
                Err(PortfolioError::Store(e)) => {
                    error!(spec_id = %candidate.id().short(), error = %e, "admission could not be committed");
                    self.reject(candidate, ReasonCode::PersistenceFailure, e.to_string(), now, &mut summary)
                        .await;
                }
                Err(e) => {
                    error!(spec_id = %candidate.id().short(), error = %e, "admission failed; candidate left for the next cycle");
                }
            }
        }

        if summary.deferred > 0 {
            warn!(cycle = self.cycle, deferred = summary.deferred, "admissions deferred by shutdown");
        }
        summary
    }

    fn admitted(&self, candidate: &StrategyRecord, admission: Admission, summary: &mut AdmissionSummary) {
        let id = candidate.id().clone();
        // Re-offering an already active strategy reports `Admitted` as well.
        if summary.admitted.contains(&id) {
            return;
        }
        let _ = self.events.send(EvolutionEvent::StrategyAdmitted {
            cycle: self.cycle,
            spec_id: id.clone(),
            label: candidate.spec.label(),
            replaced: admission.retired.clone(),
        });
        if let Some(retired) = admission.retired {
            summary.retired.push(retired);
        }
        summary.admitted.push(id);
    }

    async fn reject(
        &self,
        mut candidate: StrategyRecord,
        reason: ReasonCode,
        detail: String,
        now: DateTime<Utc>,
        summary: &mut AdmissionSummary,
    ) {
        let id = candidate.id().clone();
        if let Err(e) = candidate.reject(reason, detail.clone(), now) {
            error!(spec_id = %id.short(), error = %e, "candidate could not be rejected");
            return;
        }

        let store = &self.store;
        let record = &candidate;
        if let Err(e) = self.retry.run("archive_rejected", move || store.archive(record)).await {
            // The store still holds it as pending; the next cycle retries it.
            error!(spec_id = %id.short(), error = %e, "rejected candidate could not be archived");
        }

        info!(spec_id = %id.short(), reason = %reason, detail = %detail, "candidate not admitted");
        let _ = self.events.send(EvolutionEvent::CandidateRejected {
            cycle: self.cycle,
            spec_id: id.clone(),
            reason,
            detail: detail.clone(),
        });
        summary.rejections.push(Rejection {
            spec_id: id,
            reason,
            detail,
        });
    }
}

fn describe_refusal(admission: &Admission) -> String {
    match admission.outcome {
        AdmitOutcome::RejectedCorrelation => format!(
            "correlation {} with {}",
            admission
                .max_correlation
                .map(|rho| rho.round_dp(3).to_string())
                .unwrap_or_default(),
            admission
                .correlated_with
                .as_ref()
                .map(|id| id.short())
                .unwrap_or_default()
        ),
        AdmitOutcome::RejectedCapacityNoWeaker => {
            "portfolio full and no active strategy scores lower".to_string()
        }
        AdmitOutcome::Admitted => String::new(),
    }
}
