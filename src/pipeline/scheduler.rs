//! Periodic sweeps over deliveries and submitted claims.

use crate::claims::claim::ClaimStatus;
use crate::claims::lifecycle::{FollowUpKind, FollowUpTask};
use crate::core::events::EngineEvent;
use crate::core::ids::ConsignmentId;
use crate::pipeline::engine::{BatchReport, ClaimEngine, ProcessOptions};
use chrono::{DateTime, Duration, Utc};
use log::info;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Consignments picked up by this sweep.
    pub attempted: usize,
    pub generated: usize,
    /// Given up on for good in this sweep.
    pub terminal: Vec<ConsignmentId>,
    /// Left for the next sweep.
    pub deferred: Vec<ConsignmentId>,
}

/// Drives the engine from a timer.
///
/// Remembers consignments that can never produce a claim so later sweeps
/// skip them.
pub struct Scheduler {
    engine: Arc<ClaimEngine>,
    terminal: RwLock<HashMap<ConsignmentId, String>>,
}

impl Scheduler {
    pub fn new(engine: Arc<ClaimEngine>) -> Self {
        Self {
            engine,
            terminal: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ClaimEngine> {
        &self.engine
    }

    /// Why a consignment was given up on, if it was.
    pub fn terminal_reason(&self, id: &ConsignmentId) -> Option<String> {
        self.terminal.read().get(id).cloned()
    }

    /// Run the pipeline over delivered consignments that have no claim yet.
    pub fn sweep_deliveries(&self, options: ProcessOptions) -> SweepReport {
        let pending: Vec<ConsignmentId> = {
            let terminal = self.terminal.read();
            self.engine
                .consignments()
                .delivered()
                .into_iter()
                .map(|c| c.id().clone())
                .filter(|id| !terminal.contains_key(id))
                .filter(|id| self.engine.claims().by_consignment(id).is_none())
                .collect()
        };
        if pending.is_empty() {
            return SweepReport::default();
        }

        let batch: BatchReport = self.engine.process_batch(&pending, options);

        let mut report = SweepReport {
            attempted: pending.len(),
            generated: batch.claims.len(),
            ..SweepReport::default()
        };
        let mut terminal = self.terminal.write();
        for failure in batch.failures {
            if failure.retryable {
                report.deferred.push(failure.consignment);
            } else {
                terminal.insert(failure.consignment.clone(), failure.error);
                report.terminal.push(failure.consignment);
            }
        }

        info!(
            "delivery sweep: {} attempted, {} generated, {} terminal, {} deferred",
            report.attempted,
            report.generated,
            report.terminal.len(),
            report.deferred.len()
        );
        report
    }

    /// Raise a follow-up for every submitted claim without a regulator
    /// outcome after the submission SLA, most urgent first.
    pub fn sweep_overdue_submissions(&self, now: DateTime<Utc>) -> Vec<FollowUpTask> {
        let sla = Duration::days(self.engine.config().pipeline.submission_sla_days);
        let mut tasks: Vec<FollowUpTask> = self
            .engine
            .claims()
            .with_status(ClaimStatus::Submitted)
            .into_iter()
            .filter(|c| c.submitted_at().map_or(false, |at| at + sla < now))
            .map(|c| FollowUpTask {
                claim_id: c.id(),
                claim_number: c.claim_number().to_string(),
                kind: FollowUpKind::OverdueSubmission,
                priority: c.priority(),
                due: now,
            })
            .collect();
        tasks.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.claim_number.cmp(&b.claim_number)));

        for task in &tasks {
            self.engine.sink().emit(EngineEvent::FollowUpScheduled(task.clone()));
        }
        if !tasks.is_empty() {
            info!("{} submitted claims are past the {} day SLA", tasks.len(), sla.num_days());
        }
        tasks
    }
}
