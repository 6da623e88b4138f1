use crate::claims::claim::{Claim, ClaimStatus, Priority};
use crate::core::config::{AutoSubmitMode, LifecycleConfig, PriorityConfig, RiskWeights};
use crate::core::error::{EngineError, Result};
use crate::core::ids::ClaimId;
use crate::gps::validator::GpsTrace;
use crate::reconciliation::three_way::ThreeWayReconciliation;
use chrono::{DateTime, Duration, Utc};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of evaluating a draft claim, first matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    RejectedReconciliation,
    RejectedGps,
    InsufficientEvidence,
    AutoSubmit,
    ReadyToSubmit,
    ManualReview,
}

/// Why a reviewer turned a claim down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewRejection {
    Gps,
    Reconciliation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FollowUpKind {
    /// Routine check after a claim is generated.
    ClaimReview,
    /// A submitted claim has waited past the regulator SLA.
    OverdueSubmission,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpTask {
    pub claim_id: ClaimId,
    pub claim_number: String,
    pub kind: FollowUpKind,
    pub priority: Priority,
    pub due: DateTime<Utc>,
}

/// Inputs of the lifecycle decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub gps_valid: bool,
    pub gps_confidence: f64,
    pub gps_anomalies: usize,
    pub reconciliation_valid: bool,
    pub reconciliation_confidence: f64,
    pub evidence_score: f64,
}

impl Assessment {
    pub fn new(gps: &GpsTrace, reconciliation: &ThreeWayReconciliation, evidence_score: f64) -> Self {
        Self {
            gps_valid: gps.is_valid(),
            gps_confidence: gps.confidence(),
            gps_anomalies: gps.anomaly_count(),
            reconciliation_valid: reconciliation.is_valid(),
            reconciliation_confidence: reconciliation.confidence(),
            evidence_score,
        }
    }

    /// Mean of GPS confidence and evidence score.
    pub fn quality_score(&self) -> f64 {
        (self.gps_confidence + self.evidence_score) / 2.0
    }
}

/// The claim state machine.
#[derive(Debug, Clone, Default)]
pub struct ClaimLifecycle {
    config: LifecycleConfig,
    priority: PriorityConfig,
    risk: RiskWeights,
}

impl ClaimLifecycle {
    pub fn new(config: LifecycleConfig, priority: PriorityConfig, risk: RiskWeights) -> Self {
        Self {
            config,
            priority,
            risk,
        }
    }

    pub fn decide(&self, a: &Assessment) -> Decision {
        let c = &self.config;
        if !a.reconciliation_valid {
            Decision::RejectedReconciliation
        } else if !a.gps_valid {
            Decision::RejectedGps
        } else if a.evidence_score < c.min_evidence {
            Decision::InsufficientEvidence
        } else if a.gps_confidence >= c.auto_submit_confidence && a.evidence_score >= c.auto_submit_evidence {
            Decision::AutoSubmit
        } else if a.gps_confidence >= c.ready_confidence && a.evidence_score >= c.ready_evidence {
            Decision::ReadyToSubmit
        } else {
            Decision::ManualReview
        }
    }

    /// Review priority from claim amount and quality score.
    pub fn priority(&self, amount: Decimal, quality: f64) -> Priority {
        let p = &self.priority;
        if amount > p.urgent_amount && quality >= p.urgent_quality {
            Priority::Urgent
        } else if amount > p.high_amount && quality >= p.high_quality {
            Priority::High
        } else if quality >= p.medium_quality {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// Claim risk in [0, 100].
    pub fn risk_score(&self, a: &Assessment) -> f64 {
        let w = &self.risk;
        let mut risk = w.per_anomaly * a.gps_anomalies as f64
            + w.gps_deficit * (100.0 - a.gps_confidence)
            + w.reconciliation_deficit * (100.0 - a.reconciliation_confidence)
            + w.evidence_deficit * (100.0 - a.evidence_score);
        if !a.reconciliation_valid {
            risk += w.reconciliation_invalid;
        }
        risk.clamp(0.0, 100.0)
    }

    /// Score a draft claim and move it to its first real status.
    pub fn evaluate(
        &self,
        claim: &mut Claim,
        assessment: &Assessment,
        evidence_refs: Vec<String>,
        at: DateTime<Utc>,
    ) -> Result<Decision> {
        if claim.status != ClaimStatus::Draft {
            return Err(EngineError::InvalidTransition {
                from: claim.status.to_string(),
                to: "evaluated".to_string(),
            });
        }

        claim.evidence_score = assessment.evidence_score;
        claim.evidence_refs = evidence_refs;
        claim.quality_score = assessment.quality_score();
        claim.risk_score = self.risk_score(assessment);
        claim.priority = self.priority(claim.total_amount, claim.quality_score);

        let decision = self.decide(assessment);
        if claim.window_id.is_none() && matches!(decision, Decision::AutoSubmit | Decision::ReadyToSubmit) {
            // No window means no submission batch will ever carry it.
            claim.transition(
                ClaimStatus::ManualReview,
                "delivered outside every pricing window",
                at,
            )?;
            info!(
                "claim {} has no pricing window, held for review instead of {:?}",
                claim.claim_number, decision
            );
            return Ok(Decision::ManualReview);
        }
        let (to, reason) = match decision {
            Decision::RejectedReconciliation => (
                ClaimStatus::RejectedReconciliation,
                "three-way reconciliation failed".to_string(),
            ),
            Decision::RejectedGps => (ClaimStatus::RejectedGps, "GPS validation failed".to_string()),
            Decision::InsufficientEvidence => (
                ClaimStatus::InsufficientEvidence,
                format!("evidence score {:.0} below minimum", assessment.evidence_score),
            ),
            Decision::AutoSubmit => match self.config.auto_submit {
                AutoSubmitMode::Automatic => {
                    (ClaimStatus::Submitted, "auto-submitted on high confidence".to_string())
                }
                AutoSubmitMode::PriorityHint => {
                    claim.priority = Priority::Urgent;
                    (
                        ClaimStatus::ReadyToSubmit,
                        "eligible for auto-submission, queued as urgent".to_string(),
                    )
                }
            },
            Decision::ReadyToSubmit => (ClaimStatus::ReadyToSubmit, "ready for submission".to_string()),
            Decision::ManualReview => (ClaimStatus::ManualReview, "needs manual review".to_string()),
        };
        claim.transition(to, reason, at)?;

        info!(
            "claim {} evaluated: {:?} -> {} (priority {:?}, quality {:.1}, risk {:.1})",
            claim.claim_number, decision, claim.status, claim.priority, claim.quality_score, claim.risk_score
        );
        Ok(decision)
    }

    pub fn cancel(&self, claim: &mut Claim, reason: &str, at: DateTime<Utc>) -> Result<()> {
        claim.transition(ClaimStatus::Cancelled, reason, at)
    }

    /// A reviewer accepts a claim held for manual review.
    pub fn approve_review(&self, claim: &mut Claim, note: &str, at: DateTime<Utc>) -> Result<()> {
        self.require(claim, ClaimStatus::ManualReview, ClaimStatus::ReadyToSubmit)?;
        if claim.window_id.is_none() {
            return Err(EngineError::InvalidInput(format!(
                "claim {} has no pricing window and cannot be submitted",
                claim.claim_number
            )));
        }
        claim.transition(ClaimStatus::ReadyToSubmit, format!("review approved: {}", note), at)
    }

    /// A reviewer rejects a claim held for manual review.
    pub fn reject_review(
        &self,
        claim: &mut Claim,
        rejection: ReviewRejection,
        note: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let to = match rejection {
            ReviewRejection::Gps => ClaimStatus::RejectedGps,
            ReviewRejection::Reconciliation => ClaimStatus::RejectedReconciliation,
        };
        self.require(claim, ClaimStatus::ManualReview, to)?;
        claim.transition(to, format!("review rejected: {}", note), at)
    }

    /// Additional evidence arrived for a claim that lacked it.
    ///
    /// `assessment` carries the refreshed evidence score; quality, risk and
    /// priority are recomputed from it.
    pub fn reopen_for_review(&self, claim: &mut Claim, assessment: &Assessment, at: DateTime<Utc>) -> Result<()> {
        claim.transition(
            ClaimStatus::ManualReview,
            format!("evidence updated to {:.0}", assessment.evidence_score),
            at,
        )?;
        claim.evidence_score = assessment.evidence_score;
        claim.quality_score = assessment.quality_score();
        claim.risk_score = self.risk_score(assessment);
        claim.priority = self.priority(claim.total_amount, claim.quality_score);
        Ok(())
    }

    /// Follow-up task for a freshly generated claim, due by priority.
    pub fn follow_up(&self, claim: &Claim, at: DateTime<Utc>) -> FollowUpTask {
        let days = &self.config.follow_up_days;
        let delay = match claim.priority {
            Priority::Urgent => days.urgent,
            Priority::High => days.high,
            Priority::Medium => days.medium,
            Priority::Low => days.low,
        };
        FollowUpTask {
            claim_id: claim.id,
            claim_number: claim.claim_number.clone(),
            kind: FollowUpKind::ClaimReview,
            priority: claim.priority,
            due: at + Duration::days(delay),
        }
    }

    fn require(&self, claim: &Claim, expected: ClaimStatus, to: ClaimStatus) -> Result<()> {
        if claim.status != expected {
            return Err(EngineError::InvalidTransition {
                from: claim.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}
