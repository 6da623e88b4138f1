use crate::core::error::{EngineError, Result};
use crate::core::ids::{ClaimId, ConsignmentId, ProductCode, RouteId, WindowId};
use crate::core::reference::TariffQuote;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Claim status. The set is closed; see [`ClaimStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Draft,
    ReadyToSubmit,
    ManualReview,
    InsufficientEvidence,
    RejectedGps,
    RejectedReconciliation,
    Submitted,
    Approved,
    Rejected,
    Settled,
    Cancelled,
}

impl ClaimStatus {
    /// The transition table of the claim lifecycle.
    pub fn can_transition_to(self, to: ClaimStatus) -> bool {
        use ClaimStatus::*;
        match (self, to) {
            (Draft, ReadyToSubmit)
            | (Draft, ManualReview)
            | (Draft, InsufficientEvidence)
            | (Draft, RejectedGps)
            | (Draft, RejectedReconciliation)
            | (Draft, Submitted) => true,
            (ManualReview, ReadyToSubmit)
            | (ManualReview, RejectedGps)
            | (ManualReview, RejectedReconciliation) => true,
            (InsufficientEvidence, ManualReview) => true,
            (ReadyToSubmit, Submitted) => true,
            (Submitted, Approved) | (Submitted, Rejected) => true,
            (Approved, Settled) => true,
            (from, Cancelled) => from.is_pre_submission(),
            _ => false,
        }
    }

    /// States from which a claim can still be cancelled.
    pub fn is_pre_submission(self) -> bool {
        matches!(
            self,
            ClaimStatus::Draft
                | ClaimStatus::ReadyToSubmit
                | ClaimStatus::ManualReview
                | ClaimStatus::InsufficientEvidence
                | ClaimStatus::RejectedGps
                | ClaimStatus::RejectedReconciliation
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClaimStatus::Rejected | ClaimStatus::Settled | ClaimStatus::Cancelled
        )
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClaimStatus::Draft => "DRAFT",
            ClaimStatus::ReadyToSubmit => "READY_TO_SUBMIT",
            ClaimStatus::ManualReview => "MANUAL_REVIEW",
            ClaimStatus::InsufficientEvidence => "INSUFFICIENT_EVIDENCE",
            ClaimStatus::RejectedGps => "REJECTED_GPS",
            ClaimStatus::RejectedReconciliation => "REJECTED_RECONCILIATION",
            ClaimStatus::Submitted => "SUBMITTED",
            ClaimStatus::Approved => "APPROVED",
            ClaimStatus::Rejected => "REJECTED",
            ClaimStatus::Settled => "SETTLED",
            ClaimStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Review-queue ordering. Never affects eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

/// One entry of a claim's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: ClaimStatus,
    pub to: ClaimStatus,
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// A distance-based subsidy claim for one consignment.
///
/// The monetary fields are owned by the claim and fixed by the calculator.
/// Status and priority change only through the lifecycle manager, and the
/// settlement fields only through the settlement processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub(crate) id: ClaimId,
    pub(crate) claim_number: String,
    pub(crate) consignment_id: ConsignmentId,
    pub(crate) route_id: RouteId,
    pub(crate) product: ProductCode,
    pub(crate) window_id: Option<WindowId>,
    pub(crate) delivered_at: DateTime<Utc>,

    pub(crate) km_actual: Decimal,
    pub(crate) km_threshold: Decimal,
    pub(crate) km_beyond_equalisation: Decimal,
    pub(crate) litres_moved: Decimal,
    pub(crate) tariff: TariffQuote,
    pub(crate) base_amount: Decimal,
    pub(crate) route_efficiency_bonus: Decimal,
    pub(crate) compliance_bonus: Decimal,
    pub(crate) total_amount: Decimal,

    pub(crate) status: ClaimStatus,
    pub(crate) priority: Priority,
    pub(crate) gps_confidence: f64,
    pub(crate) route_efficiency: f64,
    pub(crate) compliance_score: f64,
    pub(crate) reconciliation_confidence: f64,
    pub(crate) reconciled: bool,
    pub(crate) evidence_score: f64,
    pub(crate) quality_score: f64,
    pub(crate) risk_score: f64,
    pub(crate) evidence_refs: Vec<String>,

    pub(crate) gps_trace_id: Uuid,
    pub(crate) reconciliation_id: Uuid,
    pub(crate) anchor_hash: Option<String>,

    pub(crate) submission_id: Option<String>,
    pub(crate) submitted_at: Option<DateTime<Utc>>,
    pub(crate) settlement_id: Option<String>,
    pub(crate) settlement_amount: Option<Decimal>,
    pub(crate) variance_amount: Option<Decimal>,
    pub(crate) variance_reason: Option<String>,
    pub(crate) settlement_date: Option<DateTime<Utc>>,

    pub(crate) history: Vec<StatusChange>,
    pub(crate) created_at: DateTime<Utc>,
}

impl Claim {
    /// Move to `to`, recording the change in the audit trail.
    pub(crate) fn transition(
        &mut self,
        to: ClaimStatus,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.history.push(StatusChange {
            from: self.status,
            to,
            at,
            reason: reason.into(),
        });
        self.status = to;
        Ok(())
    }

    // --- Accessors ---

    pub fn id(&self) -> ClaimId {
        self.id
    }

    pub fn claim_number(&self) -> &str {
        &self.claim_number
    }

    pub fn consignment_id(&self) -> &ConsignmentId {
        &self.consignment_id
    }

    pub fn route_id(&self) -> &RouteId {
        &self.route_id
    }

    pub fn product(&self) -> &ProductCode {
        &self.product
    }

    pub fn window_id(&self) -> Option<&WindowId> {
        self.window_id.as_ref()
    }

    pub fn delivered_at(&self) -> DateTime<Utc> {
        self.delivered_at
    }

    pub fn km_actual(&self) -> Decimal {
        self.km_actual
    }

    pub fn km_threshold(&self) -> Decimal {
        self.km_threshold
    }

    pub fn km_beyond_equalisation(&self) -> Decimal {
        self.km_beyond_equalisation
    }

    pub fn litres_moved(&self) -> Decimal {
        self.litres_moved
    }

    pub fn tariff(&self) -> &TariffQuote {
        &self.tariff
    }

    pub fn base_amount(&self) -> Decimal {
        self.base_amount
    }

    pub fn route_efficiency_bonus(&self) -> Decimal {
        self.route_efficiency_bonus
    }

    pub fn compliance_bonus(&self) -> Decimal {
        self.compliance_bonus
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn status(&self) -> ClaimStatus {
        self.status
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn gps_confidence(&self) -> f64 {
        self.gps_confidence
    }

    pub fn route_efficiency(&self) -> f64 {
        self.route_efficiency
    }

    pub fn compliance_score(&self) -> f64 {
        self.compliance_score
    }

    pub fn reconciliation_confidence(&self) -> f64 {
        self.reconciliation_confidence
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    pub fn evidence_score(&self) -> f64 {
        self.evidence_score
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn risk_score(&self) -> f64 {
        self.risk_score
    }

    pub fn evidence_refs(&self) -> &[String] {
        &self.evidence_refs
    }

    pub fn gps_trace_id(&self) -> Uuid {
        self.gps_trace_id
    }

    pub fn reconciliation_id(&self) -> Uuid {
        self.reconciliation_id
    }

    pub fn anchor_hash(&self) -> Option<&str> {
        self.anchor_hash.as_deref()
    }

    pub fn submission_id(&self) -> Option<&str> {
        self.submission_id.as_deref()
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn settlement_id(&self) -> Option<&str> {
        self.settlement_id.as_deref()
    }

    pub fn settlement_amount(&self) -> Option<Decimal> {
        self.settlement_amount
    }

    pub fn variance_amount(&self) -> Option<Decimal> {
        self.variance_amount
    }

    pub fn variance_reason(&self) -> Option<&str> {
        self.variance_reason.as_deref()
    }

    pub fn settlement_date(&self) -> Option<DateTime<Utc>> {
        self.settlement_date
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
impl Claim {
    /// A draft claim with the given total, for unit tests.
    pub(crate) fn draft_for_test(number: &str, total: Decimal) -> Claim {
        use rust_decimal_macros::dec;
        Claim {
            id: ClaimId::new(),
            claim_number: number.to_string(),
            consignment_id: ConsignmentId::new(format!("CNS-{}", number)),
            route_id: RouteId::new("R1"),
            product: ProductCode::new("AGO"),
            window_id: Some(WindowId::new("W1")),
            delivered_at: Utc::now(),
            km_actual: dec!(125),
            km_threshold: dec!(100),
            km_beyond_equalisation: dec!(25),
            litres_moved: dec!(30000),
            tariff: TariffQuote {
                base_rate: dec!(0.0012),
                road_multiplier: dec!(1.2),
                tariff: dec!(0.00144),
                product_defaulted: false,
                category_defaulted: false,
            },
            base_amount: total,
            route_efficiency_bonus: Decimal::ZERO,
            compliance_bonus: Decimal::ZERO,
            total_amount: total,
            status: ClaimStatus::Draft,
            priority: Priority::Low,
            gps_confidence: 96.0,
            route_efficiency: 95.0,
            compliance_score: 100.0,
            reconciliation_confidence: 100.0,
            reconciled: true,
            evidence_score: 0.0,
            quality_score: 0.0,
            risk_score: 0.0,
            evidence_refs: Vec::new(),
            gps_trace_id: Uuid::new_v4(),
            reconciliation_id: Uuid::new_v4(),
            anchor_hash: None,
            submission_id: None,
            submitted_at: None,
            settlement_id: None,
            settlement_amount: None,
            variance_amount: None,
            variance_reason: None,
            settlement_date: None,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Claim number in the regulator's `UPPF-YYYYMMDD-NNNNNN` format.
pub fn claim_number(date: DateTime<Utc>, sequence: u64) -> String {
    format!("UPPF-{}-{:06}", date.format("%Y%m%d"), sequence)
}
