//! Settlement of regulator responses against submitted claims.
//!
//! A response is applied once. Replaying the same `response_ref` returns the
//! settlement recorded the first time, and a claim that already has an
//! outcome is never counted again under a different response.

use crate::claims::calculator::round_money;
use crate::claims::claim::{Claim, ClaimStatus};
use crate::core::config::{GlAccounts, SettlementConfig};
use crate::core::error::{EngineError, Result};
use crate::core::events::{EngineEvent, EventSink};
use crate::core::ids::{ClaimId, WindowId};
use crate::core::reference::PricingWindow;
use crate::settlement::adjustments;
use crate::settlement::ledger::{self, JournalEntry};
use crate::settlement::regulator::RegulatorResponse;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    /// Every claim of the batch received an outcome.
    Completed,
    PartiallySettled,
    /// No claim of the response matched the batch.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    High,
    Medium,
    Low,
    Minimal,
}

impl RiskCategory {
    /// Band an absolute variance percentage.
    pub fn classify(variance_pct: Decimal, config: &SettlementConfig) -> Self {
        let v = variance_pct.abs();
        if v > config.high_variance_pct {
            RiskCategory::High
        } else if v > config.medium_variance_pct {
            RiskCategory::Medium
        } else if v > config.low_variance_pct {
            RiskCategory::Low
        } else {
            RiskCategory::Minimal
        }
    }
}

/// Claimed versus paid for one approved claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceRecord {
    pub claim_id: ClaimId,
    pub claim_number: String,
    pub original_amount: Decimal,
    pub settled_amount: Decimal,
    /// `settled_amount - original_amount`.
    pub variance_amount: Decimal,
    pub variance_pct: Decimal,
    pub variance_reason: Option<String>,
    pub risk_category: RiskCategory,
    pub action_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOutcome {
    pub claim_id: ClaimId,
    pub claim_number: String,
    pub amount: Decimal,
    pub reason: String,
}

/// Batch performance figures. Rates and scores are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Share of batch claims settled without follow-up action.
    pub success_rate: f64,
    /// Mean days from submission to settlement over settled claims.
    pub average_processing_days: f64,
    /// Sum of absolute variances.
    pub total_variance_cost: Decimal,
    /// 100 minus the share of settled claims paid with any variance.
    pub compliance_score: f64,
    /// Share of settled claims paid by window end plus grace days.
    pub settlement_efficiency: f64,
}

/// Whether the bank receipt matched the settlement it pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Reconciled,
    VarianceDetected,
}

/// A bank credit for a settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankPayment {
    pub reference: String,
    pub amount: Decimal,
    pub received_on: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Bank receipt checked against the net settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReconciliation {
    pub bank_reference: String,
    pub expected_amount: Decimal,
    pub received_amount: Decimal,
    /// `received_amount - expected_amount`.
    pub variance: Decimal,
    pub variance_pct: Decimal,
    pub status: PaymentStatus,
    /// Empty when reconciled.
    pub possible_causes: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub journal_entry: Option<JournalEntry>,
    pub received_on: NaiveDate,
    pub notes: Option<String>,
    pub reconciled_at: DateTime<Utc>,
}

/// Outcome of one regulator response for one pricing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    settlement_id: String,
    response_ref: String,
    window_id: WindowId,
    status: SettlementStatus,
    total_claims: usize,
    total_claimed: Decimal,
    approved_claimed: Decimal,
    total_settled: Decimal,
    npa_penalties: Decimal,
    performance_bonuses: Decimal,
    adjustments_estimated: bool,
    net_settlement: Decimal,
    variance_records: Vec<VarianceRecord>,
    rejected: Vec<RejectedOutcome>,
    unmatched_claims: Vec<String>,
    journal_entries: Vec<JournalEntry>,
    metrics: PerformanceMetrics,
    processed_at: DateTime<Utc>,
    #[serde(default)]
    payment: Option<PaymentReconciliation>,
}

impl Settlement {
    pub fn settlement_id(&self) -> &str {
        &self.settlement_id
    }

    pub fn response_ref(&self) -> &str {
        &self.response_ref
    }

    pub fn window_id(&self) -> &WindowId {
        &self.window_id
    }

    pub fn status(&self) -> SettlementStatus {
        self.status
    }

    /// Claims of the batch that were awaiting an outcome.
    pub fn total_claims(&self) -> usize {
        self.total_claims
    }

    pub fn settled_claims(&self) -> usize {
        self.variance_records.len()
    }

    pub fn rejected_claims(&self) -> usize {
        self.rejected.len()
    }

    /// Gross amount of every batch claim that was awaiting an outcome,
    /// including claims rejected or left unanswered by this response.
    pub fn total_claimed(&self) -> Decimal {
        self.total_claimed
    }

    /// Claimed amount of the claims this response settled. Together with
    /// [`total_settled`](Self::total_settled) it gives
    /// [`total_variance`](Self::total_variance).
    pub fn approved_claimed(&self) -> Decimal {
        self.approved_claimed
    }

    pub fn total_settled(&self) -> Decimal {
        self.total_settled
    }

    pub fn total_variance(&self) -> Decimal {
        self.variance_records.iter().map(|r| r.variance_amount).sum()
    }

    pub fn npa_penalties(&self) -> Decimal {
        self.npa_penalties
    }

    pub fn performance_bonuses(&self) -> Decimal {
        self.performance_bonuses
    }

    /// Penalties and bonuses were estimated rather than stated by the regulator.
    pub fn adjustments_estimated(&self) -> bool {
        self.adjustments_estimated
    }

    pub fn net_settlement(&self) -> Decimal {
        self.net_settlement
    }

    pub fn variance_records(&self) -> &[VarianceRecord] {
        &self.variance_records
    }

    pub fn rejected(&self) -> &[RejectedOutcome] {
        &self.rejected
    }

    /// Claim numbers named by the response that could not be applied.
    pub fn unmatched_claims(&self) -> &[String] {
        &self.unmatched_claims
    }

    pub fn journal_entries(&self) -> &[JournalEntry] {
        &self.journal_entries
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn processed_at(&self) -> DateTime<Utc> {
        self.processed_at
    }

    /// Claim outcomes of a completed settlement never change. The bank
    /// payment check is recorded separately.
    pub fn is_read_only(&self) -> bool {
        self.status == SettlementStatus::Completed
    }

    pub fn payment_reconciliation(&self) -> Option<&PaymentReconciliation> {
        self.payment.as_ref()
    }
}

/// Applies regulator responses and remembers what it applied.
pub struct SettlementProcessor {
    config: SettlementConfig,
    gl: GlAccounts,
    settlements: RwLock<HashMap<String, Settlement>>,
    outcomes: RwLock<HashMap<ClaimId, String>>,
}

impl SettlementProcessor {
    pub fn new(config: SettlementConfig, gl: GlAccounts) -> Self {
        Self {
            config,
            gl,
            settlements: RwLock::new(HashMap::new()),
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    /// The settlement recorded for a response, if it was processed.
    pub fn settlement(&self, response_ref: &str) -> Option<Settlement> {
        self.settlements.read().get(response_ref).cloned()
    }

    /// The settlement id that decided a claim.
    pub fn outcome_of(&self, claim: ClaimId) -> Option<String> {
        self.outcomes.read().get(&claim).cloned()
    }

    /// Apply `response` to the window's submitted claims.
    ///
    /// `batch` should hold every claim submitted for `window`; claims are
    /// updated in place and the caller persists them.
    pub fn process(
        &self,
        window: &PricingWindow,
        batch: &mut [Claim],
        response: &RegulatorResponse,
        sink: &dyn EventSink,
        at: DateTime<Utc>,
    ) -> Result<Settlement> {
        let mut settlements = self.settlements.write();
        if let Some(existing) = settlements.get(&response.response_ref) {
            info!(
                "response {} already processed as {}",
                response.response_ref, existing.settlement_id
            );
            return Ok(existing.clone());
        }

        let settlement_id = format!("SETTL-{}-{}", window.id, response.response_ref);
        let mut outcomes = self.outcomes.write();

        let pending: Vec<usize> = batch
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                matches!(c.status(), ClaimStatus::Submitted | ClaimStatus::Approved)
                    && !outcomes.contains_key(&c.id())
            })
            .map(|(i, _)| i)
            .collect();
        let by_number: HashMap<String, usize> = pending
            .iter()
            .map(|&i| (batch[i].claim_number().to_string(), i))
            .collect();
        let total_claimed: Decimal = pending.iter().map(|&i| batch[i].total_amount()).sum();

        let mut records = Vec::new();
        let mut rejected = Vec::new();
        let mut unmatched = Vec::new();
        let mut journals = Vec::new();
        let mut settled_idx = Vec::new();

        for approved in &response.approved_claims {
            let Some(&i) = by_number.get(&approved.claim_number) else {
                self.unmatched(response, &approved.claim_number, sink, &mut unmatched);
                continue;
            };
            let claim = &mut batch[i];
            if outcomes.contains_key(&claim.id()) {
                debug!("{} already has an outcome, skipping", claim.claim_number());
                continue;
            }
            if let Err(e) = settle_claim(claim, approved.approved_amount, &approved.adjustment_reason, &settlement_id, approved.settlement_date, sink, at) {
                warn!("cannot settle {}: {}", approved.claim_number, e);
                unmatched.push(approved.claim_number.clone());
                continue;
            }

            let record = self.variance_record(claim, approved.approved_amount, approved.adjustment_reason.clone());
            if record.action_required {
                warn!(
                    "{} settled with {}% variance ({:?})",
                    record.claim_number, record.variance_pct, record.risk_category
                );
            }
            let entry = ledger::claim_settlement(claim, approved.approved_amount, &self.gl, at);
            sink.emit(EngineEvent::JournalEntry(entry.clone()));
            journals.push(entry);
            records.push(record);
            outcomes.insert(claim.id(), settlement_id.clone());
            settled_idx.push(i);
        }

        for rejection in &response.rejected_claims {
            let Some(&i) = by_number.get(&rejection.claim_number) else {
                self.unmatched(response, &rejection.claim_number, sink, &mut unmatched);
                continue;
            };
            let claim = &mut batch[i];
            if outcomes.contains_key(&claim.id()) {
                debug!("{} already has an outcome, skipping", claim.claim_number());
                continue;
            }
            let from = claim.status();
            if let Err(e) = claim.transition(ClaimStatus::Rejected, rejection.reason.clone(), at) {
                warn!("cannot reject {}: {}", rejection.claim_number, e);
                unmatched.push(rejection.claim_number.clone());
                continue;
            }
            claim.variance_reason = Some(rejection.reason.clone());
            claim.settlement_id = Some(settlement_id.clone());
            let entry = ledger::claim_rejection(claim, &self.gl, at);
            sink.emit(EngineEvent::JournalEntry(entry.clone()));
            journals.push(entry);
            sink.emit(EngineEvent::StatusChanged {
                claim_id: claim.id(),
                from,
                to: ClaimStatus::Rejected,
                reason: rejection.reason.clone(),
            });
            rejected.push(RejectedOutcome {
                claim_id: claim.id(),
                claim_number: claim.claim_number().to_string(),
                amount: claim.total_amount(),
                reason: rejection.reason.clone(),
            });
            outcomes.insert(claim.id(), settlement_id.clone());
        }

        let total_settled: Decimal = records.iter().map(|r| r.settled_amount).sum();
        let approved_claimed: Decimal = records.iter().map(|r| r.original_amount).sum();

        let stated = response.npa_penalties.is_some() || response.performance_bonuses.is_some();
        let (npa_penalties, performance_bonuses, adjustments_estimated) = if stated {
            (
                response.npa_penalties.unwrap_or(Decimal::ZERO),
                response.performance_bonuses.unwrap_or(Decimal::ZERO),
                false,
            )
        } else if self.config.estimate_adjustments {
            let estimate = adjustments::estimate(
                settled_idx.iter().map(|&i| &batch[i]),
                &self.config.adjustments,
            );
            (estimate.penalties, estimate.bonuses, true)
        } else {
            (Decimal::ZERO, Decimal::ZERO, false)
        };
        let net_settlement = total_settled - npa_penalties + performance_bonuses;

        if let Some(entry) = ledger::settlement_adjustments(
            &settlement_id,
            npa_penalties,
            performance_bonuses,
            &self.gl,
            at,
        ) {
            sink.emit(EngineEvent::JournalEntry(entry.clone()));
            journals.push(entry);
        }

        let decided = records.len() + rejected.len();
        let status = if decided == 0 {
            SettlementStatus::Failed
        } else if decided == pending.len() {
            SettlementStatus::Completed
        } else {
            SettlementStatus::PartiallySettled
        };

        let metrics = self.metrics(window, pending.len(), &records, settled_idx.iter().map(|&i| &batch[i]));

        let settlement = Settlement {
            settlement_id: settlement_id.clone(),
            response_ref: response.response_ref.clone(),
            window_id: window.id.clone(),
            status,
            total_claims: pending.len(),
            total_claimed,
            approved_claimed,
            total_settled,
            npa_penalties,
            performance_bonuses,
            adjustments_estimated,
            net_settlement,
            variance_records: records,
            rejected,
            unmatched_claims: unmatched,
            journal_entries: journals,
            metrics,
            processed_at: at,
            payment: None,
        };

        info!(
            "{} {:?}: {} settled, {} rejected, {} unmatched, net {}",
            settlement_id,
            status,
            settlement.settled_claims(),
            settlement.rejected_claims(),
            settlement.unmatched_claims.len(),
            net_settlement
        );
        sink.emit(EngineEvent::SettlementCompleted {
            settlement_id,
            window: window.id.clone(),
            status,
            net_settlement,
        });

        settlements.insert(response.response_ref.clone(), settlement.clone());
        Ok(settlement)
    }

    /// Check the bank receipt for a settlement against its net amount.
    ///
    /// Within `payment_tolerance_pct` the payment is reconciled; beyond it
    /// the variance is analysed. Any difference at all is journalled to the
    /// payment variance account. Repeating the call with the same bank
    /// reference returns the recorded result.
    pub fn reconcile_payment(
        &self,
        settlement_id: &str,
        payment: &BankPayment,
        sink: &dyn EventSink,
        at: DateTime<Utc>,
    ) -> Result<Settlement> {
        let mut settlements = self.settlements.write();
        let settlement = settlements
            .values_mut()
            .find(|s| s.settlement_id == settlement_id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown settlement {}", settlement_id)))?;

        if let Some(existing) = &settlement.payment {
            if existing.bank_reference == payment.reference {
                debug!("{} already reconciled against {}", settlement_id, payment.reference);
                return Ok(settlement.clone());
            }
            return Err(EngineError::InvalidInput(format!(
                "settlement {} was already reconciled against {}",
                settlement_id, existing.bank_reference
            )));
        }

        let expected = settlement.net_settlement;
        let variance = payment.amount - expected;
        let variance_pct = if expected.is_zero() {
            if variance.is_zero() {
                Decimal::ZERO
            } else {
                dec!(100) * variance.signum()
            }
        } else {
            variance / expected * dec!(100)
        };
        let status = if variance_pct.abs() <= self.config.payment_tolerance_pct {
            PaymentStatus::Reconciled
        } else {
            PaymentStatus::VarianceDetected
        };
        let (possible_causes, recommended_actions) = match status {
            PaymentStatus::Reconciled => (Vec::new(), Vec::new()),
            PaymentStatus::VarianceDetected => (variance_causes(variance_pct), variance_actions(variance_pct)),
        };

        let journal_entry = ledger::payment_variance(settlement_id, expected, payment.amount, &self.gl, at);
        if let Some(entry) = &journal_entry {
            sink.emit(EngineEvent::JournalEntry(entry.clone()));
        }
        match status {
            PaymentStatus::Reconciled => info!(
                "{} reconciled against {}: received {}, expected {}",
                settlement_id, payment.reference, payment.amount, expected
            ),
            PaymentStatus::VarianceDetected => warn!(
                "{} payment {} differs from expected {} by {} ({}%)",
                settlement_id,
                payment.reference,
                expected,
                variance,
                variance_pct.round_dp(4)
            ),
        }
        sink.emit(EngineEvent::PaymentReconciled {
            settlement_id: settlement_id.to_string(),
            bank_reference: payment.reference.clone(),
            status,
            variance,
        });

        settlement.payment = Some(PaymentReconciliation {
            bank_reference: payment.reference.clone(),
            expected_amount: expected,
            received_amount: payment.amount,
            variance,
            variance_pct: variance_pct.round_dp(4),
            status,
            possible_causes,
            recommended_actions,
            journal_entry,
            received_on: payment.received_on,
            notes: payment.notes.clone(),
            reconciled_at: at,
        });
        Ok(settlement.clone())
    }

    fn unmatched(
        &self,
        response: &RegulatorResponse,
        claim_number: &str,
        sink: &dyn EventSink,
        unmatched: &mut Vec<String>,
    ) {
        warn!(
            "response {} names {} which is not awaiting settlement in this batch",
            response.response_ref, claim_number
        );
        sink.emit(EngineEvent::UnmatchedSettlementClaim {
            response_ref: response.response_ref.clone(),
            claim_number: claim_number.to_string(),
        });
        unmatched.push(claim_number.to_string());
    }

    fn variance_record(&self, claim: &Claim, settled: Decimal, reason: Option<String>) -> VarianceRecord {
        let original = claim.total_amount();
        let variance_amount = settled - original;
        let variance_pct = if original.is_zero() {
            Decimal::ZERO
        } else {
            round_money(variance_amount / original * dec!(100))
        };
        VarianceRecord {
            claim_id: claim.id(),
            claim_number: claim.claim_number().to_string(),
            original_amount: original,
            settled_amount: settled,
            variance_amount,
            variance_pct,
            variance_reason: reason,
            risk_category: RiskCategory::classify(variance_pct, &self.config),
            action_required: variance_pct.abs() > self.config.action_variance_pct,
        }
    }

    fn metrics<'a>(
        &self,
        window: &PricingWindow,
        batch_size: usize,
        records: &[VarianceRecord],
        settled: impl Iterator<Item = &'a Claim>,
    ) -> PerformanceMetrics {
        let settled: Vec<&Claim> = settled.collect();
        let pct = |n: usize, d: usize| if d == 0 { 0.0 } else { n as f64 / d as f64 * 100.0 };

        let clean = records.iter().filter(|r| !r.action_required).count();
        let with_variance = records.iter().filter(|r| !r.variance_amount.is_zero()).count();

        let processing_days: Vec<f64> = settled
            .iter()
            .filter_map(|c| match (c.submitted_at(), c.settlement_date()) {
                (Some(sub), Some(paid)) => Some((paid - sub).num_seconds() as f64 / 86_400.0),
                _ => None,
            })
            .collect();
        let average_processing_days = if processing_days.is_empty() {
            0.0
        } else {
            processing_days.iter().sum::<f64>() / processing_days.len() as f64
        };

        let deadline = window.end + Duration::days(self.config.grace_days);
        let on_time = settled
            .iter()
            .filter(|c| c.settlement_date().map_or(false, |d| d.date_naive() <= deadline))
            .count();

        PerformanceMetrics {
            success_rate: pct(clean, batch_size),
            average_processing_days,
            total_variance_cost: records.iter().map(|r| r.variance_amount.abs()).sum(),
            compliance_score: (100.0 - pct(with_variance, records.len())).max(0.0),
            settlement_efficiency: pct(on_time, settled.len()),
        }
    }
}

fn variance_causes(variance_pct: Decimal) -> Vec<String> {
    let mut causes = Vec::new();
    if variance_pct.abs() > dec!(5) {
        causes.push("Significant payment variance; investigate calculation errors".to_string());
    }
    if variance_pct > Decimal::ZERO {
        causes.push("Overpayment; possible duplicate payment or calculation error".to_string());
    } else {
        causes.push("Underpayment; possible missing claims or calculation error".to_string());
    }
    causes
}

fn variance_actions(variance_pct: Decimal) -> Vec<String> {
    if variance_pct.abs() <= dec!(1) {
        return Vec::new();
    }
    vec![
        "Review the claim calculation methodology".to_string(),
        "Verify every claim of the batch was included in the payment".to_string(),
        "Check for processing errors on the regulator side".to_string(),
    ]
}

/// Submitted or approved claim to settled, recording what was paid.
fn settle_claim(
    claim: &mut Claim,
    approved_amount: Decimal,
    reason: &Option<String>,
    settlement_id: &str,
    settlement_date: NaiveDate,
    sink: &dyn EventSink,
    at: DateTime<Utc>,
) -> Result<()> {
    if claim.status() == ClaimStatus::Submitted {
        claim.transition(ClaimStatus::Approved, "approved by regulator", at)?;
        sink.emit(EngineEvent::StatusChanged {
            claim_id: claim.id(),
            from: ClaimStatus::Submitted,
            to: ClaimStatus::Approved,
            reason: "approved by regulator".to_string(),
        });
    }
    let note = format!("settled under {}", settlement_id);
    claim.transition(ClaimStatus::Settled, note.clone(), at)?;
    sink.emit(EngineEvent::StatusChanged {
        claim_id: claim.id(),
        from: ClaimStatus::Approved,
        to: ClaimStatus::Settled,
        reason: note,
    });

    claim.settlement_id = Some(settlement_id.to_string());
    claim.settlement_amount = Some(approved_amount);
    claim.variance_amount = Some(approved_amount - claim.total_amount());
    claim.variance_reason = reason.clone();
    claim.settlement_date = Some(Utc.from_utc_datetime(&settlement_date.and_time(NaiveTime::MIN)));
    Ok(())
}
