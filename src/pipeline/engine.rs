//! The claim pipeline.
//!
//! Consignment -> (GPS validation || three-way reconciliation) -> claim
//! calculation -> lifecycle evaluation, then per-window submission and
//! settlement. Every stage reports through the [`EventSink`] the engine was
//! built with.

use crate::claims::calculator::ClaimCalculator;
use crate::claims::claim::{claim_number, Claim, ClaimStatus};
use crate::claims::lifecycle::{Assessment, ClaimLifecycle, Decision, ReviewRejection};
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::events::{EngineEvent, EventSink, NullSink};
use crate::core::ids::{ClaimId, ConsignmentId, WindowId};
use crate::core::reference::{PricingWindow, ReferenceData};
use crate::gps::anomaly::{pattern_detector, RouteAnomalyService};
use crate::gps::validator::{GpsTrace, GpsValidator, ValidationOptions};
use crate::pipeline::store::{
    ClaimStore, ConsignmentSource, EvidenceStore, InMemoryClaims, InMemoryConsignments,
    InMemoryEvidence, InMemoryTraces, TraceStore,
};
use crate::reconciliation::analysis::{variance_analyzer, VarianceService};
use crate::reconciliation::anchor::{ReconciliationAnchor, Sha256Anchor};
use crate::reconciliation::three_way::{ThreeWayReconciler, ThreeWayReconciliation};
use crate::settlement::ledger::{self, JournalEntry};
use crate::settlement::processor::{BankPayment, Settlement, SettlementProcessor};
use crate::settlement::regulator::{
    send_submission, RegulatorGateway, RegulatorResponse, SubmissionBatch, SubmissionReceipt,
    SubmittedClaim,
};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Per-run switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Generate with neutral GPS scores instead of validating the trace.
    pub skip_validation: bool,
    /// Fail with [`EngineError::ValidationFailed`] instead of recording a
    /// rejected claim.
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub consignment: ConsignmentId,
    pub retryable: bool,
    pub error: String,
}

/// Outcome of a batch run. Failures never abort the batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub claims: Vec<Claim>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.claims.len() + self.failures.len()
    }

    pub fn by_status(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for claim in &self.claims {
            *counts.entry(claim.status().to_string()).or_insert(0) += 1;
        }
        counts
    }

    pub fn total_amount(&self) -> rust_decimal::Decimal {
        self.claims.iter().map(|c| c.total_amount()).sum()
    }
}

/// A delivered submission.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub batch: SubmissionBatch,
    pub receipt: SubmissionReceipt,
    pub journal_entries: Vec<JournalEntry>,
    /// Claim numbers sent in the batch that changed status (for example a
    /// cancellation) while the gateway call was in flight. They are left as
    /// they are and are not accrued.
    pub withdrawn: Vec<String>,
}

/// Assembles a [`ClaimEngine`]. Unset stores default to empty in-memory
/// ones, and the sink to [`NullSink`].
pub struct EngineBuilder {
    config: EngineConfig,
    refs: ReferenceData,
    consignments: Option<Arc<dyn ConsignmentSource>>,
    traces: Option<Arc<dyn TraceStore>>,
    evidence: Option<Arc<dyn EvidenceStore>>,
    claims: Option<Arc<dyn ClaimStore>>,
    sink: Option<Arc<dyn EventSink>>,
    anomaly_service: Option<Arc<dyn RouteAnomalyService>>,
    variance_service: Option<Arc<dyn VarianceService>>,
    anchor: Option<Arc<dyn ReconciliationAnchor>>,
}

impl EngineBuilder {
    pub fn consignments(mut self, source: Arc<dyn ConsignmentSource>) -> Self {
        self.consignments = Some(source);
        self
    }

    pub fn traces(mut self, store: Arc<dyn TraceStore>) -> Self {
        self.traces = Some(store);
        self
    }

    pub fn evidence(mut self, store: Arc<dyn EvidenceStore>) -> Self {
        self.evidence = Some(store);
        self
    }

    pub fn claims(mut self, store: Arc<dyn ClaimStore>) -> Self {
        self.claims = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn anomaly_service(mut self, service: Arc<dyn RouteAnomalyService>) -> Self {
        self.anomaly_service = Some(service);
        self
    }

    pub fn variance_service(mut self, service: Arc<dyn VarianceService>) -> Self {
        self.variance_service = Some(service);
        self
    }

    /// Anchor used when `strategy.anchor_reconciliations` is on. Defaults to
    /// a SHA-256 digest.
    pub fn anchor(mut self, anchor: Arc<dyn ReconciliationAnchor>) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn build(self) -> Result<ClaimEngine> {
        self.config.validate()?;
        self.refs.validate()?;
        let cfg = self.config;
        let pipeline = &cfg.pipeline;

        let patterns = pattern_detector(
            cfg.strategy.gps_anomaly,
            &cfg.gps,
            self.anomaly_service,
            pipeline.anomaly_timeout(),
        );
        let validator = GpsValidator::new(cfg.gps.clone(), cfg.efficiency, patterns);

        let analyzer = variance_analyzer(
            cfg.strategy.variance_analysis,
            &cfg.reconciliation,
            self.variance_service,
            pipeline.variance_timeout(),
        );
        let mut reconciler =
            ThreeWayReconciler::new(cfg.reconciliation.clone(), cfg.product_volatility.clone(), analyzer);
        if cfg.strategy.anchor_reconciliations {
            let anchor = self.anchor.unwrap_or_else(|| Arc::new(Sha256Anchor));
            reconciler = reconciler.with_anchor(anchor, pipeline.anchor_timeout());
        }

        info!(
            "claim engine ready: config {}, {} workers, gps {:?}, variance {:?}",
            cfg.version, pipeline.workers, cfg.strategy.gps_anomaly, cfg.strategy.variance_analysis
        );

        Ok(ClaimEngine {
            validator,
            reconciler,
            calculator: ClaimCalculator::new(cfg.tariffs.clone(), cfg.bonuses.clone()),
            lifecycle: ClaimLifecycle::new(cfg.lifecycle.clone(), cfg.priority.clone(), cfg.risk.clone()),
            settlement: SettlementProcessor::new(cfg.settlement.clone(), cfg.gl.clone()),
            consignments: self
                .consignments
                .unwrap_or_else(|| Arc::new(InMemoryConsignments::new())),
            traces: self.traces.unwrap_or_else(|| Arc::new(InMemoryTraces::new())),
            evidence: self.evidence.unwrap_or_else(|| Arc::new(InMemoryEvidence::new())),
            claims: self.claims.unwrap_or_else(|| Arc::new(InMemoryClaims::new())),
            sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
            refs: Arc::new(self.refs),
            submission_seq: AtomicU64::new(0),
            window_lock: Mutex::new(()),
            config: cfg,
        })
    }
}

/// The reconciliation and claim settlement engine.
pub struct ClaimEngine {
    config: EngineConfig,
    refs: Arc<ReferenceData>,
    validator: GpsValidator,
    reconciler: ThreeWayReconciler,
    calculator: ClaimCalculator,
    lifecycle: ClaimLifecycle,
    settlement: SettlementProcessor,
    consignments: Arc<dyn ConsignmentSource>,
    traces: Arc<dyn TraceStore>,
    evidence: Arc<dyn EvidenceStore>,
    claims: Arc<dyn ClaimStore>,
    sink: Arc<dyn EventSink>,
    submission_seq: AtomicU64,
    /// Serialises submission and settlement, which rewrite whole windows.
    window_lock: Mutex<()>,
}

impl ClaimEngine {
    pub fn builder(config: EngineConfig, refs: ReferenceData) -> EngineBuilder {
        EngineBuilder {
            config,
            refs,
            consignments: None,
            traces: None,
            evidence: None,
            claims: None,
            sink: None,
            anomaly_service: None,
            variance_service: None,
            anchor: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reference_data(&self) -> &ReferenceData {
        &self.refs
    }

    pub fn claims(&self) -> &Arc<dyn ClaimStore> {
        &self.claims
    }

    pub fn consignments(&self) -> &Arc<dyn ConsignmentSource> {
        &self.consignments
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }

    /// Generate the claim for one consignment.
    ///
    /// Idempotent: a consignment that already has a claim gets that claim
    /// back untouched.
    pub fn process_consignment(&self, id: &ConsignmentId, options: ProcessOptions) -> Result<Claim> {
        if let Some(existing) = self.claims.by_consignment(id) {
            debug!("{} already has claim {}", id, existing.claim_number());
            return Ok(existing);
        }

        let consignment = self
            .consignments
            .consignment(id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown consignment {}", id)))?;
        consignment.validate()?;
        let point = self
            .refs
            .equalisation_point(consignment.route_id())
            .ok_or_else(|| {
                EngineError::InvalidInput(format!(
                    "no equalisation point for route {}",
                    consignment.route_id()
                ))
            })?;
        self.calculator.eligible_km(&consignment, point)?;

        let raw = self.traces.trace(id);
        let validation = ValidationOptions {
            skip_validation: options.skip_validation,
        };

        let (gps, reconciliation) = thread::scope(|s| {
            let gps = s.spawn(|| self.validator.validate(&consignment, raw.as_ref(), validation));
            let reconciliation = self.reconciler.reconcile(&consignment, &self.refs);
            let gps = gps.join().unwrap_or_else(|_| {
                Err(EngineError::ValidationFailed {
                    consignment: id.clone(),
                    reason: "GPS validation worker panicked".to_string(),
                })
            });
            (gps, reconciliation)
        });
        let gps = gps?;
        let reconciliation = reconciliation?;

        self.announce_validation(&gps, &reconciliation);
        self.claims.save_gps_trace(gps.clone());
        self.claims.save_reconciliation(reconciliation.clone());

        if options.strict {
            if !reconciliation.is_valid() {
                return Err(EngineError::ValidationFailed {
                    consignment: id.clone(),
                    reason: format!("reconciliation {:?}", reconciliation.status()),
                });
            }
            if !gps.is_valid() {
                return Err(EngineError::ValidationFailed {
                    consignment: id.clone(),
                    reason: format!("GPS confidence {:.1}", gps.confidence()),
                });
            }
        }

        let now = Utc::now();
        let number = claim_number(now, self.claims.next_sequence());
        let window = self
            .refs
            .window_for(consignment.delivered_at())
            .map(|w| w.id.clone());
        if window.is_none() {
            warn!("{} delivered outside every pricing window", id);
        }

        let mut claim = self
            .calculator
            .calculate(number, window, &consignment, point, &gps, &reconciliation)?;

        let bundle = self.evidence.evidence(id);
        let evidence_score = bundle.score(&self.config.evidence, reconciliation.anchor_hash().is_some());
        let assessment = Assessment::new(&gps, &reconciliation, evidence_score);
        let decision = self.lifecycle.evaluate(&mut claim, &assessment, bundle.refs(), now)?;

        let generated = claim.id();
        let stored = self.claims.insert(claim);
        if stored.id() != generated {
            debug!("{} was claimed concurrently as {}", id, stored.claim_number());
            return Ok(stored);
        }
        self.announce_claim(&stored, decision, now);
        Ok(stored)
    }

    fn announce_validation(&self, gps: &GpsTrace, reconciliation: &ThreeWayReconciliation) {
        self.sink.emit(EngineEvent::GpsValidated {
            consignment: gps.consignment_id().clone(),
            confidence: gps.confidence(),
            valid: gps.is_valid(),
            anomalies: gps.anomaly_count(),
        });
        self.sink.emit(EngineEvent::ReconciliationCompleted {
            consignment: reconciliation.consignment_id().clone(),
            status: reconciliation.status(),
            valid: reconciliation.is_valid(),
        });
    }

    fn announce_claim(&self, claim: &Claim, decision: Decision, at: DateTime<Utc>) {
        self.sink.emit(EngineEvent::ClaimGenerated {
            claim_id: claim.id(),
            claim_number: claim.claim_number().to_string(),
            consignment: claim.consignment_id().clone(),
            amount: claim.total_amount(),
            status: claim.status(),
            priority: claim.priority(),
        });
        if let Some(change) = claim.history().last() {
            self.sink.emit(EngineEvent::StatusChanged {
                claim_id: claim.id(),
                from: change.from,
                to: change.to,
                reason: change.reason.clone(),
            });
        }
        if !matches!(decision, Decision::RejectedGps | Decision::RejectedReconciliation) {
            self.sink
                .emit(EngineEvent::FollowUpScheduled(self.lifecycle.follow_up(claim, at)));
        }
    }

    /// Process consignments over the configured worker pool.
    pub fn process_batch(&self, ids: &[ConsignmentId], options: ProcessOptions) -> BatchReport {
        let workers = self.config.pipeline.workers.clamp(1, ids.len().max(1));
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<(usize, Result<Claim>)>> = Mutex::new(Vec::with_capacity(ids.len()));

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(id) = ids.get(i) else { break };
                    let outcome = self.process_consignment(id, options);
                    results.lock().push((i, outcome));
                });
            }
        });

        let mut results = results.into_inner();
        results.sort_by_key(|(i, _)| *i);

        let mut report = BatchReport::default();
        for (i, outcome) in results {
            match outcome {
                Ok(claim) => report.claims.push(claim),
                Err(e) => {
                    match &e {
                        EngineError::NotEligible { .. } => debug!("{}: {}", ids[i], e),
                        _ if e.is_retryable() => warn!("{}: {} (will retry)", ids[i], e),
                        _ => error!("{}: {}", ids[i], e),
                    }
                    report.failures.push(BatchFailure {
                        consignment: ids[i].clone(),
                        retryable: e.is_retryable(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "batch of {}: {} claims, {} failures",
            ids.len(),
            report.claims.len(),
            report.failures.len()
        );
        report
    }

    /// Send every claim of `window` that is ready and not yet sent.
    ///
    /// Returns `None` when there is nothing to send. A gateway failure
    /// leaves every claim as it was.
    pub fn build_submission(
        &self,
        window_id: &WindowId,
        gateway: &Arc<dyn RegulatorGateway>,
    ) -> Result<Option<Submission>> {
        let _guard = self.window_lock.lock();
        let window = self.window(window_id)?;

        let mut claims: Vec<Claim> = self
            .claims
            .in_window(&window.id)
            .into_iter()
            .filter(|c| {
                c.status() == ClaimStatus::ReadyToSubmit
                    || (c.status() == ClaimStatus::Submitted && c.submission_id().is_none())
            })
            .collect();
        if claims.is_empty() {
            debug!("nothing to submit for window {}", window.id);
            return Ok(None);
        }
        claims.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.claim_number().cmp(b.claim_number()))
        });

        let now = Utc::now();
        let seq = self.submission_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let batch = SubmissionBatch {
            submission_id: format!("SUB-{}-{:04}", window.id, seq),
            window: window.id.clone(),
            submitted_at: now,
            claims: claims
                .iter()
                .map(|c| SubmittedClaim {
                    claim_number: c.claim_number().to_string(),
                    route_km: c.km_beyond_equalisation(),
                    litres: c.litres_moved(),
                    amount: c.total_amount(),
                    evidence_refs: c.evidence_refs().to_vec(),
                })
                .collect(),
        };

        let receipt = send_submission(gateway, &batch, self.config.pipeline.regulator_timeout())?;

        // Reviews and cancellations do not take the window lock, so every
        // claim is re-read and written back only if it has not moved on.
        let mut journals = Vec::with_capacity(claims.len());
        let mut withdrawn = Vec::new();
        let mut submitted_total = rust_decimal::Decimal::ZERO;
        for snapshot in &claims {
            let expected = snapshot.status();
            let mut claim = match self.claims.get(snapshot.id()) {
                Some(current) if current.status() == expected && current.submission_id().is_none() => current,
                current => {
                    warn!(
                        "{} changed to {} during submission {}, left out",
                        snapshot.claim_number(),
                        current.map_or_else(|| "<missing>".to_string(), |c| c.status().to_string()),
                        batch.submission_id
                    );
                    withdrawn.push(snapshot.claim_number().to_string());
                    continue;
                }
            };
            if expected == ClaimStatus::ReadyToSubmit {
                claim.transition(ClaimStatus::Submitted, format!("submitted in {}", batch.submission_id), now)?;
            }
            claim.submission_id = Some(batch.submission_id.clone());
            claim.submitted_at = Some(now);
            if let Err(e) = self.claims.update(&claim, expected) {
                warn!("{} left out of {}: {}", claim.claim_number(), batch.submission_id, e);
                withdrawn.push(claim.claim_number().to_string());
                continue;
            }
            if expected == ClaimStatus::ReadyToSubmit {
                self.sink.emit(EngineEvent::StatusChanged {
                    claim_id: claim.id(),
                    from: ClaimStatus::ReadyToSubmit,
                    to: ClaimStatus::Submitted,
                    reason: format!("submitted in {}", batch.submission_id),
                });
            }
            submitted_total += claim.total_amount();

            let entry = ledger::claim_accrual(&claim, &self.config.gl, now);
            self.sink.emit(EngineEvent::JournalEntry(entry.clone()));
            journals.push(entry);
        }

        info!(
            "submitted {} claims for window {} as {} ({}), {} withdrawn",
            journals.len(),
            window.id,
            batch.submission_id,
            receipt.reference,
            withdrawn.len()
        );
        self.sink.emit(EngineEvent::ClaimsSubmitted {
            submission_id: batch.submission_id.clone(),
            window: window.id.clone(),
            claim_count: journals.len(),
            total_amount: submitted_total,
        });

        Ok(Some(Submission {
            batch,
            receipt,
            journal_entries: journals,
            withdrawn,
        }))
    }

    /// Apply a regulator response to the window's submitted claims.
    pub fn settle(&self, window_id: &WindowId, response: &RegulatorResponse) -> Result<Settlement> {
        let _guard = self.window_lock.lock();
        let window = self.window(window_id)?;

        let mut batch: Vec<Claim> = self
            .claims
            .in_window(&window.id)
            .into_iter()
            .filter(|c| c.submission_id().is_some())
            .collect();
        let before: Vec<ClaimStatus> = batch.iter().map(|c| c.status()).collect();

        let settlement = self
            .settlement
            .process(&window, &mut batch, response, self.sink.as_ref(), Utc::now())?;

        for (claim, status) in batch.iter().zip(before) {
            if claim.status() != status {
                self.claims.update(claim, status)?;
            }
        }
        Ok(settlement)
    }

    /// Check the bank receipt for a settlement.
    pub fn reconcile_payment(&self, settlement_id: &str, payment: &BankPayment) -> Result<Settlement> {
        let _guard = self.window_lock.lock();
        self.settlement
            .reconcile_payment(settlement_id, payment, self.sink.as_ref(), Utc::now())
    }

    /// The settlement recorded for a regulator response.
    pub fn settlement(&self, response_ref: &str) -> Option<Settlement> {
        self.settlement.settlement(response_ref)
    }

    /// A reviewer accepts a claim held in manual review.
    pub fn approve_review(&self, id: ClaimId, note: &str) -> Result<Claim> {
        self.change_status(id, |lifecycle, claim, at| lifecycle.approve_review(claim, note, at))
    }

    pub fn reject_review(&self, id: ClaimId, rejection: ReviewRejection, note: &str) -> Result<Claim> {
        self.change_status(id, |lifecycle, claim, at| {
            lifecycle.reject_review(claim, rejection, note, at)
        })
    }

    /// Re-score a claim that lacked evidence and send it to review.
    pub fn reopen_for_review(&self, id: ClaimId) -> Result<Claim> {
        let claim = self.claim(id)?;
        let gps = self.claims.gps_trace(claim.gps_trace_id()).ok_or_else(|| {
            EngineError::InvalidInput(format!("GPS record of claim {} is missing", claim.claim_number()))
        })?;
        let reconciliation = self.claims.reconciliation(claim.reconciliation_id()).ok_or_else(|| {
            EngineError::InvalidInput(format!(
                "reconciliation record of claim {} is missing",
                claim.claim_number()
            ))
        })?;
        let bundle = self.evidence.evidence(claim.consignment_id());
        let score = bundle.score(&self.config.evidence, claim.anchor_hash().is_some());
        let assessment = Assessment::new(&gps, &reconciliation, score);
        self.change_status(id, |lifecycle, claim, at| {
            lifecycle.reopen_for_review(claim, &assessment, at)?;
            claim.evidence_refs = bundle.refs();
            Ok(())
        })
    }

    pub fn cancel(&self, id: ClaimId, reason: &str) -> Result<Claim> {
        self.change_status(id, |lifecycle, claim, at| lifecycle.cancel(claim, reason, at))
    }

    fn change_status<F>(&self, id: ClaimId, change: F) -> Result<Claim>
    where
        F: FnOnce(&ClaimLifecycle, &mut Claim, DateTime<Utc>) -> Result<()>,
    {
        let mut claim = self.claim(id)?;
        let from = claim.status();
        change(&self.lifecycle, &mut claim, Utc::now())?;
        self.claims.update(&claim, from)?;
        if let Some(last) = claim.history().last() {
            self.sink.emit(EngineEvent::StatusChanged {
                claim_id: claim.id(),
                from,
                to: claim.status(),
                reason: last.reason.clone(),
            });
        }
        Ok(claim)
    }

    fn claim(&self, id: ClaimId) -> Result<Claim> {
        self.claims
            .get(id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown claim {}", id)))
    }

    fn window(&self, id: &WindowId) -> Result<PricingWindow> {
        self.refs
            .window(id)
            .cloned()
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown pricing window {}", id)))
    }
}
