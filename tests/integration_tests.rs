use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use claim_engine::claims::claim::{ClaimStatus, Priority};
use claim_engine::claims::evidence::EvidenceBundle;
use claim_engine::claims::lifecycle::{FollowUpKind, ReviewRejection};
use claim_engine::core::config::{AutoSubmitMode, EngineConfig};
use claim_engine::core::consignment::Consignment;
use claim_engine::core::equalisation::EqualisationPoint;
use claim_engine::core::error::{EngineError, ServiceError};
use claim_engine::core::events::{EngineEvent, RecordingSink};
use claim_engine::core::ids::{ConsignmentId, ProductCode, RoadCategory, RouteId, WindowId};
use claim_engine::core::reference::{PricingWindow, ReferenceData};
use claim_engine::gps::trace::{GpsPoint, RawTrace, EARTH_RADIUS_KM};
use claim_engine::pipeline::engine::{ClaimEngine, ProcessOptions};
use claim_engine::pipeline::scheduler::Scheduler;
use claim_engine::pipeline::store::{InMemoryConsignments, InMemoryEvidence, InMemoryTraces};
use claim_engine::reconciliation::three_way::ReconciliationStatus;
use claim_engine::settlement::ledger::TrialBalance;
use claim_engine::settlement::processor::{BankPayment, PaymentStatus, SettlementStatus};
use claim_engine::settlement::regulator::{
    ApprovedClaim, OutboxGateway, RegulatorGateway, RegulatorResponse, RejectedClaim,
    SubmissionBatch, SubmissionReceipt,
};
use claim_engine::simulation::fleet::{generate_fleet, FleetConfig};
use rust_decimal::Decimal;
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration as StdDuration;

const ROUTE: &str = "TEMA-KUMASI";
const WINDOW: &str = "W-2025-01";

fn trip_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 10, 6, 0, 0).unwrap()
}

fn reference() -> ReferenceData {
    let mut refs = ReferenceData::new();
    refs.add_equalisation_point(
        EqualisationPoint::new(
            RouteId::new(ROUTE),
            dec!(100),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
        .with_road_category(RoadCategory::new("URBAN")),
    );
    refs.add_window(PricingWindow::new(
        WindowId::new(WINDOW),
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
    ));
    refs
}

/// A steady northbound drive of `km` at `kmh`, one fix per 5 km.
fn drive(id: &ConsignmentId, km: f64, kmh: f64) -> RawTrace {
    let deg_per_km = 1.0 / (EARTH_RADIUS_KM * std::f64::consts::PI / 180.0);
    let steps = (km / 5.0).ceil() as i64;
    let points = (0..=steps)
        .map(|i| {
            let d = (i as f64 * 5.0).min(km);
            let secs = (d / kmh * 3600.0).round() as i64;
            GpsPoint::new(5.6 + d * deg_per_km, -0.2, trip_start() + Duration::seconds(secs))
        })
        .collect();
    RawTrace::new(id.clone(), points)
}

/// Upstream data for a small depot, with a handle on each store.
struct Depot {
    consignments: Arc<InMemoryConsignments>,
    traces: Arc<InMemoryTraces>,
    evidence: Arc<InMemoryEvidence>,
    sink: Arc<RecordingSink>,
}

impl Depot {
    fn new() -> Self {
        Self {
            consignments: Arc::new(InMemoryConsignments::new()),
            traces: Arc::new(InMemoryTraces::new()),
            evidence: Arc::new(InMemoryEvidence::new()),
            sink: Arc::new(RecordingSink::new()),
        }
    }

    /// Record a delivery without its GPS trace.
    fn deliver_untracked(&self, id: &str, planned: Decimal, actual: Decimal, volumes: [Decimal; 3]) -> ConsignmentId {
        let id = ConsignmentId::new(id);
        let consignment = Consignment::new(id.clone(), RouteId::new(ROUTE), ProductCode::new("AGO"), planned, actual)
            .with_volumes(volumes[0], volumes[1], volumes[2])
            .with_delivered_at(trip_start() + Duration::hours(4));
        self.consignments.insert(consignment);
        self.evidence.insert(id.clone(), EvidenceBundle::complete(&format!("docs/{}", id)));
        id
    }

    fn deliver(&self, id: &str, planned: Decimal, actual: Decimal, volumes: [Decimal; 3]) -> ConsignmentId {
        let id = self.deliver_untracked(id, planned, actual, volumes);
        let km: f64 = actual.to_string().parse().unwrap();
        self.traces.insert(drive(&id, km, 60.0));
        id
    }

    fn engine(&self, config: EngineConfig) -> ClaimEngine {
        ClaimEngine::builder(config, reference())
            .consignments(self.consignments.clone())
            .traces(self.traces.clone())
            .evidence(self.evidence.clone())
            .sink(self.sink.clone())
            .build()
            .unwrap()
    }
}

fn full_tank() -> [Decimal; 3] {
    [dec!(30000), dec!(30000), dec!(30000)]
}

fn outbox() -> Arc<dyn RegulatorGateway> {
    Arc::new(OutboxGateway::new())
}

/// Full pipeline: delivery → validation → claim → submission → settlement.
#[test]
fn full_pipeline_urban_delivery() {
    let depot = Depot::new();
    let id = depot.deliver("CNS-0001", dec!(120), dec!(125), full_tank());
    let engine = depot.engine(EngineConfig::default());

    let claim = engine.process_consignment(&id, ProcessOptions::default()).unwrap();

    // 25 km × 30000 L × (0.0012 × 1.2)
    assert_eq!(claim.km_beyond_equalisation(), dec!(25));
    assert_eq!(claim.tariff().tariff, dec!(0.00144));
    assert_eq!(claim.base_amount(), dec!(1080.00));
    assert_eq!(claim.compliance_bonus(), dec!(54.00));
    assert!(claim.route_efficiency_bonus() > Decimal::ZERO);
    assert_eq!(
        claim.total_amount(),
        claim.base_amount() + claim.route_efficiency_bonus() + claim.compliance_bonus()
    );

    // Clean trace and complete paperwork: auto-submitted.
    assert_eq!(claim.status(), ClaimStatus::Submitted);
    assert_eq!(claim.window_id(), Some(&WindowId::new(WINDOW)));
    assert_eq!(claim.evidence_refs().len(), 5);
    assert!(claim.claim_number().starts_with("UPPF-"));

    let gps = engine.claims().gps_trace(claim.gps_trace_id()).unwrap();
    assert!(gps.is_valid());
    assert_eq!(gps.anomaly_count(), 0);
    let recon = engine.claims().reconciliation(claim.reconciliation_id()).unwrap();
    assert_eq!(recon.status(), ReconciliationStatus::Matched);

    let submission = engine
        .build_submission(&WindowId::new(WINDOW), &outbox())
        .unwrap()
        .expect("auto-submitted claim is sent");
    assert_eq!(submission.batch.claims.len(), 1);
    assert_eq!(submission.batch.claims[0].route_km, dec!(25));
    assert_eq!(submission.batch.total_amount(), claim.total_amount());
    assert!(submission.journal_entries.iter().all(|e| e.is_balanced()));

    let submitted = engine.claims().get(claim.id()).unwrap();
    assert_eq!(submitted.submission_id(), Some(submission.batch.submission_id.as_str()));
    assert!(submitted.submitted_at().is_some());

    let response = RegulatorResponse {
        response_ref: "NPA-RESP-1".into(),
        approved_claims: vec![ApprovedClaim {
            claim_number: claim.claim_number().to_string(),
            approved_amount: dec!(1000.00),
            settlement_date: NaiveDate::from_ymd_opt(2025, 2, 5).unwrap(),
            adjustment_reason: Some("distance capped".into()),
        }],
        rejected_claims: vec![],
        npa_penalties: Some(dec!(25.00)),
        performance_bonuses: None,
    };
    let settlement = engine.settle(&WindowId::new(WINDOW), &response).unwrap();

    assert_eq!(settlement.status(), SettlementStatus::Completed);
    assert_eq!(settlement.total_settled(), dec!(1000.00));
    assert_eq!(settlement.total_variance(), dec!(1000.00) - claim.total_amount());
    assert_eq!(settlement.net_settlement(), dec!(975.00));
    assert!(!settlement.adjustments_estimated());
    assert!(settlement.journal_entries().iter().all(|e| e.is_balanced()));

    let settled = engine.claims().get(claim.id()).unwrap();
    assert_eq!(settled.status(), ClaimStatus::Settled);
    assert_eq!(settled.settlement_amount(), Some(dec!(1000.00)));
    assert_eq!(settled.variance_amount(), Some(dec!(1000.00) - claim.total_amount()));
    assert_eq!(settled.variance_reason(), Some("distance capped"));

    // The bank credits the net amount.
    let paid = engine
        .reconcile_payment(
            settlement.settlement_id(),
            &BankPayment {
                reference: "GCB-TRX-0001".into(),
                amount: dec!(975.00),
                received_on: NaiveDate::from_ymd_opt(2025, 2, 7).unwrap(),
                notes: None,
            },
        )
        .unwrap();
    let payment = paid.payment_reconciliation().unwrap();
    assert_eq!(payment.status, PaymentStatus::Reconciled);
    assert!(payment.journal_entry.is_none());

    let gl = &engine.config().gl;
    let mut trial = TrialBalance::new();
    for entry in submission.journal_entries.iter().chain(settlement.journal_entries()) {
        trial.apply(entry);
    }
    assert!(trial.is_balanced());
    assert_eq!(trial.balance(&gl.receivable), Decimal::ZERO);
    assert_eq!(trial.balance(&gl.cash), dec!(975.00));

    let events = depot.sink.events();
    assert!(events.iter().any(|e| matches!(e, EngineEvent::ClaimGenerated { .. })));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::ClaimsSubmitted { .. })));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::SettlementCompleted { .. })));
}

#[test]
fn small_station_shortfall_is_within_tolerance() {
    let depot = Depot::new();
    let id = depot.deliver("CNS-0002", dec!(120), dec!(125), [dec!(30000), dec!(29980), dec!(29950)]);
    let engine = depot.engine(EngineConfig::default());

    let claim = engine.process_consignment(&id, ProcessOptions::default()).unwrap();
    let recon = engine.claims().reconciliation(claim.reconciliation_id()).unwrap();

    assert_eq!(recon.tolerance_litres(), dec!(600));
    assert_eq!(recon.variance_depot_station(), dec!(50));
    assert_eq!(recon.status(), ReconciliationStatus::Matched);
    assert!(claim.is_reconciled());
    // Paid on what the station received.
    assert_eq!(claim.litres_moved(), dec!(29950));
}

#[test]
fn route_deviation_sends_claim_to_manual_review() {
    let depot = Depot::new();
    // 30% over the planned distance: one HIGH route-change anomaly.
    let id = depot.deliver("CNS-0003", dec!(100), dec!(130), full_tank());
    let engine = depot.engine(EngineConfig::default());

    let claim = engine.process_consignment(&id, ProcessOptions::default()).unwrap();
    assert!((claim.gps_confidence() - 80.0).abs() < 1e-9);
    assert_eq!(claim.status(), ClaimStatus::ManualReview);

    let approved = engine.approve_review(claim.id(), "detour confirmed by dispatcher").unwrap();
    assert_eq!(approved.status(), ClaimStatus::ReadyToSubmit);

    let submission = engine
        .build_submission(&WindowId::new(WINDOW), &outbox())
        .unwrap()
        .unwrap();
    assert_eq!(submission.batch.claims[0].claim_number, claim.claim_number());
    assert_eq!(engine.claims().get(claim.id()).unwrap().status(), ClaimStatus::Submitted);
}

#[test]
fn ineligible_delivery_persists_no_claim() {
    let depot = Depot::new();
    let id = depot.deliver("CNS-0004", dec!(90), dec!(90), full_tank());
    let engine = Arc::new(depot.engine(EngineConfig::default()));

    let err = engine.process_consignment(&id, ProcessOptions::default()).unwrap_err();
    assert!(matches!(err, EngineError::NotEligible { .. }));
    assert!(!err.is_retryable());
    assert!(engine.claims().all().is_empty());

    let scheduler = Scheduler::new(engine.clone());
    let report = scheduler.sweep_deliveries(ProcessOptions::default());
    assert_eq!(report.terminal, vec![id.clone()]);
    assert!(scheduler.terminal_reason(&id).is_some());

    // Never picked up again.
    assert_eq!(scheduler.sweep_deliveries(ProcessOptions::default()).attempted, 0);
}

#[test]
fn missing_trace_is_retried_on_next_sweep() {
    let depot = Depot::new();
    let id = depot.deliver_untracked("CNS-0005", dec!(120), dec!(125), full_tank());
    let scheduler = Scheduler::new(Arc::new(depot.engine(EngineConfig::default())));

    let first = scheduler.sweep_deliveries(ProcessOptions::default());
    assert_eq!(first.deferred, vec![id.clone()]);
    assert_eq!(first.generated, 0);

    depot.traces.insert(drive(&id, 125.0, 60.0));
    let second = scheduler.sweep_deliveries(ProcessOptions::default());
    assert_eq!(second.generated, 1);
    assert!(scheduler.engine().claims().by_consignment(&id).is_some());
}

#[test]
fn skip_validation_generates_without_trace() {
    let depot = Depot::new();
    let id = depot.deliver_untracked("CNS-0006", dec!(120), dec!(125), full_tank());
    let engine = depot.engine(EngineConfig::default());

    let options = ProcessOptions {
        skip_validation: true,
        ..ProcessOptions::default()
    };
    let claim = engine.process_consignment(&id, options).unwrap();
    assert_eq!(claim.gps_confidence(), 50.0);
    assert_eq!(claim.route_efficiency(), 75.0);
    assert_eq!(claim.status(), ClaimStatus::ManualReview);
}

#[test]
fn processing_is_idempotent_per_consignment() {
    let depot = Depot::new();
    let id = depot.deliver("CNS-0007", dec!(120), dec!(125), full_tank());
    let engine = depot.engine(EngineConfig::default());

    let first = engine.process_consignment(&id, ProcessOptions::default()).unwrap();
    let events = depot.sink.len();
    let second = engine.process_consignment(&id, ProcessOptions::default()).unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(first.total_amount(), second.total_amount());
    assert_eq!(engine.claims().all().len(), 1);
    assert_eq!(depot.sink.len(), events);

    // Concurrent duplicates in one batch still produce one claim.
    let report = engine.process_batch(&[id.clone(), id.clone(), id], ProcessOptions::default());
    assert_eq!(report.claims.len(), 3);
    assert!(report.claims.iter().all(|c| c.id() == first.id()));
}

#[test]
fn lossy_delivery_rejected_or_failed_in_strict_mode() {
    let depot = Depot::new();
    // 900 L lost against a 600 L tolerance.
    let id = depot.deliver("CNS-0008", dec!(120), dec!(125), [dec!(30000), dec!(29950), dec!(29100)]);
    let engine = depot.engine(EngineConfig::default());

    let strict = ProcessOptions {
        strict: true,
        ..ProcessOptions::default()
    };
    let err = engine.process_consignment(&id, strict).unwrap_err();
    assert!(matches!(err, EngineError::ValidationFailed { .. }));
    assert!(engine.claims().by_consignment(&id).is_none());

    let claim = engine.process_consignment(&id, ProcessOptions::default()).unwrap();
    assert_eq!(claim.status(), ClaimStatus::RejectedReconciliation);
    assert!(!claim.is_reconciled());

    // Rejected claims get no review follow-up.
    let follow_ups = depot
        .sink
        .events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::FollowUpScheduled(t) if t.claim_id == claim.id()))
        .count();
    assert_eq!(follow_ups, 0);
}

#[test]
fn priority_hint_mode_holds_auto_submit_claims() {
    let depot = Depot::new();
    let id = depot.deliver("CNS-0009", dec!(120), dec!(125), full_tank());
    let mut config = EngineConfig::default();
    config.lifecycle.auto_submit = AutoSubmitMode::PriorityHint;
    let engine = depot.engine(config);

    let claim = engine.process_consignment(&id, ProcessOptions::default()).unwrap();
    assert_eq!(claim.status(), ClaimStatus::ReadyToSubmit);
    assert_eq!(claim.priority(), Priority::Urgent);
}

struct Offline;

impl RegulatorGateway for Offline {
    fn name(&self) -> &str {
        "npa-portal"
    }

    fn submit(&self, _batch: &SubmissionBatch) -> Result<SubmissionReceipt, ServiceError> {
        Err(ServiceError::Unavailable("portal down".into()))
    }
}

#[test]
fn gateway_failure_leaves_claims_untouched() {
    let depot = Depot::new();
    let id = depot.deliver("CNS-0010", dec!(100), dec!(130), full_tank());
    let engine = depot.engine(EngineConfig::default());
    let claim = engine.process_consignment(&id, ProcessOptions::default()).unwrap();
    engine.approve_review(claim.id(), "ok").unwrap();

    let offline: Arc<dyn RegulatorGateway> = Arc::new(Offline);
    let err = engine.build_submission(&WindowId::new(WINDOW), &offline).unwrap_err();
    assert!(err.is_retryable());

    let after = engine.claims().get(claim.id()).unwrap();
    assert_eq!(after.status(), ClaimStatus::ReadyToSubmit);
    assert!(after.submission_id().is_none());

    // Retrying through a working gateway succeeds.
    let submission = engine.build_submission(&WindowId::new(WINDOW), &outbox()).unwrap();
    assert!(submission.is_some());
}

/// Signals when a batch reaches it, then holds the call until released.
struct ParkedGateway {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl RegulatorGateway for ParkedGateway {
    fn name(&self) -> &str {
        "npa-portal"
    }

    fn submit(&self, batch: &SubmissionBatch) -> Result<SubmissionReceipt, ServiceError> {
        let _ = self.entered.lock().send(());
        self.release
            .lock()
            .recv_timeout(StdDuration::from_secs(5))
            .map_err(|_| ServiceError::Unavailable("never released".into()))?;
        Ok(SubmissionReceipt {
            reference: format!("NPA-REF-{}", batch.submission_id),
            message: "queued".into(),
        })
    }
}

/// Run `build_submission` through a parked gateway and call `meanwhile`
/// while the batch is in flight.
fn submit_with_interleaving<F>(engine: &ClaimEngine, meanwhile: F) -> claim_engine::pipeline::engine::Submission
where
    F: FnOnce(),
{
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gateway: Arc<dyn RegulatorGateway> = Arc::new(ParkedGateway {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });

    thread::scope(|s| {
        let sending = s.spawn(|| engine.build_submission(&WindowId::new(WINDOW), &gateway));
        entered_rx.recv_timeout(StdDuration::from_secs(5)).unwrap();
        meanwhile();
        release_tx.send(()).unwrap();
        sending.join().unwrap()
    })
    .unwrap()
    .unwrap()
}

#[test]
fn cancellation_during_submission_is_kept() {
    let depot = Depot::new();
    let reviewed = depot.deliver("CNS-0020", dec!(100), dec!(130), full_tank());
    let auto = depot.deliver("CNS-0021", dec!(120), dec!(125), full_tank());
    let engine = depot.engine(EngineConfig::default());

    let reviewed = engine.process_consignment(&reviewed, ProcessOptions::default()).unwrap();
    let auto = engine.process_consignment(&auto, ProcessOptions::default()).unwrap();
    engine.approve_review(reviewed.id(), "detour confirmed").unwrap();

    let submission = submit_with_interleaving(&engine, || {
        let cancelled = engine.cancel(reviewed.id(), "delivery voided").unwrap();
        assert_eq!(cancelled.status(), ClaimStatus::Cancelled);
    });

    assert_eq!(submission.batch.claims.len(), 2);
    assert_eq!(submission.withdrawn, vec![reviewed.claim_number().to_string()]);
    assert_eq!(submission.journal_entries.len(), 1);

    let stored = engine.claims().get(reviewed.id()).unwrap();
    assert_eq!(stored.status(), ClaimStatus::Cancelled);
    assert!(stored.submission_id().is_none());
    assert_eq!(stored.history().last().unwrap().to, ClaimStatus::Cancelled);

    let sent = engine.claims().get(auto.id()).unwrap();
    assert_eq!(sent.submission_id(), Some(submission.batch.submission_id.as_str()));
}

#[test]
fn review_decisions_during_submission_are_kept() {
    let depot = Depot::new();
    let ready = depot.deliver("CNS-0030", dec!(100), dec!(130), full_tank());
    let approved_late = depot.deliver("CNS-0031", dec!(100), dec!(130), full_tank());
    let rejected_late = depot.deliver("CNS-0032", dec!(100), dec!(130), full_tank());
    let engine = depot.engine(EngineConfig::default());

    let report = engine.process_batch(&[ready, approved_late, rejected_late], ProcessOptions::default());
    assert!(report.claims.iter().all(|c| c.status() == ClaimStatus::ManualReview));
    let (ready, approved_late, rejected_late) = (&report.claims[0], &report.claims[1], &report.claims[2]);
    engine.approve_review(ready.id(), "ok").unwrap();

    let submission = submit_with_interleaving(&engine, || {
        engine.approve_review(approved_late.id(), "ok").unwrap();
        engine
            .reject_review(rejected_late.id(), ReviewRejection::Gps, "trace tampered")
            .unwrap();
    });
    assert_eq!(submission.batch.claims.len(), 1);
    assert!(submission.withdrawn.is_empty());

    assert_eq!(engine.claims().get(ready.id()).unwrap().status(), ClaimStatus::Submitted);
    assert_eq!(engine.claims().get(rejected_late.id()).unwrap().status(), ClaimStatus::RejectedGps);

    // Approved mid-flight: still ready and picked up by the next batch.
    let late = engine.claims().get(approved_late.id()).unwrap();
    assert_eq!(late.status(), ClaimStatus::ReadyToSubmit);
    assert!(late.submission_id().is_none());
    let next = engine.build_submission(&WindowId::new(WINDOW), &outbox()).unwrap().unwrap();
    assert_eq!(next.batch.claims[0].claim_number, late.claim_number());
}

#[test]
fn delivery_outside_every_window_is_held_for_review() {
    let depot = Depot::new();
    let id = ConsignmentId::new("CNS-0040");
    depot.consignments.insert(
        Consignment::new(id.clone(), RouteId::new(ROUTE), ProductCode::new("AGO"), dec!(120), dec!(125))
            .with_volumes(dec!(30000), dec!(30000), dec!(30000))
            .with_delivered_at(Utc.with_ymd_and_hms(2025, 3, 5, 10, 0, 0).unwrap()),
    );
    depot.traces.insert(drive(&id, 125.0, 60.0));
    depot.evidence.insert(id.clone(), EvidenceBundle::complete("docs/CNS-0040"));
    let engine = Arc::new(depot.engine(EngineConfig::default()));

    let claim = engine.process_consignment(&id, ProcessOptions::default()).unwrap();
    assert!(claim.window_id().is_none());
    assert_eq!(claim.status(), ClaimStatus::ManualReview);
    assert_eq!(claim.history()[0].reason, "delivered outside every pricing window");

    // Nothing can strand it in SUBMITTED: it is never batched, and review
    // cannot release it.
    assert!(engine.build_submission(&WindowId::new(WINDOW), &outbox()).unwrap().is_none());
    let err = engine.approve_review(claim.id(), "looks fine").unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert!(engine.claims().with_status(ClaimStatus::Submitted).is_empty());

    let cancelled = engine.cancel(claim.id(), "no pricing window").unwrap();
    assert_eq!(cancelled.status(), ClaimStatus::Cancelled);
}

#[test]
fn settlement_variance_and_replay() {
    let depot = Depot::new();
    let ids: Vec<ConsignmentId> = (1..=4)
        .map(|i| depot.deliver(&format!("CNS-1{:03}", i), dec!(120), Decimal::from(115 + 5 * i), full_tank()))
        .collect();
    let engine = depot.engine(EngineConfig::default());
    let report = engine.process_batch(&ids, ProcessOptions::default());
    assert_eq!(report.claims.len(), 4);
    let submission = engine.build_submission(&WindowId::new(WINDOW), &outbox()).unwrap().unwrap();

    let claims = report.claims;
    let paid = [dec!(0.80), dec!(1.00), dec!(0.95)];
    let response = RegulatorResponse {
        response_ref: "NPA-RESP-2".into(),
        approved_claims: claims[..3]
            .iter()
            .zip(paid)
            .map(|(c, share)| ApprovedClaim {
                claim_number: c.claim_number().to_string(),
                approved_amount: (c.total_amount() * share).round_dp(2),
                settlement_date: NaiveDate::from_ymd_opt(2025, 2, 10).unwrap(),
                adjustment_reason: None,
            })
            .collect(),
        rejected_claims: vec![
            RejectedClaim {
                claim_number: claims[3].claim_number().to_string(),
                reason: "duplicate waybill".into(),
            },
            RejectedClaim {
                claim_number: "UPPF-19990101-999999".into(),
                reason: "unknown".into(),
            },
        ],
        npa_penalties: None,
        performance_bonuses: None,
    };

    let settlement = engine.settle(&WindowId::new(WINDOW), &response).unwrap();
    assert_eq!(settlement.status(), SettlementStatus::Completed);
    assert_eq!(settlement.settled_claims(), 3);
    assert_eq!(settlement.rejected_claims(), 1);
    assert_eq!(settlement.unmatched_claims(), ["UPPF-19990101-999999".to_string()]);

    let original: Decimal = settlement.variance_records().iter().map(|r| r.original_amount).sum();
    let settled: Decimal = settlement.variance_records().iter().map(|r| r.settled_amount).sum();
    let variance: Decimal = settlement.variance_records().iter().map(|r| r.variance_amount).sum();
    assert_eq!(settled - original, variance);
    assert_eq!(settlement.total_variance(), variance);
    assert_eq!(settlement.approved_claimed(), original);
    assert_eq!(settlement.total_settled() - settlement.approved_claimed(), settlement.total_variance());
    assert!(settlement.total_claimed() > settlement.approved_claimed());

    // Only the claim paid 20% short needs action.
    let flagged: Vec<_> = settlement.variance_records().iter().filter(|r| r.action_required).collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].claim_number, claims[0].claim_number());

    // Clean claims earn estimated bonuses when the response states none.
    assert!(settlement.adjustments_estimated());
    assert!(settlement.performance_bonuses() > Decimal::ZERO);
    assert_eq!(
        settlement.net_settlement(),
        settlement.total_settled() - settlement.npa_penalties() + settlement.performance_bonuses()
    );

    assert_eq!(engine.claims().get(claims[3].id()).unwrap().status(), ClaimStatus::Rejected);

    // Every accrued receivable is cleared, the rejected one by reversal.
    let gl = &engine.config().gl;
    let mut trial = TrialBalance::new();
    for entry in submission.journal_entries.iter().chain(settlement.journal_entries()) {
        trial.apply(entry);
    }
    assert!(trial.is_balanced());
    assert_eq!(trial.balance(&gl.receivable), Decimal::ZERO);
    assert!(depot
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, EngineEvent::UnmatchedSettlementClaim { .. })));

    // Replaying the response changes nothing.
    let events = depot.sink.len();
    let replay = engine.settle(&WindowId::new(WINDOW), &response).unwrap();
    assert_eq!(replay.settlement_id(), settlement.settlement_id());
    assert_eq!(replay.net_settlement(), settlement.net_settlement());
    assert_eq!(depot.sink.len(), events);
    assert!(engine.settlement("NPA-RESP-2").is_some());
}

#[test]
fn overdue_submissions_raise_follow_ups() {
    let depot = Depot::new();
    let ids = vec![
        depot.deliver("CNS-2001", dec!(120), dec!(125), full_tank()),
        depot.deliver("CNS-2002", dec!(120), dec!(140), full_tank()),
    ];
    let engine = Arc::new(depot.engine(EngineConfig::default()));
    let scheduler = Scheduler::new(engine.clone());
    assert_eq!(scheduler.sweep_deliveries(ProcessOptions::default()).generated, 2);
    engine.build_submission(&WindowId::new(WINDOW), &outbox()).unwrap().unwrap();

    let sla = engine.config().pipeline.submission_sla_days;
    assert!(scheduler.sweep_overdue_submissions(Utc::now()).is_empty());

    let tasks = scheduler.sweep_overdue_submissions(Utc::now() + Duration::days(sla + 1));
    assert_eq!(tasks.len(), ids.len());
    assert!(tasks.iter().all(|t| t.kind == FollowUpKind::OverdueSubmission));
    assert!(tasks.windows(2).all(|w| w[0].priority <= w[1].priority));
}

#[test]
fn cancellation_only_before_submission() {
    let depot = Depot::new();
    let held = depot.deliver("CNS-3001", dec!(100), dec!(130), full_tank());
    let sent = depot.deliver("CNS-3002", dec!(120), dec!(125), full_tank());
    let engine = depot.engine(EngineConfig::default());

    let held = engine.process_consignment(&held, ProcessOptions::default()).unwrap();
    let sent = engine.process_consignment(&sent, ProcessOptions::default()).unwrap();

    let cancelled = engine.cancel(held.id(), "delivery voided").unwrap();
    assert_eq!(cancelled.status(), ClaimStatus::Cancelled);
    assert_eq!(cancelled.history().last().unwrap().reason, "delivery voided");

    let err = engine.cancel(sent.id(), "too late").unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[test]
fn generated_fleet_processes_end_to_end() {
    let fleet = generate_fleet(&FleetConfig {
        consignment_count: 40,
        seed: Some(11),
        ..Default::default()
    });
    let engine = Arc::new(fleet.builder(EngineConfig::default()).build().unwrap());
    let scheduler = Scheduler::new(engine.clone());

    let report = scheduler.sweep_deliveries(ProcessOptions::default());
    assert_eq!(report.attempted, 40);
    assert_eq!(report.generated + report.terminal.len() + report.deferred.len(), 40);
    assert!(report.deferred.is_empty());

    for claim in engine.claims().all() {
        assert!(claim.km_beyond_equalisation() > Decimal::ZERO);
        assert_eq!(
            claim.total_amount(),
            claim.base_amount() + claim.route_efficiency_bonus() + claim.compliance_bonus()
        );
        assert!((0.0..=100.0).contains(&claim.risk_score()));
    }

    for window in engine.reference_data().windows() {
        if let Some(submission) = engine.build_submission(&window.id, &outbox()).unwrap() {
            assert!(submission.journal_entries.iter().all(|e| e.is_balanced()));
        }
    }
}
