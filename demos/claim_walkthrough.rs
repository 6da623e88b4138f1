//! Walk one pricing window from delivery to settlement.
//!
//! Four tanker deliveries on the Tema-Kumasi corridor go through GPS
//! validation, three-way reconciliation, claim calculation, submission and
//! a regulator response.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use claim_engine::claims::claim::ClaimStatus;
use claim_engine::claims::evidence::EvidenceBundle;
use claim_engine::core::config::EngineConfig;
use claim_engine::core::consignment::Consignment;
use claim_engine::core::equalisation::EqualisationPoint;
use claim_engine::core::events::RecordingSink;
use claim_engine::core::ids::{ConsignmentId, ProductCode, RoadCategory, RouteId, WindowId};
use claim_engine::core::reference::{PricingWindow, ReferenceData};
use claim_engine::gps::trace::{GpsPoint, RawTrace, EARTH_RADIUS_KM};
use claim_engine::pipeline::engine::{ClaimEngine, ProcessOptions};
use claim_engine::pipeline::store::{InMemoryConsignments, InMemoryEvidence, InMemoryTraces};
use claim_engine::settlement::ledger::TrialBalance;
use claim_engine::settlement::regulator::{
    ApprovedClaim, OutboxGateway, RegulatorGateway, RegulatorResponse, RejectedClaim,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// A northbound drive of `km` at 60 km/h with a fix every 5 km.
fn drive(id: &ConsignmentId, km: f64) -> RawTrace {
    let deg_per_km = 1.0 / (EARTH_RADIUS_KM * std::f64::consts::PI / 180.0);
    let start = Utc.with_ymd_and_hms(2025, 1, 10, 6, 0, 0).unwrap();
    let steps = (km / 5.0).ceil() as i64;
    let points = (0..=steps)
        .map(|i| {
            let d = (i as f64 * 5.0).min(km);
            GpsPoint::new(5.6 + d * deg_per_km, -0.2, start + Duration::seconds((d * 60.0).round() as i64))
        })
        .collect();
    RawTrace::new(id.clone(), points)
}

fn main() {
    println!("╔══════════════════════════════════════════════╗");
    println!("║  claim-engine: Delivery-to-Settlement Walk   ║");
    println!("╚══════════════════════════════════════════════╝\n");

    let route = RouteId::new("TEMA-KUMASI");
    let window = WindowId::new("W-2025-01");
    let mut refs = ReferenceData::new();
    refs.add_equalisation_point(
        EqualisationPoint::new(route.clone(), dec!(100), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .with_road_category(RoadCategory::new("URBAN")),
    );
    refs.add_window(PricingWindow::new(
        window.clone(),
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
    ));

    let consignments = Arc::new(InMemoryConsignments::new());
    let traces = Arc::new(InMemoryTraces::new());
    let evidence = Arc::new(InMemoryEvidence::new());
    let delivered = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();

    // (id, planned km, actual km, depot, transporter, station)
    let deliveries = [
        ("CNS-0001", dec!(120), dec!(125), dec!(30000), dec!(30000), dec!(30000)),
        ("CNS-0002", dec!(120), dec!(125), dec!(30000), dec!(29980), dec!(29950)),
        ("CNS-0003", dec!(100), dec!(130), dec!(30000), dec!(29990), dec!(29900)),
        ("CNS-0004", dec!(90), dec!(90), dec!(30000), dec!(30000), dec!(30000)),
    ];
    let mut ids = Vec::new();
    for (id, planned, actual, depot, transporter, station) in deliveries {
        let id = ConsignmentId::new(id);
        consignments.insert(
            Consignment::new(id.clone(), route.clone(), ProductCode::new("AGO"), planned, actual)
                .with_volumes(depot, transporter, station)
                .with_delivered_at(delivered),
        );
        traces.insert(drive(&id, actual.to_f64().unwrap()));
        evidence.insert(id.clone(), EvidenceBundle::complete(&format!("docs/{}", id)));
        ids.push(id);
    }

    let sink = Arc::new(RecordingSink::new());
    let engine = ClaimEngine::builder(EngineConfig::default(), refs)
        .consignments(consignments)
        .traces(traces)
        .evidence(evidence)
        .sink(sink.clone())
        .build()
        .unwrap();

    // --- Scenario 1: Claim generation ---
    println!("━━━ Scenario 1: Claim Generation ━━━\n");

    let report = engine.process_batch(&ids, ProcessOptions::default());
    for claim in &report.claims {
        let recon = engine.claims().reconciliation(claim.reconciliation_id()).unwrap();
        println!("{} ({})", claim.claim_number(), claim.consignment_id());
        println!("  Beyond equalisation: {} km × {} L × {}", claim.km_beyond_equalisation(), claim.litres_moved(), claim.tariff().tariff);
        println!("  Base:                {}", claim.base_amount());
        println!("  Efficiency bonus:    {}", claim.route_efficiency_bonus());
        println!("  Compliance bonus:    {}", claim.compliance_bonus());
        println!("  Total:               {}", claim.total_amount());
        println!(
            "  Reconciliation:      {:?} ({} L vs {} L tolerance)",
            recon.status(),
            recon.variance_depot_station(),
            recon.tolerance_litres()
        );
        println!("  GPS confidence:      {:.1}", claim.gps_confidence());
        println!("  Status:              {} ({:?})", claim.status(), claim.priority());
        println!();
    }
    for failure in &report.failures {
        println!("{}: {}", failure.consignment, failure.error);
    }
    println!();

    // --- Scenario 2: Review and submission ---
    println!("━━━ Scenario 2: Review and Submission ━━━\n");

    for claim in report.claims.iter().filter(|c| c.status() == ClaimStatus::ManualReview) {
        let approved = engine.approve_review(claim.id(), "detour confirmed").unwrap();
        println!("{} approved on review -> {}", approved.claim_number(), approved.status());
    }

    let gateway: Arc<dyn RegulatorGateway> = Arc::new(OutboxGateway::new());
    let submission = engine.build_submission(&window, &gateway).unwrap().unwrap();
    println!(
        "Submission {} accepted as {}: {} claims, {} total",
        submission.batch.submission_id,
        submission.receipt.reference,
        submission.batch.claims.len(),
        submission.batch.total_amount()
    );
    println!();

    // --- Scenario 3: Regulator response ---
    println!("━━━ Scenario 3: Settlement ━━━\n");

    let numbers: Vec<String> = submission.batch.claims.iter().map(|c| c.claim_number.clone()).collect();
    let settle_on = NaiveDate::from_ymd_opt(2025, 2, 12).unwrap();
    let response = RegulatorResponse {
        response_ref: "NPA-RESP-0001".into(),
        approved_claims: submission
            .batch
            .claims
            .iter()
            .take(numbers.len().saturating_sub(1))
            .map(|c| ApprovedClaim {
                claim_number: c.claim_number.clone(),
                approved_amount: (c.amount * dec!(0.92)).round_dp(2),
                settlement_date: settle_on,
                adjustment_reason: Some("efficiency bonus capped".into()),
            })
            .collect(),
        rejected_claims: numbers
            .last()
            .map(|n| RejectedClaim {
                claim_number: n.clone(),
                reason: "waybill mismatch".into(),
            })
            .into_iter()
            .collect(),
        npa_penalties: None,
        performance_bonuses: None,
    };

    let settlement = engine.settle(&window, &response).unwrap();
    println!("Settlement:     {} ({:?})", settlement.settlement_id(), settlement.status());
    println!("Claimed:        {}", settlement.total_claimed());
    println!("Settled:        {}", settlement.total_settled());
    println!("Variance:       {}", settlement.total_variance());
    println!("Penalties:      {} (estimated)", settlement.npa_penalties());
    println!("Bonuses:        {} (estimated)", settlement.performance_bonuses());
    println!("Net:            {}", settlement.net_settlement());
    for r in settlement.variance_records() {
        println!("  {}  {} -> {}  {}% {:?}", r.claim_number, r.original_amount, r.settled_amount, r.variance_pct, r.risk_category);
    }
    for r in settlement.rejected() {
        println!("  {}  rejected: {}", r.claim_number, r.reason);
    }
    println!();

    // --- Scenario 4: General ledger ---
    println!("━━━ Scenario 4: General Ledger ━━━\n");

    let mut trial = TrialBalance::default();
    for entry in submission.journal_entries.iter().chain(settlement.journal_entries()) {
        trial.apply(entry);
    }
    for (account, balance) in trial.balances() {
        println!("  {:<6} {:>12}", account, balance);
    }
    println!("  Balanced: {}", trial.is_balanced());
    println!("\n{} events emitted.", sink.len());
}
