//! Random fleet generation for benchmarks, demos and the CLI.
//!
//! Produces a self-consistent set of routes, consignments, GPS traces and
//! evidence that the engine can process end to end. Most deliveries are
//! clean; configurable shares are ineligible, lossy or speeding.

use crate::claims::evidence::EvidenceBundle;
use crate::core::config::EngineConfig;
use crate::core::consignment::Consignment;
use crate::core::equalisation::EqualisationPoint;
use crate::core::ids::{ConsignmentId, DepotId, ProductCode, RoadCategory, RouteId, StationId, VehicleId, WindowId};
use crate::core::reference::{PricingWindow, ReferenceData};
use crate::gps::trace::{GpsPoint, RawTrace, EARTH_RADIUS_KM};
use crate::pipeline::engine::{ClaimEngine, EngineBuilder};
use crate::pipeline::store::{InMemoryConsignments, InMemoryEvidence, InMemoryTraces};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const PRODUCTS: [&str; 4] = ["PMS", "AGO", "KEROSENE", "LPG"];
const CATEGORIES: [&str; 5] = ["HIGHWAY", "URBAN", "RURAL", "MOUNTAINOUS", "COASTAL"];

/// Configuration for generating a random fleet.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub consignment_count: usize,
    pub route_count: usize,
    /// Share of deliveries that stop short of the equalisation point.
    pub ineligible_share: f64,
    /// Share of deliveries losing volume well beyond tolerance.
    pub lossy_share: f64,
    /// Share of deliveries with speeding segments.
    pub speeding_share: f64,
    /// Share of deliveries with only part of the paperwork.
    pub partial_evidence_share: f64,
    pub window_start: NaiveDate,
    pub window_days: i64,
    /// Fixed seed for reproducible fleets.
    pub seed: Option<u64>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            consignment_count: 50,
            route_count: 8,
            ineligible_share: 0.1,
            lossy_share: 0.05,
            speeding_share: 0.1,
            partial_evidence_share: 0.15,
            window_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default(),
            window_days: 14,
            seed: None,
        }
    }
}

/// A generated fleet, also the CLI input file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fleet {
    pub reference: ReferenceData,
    pub consignments: Vec<Consignment>,
    #[serde(default)]
    pub traces: Vec<RawTrace>,
    #[serde(default)]
    pub evidence: Vec<EvidenceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub consignment_id: ConsignmentId,
    #[serde(flatten)]
    pub bundle: EvidenceBundle,
}

impl Fleet {
    pub fn consignment_ids(&self) -> Vec<ConsignmentId> {
        self.consignments.iter().map(|c| c.id().clone()).collect()
    }

    /// An engine builder backed by in-memory stores loaded with this fleet.
    pub fn builder(&self, config: EngineConfig) -> EngineBuilder {
        let consignments: InMemoryConsignments = self.consignments.iter().cloned().collect();
        let traces = InMemoryTraces::new();
        for trace in &self.traces {
            traces.insert(trace.clone());
        }
        let evidence = InMemoryEvidence::new();
        for record in &self.evidence {
            evidence.insert(record.consignment_id.clone(), record.bundle.clone());
        }
        ClaimEngine::builder(config, self.reference.clone())
            .consignments(Arc::new(consignments))
            .traces(Arc::new(traces))
            .evidence(Arc::new(evidence))
    }
}

struct Route {
    id: RouteId,
    threshold_km: i64,
}

/// Generate a random fleet for testing.
pub fn generate_fleet(config: &FleetConfig) -> Fleet {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let window_end = config.window_start + Duration::days(config.window_days.max(1) - 1);
    let window_id = WindowId::new(format!("W-{}", config.window_start.format("%Y-%m-%d")));
    let mut reference = ReferenceData::new();
    reference.add_window(PricingWindow::new(window_id, config.window_start, window_end));

    let routes: Vec<Route> = (0..config.route_count.max(1))
        .map(|i| {
            let id = RouteId::new(format!("ROUTE-{:02}", i));
            let threshold_km = rng.gen_range(60..=180);
            let mut point = EqualisationPoint::new(
                id.clone(),
                Decimal::from(threshold_km),
                config.window_start - Duration::days(365),
            )
            .with_road_category(RoadCategory::new(CATEGORIES[rng.gen_range(0..CATEGORIES.len())]));
            if rng.gen_bool(0.3) {
                point = point.with_complexity_factor(Decimal::new(rng.gen_range(100..=130), 2));
            }
            reference.add_equalisation_point(point);
            reference.set_variance_baseline(id.clone(), Decimal::new(rng.gen_range(10..=40), 2));
            Route { id, threshold_km }
        })
        .collect();

    let start = Utc.from_utc_datetime(&config.window_start.and_hms_opt(6, 0, 0).unwrap_or_default());
    let mut fleet = Fleet {
        reference,
        ..Fleet::default()
    };

    for i in 0..config.consignment_count {
        let route = &routes[rng.gen_range(0..routes.len())];
        let id = ConsignmentId::new(format!("CNS-{:05}", i + 1));

        let km_actual = if rng.gen_bool(config.ineligible_share) {
            route.threshold_km - rng.gen_range(0..=20)
        } else {
            route.threshold_km + rng.gen_range(10..=150)
        };
        let km_planned = km_actual - rng.gen_range(0..=km_actual / 20);

        let loaded: i64 = rng.gen_range(20_000..=40_000);
        let transported = loaded - rng.gen_range(0..=loaded / 500);
        let received = if rng.gen_bool(config.lossy_share) {
            transported - loaded * 3 / 100
        } else {
            transported - rng.gen_range(0..=loaded / 400)
        };

        let hours_into_window = rng.gen_range(0..(config.window_days.max(1) * 24 - 12));
        let departed = start + Duration::hours(hours_into_window);
        let speeding = rng.gen_bool(config.speeding_share);
        let (points, arrived) = drive(&mut rng, km_actual as f64, departed, speeding);

        let consignment = Consignment::new(
            id.clone(),
            route.id.clone(),
            ProductCode::new(PRODUCTS[rng.gen_range(0..PRODUCTS.len())]),
            Decimal::from(km_planned),
            Decimal::from(km_actual),
        )
        .with_volumes(Decimal::from(loaded), Decimal::from(transported), Decimal::from(received))
        .with_parties(
            DepotId::new(format!("DEPOT-{}", rng.gen_range(1..=3))),
            StationId::new(format!("STN-{:03}", rng.gen_range(1..=40))),
        )
        .with_vehicle(VehicleId::new(format!("GT-{:04}", rng.gen_range(1..=200))))
        .with_delivered_at(arrived)
        .with_waybill(format!("WB-{:05}", i + 1));

        let mut bundle = EvidenceBundle::complete(&format!("evidence/{}", id));
        if rng.gen_bool(config.partial_evidence_share) {
            bundle.weighbridge = None;
            bundle.tank_dips = None;
        }

        fleet.consignments.push(consignment);
        fleet.traces.push(RawTrace::new(id.clone(), points));
        fleet.evidence.push(EvidenceRecord {
            consignment_id: id,
            bundle,
        });
    }

    fleet
}

/// A northbound drive of `km` with a fix every five minutes.
fn drive(rng: &mut StdRng, km: f64, departed: DateTime<Utc>, speeding: bool) -> (Vec<GpsPoint>, DateTime<Utc>) {
    let deg_per_km = 1.0 / (EARTH_RADIUS_KM * std::f64::consts::PI / 180.0);
    let (mut lat, lon) = (5.6, -0.2);
    let mut at = departed;
    let mut remaining = km;
    let mut points = vec![GpsPoint::new(lat, lon, at)];

    while remaining > 1e-9 {
        let kmh: f64 = if speeding && rng.gen_bool(0.4) {
            rng.gen_range(100.0..125.0)
        } else {
            rng.gen_range(45.0..75.0)
        };
        let step = (kmh / 12.0).min(remaining);
        remaining -= step;
        lat += step * deg_per_km;
        at += Duration::seconds((step / kmh * 3600.0).round().max(1.0) as i64);
        points.push(GpsPoint::new(lat, lon, at).with_speed(kmh));
    }

    (points, at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GpsConfig;
    use crate::gps::trace::TraceSummary;

    #[test]
    fn test_fleet_generation() {
        let config = FleetConfig {
            consignment_count: 20,
            seed: Some(7),
            ..Default::default()
        };
        let fleet = generate_fleet(&config);

        assert_eq!(fleet.consignments.len(), 20);
        assert_eq!(fleet.traces.len(), 20);
        assert_eq!(fleet.reference.windows().len(), 1);
        for c in &fleet.consignments {
            assert!(fleet.reference.equalisation_point(c.route_id()).is_some());
            assert!(c.validate().is_ok());
            assert!(fleet.reference.window_for(c.delivered_at()).is_some());
        }
    }

    #[test]
    fn test_seeded_fleets_repeat() {
        let config = FleetConfig {
            consignment_count: 5,
            seed: Some(42),
            ..Default::default()
        };
        let a = generate_fleet(&config);
        let b = generate_fleet(&config);
        let km = |f: &Fleet| f.consignments.iter().map(|c| c.km_actual()).collect::<Vec<_>>();
        assert_eq!(km(&a), km(&b));
    }

    #[test]
    fn test_trace_matches_distance() {
        let config = FleetConfig {
            consignment_count: 3,
            speeding_share: 0.0,
            seed: Some(1),
            ..Default::default()
        };
        let fleet = generate_fleet(&config);
        let gps = GpsConfig::default();
        for (c, trace) in fleet.consignments.iter().zip(&fleet.traces) {
            let summary = TraceSummary::from_points(&trace.points, &gps);
            let km: f64 = c.km_actual().to_string().parse().unwrap();
            assert!((summary.total_km - km).abs() < 0.01);
            assert_eq!(summary.speed_violations, 0);
            assert_eq!(summary.stop_count, 0);
        }
    }
}
