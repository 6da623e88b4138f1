use crate::core::config::{EfficiencyWeights, GpsConfig};
use crate::core::consignment::Consignment;
use crate::core::error::{EngineError, Result};
use crate::core::ids::ConsignmentId;
use crate::gps::anomaly::{Anomaly, AnomalyRequest, AnomalyType, PatternDetector, Severity};
use crate::gps::trace::{RawTrace, TraceSummary};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller switches for a validation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOptions {
    /// Return neutral scores instead of analysing the trace.
    pub skip_validation: bool,
}

/// The validated GPS record of one consignment.
///
/// Immutable once built. Re-validating a consignment produces a new record
/// with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsTrace {
    id: Uuid,
    consignment_id: ConsignmentId,
    total_km: f64,
    planned_km: f64,
    /// |actual - planned| / planned, as a fraction.
    deviation: f64,
    travel_hours: f64,
    average_speed_kmh: f64,
    max_speed_kmh: f64,
    stop_count: u32,
    stop_minutes: f64,
    speed_violations: u32,
    confidence: f64,
    route_efficiency: f64,
    anomalies: Vec<Anomaly>,
    valid: bool,
    skipped: bool,
    used_fallback: bool,
    validated_at: DateTime<Utc>,
}

impl GpsTrace {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn consignment_id(&self) -> &ConsignmentId {
        &self.consignment_id
    }

    pub fn total_km(&self) -> f64 {
        self.total_km
    }

    pub fn planned_km(&self) -> f64 {
        self.planned_km
    }

    pub fn deviation_percent(&self) -> f64 {
        self.deviation * 100.0
    }

    pub fn travel_hours(&self) -> f64 {
        self.travel_hours
    }

    pub fn average_speed_kmh(&self) -> f64 {
        self.average_speed_kmh
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    pub fn stop_count(&self) -> u32 {
        self.stop_count
    }

    pub fn stop_minutes(&self) -> f64 {
        self.stop_minutes
    }

    pub fn speed_violations(&self) -> u32 {
        self.speed_violations
    }

    /// 0-100.
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// 0-100.
    pub fn route_efficiency(&self) -> f64 {
        self.route_efficiency
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies.len()
    }

    pub fn has_anomaly(&self, kind: AnomalyType) -> bool {
        self.anomalies.iter().any(|a| a.kind == kind)
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn was_skipped(&self) -> bool {
        self.skipped
    }

    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    pub fn validated_at(&self) -> DateTime<Utc> {
        self.validated_at
    }
}

/// Turns a raw trace into confidence, route efficiency and anomalies.
pub struct GpsValidator {
    config: GpsConfig,
    weights: EfficiencyWeights,
    patterns: Box<dyn PatternDetector>,
}

impl GpsValidator {
    pub fn new(config: GpsConfig, weights: EfficiencyWeights, patterns: Box<dyn PatternDetector>) -> Self {
        Self {
            config,
            weights,
            patterns,
        }
    }

    /// Validate the trace recorded for `consignment`.
    ///
    /// A missing trace fails with [`EngineError::TraceNotFound`] unless the
    /// caller asked to skip validation, in which case neutral scores are
    /// returned.
    pub fn validate(
        &self,
        consignment: &Consignment,
        trace: Option<&RawTrace>,
        options: ValidationOptions,
    ) -> Result<GpsTrace> {
        let planned_km = consignment.km_planned().to_f64().unwrap_or(0.0);

        if options.skip_validation {
            debug!("skipping GPS validation for {}", consignment.id());
            return Ok(self.neutral(consignment.id().clone(), planned_km));
        }

        let trace = trace.ok_or_else(|| EngineError::TraceNotFound(consignment.id().clone()))?;
        let summary = TraceSummary::from_points(&trace.points, &self.config);

        let deviation = if planned_km > 0.0 {
            (summary.total_km - planned_km).abs() / planned_km
        } else {
            0.0
        };

        let mut anomalies = self.rule_anomalies(&summary, planned_km, deviation);

        let unexpected_stops = summary.stop_count.saturating_sub(self.config.max_stops);
        let outcome = self.patterns.detect(&AnomalyRequest {
            consignment_id: consignment.id().clone(),
            route_id: consignment.route_id().clone(),
            vehicle_id: trace
                .vehicle_id
                .clone()
                .or_else(|| consignment.vehicle_id().cloned()),
            summary: summary.clone(),
            unexpected_stops,
        });
        anomalies.extend(outcome.anomalies);

        let penalty: f64 = anomalies
            .iter()
            .map(|a| a.severity.weight(&self.config.severity_weights))
            .sum();
        let mut confidence = (100.0 - penalty).clamp(0.0, 100.0);
        if outcome.used_fallback {
            confidence = confidence.min(self.config.fallback_confidence);
        }

        let route_efficiency = self.route_efficiency(&summary, deviation);
        let has_critical = anomalies.iter().any(|a| a.severity == Severity::Critical);
        let valid = !has_critical && confidence >= self.config.min_valid_confidence;

        info!(
            "GPS validated for {}: {:.1} km, confidence {:.1}, efficiency {:.1}, {} anomalies, valid={}",
            consignment.id(),
            summary.total_km,
            confidence,
            route_efficiency,
            anomalies.len(),
            valid
        );

        Ok(GpsTrace {
            id: Uuid::new_v4(),
            consignment_id: consignment.id().clone(),
            total_km: summary.total_km,
            planned_km,
            deviation,
            travel_hours: summary.travel_hours,
            average_speed_kmh: summary.average_speed_kmh,
            max_speed_kmh: summary.max_speed_kmh,
            stop_count: summary.stop_count,
            stop_minutes: summary.stop_minutes,
            speed_violations: summary.speed_violations,
            confidence,
            route_efficiency,
            anomalies,
            valid,
            skipped: false,
            used_fallback: outcome.used_fallback,
            validated_at: Utc::now(),
        })
    }

    fn neutral(&self, consignment_id: ConsignmentId, planned_km: f64) -> GpsTrace {
        GpsTrace {
            id: Uuid::new_v4(),
            consignment_id,
            total_km: planned_km,
            planned_km,
            deviation: 0.0,
            travel_hours: 0.0,
            average_speed_kmh: 0.0,
            max_speed_kmh: 0.0,
            stop_count: 0,
            stop_minutes: 0.0,
            speed_violations: 0,
            confidence: self.config.skip_confidence,
            route_efficiency: self.config.skip_efficiency,
            anomalies: Vec::new(),
            valid: true,
            skipped: true,
            used_fallback: false,
            validated_at: Utc::now(),
        }
    }

    fn rule_anomalies(&self, s: &TraceSummary, planned_km: f64, deviation: f64) -> Vec<Anomaly> {
        let cfg = &self.config;
        let mut found = Vec::new();

        // Data quality first: a broken trace makes every other number suspect.
        if s.point_count < cfg.min_points {
            found.push(Anomaly::new(
                AnomalyType::DataQuality,
                Severity::Critical,
                format!("only {} GPS points, need {}", s.point_count, cfg.min_points),
            ));
        }
        if s.out_of_order {
            found.push(Anomaly::new(
                AnomalyType::DataQuality,
                Severity::Critical,
                "timestamps are not chronological",
            ));
        }
        if s.impossible_segments > 0 {
            found.push(Anomaly::new(
                AnomalyType::DataQuality,
                Severity::Critical,
                format!(
                    "{} segments faster than {} km/h",
                    s.impossible_segments, cfg.impossible_speed_kmh
                ),
            ));
        }

        let deviation_pct = deviation * 100.0;
        if deviation_pct > cfg.route_deviation_pct {
            let severity = if deviation_pct > cfg.route_deviation_high_pct {
                Severity::High
            } else {
                Severity::Medium
            };
            found.push(Anomaly::new(
                AnomalyType::RouteChange,
                severity,
                format!(
                    "route deviation {:.1}% ({:.1} km driven vs {:.1} km planned)",
                    deviation_pct, s.total_km, planned_km
                ),
            ));
        }

        if s.max_speed_kmh > cfg.speed_limit_kmh {
            let severity = if s.max_speed_kmh > cfg.speed_high_kmh {
                Severity::High
            } else {
                Severity::Medium
            };
            found.push(Anomaly::new(
                AnomalyType::SpeedViolation,
                severity,
                format!(
                    "max speed {:.0} km/h over limit {:.0} km/h ({} violations)",
                    s.max_speed_kmh,
                    cfg.speed_limit_kmh,
                    s.speed_violations.max(1)
                ),
            ));
        }

        let long_stop = s.longest_stop_minutes > cfg.max_stop_minutes;
        if s.stop_count > cfg.max_stops || long_stop {
            let severity = if long_stop { Severity::Medium } else { Severity::Low };
            found.push(Anomaly::new(
                AnomalyType::ExcessiveStops,
                severity,
                format!(
                    "{} stops, longest {:.0} minutes",
                    s.stop_count, s.longest_stop_minutes
                ),
            ));
        }

        if planned_km > 0.0 && cfg.expected_speed_kmh > 0.0 {
            let expected_hours = planned_km / cfg.expected_speed_kmh;
            if s.travel_hours > expected_hours * cfg.time_anomaly_factor {
                found.push(Anomaly::new(
                    AnomalyType::TimeAnomaly,
                    Severity::Medium,
                    format!(
                        "travel took {:.1} h, expected {:.1} h",
                        s.travel_hours, expected_hours
                    ),
                ));
            }
        }

        for gap in &s.signal_gaps {
            found.push(Anomaly::new(
                AnomalyType::SignalLoss,
                Severity::Medium,
                format!("no signal for {:.0} minutes", gap),
            ));
        }

        found
    }

    fn route_efficiency(&self, s: &TraceSummary, deviation: f64) -> f64 {
        let route_score = (100.0 * (1.0 - deviation)).clamp(0.0, 100.0);

        let travel_minutes = s.travel_hours * 60.0;
        let stop_score = if travel_minutes > 0.0 {
            (100.0 * (1.0 - s.stop_minutes / travel_minutes)).clamp(0.0, 100.0)
        } else {
            100.0
        };

        let speed_score = if s.timed_segments > 0 {
            (100.0 * (1.0 - f64::from(s.speed_violations) / s.timed_segments as f64))
                .clamp(0.0, 100.0)
        } else {
            100.0
        };

        let w = self.weights;
        let total = w.route + w.stops + w.speed;
        if total <= 0.0 {
            return route_score;
        }
        (w.route * route_score + w.stops * stop_score + w.speed * speed_score) / total
    }
}
