//! Route anomaly detection strategies.
//!
//! The deterministic rules always run inside the validator. On top of them a
//! [`PatternDetector`] looks for suspicious driving patterns, either with the
//! built-in rules or by asking an external anomaly service that is allowed to
//! fail.

use crate::core::config::{GpsConfig, SeverityWeights, StrategyKind};
use crate::core::error::ServiceError;
use crate::core::external::call_with_timeout;
use crate::core::ids::{ConsignmentId, RouteId, VehicleId};
use crate::gps::trace::TraceSummary;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyType {
    RouteChange,
    SpeedViolation,
    ExcessiveStops,
    TimeAnomaly,
    SignalLoss,
    DataQuality,
    SuspiciousPattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Confidence penalty for one anomaly of this severity.
    pub fn weight(&self, weights: &SeverityWeights) -> f64 {
        match self {
            Severity::Low => weights.low,
            Severity::Medium => weights.medium,
            Severity::High => weights.high,
            Severity::Critical => weights.critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyType,
    pub severity: Severity,
    pub description: String,
}

impl Anomaly {
    pub fn new(kind: AnomalyType, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}: {}", self.kind, self.severity, self.description)
    }
}

/// What the pattern detectors get to look at.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRequest {
    pub consignment_id: ConsignmentId,
    pub route_id: RouteId,
    pub vehicle_id: Option<VehicleId>,
    pub summary: TraceSummary,
    /// Stops beyond the number the route allows.
    pub unexpected_stops: u32,
}

/// An external route-anomaly service.
pub trait RouteAnomalyService: Send + Sync {
    fn name(&self) -> &str;

    fn detect(&self, request: &AnomalyRequest) -> Result<Vec<Anomaly>, ServiceError>;
}

/// Result of a pattern pass.
#[derive(Debug, Clone, Default)]
pub struct PatternOutcome {
    pub anomalies: Vec<Anomaly>,
    /// The enhanced service failed and the rules answered instead.
    pub used_fallback: bool,
}

pub trait PatternDetector: Send + Sync {
    fn detect(&self, request: &AnomalyRequest) -> PatternOutcome;
}

/// Deterministic pattern rules.
#[derive(Debug, Clone)]
pub struct RuleBasedPatterns {
    speed_violations: u32,
    unexpected_stops: u32,
}

impl RuleBasedPatterns {
    pub fn new(config: &GpsConfig) -> Self {
        Self {
            speed_violations: config.pattern_speed_violations,
            unexpected_stops: config.pattern_unexpected_stops,
        }
    }

    pub fn patterns(&self, request: &AnomalyRequest) -> Vec<Anomaly> {
        let mut found = Vec::new();
        if request.summary.speed_violations > self.speed_violations {
            found.push(Anomaly::new(
                AnomalyType::SuspiciousPattern,
                Severity::Low,
                format!(
                    "multiple speed violations detected ({})",
                    request.summary.speed_violations
                ),
            ));
        }
        if request.unexpected_stops > self.unexpected_stops {
            found.push(Anomaly::new(
                AnomalyType::SuspiciousPattern,
                Severity::Low,
                format!("excessive unscheduled stops ({})", request.unexpected_stops),
            ));
        }
        found
    }
}

impl PatternDetector for RuleBasedPatterns {
    fn detect(&self, request: &AnomalyRequest) -> PatternOutcome {
        PatternOutcome {
            anomalies: self.patterns(request),
            used_fallback: false,
        }
    }
}

/// Asks an external service, falling back to the rules on error or timeout.
pub struct EnhancedPatterns {
    service: Arc<dyn RouteAnomalyService>,
    fallback: RuleBasedPatterns,
    timeout: Duration,
}

impl EnhancedPatterns {
    pub fn new(
        service: Arc<dyn RouteAnomalyService>,
        fallback: RuleBasedPatterns,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            fallback,
            timeout,
        }
    }
}

impl PatternDetector for EnhancedPatterns {
    fn detect(&self, request: &AnomalyRequest) -> PatternOutcome {
        let service = Arc::clone(&self.service);
        let owned = request.clone();
        let name = service.name().to_string();
        match call_with_timeout(&name, self.timeout, move || service.detect(&owned)) {
            Ok(anomalies) => {
                debug!(
                    "{} reported {} pattern anomalies for {}",
                    name,
                    anomalies.len(),
                    request.consignment_id
                );
                PatternOutcome {
                    anomalies,
                    used_fallback: false,
                }
            }
            Err(e) => {
                warn!(
                    "anomaly service {} failed for {}: {}; using rule-based detection",
                    name, request.consignment_id, e
                );
                PatternOutcome {
                    anomalies: self.fallback.patterns(request),
                    used_fallback: true,
                }
            }
        }
    }
}

/// Pick the pattern detector the configuration asks for. Enhanced detection
/// without a configured service degrades to the rules.
pub fn pattern_detector(
    kind: StrategyKind,
    config: &GpsConfig,
    service: Option<Arc<dyn RouteAnomalyService>>,
    timeout: Duration,
) -> Box<dyn PatternDetector> {
    let rules = RuleBasedPatterns::new(config);
    match (kind, service) {
        (StrategyKind::Enhanced, Some(service)) => {
            Box::new(EnhancedPatterns::new(service, rules, timeout))
        }
        (StrategyKind::Enhanced, None) => {
            warn!("enhanced anomaly detection requested but no service configured");
            Box::new(rules)
        }
        (StrategyKind::RuleBased, _) => Box::new(rules),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct StaticService(Vec<Anomaly>);

    impl RouteAnomalyService for StaticService {
        fn name(&self) -> &str {
            "static"
        }

        fn detect(&self, _request: &AnomalyRequest) -> Result<Vec<Anomaly>, ServiceError> {
            Ok(self.0.clone())
        }
    }

    struct SlowService;

    impl RouteAnomalyService for SlowService {
        fn name(&self) -> &str {
            "slow"
        }

        fn detect(&self, _request: &AnomalyRequest) -> Result<Vec<Anomaly>, ServiceError> {
            thread::sleep(Duration::from_millis(300));
            Ok(vec![])
        }
    }

    fn request(violations: u32, unexpected_stops: u32) -> AnomalyRequest {
        AnomalyRequest {
            consignment_id: ConsignmentId::new("C1"),
            route_id: RouteId::new("R1"),
            vehicle_id: None,
            summary: TraceSummary {
                speed_violations: violations,
                ..TraceSummary::default()
            },
            unexpected_stops,
        }
    }

    #[test]
    fn test_rules_flag_repeat_speeding() {
        let rules = RuleBasedPatterns::new(&GpsConfig::default());
        assert!(rules.detect(&request(5, 0)).anomalies.is_empty());
        let outcome = rules.detect(&request(6, 4));
        assert_eq!(outcome.anomalies.len(), 2);
        assert!(outcome
            .anomalies
            .iter()
            .all(|a| a.kind == AnomalyType::SuspiciousPattern));
    }

    #[test]
    fn test_enhanced_uses_service_answer() {
        let service = Arc::new(StaticService(vec![Anomaly::new(
            AnomalyType::SuspiciousPattern,
            Severity::High,
            "detour vs historical baseline",
        )]));
        let detector = pattern_detector(
            StrategyKind::Enhanced,
            &GpsConfig::default(),
            Some(service),
            Duration::from_secs(1),
        );
        let outcome = detector.detect(&request(0, 0));
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.anomalies[0].severity, Severity::High);
    }

    #[test]
    fn test_enhanced_falls_back_on_timeout() {
        let detector = pattern_detector(
            StrategyKind::Enhanced,
            &GpsConfig::default(),
            Some(Arc::new(SlowService)),
            Duration::from_millis(20),
        );
        let outcome = detector.detect(&request(7, 0));
        assert!(outcome.used_fallback);
        assert_eq!(outcome.anomalies.len(), 1);
    }

    #[test]
    fn test_severity_ordering_and_weights() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(Severity::Medium.weight(&SeverityWeights::default()), 10.0);
    }
}
