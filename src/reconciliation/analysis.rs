//! Variance analysis strategies.
//!
//! The numeric tolerance check decides MATCHED vs VARIANCE_DETECTED. Analysis
//! runs alongside it and only moves confidence, so a delivery can be within
//! tolerance and still fall below the auto-approval floor.

use crate::core::config::{ReconciliationConfig, StrategyKind};
use crate::core::error::ServiceError;
use crate::core::external::call_with_timeout;
use crate::core::ids::{ConsignmentId, ProductCode, RouteId};
use log::{debug, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// The three volume readings of a delivery, in litres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReadings {
    pub depot_loaded: Decimal,
    pub transporter_received: Decimal,
    pub station_received: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    /// Loss well above what this route usually shows.
    BaselineDeviation,
    /// Loss between the truck and the station tanks.
    UnloadingLoss,
    /// The station received more than the depot loaded.
    VolumeGain,
    /// The transporter never recorded a reading.
    MissingReading,
    /// Reported by an external variance service.
    ServiceReported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub description: String,
}

impl Finding {
    pub fn new(kind: FindingKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VarianceInput {
    pub consignment_id: ConsignmentId,
    pub route_id: RouteId,
    pub product: ProductCode,
    pub readings: VolumeReadings,
    /// Historical depot-to-station loss for the route, in percent.
    pub baseline_pct: Option<Decimal>,
}

/// Confidence and findings of one analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceAnalysis {
    /// 0-100.
    pub confidence: f64,
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub used_fallback: bool,
}

pub trait VarianceAnalyzer: Send + Sync {
    fn analyze(&self, input: &VarianceInput) -> VarianceAnalysis;
}

/// An external variance-prediction service.
pub trait VarianceService: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(&self, input: &VarianceInput) -> Result<VarianceAnalysis, ServiceError>;
}

/// Compares a delivery against its route history with fixed rules.
#[derive(Debug, Clone)]
pub struct RuleBasedAnalyzer {
    config: ReconciliationConfig,
}

impl RuleBasedAnalyzer {
    pub fn new(config: ReconciliationConfig) -> Self {
        Self { config }
    }
}

fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        part / whole * dec!(100)
    }
}

impl VarianceAnalyzer for RuleBasedAnalyzer {
    fn analyze(&self, input: &VarianceInput) -> VarianceAnalysis {
        let r = input.readings;
        let mut findings = Vec::new();

        let loss_pct = percent_of(r.depot_loaded - r.station_received, r.depot_loaded);
        let baseline = input.baseline_pct.unwrap_or(self.config.default_baseline_pct);
        let ceiling = baseline * self.config.baseline_factor;
        if loss_pct > ceiling {
            findings.push(Finding::new(
                FindingKind::BaselineDeviation,
                format!(
                    "depot-to-station loss {:.2}% exceeds {:.2}% ({}x route baseline {:.2}%)",
                    loss_pct, ceiling, self.config.baseline_factor, baseline
                ),
            ));
        }

        if r.transporter_received <= Decimal::ZERO {
            findings.push(Finding::new(
                FindingKind::MissingReading,
                "no transporter reading recorded",
            ));
        } else {
            let unloading_pct =
                percent_of(r.transporter_received - r.station_received, r.transporter_received);
            if unloading_pct > self.config.unloading_loss_pct {
                findings.push(Finding::new(
                    FindingKind::UnloadingLoss,
                    format!("transporter-to-station loss {:.2}%", unloading_pct),
                ));
            }
        }

        if r.station_received > r.depot_loaded {
            findings.push(Finding::new(
                FindingKind::VolumeGain,
                format!(
                    "station received {} L more than the depot loaded",
                    r.station_received - r.depot_loaded
                ),
            ));
        }

        let confidence =
            (100.0 - self.config.finding_penalty * findings.len() as f64).clamp(0.0, 100.0);
        debug!(
            "rule-based variance analysis for {}: confidence {:.1}, {} findings",
            input.consignment_id,
            confidence,
            findings.len()
        );
        VarianceAnalysis {
            confidence,
            findings,
            used_fallback: false,
        }
    }
}

/// Asks an external service, falling back to the rules with capped
/// confidence when it is slow or down.
pub struct EnhancedAnalyzer {
    service: Arc<dyn VarianceService>,
    fallback: RuleBasedAnalyzer,
    fallback_confidence: f64,
    timeout: Duration,
}

impl EnhancedAnalyzer {
    pub fn new(
        service: Arc<dyn VarianceService>,
        fallback: RuleBasedAnalyzer,
        fallback_confidence: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            fallback,
            fallback_confidence,
            timeout,
        }
    }
}

impl VarianceAnalyzer for EnhancedAnalyzer {
    fn analyze(&self, input: &VarianceInput) -> VarianceAnalysis {
        let service = Arc::clone(&self.service);
        let owned = input.clone();
        let name = service.name().to_string();
        match call_with_timeout(&name, self.timeout, move || service.analyze(&owned)) {
            Ok(mut analysis) => {
                analysis.confidence = analysis.confidence.clamp(0.0, 100.0);
                analysis.used_fallback = false;
                analysis
            }
            Err(e) => {
                warn!(
                    "variance service {} failed for {}: {}; using rule-based analysis",
                    name, input.consignment_id, e
                );
                let mut analysis = self.fallback.analyze(input);
                analysis.confidence = analysis.confidence.min(self.fallback_confidence);
                analysis.used_fallback = true;
                analysis
            }
        }
    }
}

/// Pick the analyzer the configuration asks for.
pub fn variance_analyzer(
    kind: StrategyKind,
    config: &ReconciliationConfig,
    service: Option<Arc<dyn VarianceService>>,
    timeout: Duration,
) -> Box<dyn VarianceAnalyzer> {
    let rules = RuleBasedAnalyzer::new(config.clone());
    match (kind, service) {
        (StrategyKind::Enhanced, Some(service)) => Box::new(EnhancedAnalyzer::new(
            service,
            rules,
            config.fallback_confidence,
            timeout,
        )),
        (StrategyKind::Enhanced, None) => {
            warn!("enhanced variance analysis requested but no service configured");
            Box::new(rules)
        }
        (StrategyKind::RuleBased, _) => Box::new(rules),
    }
}
