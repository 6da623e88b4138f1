use crate::core::config::ReconciliationConfig;
use crate::core::consignment::Consignment;
use crate::core::error::{EngineError, Result};
use crate::core::external::call_with_timeout;
use crate::core::ids::{ConsignmentId, ProductCode, RouteId};
use crate::core::reference::{ReferenceData, VolatilityTable};
use crate::reconciliation::analysis::{Finding, VarianceAnalyzer, VarianceInput, VolumeReadings};
use crate::reconciliation::anchor::ReconciliationAnchor;
use chrono::{DateTime, Utc};
use log::{info, warn};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    Pending,
    Matched,
    VarianceDetected,
    /// Manual override: the verdict is contested.
    Disputed,
    /// Manual override: a reviewer accepted the volumes.
    Resolved,
}

/// The reconciliation verdict for one consignment.
///
/// `variance_depot_station = depot_loaded - station_received`, and on the
/// computed path the status is MATCHED exactly when its magnitude is within
/// `tolerance_litres`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreeWayReconciliation {
    id: Uuid,
    consignment_id: ConsignmentId,
    route_id: RouteId,
    product: ProductCode,
    readings: VolumeReadings,
    variance_depot_transporter: Decimal,
    variance_transporter_station: Decimal,
    variance_depot_station: Decimal,
    /// Tolerance applied, in percent of depot loaded volume.
    tolerance_pct: Decimal,
    tolerance_litres: Decimal,
    status: ReconciliationStatus,
    confidence: f64,
    risk_score: f64,
    findings: Vec<Finding>,
    recommendations: Vec<String>,
    valid: bool,
    used_fallback: bool,
    anchor_hash: Option<String>,
    override_note: Option<String>,
    reconciled_at: DateTime<Utc>,
}

impl ThreeWayReconciliation {
    pub fn id(&self) -> Uuid {
        self.id
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

    pub fn readings(&self) -> VolumeReadings {
        self.readings
    }

    pub fn variance_depot_transporter(&self) -> Decimal {
        self.variance_depot_transporter
    }

    pub fn variance_transporter_station(&self) -> Decimal {
        self.variance_transporter_station
    }

    pub fn variance_depot_station(&self) -> Decimal {
        self.variance_depot_station
    }

    pub fn tolerance_pct(&self) -> Decimal {
        self.tolerance_pct
    }

    pub fn tolerance_litres(&self) -> Decimal {
        self.tolerance_litres
    }

    pub fn status(&self) -> ReconciliationStatus {
        self.status
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn risk_score(&self) -> f64 {
        self.risk_score
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    /// Whether a claim may be built on this reconciliation.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn used_fallback(&self) -> bool {
        self.used_fallback
    }

    pub fn anchor_hash(&self) -> Option<&str> {
        self.anchor_hash.as_deref()
    }

    pub fn override_note(&self) -> Option<&str> {
        self.override_note.as_deref()
    }

    pub fn reconciled_at(&self) -> DateTime<Utc> {
        self.reconciled_at
    }

    /// Contest the computed verdict. The reconciliation becomes invalid.
    pub fn dispute(&mut self, reason: impl Into<String>) -> Result<()> {
        self.override_to(ReconciliationStatus::Disputed, false, reason.into())
    }

    /// Accept the volumes after review. The reconciliation becomes valid.
    pub fn resolve(&mut self, note: impl Into<String>) -> Result<()> {
        self.override_to(ReconciliationStatus::Resolved, true, note.into())
    }

    fn override_to(&mut self, to: ReconciliationStatus, valid: bool, note: String) -> Result<()> {
        match self.status {
            ReconciliationStatus::Matched | ReconciliationStatus::VarianceDetected => {
                info!(
                    "reconciliation for {} overridden {:?} -> {:?}: {}",
                    self.consignment_id, self.status, to, note
                );
                self.status = to;
                self.valid = valid;
                self.override_note = Some(note);
                Ok(())
            }
            from => Err(EngineError::InvalidTransition {
                from: format!("{:?}", from),
                to: format!("{:?}", to),
            }),
        }
    }
}

/// Reconciliation risk: variance-over-tolerance plus confidence deficit,
/// capped at 100.
pub fn reconciliation_risk(variance: Decimal, tolerance: Decimal, confidence: f64) -> f64 {
    let ratio = if tolerance > Decimal::ZERO {
        (variance.abs() / tolerance).to_f64().unwrap_or(f64::MAX)
    } else if variance.is_zero() {
        0.0
    } else {
        f64::MAX
    };
    (50.0 * ratio + 0.5 * (100.0 - confidence)).clamp(0.0, 100.0)
}

/// Compares depot, transporter and station volumes under a dynamic tolerance.
pub struct ThreeWayReconciler {
    config: ReconciliationConfig,
    volatility: VolatilityTable,
    analyzer: Box<dyn VarianceAnalyzer>,
    anchor: Option<Arc<dyn ReconciliationAnchor>>,
    anchor_timeout: Duration,
}

impl ThreeWayReconciler {
    pub fn new(
        config: ReconciliationConfig,
        volatility: VolatilityTable,
        analyzer: Box<dyn VarianceAnalyzer>,
    ) -> Self {
        Self {
            config,
            volatility,
            analyzer,
            anchor: None,
            anchor_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_anchor(mut self, anchor: Arc<dyn ReconciliationAnchor>, timeout: Duration) -> Self {
        self.anchor = Some(anchor);
        self.anchor_timeout = timeout;
        self
    }

    /// `base * route complexity * product volatility`, in percent.
    pub fn tolerance_pct(&self, consignment: &Consignment, refs: &ReferenceData) -> Decimal {
        self.config.base_tolerance_pct
            * refs.route_complexity(consignment.route_id())
            * self.volatility.factor(consignment.product())
    }

    pub fn reconcile(
        &self,
        consignment: &Consignment,
        refs: &ReferenceData,
    ) -> Result<ThreeWayReconciliation> {
        let depot = consignment.litres_loaded();
        if depot <= Decimal::ZERO {
            return Err(EngineError::InvalidBaseVolume {
                consignment: consignment.id().clone(),
                depot_loaded: depot,
            });
        }

        let station = consignment.litres_received();
        // An unrecorded transporter reading is compared as if it matched the depot.
        let transporter = if consignment.litres_transported() > Decimal::ZERO {
            consignment.litres_transported()
        } else {
            depot
        };
        let readings = VolumeReadings {
            depot_loaded: depot,
            transporter_received: consignment.litres_transported(),
            station_received: station,
        };

        let variance_depot_transporter = depot - transporter;
        let variance_transporter_station = transporter - station;
        let variance_depot_station = depot - station;

        let tolerance_pct = self.tolerance_pct(consignment, refs);
        let tolerance_litres = depot * tolerance_pct / dec!(100);

        let status = if variance_depot_station.abs() <= tolerance_litres {
            ReconciliationStatus::Matched
        } else {
            ReconciliationStatus::VarianceDetected
        };

        let analysis = self.analyzer.analyze(&VarianceInput {
            consignment_id: consignment.id().clone(),
            route_id: consignment.route_id().clone(),
            product: consignment.product().clone(),
            readings,
            baseline_pct: refs.variance_baseline(consignment.route_id()),
        });
        let confidence = analysis.confidence;
        let valid =
            status == ReconciliationStatus::Matched && confidence >= self.config.confidence_floor;
        let risk_score = reconciliation_risk(variance_depot_station, tolerance_litres, confidence);

        let mut record = ThreeWayReconciliation {
            id: Uuid::new_v4(),
            consignment_id: consignment.id().clone(),
            route_id: consignment.route_id().clone(),
            product: consignment.product().clone(),
            readings,
            variance_depot_transporter,
            variance_transporter_station,
            variance_depot_station,
            tolerance_pct,
            tolerance_litres,
            status,
            confidence,
            risk_score,
            findings: analysis.findings,
            recommendations: Vec::new(),
            valid,
            used_fallback: analysis.used_fallback,
            anchor_hash: None,
            override_note: None,
            reconciled_at: Utc::now(),
        };
        record.recommendations = self.recommendations(&record);
        record.anchor_hash = self.anchor_record(&record);

        info!(
            "reconciled {}: variance {} L vs tolerance {} L ({}%), {:?}, confidence {:.1}, risk {:.1}",
            record.consignment_id,
            variance_depot_station,
            tolerance_litres.round_dp(2),
            tolerance_pct,
            status,
            confidence,
            risk_score
        );
        Ok(record)
    }

    fn recommendations(&self, record: &ThreeWayReconciliation) -> Vec<String> {
        let mut out = Vec::new();
        if record.status == ReconciliationStatus::VarianceDetected {
            out.push("Review loading and unloading procedures".to_string());
        }
        if record.variance_depot_station > self.config.investigate_loss_litres {
            out.push("Investigate potential fuel loss during transport".to_string());
        }
        if record.confidence < self.config.verify_confidence {
            out.push("Consider additional verification steps".to_string());
        }
        out
    }

    fn anchor_record(&self, record: &ThreeWayReconciliation) -> Option<String> {
        let anchor = Arc::clone(self.anchor.as_ref()?);
        let owned = record.clone();
        let name = anchor.name().to_string();
        match call_with_timeout(&name, self.anchor_timeout, move || anchor.anchor(&owned)) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(
                    "anchor {} failed for {}: {}; continuing without hash",
                    name, record.consignment_id, e
                );
                None
            }
        }
    }
}
