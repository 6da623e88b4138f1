//! Engine configuration.
//!
//! Every regulator-controlled constant lives here so that a tariff or
//! threshold change is a config release, not a code change. Each section
//! defaults independently, so a file only needs the keys it overrides.

use crate::core::error::{EngineError, Result};
use crate::core::reference::{TariffTable, VolatilityTable};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the path of a JSON config file.
pub const CONFIG_PATH_ENV: &str = "CLAIM_ENGINE_CONFIG";

/// Environment variable overriding `pipeline.workers`.
pub const WORKERS_ENV: &str = "CLAIM_ENGINE_WORKERS";

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Version tag of the regulator parameter set.
    pub version: String,
    pub gps: GpsConfig,
    pub efficiency: EfficiencyWeights,
    pub reconciliation: ReconciliationConfig,
    pub tariffs: TariffTable,
    pub product_volatility: VolatilityTable,
    pub bonuses: BonusConfig,
    pub lifecycle: LifecycleConfig,
    pub priority: PriorityConfig,
    pub risk: RiskWeights,
    pub evidence: EvidenceWeights,
    pub settlement: SettlementConfig,
    pub gl: GlAccounts,
    pub pipeline: PipelineConfig,
    pub strategy: StrategyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "2025.1".to_string(),
            gps: GpsConfig::default(),
            efficiency: EfficiencyWeights::default(),
            reconciliation: ReconciliationConfig::default(),
            tariffs: TariffTable::default(),
            product_volatility: VolatilityTable::default(),
            bonuses: BonusConfig::default(),
            lifecycle: LifecycleConfig::default(),
            priority: PriorityConfig::default(),
            risk: RiskWeights::default(),
            evidence: EvidenceWeights::default(),
            settlement: SettlementConfig::default(),
            gl: GlAccounts::default(),
            pipeline: PipelineConfig::default(),
            strategy: StrategyConfig::default(),
        }
    }
}

/// GPS trace validation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Route deviation (percent of planned distance) that raises a route change.
    pub route_deviation_pct: f64,
    /// Route deviation above which the route change is HIGH severity.
    pub route_deviation_high_pct: f64,
    pub speed_limit_kmh: f64,
    /// Max speed above which a speed violation is HIGH severity.
    pub speed_high_kmh: f64,
    /// Segment speed treated as a GPS glitch rather than driving.
    pub impossible_speed_kmh: f64,
    pub max_stops: u32,
    pub max_stop_minutes: f64,
    /// Average speed used to derive the expected travel time.
    pub expected_speed_kmh: f64,
    /// Actual time over expected time that raises a time anomaly.
    pub time_anomaly_factor: f64,
    /// Radius within which consecutive points count as the same dwell.
    pub stop_radius_m: f64,
    /// Minimum dwell length counted as a stop.
    pub min_stop_minutes: f64,
    /// Gap between consecutive points that counts as signal loss.
    pub signal_gap_minutes: f64,
    pub min_points: usize,
    pub severity_weights: SeverityWeights,
    /// A trace is valid only at or above this confidence.
    pub min_valid_confidence: f64,
    /// Neutral scores returned when validation is skipped.
    pub skip_confidence: f64,
    pub skip_efficiency: f64,
    /// Fallback pattern rules of the anomaly service.
    pub pattern_speed_violations: u32,
    pub pattern_unexpected_stops: u32,
    /// Confidence cap applied when the enhanced detector falls back.
    pub fallback_confidence: f64,
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            route_deviation_pct: 10.0,
            route_deviation_high_pct: 25.0,
            speed_limit_kmh: 90.0,
            speed_high_kmh: 120.0,
            impossible_speed_kmh: 200.0,
            max_stops: 3,
            max_stop_minutes: 60.0,
            expected_speed_kmh: 50.0,
            time_anomaly_factor: 1.5,
            stop_radius_m: 100.0,
            min_stop_minutes: 10.0,
            signal_gap_minutes: 15.0,
            min_points: 10,
            severity_weights: SeverityWeights::default(),
            min_valid_confidence: 60.0,
            skip_confidence: 50.0,
            skip_efficiency: 75.0,
            pattern_speed_violations: 5,
            pattern_unexpected_stops: 3,
            fallback_confidence: 90.0,
        }
    }
}

/// Confidence penalty per anomaly, by severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            low: 5.0,
            medium: 10.0,
            high: 20.0,
            critical: 40.0,
        }
    }
}

/// Weights of the route-efficiency components. Normalised on use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EfficiencyWeights {
    pub route: f64,
    pub stops: f64,
    pub speed: f64,
}

impl Default for EfficiencyWeights {
    fn default() -> Self {
        Self {
            route: 0.5,
            stops: 0.25,
            speed: 0.25,
        }
    }
}

/// Three-way reconciliation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Base tolerance in percent of depot loaded volume.
    pub base_tolerance_pct: Decimal,
    /// Minimum confidence for a reconciliation to be valid.
    pub confidence_floor: f64,
    /// Confidence cap applied when the enhanced analyzer falls back.
    pub fallback_confidence: f64,
    /// Expected depot-to-station loss for routes with no history, in percent.
    pub default_baseline_pct: Decimal,
    /// Variance above `baseline * baseline_factor` is suspicious.
    pub baseline_factor: Decimal,
    /// Transporter-to-station loss above this percent is flagged.
    pub unloading_loss_pct: Decimal,
    /// Confidence deducted per rule-based finding.
    pub finding_penalty: f64,
    /// Depot-to-station loss in litres that warrants an investigation.
    pub investigate_loss_litres: Decimal,
    /// Below this confidence extra verification is recommended.
    pub verify_confidence: f64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            base_tolerance_pct: dec!(2),
            confidence_floor: 85.0,
            fallback_confidence: 85.0,
            default_baseline_pct: dec!(0.5),
            baseline_factor: dec!(3),
            unloading_loss_pct: dec!(0.5),
            finding_penalty: 10.0,
            investigate_loss_litres: dec!(100),
            verify_confidence: 90.0,
        }
    }
}

/// Bonus thresholds and rates of the claim calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusConfig {
    pub efficiency_threshold: Decimal,
    pub efficiency_rate: Decimal,
    /// Points above threshold at which the full efficiency rate is paid.
    pub efficiency_span: Decimal,
    pub compliance_threshold: Decimal,
    pub compliance_rate: Decimal,
    pub compliance_span: Decimal,
    /// Compliance score deductions.
    pub compliance_anomaly_penalty: f64,
    pub compliance_speed_penalty: f64,
    pub compliance_time_penalty: f64,
}

impl Default for BonusConfig {
    fn default() -> Self {
        Self {
            efficiency_threshold: dec!(90),
            efficiency_rate: dec!(0.10),
            efficiency_span: dec!(10),
            compliance_threshold: dec!(95),
            compliance_rate: dec!(0.05),
            compliance_span: dec!(5),
            compliance_anomaly_penalty: 5.0,
            compliance_speed_penalty: 3.0,
            compliance_time_penalty: 10.0,
        }
    }
}

/// What happens to claims eligible for automatic submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoSubmitMode {
    /// Advance straight to SUBMITTED.
    Automatic,
    /// Stop at READY_TO_SUBMIT with URGENT priority for a human to send.
    PriorityHint,
}

/// Lifecycle decision thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub min_evidence: f64,
    pub auto_submit_confidence: f64,
    pub auto_submit_evidence: f64,
    pub ready_confidence: f64,
    pub ready_evidence: f64,
    pub auto_submit: AutoSubmitMode,
    /// Follow-up delay in days by priority.
    pub follow_up_days: FollowUpDays,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_evidence: 60.0,
            auto_submit_confidence: 95.0,
            auto_submit_evidence: 90.0,
            ready_confidence: 85.0,
            ready_evidence: 75.0,
            auto_submit: AutoSubmitMode::Automatic,
            follow_up_days: FollowUpDays::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowUpDays {
    pub urgent: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl Default for FollowUpDays {
    fn default() -> Self {
        Self {
            urgent: 1,
            high: 3,
            medium: 7,
            low: 14,
        }
    }
}

/// Submission priority thresholds over claim amount and quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    pub urgent_amount: Decimal,
    pub urgent_quality: f64,
    pub high_amount: Decimal,
    pub high_quality: f64,
    pub medium_quality: f64,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            urgent_amount: dec!(10000),
            urgent_quality: 90.0,
            high_amount: dec!(5000),
            high_quality: 80.0,
            medium_quality: 70.0,
        }
    }
}

/// Weights of the claim risk score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub per_anomaly: f64,
    pub gps_deficit: f64,
    pub reconciliation_invalid: f64,
    pub reconciliation_deficit: f64,
    pub evidence_deficit: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            per_anomaly: 10.0,
            gps_deficit: 0.5,
            reconciliation_invalid: 30.0,
            reconciliation_deficit: 0.3,
            evidence_deficit: 0.2,
        }
    }
}

/// Points each piece of evidence contributes to the evidence score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceWeights {
    pub waybill: f64,
    pub gps_trace: f64,
    pub goods_received_note: f64,
    pub tank_dips: f64,
    pub weighbridge: f64,
    pub anchor_hash: f64,
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            waybill: 20.0,
            gps_trace: 25.0,
            goods_received_note: 20.0,
            tank_dips: 15.0,
            weighbridge: 10.0,
            anchor_hash: 10.0,
        }
    }
}

/// Settlement variance bands, grace period and adjustment estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub high_variance_pct: Decimal,
    pub medium_variance_pct: Decimal,
    pub low_variance_pct: Decimal,
    /// Variance percent above which a claim needs action.
    pub action_variance_pct: Decimal,
    /// Days after window end a settlement still counts as on time.
    pub grace_days: i64,
    pub estimate_adjustments: bool,
    pub adjustments: AdjustmentRates,
    /// Largest bank payment variance, in percent of net settlement, still
    /// treated as reconciled.
    pub payment_tolerance_pct: Decimal,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            high_variance_pct: dec!(20),
            medium_variance_pct: dec!(10),
            low_variance_pct: dec!(5),
            action_variance_pct: dec!(10),
            grace_days: 30,
            estimate_adjustments: true,
            adjustments: AdjustmentRates::default(),
            payment_tolerance_pct: dec!(0.1),
        }
    }
}

/// Penalty and bonus estimation rates, in percent of claim total.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentRates {
    pub quality_floor: f64,
    /// Penalty percent per quality point below the floor.
    pub quality_penalty_per_point: Decimal,
    pub gps_floor: f64,
    pub gps_penalty_pct: Decimal,
    pub quality_bonus_at: f64,
    pub quality_bonus_pct: Decimal,
    pub gps_bonus_at: f64,
    pub gps_bonus_pct: Decimal,
    pub reconciled_bonus_pct: Decimal,
}

impl Default for AdjustmentRates {
    fn default() -> Self {
        Self {
            quality_floor: 80.0,
            quality_penalty_per_point: dec!(0.1),
            gps_floor: 80.0,
            gps_penalty_pct: dec!(1),
            quality_bonus_at: 95.0,
            quality_bonus_pct: dec!(0.5),
            gps_bonus_at: 95.0,
            gps_bonus_pct: dec!(0.2),
            reconciled_bonus_pct: dec!(0.3),
        }
    }
}

/// General ledger account codes for journal payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlAccounts {
    pub cash: String,
    pub receivable: String,
    pub uppf_income: String,
    pub penalties: String,
    pub other_income: String,
    /// Suspense account for bank receipts that differ from the settlement.
    pub payment_variance: String,
}

impl Default for GlAccounts {
    fn default() -> Self {
        Self {
            cash: "1100".to_string(),
            receivable: "1250".to_string(),
            uppf_income: "4200".to_string(),
            penalties: "6800".to_string(),
            other_income: "4500".to_string(),
            payment_variance: "1190".to_string(),
        }
    }
}

/// Worker pool and external-call limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    pub anomaly_timeout_ms: u64,
    pub variance_timeout_ms: u64,
    pub anchor_timeout_ms: u64,
    pub regulator_timeout_ms: u64,
    /// Days a SUBMITTED claim may wait for a regulator outcome.
    pub submission_sla_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            anomaly_timeout_ms: 2_000,
            variance_timeout_ms: 2_000,
            anchor_timeout_ms: 2_000,
            regulator_timeout_ms: 10_000,
            submission_sla_days: 21,
        }
    }
}

impl PipelineConfig {
    pub fn anomaly_timeout(&self) -> Duration {
        Duration::from_millis(self.anomaly_timeout_ms)
    }

    pub fn variance_timeout(&self) -> Duration {
        Duration::from_millis(self.variance_timeout_ms)
    }

    pub fn anchor_timeout(&self) -> Duration {
        Duration::from_millis(self.anchor_timeout_ms)
    }

    pub fn regulator_timeout(&self) -> Duration {
        Duration::from_millis(self.regulator_timeout_ms)
    }
}

/// Which implementation backs each pluggable stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RuleBased,
    Enhanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub gps_anomaly: StrategyKind,
    pub variance_analysis: StrategyKind,
    /// Attach a digest anchor to every reconciliation.
    pub anchor_reconciliations: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            gps_anomaly: StrategyKind::RuleBased,
            variance_analysis: StrategyKind::RuleBased,
            anchor_reconciliations: false,
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&content).map_err(|e| {
            EngineError::Config(format!(
                "failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `CLAIM_ENGINE_CONFIG`, or defaults, then
    /// apply environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };

        if let Ok(workers) = std::env::var(WORKERS_ENV) {
            config.pipeline.workers = workers.parse().map_err(|_| {
                EngineError::Config(format!("{} must be a number, got {:?}", WORKERS_ENV, workers))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject parameter sets no stage can run with.
    pub fn validate(&self) -> Result<()> {
        self.tariffs.validate()?;
        self.product_volatility.validate()?;

        if self.reconciliation.base_tolerance_pct <= Decimal::ZERO {
            return Err(EngineError::Config(
                "reconciliation.base_tolerance_pct must be positive".into(),
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(EngineError::Config("pipeline.workers must be at least 1".into()));
        }
        if self.gps.min_points < 2 {
            return Err(EngineError::Config("gps.min_points must be at least 2".into()));
        }
        let w = self.efficiency;
        if w.route < 0.0 || w.stops < 0.0 || w.speed < 0.0 || w.route + w.stops + w.speed <= 0.0 {
            return Err(EngineError::Config(
                "efficiency weights must be non-negative and not all zero".into(),
            ));
        }
        if self.bonuses.efficiency_span <= Decimal::ZERO || self.bonuses.compliance_span <= Decimal::ZERO {
            return Err(EngineError::Config("bonus spans must be positive".into()));
        }
        let s = &self.settlement;
        if !(s.high_variance_pct >= s.medium_variance_pct && s.medium_variance_pct >= s.low_variance_pct) {
            return Err(EngineError::Config(
                "settlement variance bands must be ordered high >= medium >= low".into(),
            ));
        }
        if s.payment_tolerance_pct < Decimal::ZERO {
            return Err(EngineError::Config("settlement.payment_tolerance_pct must not be negative".into()));
        }
        if s.grace_days < 0 || self.pipeline.submission_sla_days < 0 {
            return Err(EngineError::Config("day counts must not be negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconciliation.base_tolerance_pct, dec!(2));
        assert_eq!(config.lifecycle.auto_submit, AutoSubmitMode::Automatic);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "version": "2025.2",
            "lifecycle": { "auto_submit": "priority_hint" },
            "pipeline": { "workers": 8 }
        }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.version, "2025.2");
        assert_eq!(config.lifecycle.auto_submit, AutoSubmitMode::PriorityHint);
        assert_eq!(config.lifecycle.min_evidence, 60.0);
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.gps.speed_limit_kmh, 90.0);
    }

    #[test]
    fn test_zero_tolerance_rejected() {
        let mut config = EngineConfig::default();
        config.reconciliation.base_tolerance_pct = Decimal::ZERO;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_negative_payment_tolerance_rejected() {
        let mut config = EngineConfig::default();
        assert_eq!(config.settlement.payment_tolerance_pct, dec!(0.1));
        config.settlement.payment_tolerance_pct = dec!(-0.1);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = EngineConfig::default();
        config.pipeline.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, config.version);
        assert_eq!(back.settlement.grace_days, 30);
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let path = std::env::temp_dir().join(format!("claim-engine-bad-{}.json", std::process::id()));
        std::fs::write(&path, "{ not json").unwrap();
        let result = EngineConfig::from_file(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
