use crate::claims::claim::{Claim, ClaimStatus, Priority};
use crate::core::config::BonusConfig;
use crate::core::consignment::Consignment;
use crate::core::equalisation::EqualisationPoint;
use crate::core::error::{EngineError, Result};
use crate::core::ids::{ClaimId, WindowId};
use crate::core::reference::TariffTable;
use crate::gps::anomaly::AnomalyType;
use crate::gps::validator::GpsTrace;
use crate::reconciliation::three_way::ThreeWayReconciliation;
use chrono::Utc;
use log::debug;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Round a money amount to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Bring a 0-100 score into money arithmetic at two decimal places.
pub fn score_to_decimal(score: f64) -> Decimal {
    Decimal::from_f64(score)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .unwrap_or(Decimal::ZERO)
}

/// `max(0, km_actual - km_threshold)`.
pub fn km_beyond_equalisation(km_actual: Decimal, km_threshold: Decimal) -> Decimal {
    (km_actual - km_threshold).max(Decimal::ZERO)
}

/// The monetary breakdown of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimAmounts {
    pub base_amount: Decimal,
    pub route_efficiency_bonus: Decimal,
    pub compliance_bonus: Decimal,
    pub total_amount: Decimal,
}

/// Prices a delivery from its equalisation point, GPS trace and
/// reconciliation.
#[derive(Debug, Clone)]
pub struct ClaimCalculator {
    tariffs: TariffTable,
    bonuses: BonusConfig,
}

impl ClaimCalculator {
    pub fn new(tariffs: TariffTable, bonuses: BonusConfig) -> Self {
        Self { tariffs, bonuses }
    }

    /// 100 minus penalties for anomalies, speeding and late arrival, floored at 0.
    pub fn compliance_score(&self, gps: &GpsTrace) -> f64 {
        let b = &self.bonuses;
        let mut score = 100.0
            - b.compliance_anomaly_penalty * gps.anomaly_count() as f64
            - b.compliance_speed_penalty * f64::from(gps.speed_violations());
        if gps.has_anomaly(AnomalyType::TimeAnomaly) {
            score -= b.compliance_time_penalty;
        }
        score.max(0.0)
    }

    /// Base amount and bonuses, each rounded to cents, and their sum.
    pub fn amounts(
        &self,
        km_beyond: Decimal,
        litres: Decimal,
        tariff: Decimal,
        route_efficiency: f64,
        compliance_score: f64,
    ) -> ClaimAmounts {
        let b = &self.bonuses;
        let base_amount = round_money(km_beyond * litres * tariff);

        let efficiency = score_to_decimal(route_efficiency);
        let route_efficiency_bonus = if efficiency > b.efficiency_threshold {
            round_money(
                base_amount * b.efficiency_rate * (efficiency - b.efficiency_threshold)
                    / b.efficiency_span,
            )
        } else {
            Decimal::ZERO
        };

        let compliance = score_to_decimal(compliance_score);
        let compliance_bonus = if compliance > b.compliance_threshold {
            round_money(
                base_amount * b.compliance_rate * (compliance - b.compliance_threshold)
                    / b.compliance_span,
            )
        } else {
            Decimal::ZERO
        };

        ClaimAmounts {
            base_amount,
            route_efficiency_bonus,
            compliance_bonus,
            total_amount: base_amount + route_efficiency_bonus + compliance_bonus,
        }
    }

    /// Kilometres the delivery is paid on.
    ///
    /// Fails with [`EngineError::NotEligible`] when the delivery does not go
    /// beyond the equalisation point, and with [`EngineError::InvalidInput`]
    /// when the point does not belong to the route or is not in force.
    pub fn eligible_km(&self, consignment: &Consignment, point: &EqualisationPoint) -> Result<Decimal> {
        if &point.route_id != consignment.route_id() {
            return Err(EngineError::InvalidInput(format!(
                "equalisation point for route {} used on consignment {} of route {}",
                point.route_id,
                consignment.id(),
                consignment.route_id()
            )));
        }
        if !point.is_active_at(consignment.delivered_at()) {
            return Err(EngineError::InvalidInput(format!(
                "equalisation point for route {} is not in force on {}",
                point.route_id,
                consignment.delivered_at().date_naive()
            )));
        }

        let km_beyond = km_beyond_equalisation(consignment.km_actual(), point.km_threshold);
        if km_beyond.is_zero() {
            return Err(EngineError::NotEligible {
                consignment: consignment.id().clone(),
                km_actual: consignment.km_actual(),
                km_threshold: point.km_threshold,
            });
        }
        Ok(km_beyond)
    }

    /// Build the draft claim for a consignment. Eligibility is checked as in
    /// [`ClaimCalculator::eligible_km`].
    pub fn calculate(
        &self,
        claim_number: String,
        window_id: Option<WindowId>,
        consignment: &Consignment,
        point: &EqualisationPoint,
        gps: &GpsTrace,
        reconciliation: &ThreeWayReconciliation,
    ) -> Result<Claim> {
        let km_beyond = self.eligible_km(consignment, point)?;

        let quote = self
            .tariffs
            .quote(consignment.product(), point.road_category.as_ref());
        let litres = consignment.litres_moved();
        let compliance = self.compliance_score(gps);
        let amounts = self.amounts(km_beyond, litres, quote.tariff, gps.route_efficiency(), compliance);

        debug!(
            "claim {} for {}: {} km x {} L x {} = {} (+{} efficiency, +{} compliance)",
            claim_number,
            consignment.id(),
            km_beyond,
            litres,
            quote.tariff,
            amounts.base_amount,
            amounts.route_efficiency_bonus,
            amounts.compliance_bonus
        );

        Ok(Claim {
            id: ClaimId::new(),
            claim_number,
            consignment_id: consignment.id().clone(),
            route_id: consignment.route_id().clone(),
            product: consignment.product().clone(),
            window_id,
            delivered_at: consignment.delivered_at(),
            km_actual: consignment.km_actual(),
            km_threshold: point.km_threshold,
            km_beyond_equalisation: km_beyond,
            litres_moved: litres,
            tariff: quote,
            base_amount: amounts.base_amount,
            route_efficiency_bonus: amounts.route_efficiency_bonus,
            compliance_bonus: amounts.compliance_bonus,
            total_amount: amounts.total_amount,
            status: ClaimStatus::Draft,
            priority: Priority::Low,
            gps_confidence: gps.confidence(),
            route_efficiency: gps.route_efficiency(),
            compliance_score: compliance,
            reconciliation_confidence: reconciliation.confidence(),
            reconciled: reconciliation.is_valid(),
            evidence_score: 0.0,
            quality_score: 0.0,
            risk_score: 0.0,
            evidence_refs: Vec::new(),
            gps_trace_id: gps.id(),
            reconciliation_id: reconciliation.id(),
            anchor_hash: reconciliation.anchor_hash().map(str::to_string),
            submission_id: None,
            submitted_at: None,
            settlement_id: None,
            settlement_amount: None,
            variance_amount: None,
            variance_reason: None,
            settlement_date: None,
            history: Vec::new(),
            created_at: Utc::now(),
        })
    }
}
