use crate::core::error::{EngineError, Result};
use crate::core::ids::{RoadCategory, RouteId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-route equalisation configuration.
///
/// Deliveries whose actual distance exceeds `km_threshold` qualify for the
/// distance-based subsidy on the excess kilometres. Long-lived reference
/// data; the engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqualisationPoint {
    pub route_id: RouteId,
    /// Distance beyond which the subsidy applies.
    pub km_threshold: Decimal,
    /// Road category used to pick the tariff multiplier.
    #[serde(default)]
    pub road_category: Option<RoadCategory>,
    #[serde(default = "one")]
    pub traffic_factor: Decimal,
    /// Route complexity, widening the reconciliation tolerance on hard routes.
    #[serde(default)]
    pub complexity_factor: Option<Decimal>,
    #[serde(default = "active")]
    pub is_active: bool,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
}

fn one() -> Decimal {
    Decimal::ONE
}

fn active() -> bool {
    true
}

impl EqualisationPoint {
    pub fn new(route_id: RouteId, km_threshold: Decimal, effective_date: NaiveDate) -> Self {
        Self {
            route_id,
            km_threshold,
            road_category: None,
            traffic_factor: Decimal::ONE,
            complexity_factor: None,
            is_active: true,
            effective_date,
            expiry_date: None,
        }
    }

    pub fn with_road_category(mut self, category: RoadCategory) -> Self {
        self.road_category = Some(category);
        self
    }

    pub fn with_complexity_factor(mut self, factor: Decimal) -> Self {
        self.complexity_factor = Some(factor);
        self
    }

    pub fn with_expiry(mut self, expiry: NaiveDate) -> Self {
        self.expiry_date = Some(expiry);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Whether the point applies to a delivery made at `at`.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        self.is_active
            && day >= self.effective_date
            && self.expiry_date.map_or(true, |expiry| day <= expiry)
    }

    /// Route complexity factor, 1.0 when the route has none recorded.
    pub fn complexity(&self) -> Decimal {
        self.complexity_factor.unwrap_or(Decimal::ONE)
    }

    /// Structural checks for data arriving from outside the engine.
    pub fn validate(&self) -> Result<()> {
        if self.km_threshold < Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "equalisation point for route {} has negative threshold {}",
                self.route_id, self.km_threshold
            )));
        }
        if self.complexity() <= Decimal::ZERO || self.traffic_factor <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "equalisation point for route {} has non-positive factor",
                self.route_id
            )));
        }
        Ok(())
    }
}
