use crate::core::error::{EngineError, Result};
use crate::core::ids::{ConsignmentId, DepotId, ProductCode, RouteId, StationId, VehicleId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Delivery state as reported by the upstream delivery system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    InTransit,
    Delivered,
    AnomalyDetected,
}

/// An immutable fuel delivery record.
///
/// Created by the upstream delivery system and read-only to this engine.
/// Holds the three volume readings used by three-way reconciliation and the
/// planned/actual distances used by GPS validation and the claim calculator.
///
/// # Examples
///
/// ```
/// use claim_engine::core::consignment::Consignment;
/// use claim_engine::core::ids::{ConsignmentId, ProductCode, RouteId};
/// use rust_decimal_macros::dec;
///
/// let consignment = Consignment::new(
///     ConsignmentId::new("CNS-0001"),
///     RouteId::new("TEMA-KUMASI"),
///     ProductCode::new("AGO"),
///     dec!(120),
///     dec!(125),
/// )
/// .with_volumes(dec!(30000), dec!(29980), dec!(29950));
///
/// assert_eq!(consignment.litres_moved(), dec!(29950));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consignment {
    id: ConsignmentId,
    route_id: RouteId,
    product: ProductCode,
    #[serde(default)]
    depot_id: Option<DepotId>,
    #[serde(default)]
    station_id: Option<StationId>,
    #[serde(default)]
    vehicle_id: Option<VehicleId>,
    km_planned: Decimal,
    km_actual: Decimal,
    #[serde(default)]
    litres_loaded: Decimal,
    #[serde(default)]
    litres_transported: Decimal,
    #[serde(default)]
    litres_received: Decimal,
    #[serde(default = "default_status")]
    status: DeliveryStatus,
    #[serde(default = "Utc::now")]
    delivered_at: DateTime<Utc>,
    #[serde(default)]
    waybill_number: Option<String>,
}

fn default_status() -> DeliveryStatus {
    DeliveryStatus::Delivered
}

impl Consignment {
    /// Create a delivered consignment with no volume readings yet.
    pub fn new(
        id: ConsignmentId,
        route_id: RouteId,
        product: ProductCode,
        km_planned: Decimal,
        km_actual: Decimal,
    ) -> Self {
        Self {
            id,
            route_id,
            product,
            depot_id: None,
            station_id: None,
            vehicle_id: None,
            km_planned,
            km_actual,
            litres_loaded: Decimal::ZERO,
            litres_transported: Decimal::ZERO,
            litres_received: Decimal::ZERO,
            status: DeliveryStatus::Delivered,
            delivered_at: Utc::now(),
            waybill_number: None,
        }
    }

    /// Set the depot, transporter and station volume readings.
    pub fn with_volumes(mut self, loaded: Decimal, transported: Decimal, received: Decimal) -> Self {
        self.litres_loaded = loaded;
        self.litres_transported = transported;
        self.litres_received = received;
        self
    }

    pub fn with_parties(mut self, depot: DepotId, station: StationId) -> Self {
        self.depot_id = Some(depot);
        self.station_id = Some(station);
        self
    }

    pub fn with_vehicle(mut self, vehicle: VehicleId) -> Self {
        self.vehicle_id = Some(vehicle);
        self
    }

    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_delivered_at(mut self, at: DateTime<Utc>) -> Self {
        self.delivered_at = at;
        self
    }

    pub fn with_waybill(mut self, waybill: impl Into<String>) -> Self {
        self.waybill_number = Some(waybill.into());
        self
    }

    /// Reject records no stage can reason about: negative distances or volumes.
    pub fn validate(&self) -> Result<()> {
        if self.km_planned < Decimal::ZERO || self.km_actual < Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "consignment {} has negative distance (planned {}, actual {})",
                self.id, self.km_planned, self.km_actual
            )));
        }
        if self.litres_loaded < Decimal::ZERO
            || self.litres_transported < Decimal::ZERO
            || self.litres_received < Decimal::ZERO
        {
            return Err(EngineError::InvalidInput(format!(
                "consignment {} has a negative volume reading",
                self.id
            )));
        }
        Ok(())
    }

    // --- Accessors ---

    pub fn id(&self) -> &ConsignmentId {
        &self.id
    }

    pub fn route_id(&self) -> &RouteId {
        &self.route_id
    }

    pub fn product(&self) -> &ProductCode {
        &self.product
    }

    pub fn depot_id(&self) -> Option<&DepotId> {
        self.depot_id.as_ref()
    }

    pub fn station_id(&self) -> Option<&StationId> {
        self.station_id.as_ref()
    }

    pub fn vehicle_id(&self) -> Option<&VehicleId> {
        self.vehicle_id.as_ref()
    }

    pub fn km_planned(&self) -> Decimal {
        self.km_planned
    }

    pub fn km_actual(&self) -> Decimal {
        self.km_actual
    }

    pub fn litres_loaded(&self) -> Decimal {
        self.litres_loaded
    }

    pub fn litres_transported(&self) -> Decimal {
        self.litres_transported
    }

    pub fn litres_received(&self) -> Decimal {
        self.litres_received
    }

    /// Volume the subsidy is paid on: what the station received, or what
    /// the depot loaded when no receipt was recorded.
    pub fn litres_moved(&self) -> Decimal {
        if self.litres_received > Decimal::ZERO {
            self.litres_received
        } else {
            self.litres_loaded
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn delivered_at(&self) -> DateTime<Utc> {
        self.delivered_at
    }

    pub fn waybill_number(&self) -> Option<&str> {
        self.waybill_number.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_consignment() -> Consignment {
        Consignment::new(
            ConsignmentId::new("CNS-1"),
            RouteId::new("R-1"),
            ProductCode::new("PMS"),
            dec!(120),
            dec!(125),
        )
    }

    #[test]
    fn test_consignment_creation() {
        let c = sample_consignment().with_volumes(dec!(30000), dec!(29990), dec!(29950));
        assert_eq!(c.id().as_str(), "CNS-1");
        assert_eq!(c.km_actual(), dec!(125));
        assert_eq!(c.litres_loaded(), dec!(30000));
        assert_eq!(c.status(), DeliveryStatus::Delivered);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_litres_moved_falls_back_to_loaded() {
        let c = sample_consignment().with_volumes(dec!(30000), dec!(30000), Decimal::ZERO);
        assert_eq!(c.litres_moved(), dec!(30000));
    }

    #[test]
    fn test_negative_distance_rejected() {
        let c = Consignment::new(
            ConsignmentId::new("CNS-2"),
            RouteId::new("R-1"),
            ProductCode::new("PMS"),
            dec!(-1),
            dec!(125),
        );
        assert!(matches!(c.validate(), Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn test_negative_volume_rejected() {
        let c = sample_consignment().with_volumes(dec!(100), dec!(-5), dec!(90));
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "id": "CNS-9",
            "route_id": "R-9",
            "product": "AGO",
            "km_planned": "100",
            "km_actual": "130",
            "litres_loaded": "10000",
            "litres_transported": "9990",
            "litres_received": "9985"
        }"#;
        let c: Consignment = serde_json::from_str(json).unwrap();
        assert_eq!(c.km_actual(), dec!(130));
        assert_eq!(c.status(), DeliveryStatus::Delivered);
        assert!(c.depot_id().is_none());
    }
}
