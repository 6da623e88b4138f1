use crate::core::equalisation::EqualisationPoint;
use crate::core::error::{EngineError, Result};
use crate::core::ids::{ProductCode, RoadCategory, RouteId, WindowId};
use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// The tariff a claim is priced at, with a record of which lookups fell back
/// to the documented defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TariffQuote {
    pub base_rate: Decimal,
    pub road_multiplier: Decimal,
    /// `base_rate * road_multiplier`, per litre per km.
    pub tariff: Decimal,
    pub product_defaulted: bool,
    pub category_defaulted: bool,
}

/// Per-litre-per-km subsidy rates.
///
/// Base rates are keyed by product and scaled by a road-category multiplier.
/// Unknown products price at `default_base_rate` (the PMS rate out of the
/// box) and unknown categories at `default_road_multiplier` (1.0); neither
/// lookup ever yields zero.
///
/// # Examples
///
/// ```
/// use claim_engine::core::ids::{ProductCode, RoadCategory};
/// use claim_engine::core::reference::TariffTable;
/// use rust_decimal_macros::dec;
///
/// let table = TariffTable::default();
/// let quote = table.quote(&ProductCode::new("PMS"), Some(&RoadCategory::new("URBAN")));
/// assert_eq!(quote.tariff, dec!(0.00144));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffTable {
    base_rates: BTreeMap<ProductCode, Decimal>,
    road_multipliers: BTreeMap<RoadCategory, Decimal>,
    default_base_rate: Decimal,
    default_road_multiplier: Decimal,
}

impl Default for TariffTable {
    fn default() -> Self {
        let base_rates = [
            ("PMS", dec!(0.0012)),
            ("AGO", dec!(0.0012)),
            ("KEROSENE", dec!(0.0008)),
            ("LPG", dec!(0.0010)),
        ]
        .into_iter()
        .map(|(p, r)| (ProductCode::new(p), r))
        .collect();
        let road_multipliers = [
            ("HIGHWAY", dec!(1.0)),
            ("URBAN", dec!(1.2)),
            ("RURAL", dec!(1.5)),
            ("MOUNTAINOUS", dec!(2.0)),
            ("COASTAL", dec!(1.3)),
        ]
        .into_iter()
        .map(|(c, m)| (RoadCategory::new(c), m))
        .collect();
        Self {
            base_rates,
            road_multipliers,
            default_base_rate: dec!(0.0012),
            default_road_multiplier: Decimal::ONE,
        }
    }
}

impl TariffTable {
    /// An empty table that prices everything at the given defaults.
    pub fn with_defaults(default_base_rate: Decimal, default_road_multiplier: Decimal) -> Self {
        Self {
            base_rates: BTreeMap::new(),
            road_multipliers: BTreeMap::new(),
            default_base_rate,
            default_road_multiplier,
        }
    }

    /// Set the base rate for a product. Rates must be positive.
    pub fn set_base_rate(&mut self, product: ProductCode, rate: Decimal) -> Result<()> {
        if rate <= Decimal::ZERO {
            return Err(EngineError::Config(format!(
                "base rate must be positive, got {} for {}",
                rate, product
            )));
        }
        self.base_rates.insert(product, rate);
        Ok(())
    }

    /// Set the multiplier for a road category. Multipliers must be positive.
    pub fn set_road_multiplier(&mut self, category: RoadCategory, multiplier: Decimal) -> Result<()> {
        if multiplier <= Decimal::ZERO {
            return Err(EngineError::Config(format!(
                "road multiplier must be positive, got {} for {}",
                multiplier, category
            )));
        }
        self.road_multipliers.insert(category, multiplier);
        Ok(())
    }

    /// Price a product on a road category.
    pub fn quote(&self, product: &ProductCode, category: Option<&RoadCategory>) -> TariffQuote {
        let (base_rate, product_defaulted) = match self.base_rates.get(product) {
            Some(rate) => (*rate, false),
            None => {
                warn!(
                    "no base rate for product {}, using default {}",
                    product, self.default_base_rate
                );
                (self.default_base_rate, true)
            }
        };
        let (road_multiplier, category_defaulted) =
            match category.and_then(|c| self.road_multipliers.get(c)) {
                Some(m) => (*m, false),
                None => (self.default_road_multiplier, true),
            };
        TariffQuote {
            base_rate,
            road_multiplier,
            tariff: base_rate * road_multiplier,
            product_defaulted,
            category_defaulted,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let bad_rate = self.base_rates.values().any(|r| *r <= Decimal::ZERO);
        let bad_mult = self.road_multipliers.values().any(|m| *m <= Decimal::ZERO);
        if bad_rate || bad_mult || self.default_base_rate <= Decimal::ZERO
            || self.default_road_multiplier <= Decimal::ZERO
        {
            return Err(EngineError::Config(
                "tariff rates and multipliers must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Product volatility factors for the dynamic reconciliation tolerance.
/// Products without an entry use 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolatilityTable(BTreeMap<ProductCode, Decimal>);

impl Default for VolatilityTable {
    fn default() -> Self {
        Self(
            [
                ("PMS", dec!(1.1)),
                ("AGO", dec!(1.0)),
                ("KEROSENE", dec!(0.9)),
                ("LPG", dec!(1.2)),
            ]
            .into_iter()
            .map(|(p, f)| (ProductCode::new(p), f))
            .collect(),
        )
    }
}

impl VolatilityTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn set(&mut self, product: ProductCode, factor: Decimal) {
        self.0.insert(product, factor);
    }

    pub fn factor(&self, product: &ProductCode) -> Decimal {
        self.0.get(product).copied().unwrap_or(Decimal::ONE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.values().any(|f| *f <= Decimal::ZERO) {
            return Err(EngineError::Config(
                "product volatility factors must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// A regulator pricing window. Claims are batched and settled per window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingWindow {
    pub id: WindowId,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PricingWindow {
    pub fn new(id: WindowId, start: NaiveDate, end: NaiveDate) -> Self {
        Self { id, start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let day = at.date_naive();
        day >= self.start && day <= self.end
    }
}

/// Read-only operational reference data shared by every worker.
///
/// Equalisation points, per-route historical variance baselines and the
/// pricing-window calendar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceData {
    #[serde(default)]
    equalisation_points: HashMap<RouteId, EqualisationPoint>,
    /// Route -> historical mean depot-to-station variance, in percent.
    #[serde(default)]
    variance_baselines: HashMap<RouteId, Decimal>,
    #[serde(default)]
    windows: Vec<PricingWindow>,
}

impl ReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_equalisation_point(&mut self, point: EqualisationPoint) {
        self.equalisation_points.insert(point.route_id.clone(), point);
    }

    pub fn set_variance_baseline(&mut self, route: RouteId, percent: Decimal) {
        self.variance_baselines.insert(route, percent);
    }

    pub fn add_window(&mut self, window: PricingWindow) {
        self.windows.push(window);
    }

    pub fn equalisation_point(&self, route: &RouteId) -> Option<&EqualisationPoint> {
        self.equalisation_points.get(route)
    }

    /// Route complexity factor, 1.0 for unknown routes.
    pub fn route_complexity(&self, route: &RouteId) -> Decimal {
        self.equalisation_points
            .get(route)
            .map(|p| p.complexity())
            .unwrap_or(Decimal::ONE)
    }

    pub fn variance_baseline(&self, route: &RouteId) -> Option<Decimal> {
        self.variance_baselines.get(route).copied()
    }

    /// The pricing window containing `at`, if one is configured.
    pub fn window_for(&self, at: DateTime<Utc>) -> Option<&PricingWindow> {
        self.windows.iter().find(|w| w.contains(at))
    }

    pub fn window(&self, id: &WindowId) -> Option<&PricingWindow> {
        self.windows.iter().find(|w| &w.id == id)
    }

    pub fn windows(&self) -> &[PricingWindow] {
        &self.windows
    }

    pub fn validate(&self) -> Result<()> {
        for point in self.equalisation_points.values() {
            point.validate()?;
        }
        for w in &self.windows {
            if w.end < w.start {
                return Err(EngineError::InvalidInput(format!(
                    "pricing window {} ends before it starts",
                    w.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tariff_known_product_and_category() {
        let table = TariffTable::default();
        let q = table.quote(&ProductCode::new("AGO"), Some(&RoadCategory::new("RURAL")));
        assert_eq!(q.base_rate, dec!(0.0012));
        assert_eq!(q.road_multiplier, dec!(1.5));
        assert_eq!(q.tariff, dec!(0.0018));
        assert!(!q.product_defaulted);
        assert!(!q.category_defaulted);
    }

    #[test]
    fn test_tariff_unknown_product_uses_default_not_zero() {
        let table = TariffTable::default();
        let q = table.quote(&ProductCode::new("BITUMEN"), None);
        assert_eq!(q.base_rate, dec!(0.0012));
        assert_eq!(q.road_multiplier, Decimal::ONE);
        assert!(q.product_defaulted);
        assert!(q.category_defaulted);
        assert!(q.tariff > Decimal::ZERO);
    }

    #[test]
    fn test_tariff_rejects_non_positive_rate() {
        let mut table = TariffTable::default();
        assert!(table.set_base_rate(ProductCode::new("LPG"), dec!(0)).is_err());
        assert!(table
            .set_road_multiplier(RoadCategory::new("DESERT"), dec!(-1))
            .is_err());
    }

    #[test]
    fn test_volatility_defaults_to_one() {
        let table = VolatilityTable::default();
        assert_eq!(table.factor(&ProductCode::new("LPG")), dec!(1.2));
        assert_eq!(table.factor(&ProductCode::new("UNKNOWN")), Decimal::ONE);
    }

    #[test]
    fn test_window_lookup() {
        let mut refs = ReferenceData::new();
        refs.add_window(PricingWindow::new(
            WindowId::new("W2025-01"),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
        ));
        let inside = Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2025, 1, 16, 8, 0, 0).unwrap();
        assert_eq!(refs.window_for(inside).unwrap().id.as_str(), "W2025-01");
        assert!(refs.window_for(outside).is_none());
    }

    #[test]
    fn test_route_complexity_defaults_to_one() {
        let refs = ReferenceData::new();
        assert_eq!(refs.route_complexity(&RouteId::new("nowhere")), Decimal::ONE);
    }
}
