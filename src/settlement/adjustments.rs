use crate::claims::calculator::{round_money, score_to_decimal};
use crate::claims::claim::Claim;
use crate::core::config::AdjustmentRates;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Estimated penalties and bonuses for a set of approved claims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentEstimate {
    pub penalties: Decimal,
    pub bonuses: Decimal,
}

/// Estimate what the regulator would deduct and add for one claim, as a
/// percentage of its total.
pub fn estimate_for_claim(claim: &Claim, rates: &AdjustmentRates) -> AdjustmentEstimate {
    let total = claim.total_amount();
    let pct = |p: Decimal| round_money(total * p / dec!(100));

    let mut penalties = Decimal::ZERO;
    let mut bonuses = Decimal::ZERO;

    let quality = claim.quality_score();
    if quality < rates.quality_floor {
        let shortfall = score_to_decimal(rates.quality_floor - quality);
        penalties += pct(shortfall * rates.quality_penalty_per_point);
    }
    if claim.gps_confidence() < rates.gps_floor {
        penalties += pct(rates.gps_penalty_pct);
    }

    if quality >= rates.quality_bonus_at {
        bonuses += pct(rates.quality_bonus_pct);
    }
    if claim.gps_confidence() >= rates.gps_bonus_at {
        bonuses += pct(rates.gps_bonus_pct);
    }
    if claim.is_reconciled() {
        bonuses += pct(rates.reconciled_bonus_pct);
    }

    AdjustmentEstimate { penalties, bonuses }
}

pub fn estimate<'a>(claims: impl IntoIterator<Item = &'a Claim>, rates: &AdjustmentRates) -> AdjustmentEstimate {
    claims
        .into_iter()
        .map(|c| estimate_for_claim(c, rates))
        .fold(AdjustmentEstimate::default(), |acc, e| AdjustmentEstimate {
            penalties: acc.penalties + e.penalties,
            bonuses: acc.bonuses + e.bonuses,
        })
}
