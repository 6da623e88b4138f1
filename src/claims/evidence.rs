use crate::core::config::EvidenceWeights;
use serde::{Deserialize, Serialize};

/// Supporting documents on file for a consignment, as references or URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    #[serde(default)]
    pub waybill: Option<String>,
    #[serde(default)]
    pub gps_trace: Option<String>,
    #[serde(default)]
    pub goods_received_note: Option<String>,
    #[serde(default)]
    pub tank_dips: Option<String>,
    #[serde(default)]
    pub weighbridge: Option<String>,
}

impl EvidenceBundle {
    /// A bundle with every document present, referenced by `prefix/<kind>`.
    pub fn complete(prefix: &str) -> Self {
        Self {
            waybill: Some(format!("{}/waybill", prefix)),
            gps_trace: Some(format!("{}/gps-trace", prefix)),
            goods_received_note: Some(format!("{}/grn", prefix)),
            tank_dips: Some(format!("{}/tank-dips", prefix)),
            weighbridge: Some(format!("{}/weighbridge", prefix)),
        }
    }

    /// 0-100 evidence score. A reconciliation anchor hash adds its bonus,
    /// capped at 100.
    pub fn score(&self, weights: &EvidenceWeights, has_anchor: bool) -> f64 {
        let mut score = 0.0;
        if self.waybill.is_some() {
            score += weights.waybill;
        }
        if self.gps_trace.is_some() {
            score += weights.gps_trace;
        }
        if self.goods_received_note.is_some() {
            score += weights.goods_received_note;
        }
        if self.tank_dips.is_some() {
            score += weights.tank_dips;
        }
        if self.weighbridge.is_some() {
            score += weights.weighbridge;
        }
        if has_anchor {
            score += weights.anchor_hash;
        }
        score.clamp(0.0, 100.0)
    }

    /// References to attach to the regulator submission.
    pub fn refs(&self) -> Vec<String> {
        [
            &self.waybill,
            &self.gps_trace,
            &self.goods_received_note,
            &self.tank_dips,
            &self.weighbridge,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}
