//! Regulator submission and response contract.

use crate::core::error::{Result, ServiceError};
use crate::core::external::call_with_timeout;
use crate::core::ids::WindowId;
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One claim line of an outbound submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedClaim {
    pub claim_number: String,
    /// Kilometres paid on, beyond the equalisation point.
    pub route_km: Decimal,
    pub litres: Decimal,
    pub amount: Decimal,
    pub evidence_refs: Vec<String>,
}

/// Outbound batch for one pricing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionBatch {
    pub submission_id: String,
    pub window: WindowId,
    pub submitted_at: DateTime<Utc>,
    pub claims: Vec<SubmittedClaim>,
}

impl SubmissionBatch {
    pub fn total_amount(&self) -> Decimal {
        self.claims.iter().map(|c| c.amount).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedClaim {
    pub claim_number: String,
    pub approved_amount: Decimal,
    pub settlement_date: NaiveDate,
    #[serde(default)]
    pub adjustment_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedClaim {
    pub claim_number: String,
    pub reason: String,
}

/// Inbound regulator decision on a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatorResponse {
    pub response_ref: String,
    #[serde(default)]
    pub approved_claims: Vec<ApprovedClaim>,
    #[serde(default)]
    pub rejected_claims: Vec<RejectedClaim>,
    /// Penalties the regulator deducted from the batch, when stated.
    #[serde(default)]
    pub npa_penalties: Option<Decimal>,
    #[serde(default)]
    pub performance_bonuses: Option<Decimal>,
}

/// Acknowledgement of a delivered submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub reference: String,
    pub message: String,
}

/// The regulator's submission endpoint.
pub trait RegulatorGateway: Send + Sync {
    fn name(&self) -> &str;

    fn submit(&self, batch: &SubmissionBatch) -> std::result::Result<SubmissionReceipt, ServiceError>;
}

/// Deliver a batch, giving up after `timeout`.
pub fn send_submission(
    gateway: &Arc<dyn RegulatorGateway>,
    batch: &SubmissionBatch,
    timeout: Duration,
) -> Result<SubmissionReceipt> {
    let gw = Arc::clone(gateway);
    let owned = batch.clone();
    let name = gateway.name().to_string();
    match call_with_timeout(&name, timeout, move || gw.submit(&owned)) {
        Ok(receipt) => {
            info!(
                "submission {} accepted by {}: {}",
                batch.submission_id, name, receipt.reference
            );
            Ok(receipt)
        }
        Err(e) => {
            warn!("submission {} to {} failed: {}", batch.submission_id, name, e);
            Err(e.into_engine_error(&name))
        }
    }
}

/// Keeps submissions in memory instead of sending them anywhere.
#[derive(Debug, Default)]
pub struct OutboxGateway {
    sent: Mutex<Vec<SubmissionBatch>>,
}

impl OutboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SubmissionBatch> {
        self.sent.lock().clone()
    }
}

impl RegulatorGateway for OutboxGateway {
    fn name(&self) -> &str {
        "outbox"
    }

    fn submit(&self, batch: &SubmissionBatch) -> std::result::Result<SubmissionReceipt, ServiceError> {
        self.sent.lock().push(batch.clone());
        Ok(SubmissionReceipt {
            reference: format!("NPA-REF-{}", batch.submission_id),
            message: format!("{} claims queued", batch.claims.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use rust_decimal_macros::dec;

    struct Offline;

    impl RegulatorGateway for Offline {
        fn name(&self) -> &str {
            "offline"
        }

        fn submit(&self, _batch: &SubmissionBatch) -> std::result::Result<SubmissionReceipt, ServiceError> {
            Err(ServiceError::Unavailable("maintenance window".into()))
        }
    }

    fn batch() -> SubmissionBatch {
        SubmissionBatch {
            submission_id: "SUB-W1-1".into(),
            window: WindowId::new("W1"),
            submitted_at: Utc::now(),
            claims: vec![SubmittedClaim {
                claim_number: "UPPF-20250110-000001".into(),
                route_km: dec!(25),
                litres: dec!(30000),
                amount: dec!(1080.00),
                evidence_refs: vec!["wb-1".into()],
            }],
        }
    }

    #[test]
    fn test_outbox_records_batch() {
        let outbox = Arc::new(OutboxGateway::new());
        let gateway: Arc<dyn RegulatorGateway> = outbox.clone();
        let receipt = send_submission(&gateway, &batch(), Duration::from_secs(1)).unwrap();
        assert_eq!(receipt.reference, "NPA-REF-SUB-W1-1");
        assert_eq!(outbox.sent().len(), 1);
        assert_eq!(outbox.sent()[0].total_amount(), dec!(1080.00));
    }

    #[test]
    fn test_gateway_failure_is_service_unavailable() {
        let gateway: Arc<dyn RegulatorGateway> = Arc::new(Offline);
        let err = send_submission(&gateway, &batch(), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, EngineError::ExternalServiceUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_response_parses_with_optional_adjustments() {
        let json = r#"{
            "response_ref": "NPA-RESP-7",
            "approved_claims": [
                { "claim_number": "UPPF-20250110-000001", "approved_amount": "1000.00", "settlement_date": "2025-02-01" }
            ],
            "rejected_claims": [
                { "claim_number": "UPPF-20250110-000002", "reason": "duplicate waybill" }
            ]
        }"#;
        let response: RegulatorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.approved_claims[0].approved_amount, dec!(1000.00));
        assert!(response.npa_penalties.is_none());
        assert_eq!(response.rejected_claims[0].reason, "duplicate waybill");
    }
}
