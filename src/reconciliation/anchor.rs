use crate::core::error::ServiceError;
use crate::reconciliation::three_way::ThreeWayReconciliation;
use sha2::{Digest, Sha256};

/// Attaches a tamper-evidence hash to a finished reconciliation.
pub trait ReconciliationAnchor: Send + Sync {
    fn name(&self) -> &str;

    fn anchor(&self, record: &ThreeWayReconciliation) -> Result<String, ServiceError>;
}

/// Local SHA-256 digest of the canonical reconciliation record.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Anchor;

impl Sha256Anchor {
    /// Digest of the fields that define the verdict, hex encoded.
    pub fn digest(record: &ThreeWayReconciliation) -> String {
        let r = record.readings();
        let mut hasher = Sha256::new();
        hasher.update(record.consignment_id().as_str().as_bytes());
        for value in [
            r.depot_loaded,
            r.transporter_received,
            r.station_received,
            record.tolerance_pct(),
            record.tolerance_litres(),
        ] {
            hasher.update(b"|");
            hasher.update(value.normalize().to_string().as_bytes());
        }
        hasher.update(b"|");
        hasher.update(format!("{:?}", record.status()).as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:.2}", record.confidence()).as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl ReconciliationAnchor for Sha256Anchor {
    fn name(&self) -> &str {
        "sha256"
    }

    fn anchor(&self, record: &ThreeWayReconciliation) -> Result<String, ServiceError> {
        Ok(Self::digest(record))
    }
}
