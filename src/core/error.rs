use crate::core::ids::ConsignmentId;
use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the reconciliation and claim engine.
///
/// Only structurally invalid input is fatal to an item, and no variant is
/// ever allowed to abort a surrounding batch.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No distance beyond the equalisation threshold. Terminal; no claim is created.
    #[error("consignment {consignment} is not eligible: {km_actual} km does not exceed threshold {km_threshold} km")]
    NotEligible {
        consignment: ConsignmentId,
        km_actual: Decimal,
        km_threshold: Decimal,
    },

    /// No raw GPS trace exists yet for the consignment.
    #[error("no GPS trace found for consignment {0}")]
    TraceNotFound(ConsignmentId),

    /// Depot loaded volume is zero or negative, so no tolerance percentage can be applied.
    #[error("consignment {consignment} has invalid depot loaded volume {depot_loaded}")]
    InvalidBaseVolume {
        consignment: ConsignmentId,
        depot_loaded: Decimal,
    },

    #[error("external service {service} unavailable: {reason}")]
    ExternalServiceUnavailable { service: String, reason: String },

    /// GPS or reconciliation rejected the consignment and the caller asked for strict handling.
    #[error("validation failed for consignment {consignment}: {reason}")]
    ValidationFailed {
        consignment: ConsignmentId,
        reason: String,
    },

    #[error("regulator response references unknown claim {claim_number}")]
    UnmatchedSettlementClaim { claim_number: String },

    #[error("invalid claim status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The stored claim moved on since it was read.
    #[error("claim {claim} changed concurrently: expected {expected}, found {found}")]
    StaleClaim {
        claim: String,
        expected: String,
        found: String,
    },

    /// Malformed consignment, equalisation or batch data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the next delivery sweep should try this consignment again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TraceNotFound(_)
                | EngineError::InvalidBaseVolume { .. }
                | EngineError::ExternalServiceUnavailable { .. }
        )
    }
}

/// Failure of a call to an external collaborator (regulator API, anomaly service, anchor).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("worker disconnected before replying")]
    Disconnected,
}

impl ServiceError {
    pub fn into_engine_error(self, service: &str) -> EngineError {
        EngineError::ExternalServiceUnavailable {
            service: service.to_string(),
            reason: self.to_string(),
        }
    }
}
