//! # claim-engine
//!
//! Three-way reconciliation and distance-subsidy claim settlement engine for
//! fuel deliveries under the Unified Petroleum Price Fund (UPPF).
//!
//! For every delivery the engine decides whether a distance-based subsidy
//! claim is valid, what it is worth, and how it nets against the regulator's
//! eventual payment.
//!
//! ## Architecture
//!
//! - **core** — Identifiers, consignments, equalisation points, reference data, configuration, events
//! - **gps** — Trace summarisation, GPS trace validation, anomaly detection strategies
//! - **reconciliation** — Depot/transporter/station volume reconciliation with dynamic tolerance
//! - **claims** — Claim calculation, evidence scoring, the claim lifecycle state machine
//! - **settlement** — Regulator contract, settlement variance accounting, GL journal payloads
//! - **pipeline** — Repositories, the per-consignment pipeline, scheduled sweeps
//! - **simulation** — Random fleet generation for benchmarks and demos
//!
//! ## Example
//!
//! ```
//! use claim_engine::prelude::*;
//! use claim_engine::simulation::fleet::{generate_fleet, FleetConfig};
//! use std::sync::Arc;
//!
//! let fleet = generate_fleet(&FleetConfig { consignment_count: 5, seed: Some(3), ..Default::default() });
//! let sink = Arc::new(RecordingSink::new());
//! let engine = fleet.builder(EngineConfig::default()).sink(sink.clone()).build().unwrap();
//!
//! let report = engine.process_batch(&fleet.consignment_ids(), ProcessOptions::default());
//! assert_eq!(report.processed(), 5);
//! assert!(!sink.is_empty());
//! ```

pub mod claims;
pub mod core;
pub mod gps;
pub mod pipeline;
pub mod reconciliation;
pub mod settlement;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::claims::claim::{Claim, ClaimStatus, Priority};
    pub use crate::claims::evidence::EvidenceBundle;
    pub use crate::core::config::EngineConfig;
    pub use crate::core::consignment::Consignment;
    pub use crate::core::equalisation::EqualisationPoint;
    pub use crate::core::error::{EngineError, Result};
    pub use crate::core::events::{EngineEvent, EventSink, RecordingSink};
    pub use crate::core::ids::{ClaimId, ConsignmentId, ProductCode, RouteId, WindowId};
    pub use crate::core::reference::{PricingWindow, ReferenceData};
    pub use crate::gps::trace::{GpsPoint, RawTrace};
    pub use crate::pipeline::engine::{BatchReport, ClaimEngine, ProcessOptions};
    pub use crate::pipeline::scheduler::Scheduler;
    pub use crate::pipeline::store::{InMemoryClaims, InMemoryConsignments, InMemoryEvidence, InMemoryTraces};
    pub use crate::settlement::processor::{Settlement, SettlementStatus};
    pub use crate::settlement::regulator::{OutboxGateway, RegulatorGateway, RegulatorResponse};
}
