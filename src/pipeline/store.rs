//! Repository interfaces the pipeline reads from and writes to, with
//! thread-safe in-memory implementations.

use crate::claims::claim::{Claim, ClaimStatus};
use crate::claims::evidence::EvidenceBundle;
use crate::core::consignment::{Consignment, DeliveryStatus};
use crate::core::error::{EngineError, Result};
use crate::core::ids::{ClaimId, ConsignmentId, WindowId};
use crate::gps::trace::RawTrace;
use crate::gps::validator::GpsTrace;
use crate::reconciliation::three_way::ThreeWayReconciliation;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Delivery records from the upstream delivery system.
pub trait ConsignmentSource: Send + Sync {
    fn consignment(&self, id: &ConsignmentId) -> Option<Consignment>;

    /// Every consignment reported as delivered, oldest first.
    fn delivered(&self) -> Vec<Consignment>;
}

/// Raw GPS traces by consignment.
pub trait TraceStore: Send + Sync {
    fn trace(&self, consignment: &ConsignmentId) -> Option<RawTrace>;
}

/// Supporting documents by consignment. Missing documents are `None`
/// fields of the bundle.
pub trait EvidenceStore: Send + Sync {
    fn evidence(&self, consignment: &ConsignmentId) -> EvidenceBundle;
}

/// Claims plus the validation records they were derived from.
pub trait ClaimStore: Send + Sync {
    /// Store a new claim, unless its consignment already has one. Returns the
    /// stored claim either way.
    fn insert(&self, claim: Claim) -> Claim;

    /// Replace a stored claim whose status is still `expected`.
    ///
    /// Fails if the claim was never inserted, and with
    /// [`EngineError::StaleClaim`] if another writer changed its status
    /// since it was read.
    fn update(&self, claim: &Claim, expected: ClaimStatus) -> Result<()>;

    fn get(&self, id: ClaimId) -> Option<Claim>;

    fn by_consignment(&self, consignment: &ConsignmentId) -> Option<Claim>;

    fn by_number(&self, claim_number: &str) -> Option<Claim>;

    fn in_window(&self, window: &WindowId) -> Vec<Claim>;

    fn with_status(&self, status: ClaimStatus) -> Vec<Claim>;

    fn all(&self) -> Vec<Claim>;

    /// Next claim number sequence value, starting at 1.
    fn next_sequence(&self) -> u64;

    fn save_gps_trace(&self, trace: GpsTrace);

    fn save_reconciliation(&self, reconciliation: ThreeWayReconciliation);

    fn gps_trace(&self, id: Uuid) -> Option<GpsTrace>;

    fn reconciliation(&self, id: Uuid) -> Option<ThreeWayReconciliation>;
}

#[derive(Debug, Default)]
pub struct InMemoryConsignments {
    items: RwLock<BTreeMap<ConsignmentId, Consignment>>,
}

impl InMemoryConsignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, consignment: Consignment) {
        self.items.write().insert(consignment.id().clone(), consignment);
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl FromIterator<Consignment> for InMemoryConsignments {
    fn from_iter<I: IntoIterator<Item = Consignment>>(iter: I) -> Self {
        let store = Self::new();
        for c in iter {
            store.insert(c);
        }
        store
    }
}

impl ConsignmentSource for InMemoryConsignments {
    fn consignment(&self, id: &ConsignmentId) -> Option<Consignment> {
        self.items.read().get(id).cloned()
    }

    fn delivered(&self) -> Vec<Consignment> {
        let mut out: Vec<Consignment> = self
            .items
            .read()
            .values()
            .filter(|c| c.status() == DeliveryStatus::Delivered)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.delivered_at().cmp(&b.delivered_at()).then_with(|| a.id().cmp(b.id())));
        out
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTraces {
    traces: RwLock<HashMap<ConsignmentId, RawTrace>>,
}

impl InMemoryTraces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trace: RawTrace) {
        self.traces.write().insert(trace.consignment_id.clone(), trace);
    }
}

impl TraceStore for InMemoryTraces {
    fn trace(&self, consignment: &ConsignmentId) -> Option<RawTrace> {
        self.traces.read().get(consignment).cloned()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEvidence {
    bundles: RwLock<HashMap<ConsignmentId, EvidenceBundle>>,
}

impl InMemoryEvidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, consignment: ConsignmentId, bundle: EvidenceBundle) {
        self.bundles.write().insert(consignment, bundle);
    }
}

impl EvidenceStore for InMemoryEvidence {
    fn evidence(&self, consignment: &ConsignmentId) -> EvidenceBundle {
        self.bundles.read().get(consignment).cloned().unwrap_or_default()
    }
}

/// Claims in insertion order with lookup indexes.
#[derive(Debug, Default)]
struct ClaimArena {
    claims: Vec<Claim>,
    by_id: HashMap<ClaimId, usize>,
    by_consignment: HashMap<ConsignmentId, usize>,
    by_number: HashMap<String, usize>,
    gps_traces: HashMap<Uuid, GpsTrace>,
    reconciliations: HashMap<Uuid, ThreeWayReconciliation>,
}

#[derive(Debug, Default)]
pub struct InMemoryClaims {
    arena: RwLock<ClaimArena>,
    sequence: AtomicU64,
}

impl InMemoryClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arena.read().claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.read().claims.is_empty()
    }
}

impl ClaimStore for InMemoryClaims {
    fn insert(&self, claim: Claim) -> Claim {
        let mut arena = self.arena.write();
        if let Some(&idx) = arena.by_consignment.get(claim.consignment_id()) {
            return arena.claims[idx].clone();
        }
        let idx = arena.claims.len();
        arena.by_id.insert(claim.id(), idx);
        arena.by_consignment.insert(claim.consignment_id().clone(), idx);
        arena.by_number.insert(claim.claim_number().to_string(), idx);
        arena.claims.push(claim.clone());
        claim
    }

    fn update(&self, claim: &Claim, expected: ClaimStatus) -> Result<()> {
        let mut arena = self.arena.write();
        let idx = *arena
            .by_id
            .get(&claim.id())
            .ok_or_else(|| EngineError::InvalidInput(format!("claim {} is not stored", claim.id())))?;
        let found = arena.claims[idx].status();
        if found != expected {
            return Err(EngineError::StaleClaim {
                claim: claim.claim_number().to_string(),
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        arena.claims[idx] = claim.clone();
        Ok(())
    }

    fn get(&self, id: ClaimId) -> Option<Claim> {
        let arena = self.arena.read();
        arena.by_id.get(&id).map(|&i| arena.claims[i].clone())
    }

    fn by_consignment(&self, consignment: &ConsignmentId) -> Option<Claim> {
        let arena = self.arena.read();
        arena.by_consignment.get(consignment).map(|&i| arena.claims[i].clone())
    }

    fn by_number(&self, claim_number: &str) -> Option<Claim> {
        let arena = self.arena.read();
        arena.by_number.get(claim_number).map(|&i| arena.claims[i].clone())
    }

    fn in_window(&self, window: &WindowId) -> Vec<Claim> {
        self.arena
            .read()
            .claims
            .iter()
            .filter(|c| c.window_id() == Some(window))
            .cloned()
            .collect()
    }

    fn with_status(&self, status: ClaimStatus) -> Vec<Claim> {
        self.arena
            .read()
            .claims
            .iter()
            .filter(|c| c.status() == status)
            .cloned()
            .collect()
    }

    fn all(&self) -> Vec<Claim> {
        self.arena.read().claims.clone()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn save_gps_trace(&self, trace: GpsTrace) {
        self.arena.write().gps_traces.insert(trace.id(), trace);
    }

    fn save_reconciliation(&self, reconciliation: ThreeWayReconciliation) {
        self.arena
            .write()
            .reconciliations
            .insert(reconciliation.id(), reconciliation);
    }

    fn gps_trace(&self, id: Uuid) -> Option<GpsTrace> {
        self.arena.read().gps_traces.get(&id).cloned()
    }

    fn reconciliation(&self, id: Uuid) -> Option<ThreeWayReconciliation> {
        self.arena.read().reconciliations.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::{ProductCode, RouteId};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_claim_insert_is_idempotent_per_consignment() {
        let store = InMemoryClaims::new();
        let first = Claim::draft_for_test("UPPF-1", dec!(100.00));
        let mut duplicate = Claim::draft_for_test("UPPF-2", dec!(200.00));
        duplicate.consignment_id = first.consignment_id().clone();

        let stored = store.insert(first.clone());
        let again = store.insert(duplicate);

        assert_eq!(stored.id(), first.id());
        assert_eq!(again.id(), first.id());
        assert_eq!(store.len(), 1);
        assert!(store.by_number("UPPF-2").is_none());
    }

    #[test]
    fn test_update_and_indexes() {
        let store = InMemoryClaims::new();
        let mut claim = store.insert(Claim::draft_for_test("UPPF-1", dec!(100.00)));
        claim.transition(ClaimStatus::ManualReview, "test", Utc::now()).unwrap();
        store.update(&claim, ClaimStatus::Draft).unwrap();

        assert_eq!(store.get(claim.id()).unwrap().status(), ClaimStatus::ManualReview);
        assert_eq!(store.by_number("UPPF-1").unwrap().id(), claim.id());
        assert_eq!(store.with_status(ClaimStatus::ManualReview).len(), 1);
        assert_eq!(store.in_window(&WindowId::new("W1")).len(), 1);
        assert!(store.in_window(&WindowId::new("W2")).is_empty());
    }

    #[test]
    fn test_update_unknown_claim_fails() {
        let store = InMemoryClaims::new();
        let claim = Claim::draft_for_test("UPPF-1", dec!(100.00));
        assert!(store.update(&claim, ClaimStatus::Draft).is_err());
    }

    #[test]
    fn test_update_rejects_stale_status() {
        let store = InMemoryClaims::new();
        let original = store.insert(Claim::draft_for_test("UPPF-1", dec!(100.00)));

        let mut cancelled = original.clone();
        cancelled.transition(ClaimStatus::Cancelled, "withdrawn", Utc::now()).unwrap();
        store.update(&cancelled, ClaimStatus::Draft).unwrap();

        // A writer still holding the draft copy must not overwrite the cancellation.
        let mut review = original;
        review.transition(ClaimStatus::ManualReview, "late writer", Utc::now()).unwrap();
        let err = store.update(&review, ClaimStatus::Draft).unwrap_err();
        assert!(matches!(err, EngineError::StaleClaim { .. }));
        assert_eq!(store.get(review.id()).unwrap().status(), ClaimStatus::Cancelled);
    }

    #[test]
    fn test_sequence_starts_at_one() {
        let store = InMemoryClaims::new();
        assert_eq!(store.next_sequence(), 1);
        assert_eq!(store.next_sequence(), 2);
    }

    #[test]
    fn test_delivered_oldest_first() {
        let now = Utc::now();
        let make = |id: &str, at| {
            Consignment::new(ConsignmentId::new(id), RouteId::new("R1"), ProductCode::new("AGO"), dec!(100), dec!(120))
                .with_delivered_at(at)
        };
        let store: InMemoryConsignments = vec![
            make("C2", now),
            make("C1", now - Duration::hours(2)),
            make("C3", now).with_status(DeliveryStatus::InTransit),
        ]
        .into_iter()
        .collect();

        let ids: Vec<String> = store.delivered().iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["C1", "C2"]);
    }

    #[test]
    fn test_missing_evidence_is_empty_bundle() {
        let store = InMemoryEvidence::new();
        assert_eq!(store.evidence(&ConsignmentId::new("C1")), EvidenceBundle::default());
    }
}
