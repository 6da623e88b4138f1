//! Explicit event channel.
//!
//! Every stage that has something to announce receives an [`EventSink`]
//! from its caller. There is no global emitter.

use crate::claims::claim::{ClaimStatus, Priority};
use crate::claims::lifecycle::FollowUpTask;
use crate::core::ids::{ClaimId, ConsignmentId, WindowId};
use crate::reconciliation::three_way::ReconciliationStatus;
use crate::settlement::ledger::JournalEntry;
use crate::settlement::processor::{PaymentStatus, SettlementStatus};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    GpsValidated {
        consignment: ConsignmentId,
        confidence: f64,
        valid: bool,
        anomalies: usize,
    },
    ReconciliationCompleted {
        consignment: ConsignmentId,
        status: ReconciliationStatus,
        valid: bool,
    },
    ClaimGenerated {
        claim_id: ClaimId,
        claim_number: String,
        consignment: ConsignmentId,
        amount: Decimal,
        status: ClaimStatus,
        priority: Priority,
    },
    StatusChanged {
        claim_id: ClaimId,
        from: ClaimStatus,
        to: ClaimStatus,
        reason: String,
    },
    ClaimsSubmitted {
        submission_id: String,
        window: WindowId,
        claim_count: usize,
        total_amount: Decimal,
    },
    SettlementCompleted {
        settlement_id: String,
        window: WindowId,
        status: SettlementStatus,
        net_settlement: Decimal,
    },
    PaymentReconciled {
        settlement_id: String,
        bank_reference: String,
        status: PaymentStatus,
        variance: Decimal,
    },
    JournalEntry(JournalEntry),
    FollowUpScheduled(FollowUpTask),
    UnmatchedSettlementClaim {
        response_ref: String,
        claim_number: String,
    },
}

/// Receiver of engine events. Implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Forwards events into an mpsc channel. A dropped receiver is ignored.
pub struct ChannelSink {
    tx: Mutex<Sender<EngineEvent>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        if self.tx.lock().send(event).is_err() {
            log::debug!("event receiver dropped, discarding event");
        }
    }
}

/// Keeps every event in memory, for tests and the CLI report.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn drain(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn sample_event() -> EngineEvent {
        EngineEvent::UnmatchedSettlementClaim {
            response_ref: "NPA-1".into(),
            claim_number: "UPPF-20250101-000001".into(),
        }
    }

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.emit(sample_event());
        sink.emit(EngineEvent::GpsValidated {
            consignment: ConsignmentId::new("C1"),
            confidence: 90.0,
            valid: true,
            anomalies: 0,
        });
        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], EngineEvent::UnmatchedSettlementClaim { .. }));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (tx, rx) = mpsc::channel();
        let sink = ChannelSink::new(tx);
        sink.emit(sample_event());
        assert!(matches!(rx.recv().unwrap(), EngineEvent::UnmatchedSettlementClaim { .. }));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ChannelSink::new(tx).emit(sample_event());
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_string(&sample_event()).unwrap();
        assert!(json.contains("\"event\":\"unmatched_settlement_claim\""));
    }
}
