// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::handle::{BatchId, Handle, Identity};
use crate::thresholds::ThresholdSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Notifications observable by anyone. They reveal that something happened
/// and which handles are involved, never a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GateEvent {
    BatchChecked {
        batch_id: BatchId,
        submitter: Identity,
        verdict_handle: Handle,
    },
    RulesUpdated {
        rules: ThresholdSet,
    },
    RulesMadePublic,
    VerdictMadePublic {
        batch_id: BatchId,
    },
    OwnershipTransferred {
        previous: Identity,
        new_owner: Identity,
    },
    QualityAppUpdated {
        previous: Identity,
        new_app: Identity,
    },
}

impl GateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BatchChecked { .. } => "batch_checked",
            Self::RulesUpdated { .. } => "rules_updated",
            Self::RulesMadePublic => "rules_made_public",
            Self::VerdictMadePublic { .. } => "verdict_made_public",
            Self::OwnershipTransferred { .. } => "ownership_transferred",
            Self::QualityAppUpdated { .. } => "quality_app_updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    #[serde(flatten)]
    pub event: GateEvent,
}

/// Append-only notification log. Sequence numbers start at 1.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Mutex<Vec<EventRecord>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(entries: Vec<EventRecord>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn emit(&self, event: GateEvent) -> u64 {
        let mut entries = self.entries.lock();
        let sequence = entries.last().map(|e| e.sequence).unwrap_or(0) + 1;
        tracing::info!(target: "qualitygate.events", sequence, event = event.name(), payload = ?event, "gate event");
        entries.push(EventRecord { sequence, event });
        sequence
    }

    /// Records with a sequence number strictly greater than `sequence`.
    pub fn since(&self, sequence: u64) -> Vec<EventRecord> {
        let entries = self.entries.lock();
        let start = entries.partition_point(|e| e.sequence <= sequence);
        entries[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.entries.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_increase_and_since_filters() {
        let log = EventLog::new();
        assert_eq!(log.emit(GateEvent::RulesMadePublic), 1);
        assert_eq!(
            log.emit(GateEvent::VerdictMadePublic {
                batch_id: BatchId::from_label("X")
            }),
            2
        );
        let tail = log.since(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, 2);
        assert!(log.since(2).is_empty());
        assert_eq!(log.since(0).len(), 2);
    }

    #[test]
    fn batch_checked_serializes_flat() {
        let record = EventRecord {
            sequence: 7,
            event: GateEvent::BatchChecked {
                batch_id: BatchId::from_bytes([1u8; 32]),
                submitter: Identity::from_bytes([2u8; 20]),
                verdict_handle: Handle::from_bytes([3u8; 32]),
            },
        };
        let value = serde_json::to_value(&record).expect("json");
        assert_eq!(value["event"], "batch_checked");
        assert_eq!(value["sequence"], 7);
        assert_eq!(
            value["verdict_handle"],
            format!("0x{}", "03".repeat(32))
        );
        let back: EventRecord = serde_json::from_value(value).expect("parse");
        assert_eq!(back, record);
    }
}
