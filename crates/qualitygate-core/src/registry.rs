// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Write-once mapping from batch id to verdict handle.
//!
//! Registration is a reserve/commit pair. A reservation makes its batch id
//! the holder's exclusive lock domain: a concurrent registration for the same
//! id waits until the holder commits or drops, then observes the outcome.
//! Other ids proceed independently.

use crate::acl::{AccessControlManager, StagedGrants};
use crate::error::{GateError, GateResult};
use crate::handle::{BatchId, EncryptedBool, Identity};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub batch_id: BatchId,
    pub submitter: Identity,
    pub verdict: EncryptedBool,
}

#[derive(Debug, Default)]
struct RegistryState {
    records: HashMap<BatchId, BatchRecord>,
    in_flight: HashSet<BatchId>,
}

#[derive(Debug, Default)]
pub struct BatchRegistry {
    state: Mutex<RegistryState>,
    released: Condvar,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<BatchRecord>) -> GateResult<Self> {
        let mut map = HashMap::with_capacity(records.len());
        for record in records {
            if map.insert(record.batch_id, record).is_some() {
                return Err(GateError::DuplicateBatch(record.batch_id));
            }
        }
        Ok(Self {
            state: Mutex::new(RegistryState {
                records: map,
                in_flight: HashSet::new(),
            }),
            released: Condvar::new(),
        })
    }

    /// Claims `batch_id` for registration. Fails with `DuplicateBatch` once a
    /// record exists.
    pub fn reserve(&self, batch_id: BatchId) -> GateResult<BatchReservation<'_>> {
        let mut state = self.state.lock();
        while state.in_flight.contains(&batch_id) {
            self.released.wait(&mut state);
        }
        if state.records.contains_key(&batch_id) {
            return Err(GateError::DuplicateBatch(batch_id));
        }
        state.in_flight.insert(batch_id);
        Ok(BatchReservation {
            registry: self,
            batch_id,
            finished: false,
        })
    }

    pub fn get(&self, batch_id: &BatchId) -> Option<BatchRecord> {
        self.state.lock().records.get(batch_id).copied()
    }

    pub fn contains(&self, batch_id: &BatchId) -> bool {
        self.state.lock().records.contains_key(batch_id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_ids(&self) -> Vec<BatchId> {
        let mut ids: Vec<BatchId> = self.state.lock().records.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn records(&self) -> Vec<BatchRecord> {
        let mut out: Vec<BatchRecord> = self.state.lock().records.values().copied().collect();
        out.sort_by(|a, b| a.batch_id.cmp(&b.batch_id));
        out
    }

    fn release(&self, state: &mut RegistryState, batch_id: &BatchId) {
        state.in_flight.remove(batch_id);
        self.released.notify_all();
    }
}

/// Exclusive claim on one batch id. Dropping it without committing leaves
/// no trace.
#[derive(Debug)]
pub struct BatchReservation<'a> {
    registry: &'a BatchRegistry,
    batch_id: BatchId,
    finished: bool,
}

impl BatchReservation<'_> {
    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    /// Publishes the ACL grants and the record in one step.
    pub fn commit(
        mut self,
        submitter: Identity,
        verdict: EncryptedBool,
        acl: &AccessControlManager,
        grants: StagedGrants,
    ) -> BatchRecord {
        let record = BatchRecord {
            batch_id: self.batch_id,
            submitter,
            verdict,
        };
        let mut state = self.registry.state.lock();
        acl.commit(grants);
        state.records.insert(self.batch_id, record);
        self.registry.release(&mut state, &self.batch_id);
        self.finished = true;
        record
    }
}

impl Drop for BatchReservation<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut state = self.registry.state.lock();
            self.registry.release(&mut state, &self.batch_id);
        }
    }
}
