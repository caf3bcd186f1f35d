// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! The encrypted rule gate: thresholds, batch registration, verdict ACLs,
//! and administration behind one public operation surface.
//!
//! Every operation runs to completion or fails without mutating state. Lock
//! order is admin, then thresholds, then registry, then ACL. A submission
//! holds the roles and the threshold set for its whole run, so rule and role
//! changes take effect strictly before or after it.

use crate::acl::{AccessControlManager, StagedGrants};
use crate::admin::{AdminControl, Roles};
use crate::compute::{EncryptedCompute, InputContext, InputProof};
use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::evaluator::{RuleEvaluator, SealedMetrics};
use crate::events::{EventLog, EventRecord, GateEvent};
use crate::handle::{BatchId, EncryptedBool, Handle, Identity};
use crate::registry::{BatchRecord, BatchRegistry};
use crate::thresholds::{SealedRules, ThresholdSet, ThresholdStore};
use std::sync::Arc;

macro_rules! reject {
    ($target:literal, $operation:literal, $caller:expr, $err:expr) => {
        tracing::warn!(
            target: $target,
            operation = $operation,
            caller = %$caller,
            kind = $err.kind(),
            error = %$err,
            "operation rejected"
        )
    };
}

/// Persisted state needed to rebuild a gate.
#[derive(Debug, Clone)]
pub struct GateState {
    pub roles: Roles,
    pub thresholds: ThresholdSet,
    pub batches: Vec<BatchRecord>,
    pub events: Vec<EventRecord>,
}

pub struct QualityGate {
    contract: Identity,
    compute: Arc<dyn EncryptedCompute>,
    acl: Arc<AccessControlManager>,
    admin: AdminControl,
    thresholds: ThresholdStore,
    registry: BatchRegistry,
    events: EventLog,
}

impl std::fmt::Debug for QualityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGate")
            .field("contract", &self.contract)
            .field("roles", &self.admin.roles())
            .field("batches", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl QualityGate {
    /// Deploys a fresh gate with accept-all thresholds.
    pub fn new(
        config: &GateConfig,
        compute: Arc<dyn EncryptedCompute>,
        acl: Arc<AccessControlManager>,
    ) -> GateResult<Self> {
        check_contract(config.contract_identity, &acl)?;
        let roles = Roles::new(config.initial_owner, config.initial_quality_app)?;
        let thresholds = ThresholdStore::initialize(compute.as_ref(), &acl)?;
        tracing::info!(
            target: "qualitygate.admin",
            contract = %config.contract_identity,
            owner = %roles.owner,
            quality_app = %roles.quality_app,
            "gate initialized with accept-all thresholds"
        );
        Ok(Self {
            contract: config.contract_identity,
            compute,
            acl,
            admin: AdminControl::new(roles),
            thresholds,
            registry: BatchRegistry::new(),
            events: EventLog::new(),
        })
    }

    pub fn restore(
        contract: Identity,
        state: GateState,
        compute: Arc<dyn EncryptedCompute>,
        acl: Arc<AccessControlManager>,
    ) -> GateResult<Self> {
        check_contract(contract, &acl)?;
        let roles = Roles::new(state.roles.owner, state.roles.quality_app)?;
        Ok(Self {
            contract,
            compute,
            acl,
            admin: AdminControl::new(roles),
            thresholds: ThresholdStore::from_set(state.thresholds),
            registry: BatchRegistry::from_records(state.batches)?,
            events: EventLog::restore(state.events),
        })
    }

    pub fn state(&self) -> GateState {
        GateState {
            roles: self.admin.roles(),
            thresholds: self.thresholds.current(),
            batches: self.registry.records(),
            events: self.events.snapshot(),
        }
    }

    /// Owner-only. Replaces all four bounds from values sealed under one
    /// proof.
    pub fn set_rules_encrypted(
        &self,
        caller: Identity,
        rules: &SealedRules,
        proof: &InputProof,
    ) -> GateResult<ThresholdSet> {
        let result = self.replace_rules(caller, rules, proof);
        match &result {
            Ok(_) => tracing::info!(target: "qualitygate.rules", caller = %caller, "thresholds replaced"),
            Err(err) => reject!("qualitygate.rules", "set_rules_encrypted", caller, err),
        }
        result
    }

    fn replace_rules(
        &self,
        caller: Identity,
        rules: &SealedRules,
        proof: &InputProof,
    ) -> GateResult<ThresholdSet> {
        let _owner = self.admin.authorize_owner(caller, "set rules")?;
        let ctx = self.input_context(caller);
        self.thresholds.replace(
            self.compute.as_ref(),
            &self.acl,
            rules,
            proof,
            &ctx,
            |next| {
                self.events.emit(GateEvent::RulesUpdated { rules: *next });
            },
        )
    }

    /// Owner-only. Makes all four current bounds publicly decryptable.
    pub fn make_rules_public(&self, caller: Identity) -> GateResult<()> {
        let result = self.publish_rules(caller);
        match &result {
            Ok(()) => tracing::info!(target: "qualitygate.rules", caller = %caller, "thresholds made public"),
            Err(err) => reject!("qualitygate.rules", "make_rules_public", caller, err),
        }
        result
    }

    fn publish_rules(&self, caller: Identity) -> GateResult<()> {
        let _owner = self.admin.authorize_owner(caller, "make rules public")?;
        let rules = self.thresholds.read();
        let mut staged = StagedGrants::new();
        for bound in rules.handles() {
            staged.grant_public(bound.handle());
        }
        if self.acl.commit(staged) > 0 {
            self.events.emit(GateEvent::RulesMadePublic);
        }
        Ok(())
    }

    pub fn get_rule_handles(&self) -> ThresholdSet {
        self.thresholds.current()
    }

    /// Registers `batch_id`, evaluates the sealed metrics against the current
    /// thresholds, and grants the verdict to the caller, the quality app, and
    /// the evaluator.
    pub fn submit_batch_and_check(
        &self,
        caller: Identity,
        batch_id: BatchId,
        metrics: &SealedMetrics,
        proof: &InputProof,
    ) -> GateResult<EncryptedBool> {
        let result = self.register_batch(caller, batch_id, metrics, proof);
        if let Err(err) = &result {
            tracing::warn!(
                target: "qualitygate.batch",
                batch_id = %batch_id,
                caller = %caller,
                kind = err.kind(),
                error = %err,
                "batch submission rejected"
            );
        }
        result
    }

    fn register_batch(
        &self,
        caller: Identity,
        batch_id: BatchId,
        metrics: &SealedMetrics,
        proof: &InputProof,
    ) -> GateResult<EncryptedBool> {
        // Rules and roles stay pinned through the event so the submission
        // serializes against replacements and role changes.
        let roles = self.admin.read();
        let rules = self.thresholds.read();
        let reservation = self.registry.reserve(batch_id)?;

        let ctx = self.input_context(caller);
        let verdict = RuleEvaluator::new(self.compute.as_ref())
            .check(&self.acl, &rules, metrics, proof, &ctx)?;

        let mut grants = StagedGrants::new();
        grants.grant_self(verdict.handle());
        grants.grant_address(verdict.handle(), caller)?;
        grants.grant_address(verdict.handle(), roles.quality_app)?;

        let record = reservation.commit(caller, verdict, &self.acl, grants);
        let verdict_handle = Handle::from_bytes(self.compute.serialize(record.verdict.handle()));
        self.events.emit(GateEvent::BatchChecked {
            batch_id,
            submitter: caller,
            verdict_handle,
        });
        tracing::info!(
            target: "qualitygate.batch",
            batch_id = %batch_id,
            submitter = %caller,
            verdict_handle = %verdict_handle,
            "batch registered"
        );
        Ok(record.verdict)
    }

    /// Stored verdict handle, or `None` for a batch never registered.
    pub fn get_verdict_handle(&self, batch_id: &BatchId) -> Option<EncryptedBool> {
        self.registry.get(batch_id).map(|r| r.verdict)
    }

    /// Owner-only. Makes one batch's verdict publicly decryptable.
    pub fn make_verdict_public(&self, caller: Identity, batch_id: BatchId) -> GateResult<()> {
        let result = self.publish_verdict(caller, batch_id);
        match &result {
            Ok(()) => tracing::info!(target: "qualitygate.batch", batch_id = %batch_id, "verdict made public"),
            Err(err) => reject!("qualitygate.batch", "make_verdict_public", caller, err),
        }
        result
    }

    fn publish_verdict(&self, caller: Identity, batch_id: BatchId) -> GateResult<()> {
        let _owner = self.admin.authorize_owner(caller, "make verdict public")?;
        let record = self
            .registry
            .get(&batch_id)
            .ok_or(GateError::UnknownBatch(batch_id))?;
        if self.acl.grant_public(record.verdict.handle()) {
            self.events.emit(GateEvent::VerdictMadePublic { batch_id });
        }
        Ok(())
    }

    pub fn transfer_ownership(&self, caller: Identity, new_owner: Identity) -> GateResult<()> {
        let emitted = |previous: Identity| {
            self.events.emit(GateEvent::OwnershipTransferred {
                previous,
                new_owner,
            });
        };
        match self.admin.transfer_ownership(caller, new_owner, emitted) {
            Ok(previous) => {
                tracing::info!(target: "qualitygate.admin", previous = %previous, new_owner = %new_owner, "ownership transferred");
                Ok(())
            }
            Err(err) => {
                reject!("qualitygate.admin", "transfer_ownership", caller, &err);
                Err(err)
            }
        }
    }

    pub fn set_quality_app(&self, caller: Identity, new_app: Identity) -> GateResult<()> {
        let emitted = |previous: Identity| {
            self.events
                .emit(GateEvent::QualityAppUpdated { previous, new_app });
        };
        match self.admin.set_quality_app(caller, new_app, emitted) {
            Ok(previous) => {
                tracing::info!(target: "qualitygate.admin", previous = %previous, new_app = %new_app, "quality app updated");
                Ok(())
            }
            Err(err) => {
                reject!("qualitygate.admin", "set_quality_app", caller, &err);
                Err(err)
            }
        }
    }

    pub fn contract_identity(&self) -> Identity {
        self.contract
    }

    pub fn owner(&self) -> Identity {
        self.admin.owner()
    }

    pub fn quality_app(&self) -> Identity {
        self.admin.quality_app()
    }

    pub fn batch_exists(&self, batch_id: &BatchId) -> bool {
        self.registry.contains(batch_id)
    }

    pub fn batch_record(&self, batch_id: &BatchId) -> Option<BatchRecord> {
        self.registry.get(batch_id)
    }

    pub fn batch_count(&self) -> usize {
        self.registry.len()
    }

    pub fn batch_ids(&self) -> Vec<BatchId> {
        self.registry.batch_ids()
    }

    pub fn events_since(&self, sequence: u64) -> Vec<EventRecord> {
        self.events.since(sequence)
    }

    pub fn acl(&self) -> &Arc<AccessControlManager> {
        &self.acl
    }

    fn input_context(&self, caller: Identity) -> InputContext {
        InputContext {
            contract: self.contract,
            user: caller,
        }
    }
}

fn check_contract(contract: Identity, acl: &AccessControlManager) -> GateResult<()> {
    if contract.is_zero() {
        return Err(GateError::ZeroAddress { field: "contract" });
    }
    if acl.contract() != contract {
        return Err(GateError::InvalidArgument(
            "access control manager is bound to a different contract".to_string(),
        ));
    }
    Ok(())
}
