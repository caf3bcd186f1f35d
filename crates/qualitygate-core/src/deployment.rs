// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! A gate wired to the local reference backend, with persistence.

use crate::acl::AccessControlManager;
use crate::compute::{InputContext, InputProof};
use crate::config::GateConfig;
use crate::coprocessor::{CoprocessorKeys, LocalCoprocessor};
use crate::decryption::DecryptionService;
use crate::error::{GateError, GateResult};
use crate::evaluator::SealedMetrics;
use crate::gate::{GateState, QualityGate};
use crate::handle::{Handle, Identity};
use crate::snapshot::{self, DataDirLock, GateSnapshot, SnapshotError, SNAPSHOT_VERSION};
use crate::thresholds::SealedRules;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug)]
pub struct LocalDeployment {
    config: GateConfig,
    coprocessor: Arc<LocalCoprocessor>,
    acl: Arc<AccessControlManager>,
    gate: QualityGate,
    /// Held from `init` or `open` until drop, so a second opener sees every
    /// save made through this one.
    lock: Option<DataDirLock>,
}

impl LocalDeployment {
    /// In-memory deployment with fresh backend keys.
    pub fn bootstrap(config: GateConfig, keys: CoprocessorKeys) -> GateResult<Self> {
        let coprocessor = Arc::new(LocalCoprocessor::new(keys));
        let acl = Arc::new(AccessControlManager::new(config.contract_identity)?);
        let gate = QualityGate::new(&config, coprocessor.clone(), acl.clone())?;
        Ok(Self {
            config,
            coprocessor,
            acl,
            gate,
            lock: None,
        })
    }

    /// Creates a new deployment under `data_dir`. Refuses to overwrite one.
    pub fn init(data_dir: &Path, config: GateConfig) -> Result<Self, SnapshotError> {
        config.validate()?;
        let lock = DataDirLock::acquire(data_dir)?;
        if snapshot::is_initialized(data_dir) {
            return Err(SnapshotError::AlreadyInitialized(data_dir.to_path_buf()));
        }
        let keys = CoprocessorKeys::generate();
        snapshot::save_keys(data_dir, &keys)?;
        let mut deployment = Self::bootstrap(config, keys)?;
        deployment.lock = Some(lock);
        deployment.save(data_dir)?;
        tracing::info!(
            target: "qualitygate.admin",
            data_dir = %data_dir.display(),
            contract = %deployment.gate.contract_identity(),
            "deployment initialized"
        );
        Ok(deployment)
    }

    /// Opens an existing deployment, waiting while another holder has the
    /// directory open.
    pub fn open(data_dir: &Path) -> Result<Self, SnapshotError> {
        if !snapshot::is_initialized(data_dir) {
            return Err(SnapshotError::NotInitialized(data_dir.to_path_buf()));
        }
        let lock = DataDirLock::acquire(data_dir)?;
        let snap = snapshot::load_snapshot(data_dir)?;
        let keys = snapshot::load_keys(data_dir)?;
        let mut deployment = Self::restore(snap, keys)?;
        deployment.lock = Some(lock);
        Ok(deployment)
    }

    pub fn restore(snap: GateSnapshot, keys: CoprocessorKeys) -> Result<Self, SnapshotError> {
        let contract = snap.config.contract_identity;
        let coprocessor = Arc::new(LocalCoprocessor::restore(keys, snap.ciphertexts));
        let acl = Arc::new(AccessControlManager::restore(contract, snap.acl)?);
        let state = GateState {
            roles: snap.roles,
            thresholds: snap.thresholds,
            batches: snap.batches,
            events: snap.events,
        };
        let gate = QualityGate::restore(contract, state, coprocessor.clone(), acl.clone())?;
        Ok(Self {
            config: snap.config,
            coprocessor,
            acl,
            gate,
            lock: None,
        })
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let state = self.gate.state();
        GateSnapshot {
            version: SNAPSHOT_VERSION,
            config: self.config.clone(),
            roles: state.roles,
            thresholds: state.thresholds,
            batches: state.batches,
            acl: self.acl.snapshot(),
            events: state.events,
            ciphertexts: self.coprocessor.snapshot(),
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), SnapshotError> {
        snapshot::save_snapshot(data_dir, &self.snapshot())
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn coprocessor(&self) -> &Arc<LocalCoprocessor> {
        &self.coprocessor
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Whether this deployment holds its data directory open.
    pub fn holds_data_dir(&self) -> bool {
        self.lock.is_some()
    }

    pub fn decryption_service(&self) -> DecryptionService {
        DecryptionService::new(
            self.acl.clone(),
            self.coprocessor.clone(),
            self.config.decryption_max_validity_days,
        )
    }

    /// Drops ciphertexts no ACL entry references: metric inputs, intermediate
    /// comparisons, and sealed values never submitted. Bounds and verdicts
    /// always carry grants and are kept. Returns how many were dropped.
    pub fn prune_unreferenced(&mut self) -> usize {
        let referenced: HashSet<Handle> = self
            .acl
            .snapshot()
            .into_iter()
            .map(|entry| entry.handle)
            .collect();
        let dropped = self.coprocessor.retain(|h| referenced.contains(h));
        tracing::info!(
            target: "qualitygate.snapshot",
            dropped,
            kept = self.coprocessor.len(),
            "unreferenced ciphertexts pruned"
        );
        dropped
    }

    /// Seals four threshold values on behalf of `caller`, standing in for
    /// client-side encryption.
    pub fn seal_rules(
        &self,
        caller: Identity,
        values: [u16; 4],
    ) -> GateResult<(SealedRules, InputProof)> {
        let (v, proof) = self.seal_four(caller, values)?;
        Ok((
            SealedRules {
                max_impurity: v[0],
                max_moisture: v[1],
                min_density: v[2],
                min_hardness: v[3],
            },
            proof,
        ))
    }

    /// Seals impurity, moisture, density, and hardness readings on behalf of
    /// `caller`.
    pub fn seal_metrics(
        &self,
        caller: Identity,
        values: [u16; 4],
    ) -> GateResult<(SealedMetrics, InputProof)> {
        let (v, proof) = self.seal_four(caller, values)?;
        Ok((
            SealedMetrics {
                impurity: v[0],
                moisture: v[1],
                density: v[2],
                hardness: v[3],
            },
            proof,
        ))
    }

    fn seal_four(
        &self,
        caller: Identity,
        values: [u16; 4],
    ) -> GateResult<([crate::handle::ExternalU16; 4], InputProof)> {
        let ctx = InputContext {
            contract: self.gate.contract_identity(),
            user: caller,
        };
        let sealed = self.coprocessor.encrypt_inputs(&values, &ctx)?;
        let handles: [_; 4] = sealed
            .values
            .try_into()
            .map_err(|_| GateError::Internal("backend returned wrong input count".to_string()))?;
        Ok((handles, sealed.proof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Decryptor;
    use crate::handle::BatchId;

    fn id(b: u8) -> Identity {
        Identity::from_bytes([b; 20])
    }

    fn config() -> GateConfig {
        GateConfig::new(id(0xc0), id(1), id(2))
    }

    #[test]
    fn init_then_open_restores_gate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let deployment = LocalDeployment::init(dir.path(), config()).expect("init");
        let (sealed, proof) = deployment.seal_metrics(id(9), [1, 2, 3, 4]).expect("seal");
        let verdict = deployment
            .gate()
            .submit_batch_and_check(id(9), BatchId::from_label("lot"), &sealed, &proof)
            .expect("submit");
        deployment.save(dir.path()).expect("save");
        let saved = deployment.snapshot();
        drop(deployment);

        let reopened = LocalDeployment::open(dir.path()).expect("open");
        assert_eq!(
            reopened.gate().get_verdict_handle(&BatchId::from_label("lot")),
            Some(verdict)
        );
        assert_eq!(reopened.snapshot(), saved);
    }

    #[test]
    fn second_open_sees_first_registration() {
        let dir = tempfile::tempdir().expect("tempdir");
        drop(LocalDeployment::init(dir.path(), config()).expect("init"));
        let lot = BatchId::from_label("X");

        let first = LocalDeployment::open(dir.path()).expect("open first");
        assert!(first.holds_data_dir());
        std::thread::scope(|s| {
            let second = s.spawn(|| {
                let d = LocalDeployment::open(dir.path())?;
                let (sealed, proof) = d.seal_metrics(id(8), [1, 2, 3, 4])?;
                let outcome = d.gate().submit_batch_and_check(id(8), lot, &sealed, &proof);
                d.save(dir.path())?;
                Ok::<_, SnapshotError>(outcome)
            });
            std::thread::sleep(std::time::Duration::from_millis(100));
            assert!(!second.is_finished());

            let (sealed, proof) = first.seal_metrics(id(9), [1, 2, 3, 4]).expect("seal");
            first
                .gate()
                .submit_batch_and_check(id(9), lot, &sealed, &proof)
                .expect("first submit");
            first.save(dir.path()).expect("save");
            drop(first);

            let outcome = second.join().expect("join").expect("second open");
            assert_eq!(outcome, Err(GateError::DuplicateBatch(lot)));
        });

        let reopened = LocalDeployment::open(dir.path()).expect("reopen");
        let record = reopened.gate().batch_record(&lot).expect("record");
        assert_eq!(record.submitter, id(9));
        assert_eq!(reopened.gate().batch_count(), 1);
    }

    #[test]
    fn prune_keeps_bounds_and_verdicts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut deployment = LocalDeployment::init(dir.path(), config()).expect("init");
        let (rules, proof) = deployment.seal_rules(id(1), [500, 1000, 300, 50]).expect("seal");
        deployment
            .gate()
            .set_rules_encrypted(id(1), &rules, &proof)
            .expect("rules");
        let (sealed, proof) = deployment.seal_metrics(id(9), [100, 200, 400, 60]).expect("seal");
        let verdict = deployment
            .gate()
            .submit_batch_and_check(id(9), BatchId::from_label("A"), &sealed, &proof)
            .expect("submit");
        let (rejected, proof) = deployment.seal_metrics(id(9), [1, 2, 3, 4]).expect("seal");
        assert!(deployment
            .gate()
            .submit_batch_and_check(id(9), BatchId::from_label("A"), &rejected, &proof)
            .is_err());

        let before = deployment.coprocessor().len();
        let dropped = deployment.prune_unreferenced();
        assert!(dropped > 0);
        assert_eq!(deployment.coprocessor().len(), before - dropped);
        assert_eq!(deployment.prune_unreferenced(), 0);

        let cop = deployment.coprocessor();
        assert!(cop.decrypt_bool(verdict.handle()).expect("verdict"));
        for bound in deployment.gate().get_rule_handles().handles() {
            cop.decrypt_u16(bound.handle()).expect("bound kept");
        }
        assert!(cop.decrypt_u16(rejected.impurity.handle()).is_err());

        let (sealed, proof) = deployment.seal_metrics(id(9), [100, 200, 400, 60]).expect("seal");
        deployment
            .gate()
            .submit_batch_and_check(id(9), BatchId::from_label("B"), &sealed, &proof)
            .expect("submit after prune");
    }

    #[test]
    fn init_refuses_existing_deployment() {
        let dir = tempfile::tempdir().expect("tempdir");
        LocalDeployment::init(dir.path(), config()).expect("init");
        assert!(matches!(
            LocalDeployment::init(dir.path(), config()),
            Err(SnapshotError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn init_rejects_invalid_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = GateConfig::new(id(0xc0), Identity::ZERO, id(2));
        assert!(matches!(
            LocalDeployment::init(dir.path(), bad),
            Err(SnapshotError::Config(_))
        ));
        assert!(!snapshot::is_initialized(dir.path()));
    }
}
