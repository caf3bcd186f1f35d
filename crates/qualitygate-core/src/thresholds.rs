// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::acl::{AccessControlManager, StagedGrants};
use crate::compute::{EncryptedCompute, InputContext, InputProof};
use crate::error::GateResult;
use crate::handle::{EncryptedU16, ExternalU16};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

/// Upper bounds default to this so every metric passes.
pub const ACCEPT_ALL_MAX: u16 = u16::MAX;
/// Lower bounds default to this so every metric passes.
pub const ACCEPT_ALL_MIN: u16 = 0;

/// The four encrypted acceptance bounds. Always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub max_impurity: EncryptedU16,
    pub max_moisture: EncryptedU16,
    pub min_density: EncryptedU16,
    pub min_hardness: EncryptedU16,
}

impl ThresholdSet {
    pub fn handles(&self) -> [EncryptedU16; 4] {
        [
            self.max_impurity,
            self.max_moisture,
            self.min_density,
            self.min_hardness,
        ]
    }
}

/// Externally sealed replacement bounds, all covered by one proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedRules {
    pub max_impurity: ExternalU16,
    pub max_moisture: ExternalU16,
    pub min_density: ExternalU16,
    pub min_hardness: ExternalU16,
}

#[derive(Debug)]
pub struct ThresholdStore {
    current: RwLock<ThresholdSet>,
}

impl ThresholdStore {
    /// Seeds the accept-all defaults and grants the evaluator access to each.
    pub fn initialize(
        compute: &dyn EncryptedCompute,
        acl: &AccessControlManager,
    ) -> GateResult<Self> {
        let set = ThresholdSet {
            max_impurity: compute.trivial_u16(ACCEPT_ALL_MAX)?,
            max_moisture: compute.trivial_u16(ACCEPT_ALL_MAX)?,
            min_density: compute.trivial_u16(ACCEPT_ALL_MIN)?,
            min_hardness: compute.trivial_u16(ACCEPT_ALL_MIN)?,
        };
        acl.commit(self_grants(&set));
        Ok(Self::from_set(set))
    }

    pub fn from_set(set: ThresholdSet) -> Self {
        Self {
            current: RwLock::new(set),
        }
    }

    pub fn current(&self) -> ThresholdSet {
        *self.current.read()
    }

    /// Pins the current set. A replacement waits until every pin is dropped.
    pub fn read(&self) -> RwLockReadGuard<'_, ThresholdSet> {
        self.current.read()
    }

    /// Decodes all four bounds before touching stored state; any proof
    /// failure leaves the previous set in place. `on_replaced` runs while the
    /// new set is still exclusively held.
    pub fn replace(
        &self,
        compute: &dyn EncryptedCompute,
        acl: &AccessControlManager,
        rules: &SealedRules,
        proof: &InputProof,
        ctx: &InputContext,
        on_replaced: impl FnOnce(&ThresholdSet),
    ) -> GateResult<ThresholdSet> {
        let next = ThresholdSet {
            max_impurity: compute.decode_u16(rules.max_impurity, 0, proof, ctx)?,
            max_moisture: compute.decode_u16(rules.max_moisture, 1, proof, ctx)?,
            min_density: compute.decode_u16(rules.min_density, 2, proof, ctx)?,
            min_hardness: compute.decode_u16(rules.min_hardness, 3, proof, ctx)?,
        };
        let mut current = self.current.write();
        acl.commit(self_grants(&next));
        *current = next;
        on_replaced(&next);
        Ok(next)
    }
}

fn self_grants(set: &ThresholdSet) -> StagedGrants {
    let mut staged = StagedGrants::new();
    for bound in set.handles() {
        staged.grant_self(bound.handle());
    }
    staged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Decryptor;
    use crate::coprocessor::{CoprocessorKeys, LocalCoprocessor};
    use crate::handle::Identity;

    fn setup() -> (LocalCoprocessor, AccessControlManager, InputContext) {
        let contract = Identity::from_bytes([0xc0; 20]);
        (
            LocalCoprocessor::new(CoprocessorKeys::from_bytes([1u8; 32], [2u8; 32])),
            AccessControlManager::new(contract).expect("acl"),
            InputContext {
                contract,
                user: Identity::from_bytes([0x0a; 20]),
            },
        )
    }

    fn plain(cop: &LocalCoprocessor, set: &ThresholdSet) -> [u16; 4] {
        set.handles()
            .map(|h| cop.decrypt_u16(h.handle()).expect("plaintext"))
    }

    fn seal(cop: &LocalCoprocessor, ctx: &InputContext, v: [u16; 4]) -> (SealedRules, InputProof) {
        let sealed = cop.encrypt_inputs(&v, ctx).expect("seal");
        (
            SealedRules {
                max_impurity: sealed.values[0],
                max_moisture: sealed.values[1],
                min_density: sealed.values[2],
                min_hardness: sealed.values[3],
            },
            sealed.proof,
        )
    }

    #[test]
    fn defaults_accept_everything() {
        let (cop, acl, _) = setup();
        let store = ThresholdStore::initialize(&cop, &acl).expect("init");
        let set = store.current();
        assert_eq!(plain(&cop, &set), [u16::MAX, u16::MAX, 0, 0]);
        for bound in set.handles() {
            assert!(acl.is_allowed(bound.handle(), acl.contract()));
            assert!(!acl.is_public(bound.handle()));
        }
    }

    #[test]
    fn replace_swaps_all_four() {
        let (cop, acl, ctx) = setup();
        let store = ThresholdStore::initialize(&cop, &acl).expect("init");
        let (rules, proof) = seal(&cop, &ctx, [500, 1000, 300, 50]);
        store
            .replace(&cop, &acl, &rules, &proof, &ctx, |_| {})
            .expect("replace");
        let set = store.current();
        assert_eq!(plain(&cop, &set), [500, 1000, 300, 50]);
        for bound in set.handles() {
            assert!(acl.is_allowed(bound.handle(), acl.contract()));
        }
    }

    #[test]
    fn replace_with_mixed_proofs_keeps_previous_set() {
        let (cop, acl, ctx) = setup();
        let store = ThresholdStore::initialize(&cop, &acl).expect("init");
        let before = store.current();
        let (mut rules, proof) = seal(&cop, &ctx, [1, 2, 3, 4]);
        let (other, _) = seal(&cop, &ctx, [9, 9, 9, 9]);
        rules.min_hardness = other.min_hardness;
        let err = store
            .replace(&cop, &acl, &rules, &proof, &ctx, |_| {})
            .expect_err("foreign value");
        assert_eq!(err.kind(), "proof_validation");
        assert_eq!(store.current(), before);
    }

    #[test]
    fn replace_rejects_bounds_sealed_in_wrong_order() {
        let (cop, acl, ctx) = setup();
        let store = ThresholdStore::initialize(&cop, &acl).expect("init");
        let before = store.current();
        let (mut rules, proof) = seal(&cop, &ctx, [500, 1000, 300, 50]);
        rules.max_moisture = rules.max_impurity;
        let mut replaced = false;
        let err = store
            .replace(&cop, &acl, &rules, &proof, &ctx, |_| replaced = true)
            .expect_err("same value in two slots");
        assert_eq!(err.kind(), "proof_validation");
        assert!(!replaced);
        assert_eq!(store.current(), before);
    }

    #[test]
    fn pinned_set_blocks_replacement() {
        let (cop, acl, ctx) = setup();
        let store = ThresholdStore::initialize(&cop, &acl).expect("init");
        let (rules, proof) = seal(&cop, &ctx, [500, 1000, 300, 50]);
        let pinned = store.read();
        std::thread::scope(|s| {
            let writer = s.spawn(|| {
                store
                    .replace(&cop, &acl, &rules, &proof, &ctx, |_| {})
                    .expect("replace")
            });
            std::thread::sleep(std::time::Duration::from_millis(50));
            assert!(!writer.is_finished());
            assert_eq!(plain(&cop, &pinned), [u16::MAX, u16::MAX, 0, 0]);
            drop(pinned);
            writer.join().expect("join");
        });
        assert_eq!(plain(&cop, &store.current()), [500, 1000, 300, 50]);
    }
}
