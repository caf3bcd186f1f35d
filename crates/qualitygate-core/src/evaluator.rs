// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Combinational rule evaluation over encrypted values.
//!
//! The evaluator always computes all four predicates and combines them with
//! the same balanced tree, `(impurity ∧ moisture) ∧ (density ∧ hardness)`.
//! Nothing here branches on a comparison result; the backend returns handles,
//! never booleans.

use crate::acl::AccessControlManager;
use crate::compute::{EncryptedCompute, InputContext, InputProof};
use crate::error::{GateError, GateResult};
use crate::handle::{EncryptedBool, EncryptedU16, ExternalU16};
use crate::thresholds::ThresholdSet;
use serde::{Deserialize, Serialize};

/// Four externally sealed measurements bound by one shared proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMetrics {
    pub impurity: ExternalU16,
    pub moisture: ExternalU16,
    pub density: ExternalU16,
    pub hardness: ExternalU16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub impurity: EncryptedU16,
    pub moisture: EncryptedU16,
    pub density: EncryptedU16,
    pub hardness: EncryptedU16,
}

pub struct RuleEvaluator<'a> {
    compute: &'a dyn EncryptedCompute,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(compute: &'a dyn EncryptedCompute) -> Self {
        Self { compute }
    }

    /// Validates every measurement against the shared proof. A single
    /// mismatch fails the whole decode.
    pub fn decode(
        &self,
        sealed: &SealedMetrics,
        proof: &InputProof,
        ctx: &InputContext,
    ) -> GateResult<Metrics> {
        Ok(Metrics {
            impurity: self.compute.decode_u16(sealed.impurity, 0, proof, ctx)?,
            moisture: self.compute.decode_u16(sealed.moisture, 1, proof, ctx)?,
            density: self.compute.decode_u16(sealed.density, 2, proof, ctx)?,
            hardness: self.compute.decode_u16(sealed.hardness, 3, proof, ctx)?,
        })
    }

    pub fn evaluate(&self, rules: &ThresholdSet, metrics: &Metrics) -> GateResult<EncryptedBool> {
        let c_imp = self
            .compute
            .compare_le(metrics.impurity, rules.max_impurity)?;
        let c_moi = self
            .compute
            .compare_le(metrics.moisture, rules.max_moisture)?;
        let c_den = self.compute.compare_ge(metrics.density, rules.min_density)?;
        let c_har = self
            .compute
            .compare_ge(metrics.hardness, rules.min_hardness)?;

        let purity = self.compute.and(c_imp, c_moi)?;
        let structure = self.compute.and(c_den, c_har)?;
        self.compute.and(purity, structure)
    }

    /// Decode then evaluate, after checking the evaluator may still compute
    /// on every stored bound.
    pub fn check(
        &self,
        acl: &AccessControlManager,
        rules: &ThresholdSet,
        sealed: &SealedMetrics,
        proof: &InputProof,
        ctx: &InputContext,
    ) -> GateResult<EncryptedBool> {
        for bound in rules.handles() {
            if !acl.is_allowed(bound.handle(), acl.contract()) {
                return Err(GateError::HandleAccessDenied(bound.handle()));
            }
        }
        let metrics = self.decode(sealed, proof, ctx)?;
        self.evaluate(rules, &metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Decryptor;
    use crate::coprocessor::{CoprocessorKeys, LocalCoprocessor};
    use crate::handle::Identity;
    use crate::thresholds::ThresholdStore;
    use proptest::prelude::*;

    struct Fixture {
        cop: LocalCoprocessor,
        acl: AccessControlManager,
        ctx: InputContext,
    }

    impl Fixture {
        fn new() -> Self {
            let contract = Identity::from_bytes([0xc0; 20]);
            Self {
                cop: LocalCoprocessor::new(CoprocessorKeys::from_bytes([1u8; 32], [2u8; 32])),
                acl: AccessControlManager::new(contract).expect("acl"),
                ctx: InputContext {
                    contract,
                    user: Identity::from_bytes([0x0a; 20]),
                },
            }
        }

        fn rules(&self, v: [u16; 4]) -> ThresholdSet {
            let set = ThresholdSet {
                max_impurity: self.cop.trivial_u16(v[0]).expect("bound"),
                max_moisture: self.cop.trivial_u16(v[1]).expect("bound"),
                min_density: self.cop.trivial_u16(v[2]).expect("bound"),
                min_hardness: self.cop.trivial_u16(v[3]).expect("bound"),
            };
            for bound in set.handles() {
                self.acl.grant_self(bound.handle());
            }
            set
        }

        fn seal(&self, v: [u16; 4]) -> (SealedMetrics, InputProof) {
            let sealed = self.cop.encrypt_inputs(&v, &self.ctx).expect("seal");
            (
                SealedMetrics {
                    impurity: sealed.values[0],
                    moisture: sealed.values[1],
                    density: sealed.values[2],
                    hardness: sealed.values[3],
                },
                sealed.proof,
            )
        }

        fn verdict(&self, rules: [u16; 4], metrics: [u16; 4]) -> bool {
            let rules = self.rules(rules);
            let (sealed, proof) = self.seal(metrics);
            let evaluator = RuleEvaluator::new(&self.cop);
            let verdict = evaluator
                .check(&self.acl, &rules, &sealed, &proof, &self.ctx)
                .expect("evaluate");
            self.cop.decrypt_bool(verdict.handle()).expect("plaintext")
        }
    }

    #[test]
    fn accepts_batch_within_bounds() {
        let f = Fixture::new();
        assert!(f.verdict([500, 1000, 300, 50], [100, 200, 400, 60]));
    }

    #[test]
    fn rejects_excess_impurity() {
        let f = Fixture::new();
        assert!(!f.verdict([500, 1000, 300, 50], [600, 200, 400, 60]));
    }

    #[test]
    fn bounds_are_inclusive() {
        let f = Fixture::new();
        assert!(f.verdict([500, 1000, 300, 50], [500, 1000, 300, 50]));
        assert!(!f.verdict([500, 1000, 300, 50], [500, 1000, 299, 50]));
    }

    #[test]
    fn accept_all_defaults_accept_extremes() {
        let f = Fixture::new();
        let store = ThresholdStore::initialize(&f.cop, &f.acl).expect("init");
        let (sealed, proof) = f.seal([u16::MAX, u16::MAX, 0, 0]);
        let verdict = RuleEvaluator::new(&f.cop)
            .check(&f.acl, &store.current(), &sealed, &proof, &f.ctx)
            .expect("evaluate");
        assert!(f.cop.decrypt_bool(verdict.handle()).expect("plaintext"));
    }

    #[test]
    fn bound_without_self_grant_is_refused() {
        let f = Fixture::new();
        let rules = ThresholdSet {
            max_impurity: f.cop.trivial_u16(1).expect("bound"),
            max_moisture: f.cop.trivial_u16(1).expect("bound"),
            min_density: f.cop.trivial_u16(1).expect("bound"),
            min_hardness: f.cop.trivial_u16(1).expect("bound"),
        };
        let (sealed, proof) = f.seal([1, 1, 1, 1]);
        let err = RuleEvaluator::new(&f.cop)
            .check(&f.acl, &rules, &sealed, &proof, &f.ctx)
            .expect_err("no grant");
        assert_eq!(err, GateError::HandleAccessDenied(rules.max_impurity.handle()));
    }

    #[test]
    fn value_reused_in_another_slot_is_rejected() {
        let f = Fixture::new();
        let rules = f.rules([500, 1000, 300, 50]);
        let (mut sealed, proof) = f.seal([600, 200, 400, 60]);
        sealed.impurity = sealed.hardness;
        let err = RuleEvaluator::new(&f.cop)
            .check(&f.acl, &rules, &sealed, &proof, &f.ctx)
            .expect_err("hardness reading in the impurity slot");
        assert_eq!(err.kind(), "proof_validation");

        let (mut sealed, proof) = f.seal([600, 200, 400, 60]);
        std::mem::swap(&mut sealed.impurity, &mut sealed.density);
        let err = RuleEvaluator::new(&f.cop)
            .check(&f.acl, &rules, &sealed, &proof, &f.ctx)
            .expect_err("permuted readings");
        assert_eq!(err.kind(), "proof_validation");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn verdict_matches_plaintext_predicate(
            rules in any::<[u16; 4]>(),
            metrics in any::<[u16; 4]>(),
        ) {
            let f = Fixture::new();
            let expected = metrics[0] <= rules[0]
                && metrics[1] <= rules[1]
                && metrics[2] >= rules[2]
                && metrics[3] >= rules[3];
            prop_assert_eq!(f.verdict(rules, metrics), expected);
        }
    }
}
