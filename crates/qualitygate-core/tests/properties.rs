// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

use proptest::prelude::*;
use qualitygate_core::{
    BatchId, CoprocessorKeys, Decryptor, GateConfig, GateError, Identity, LocalDeployment,
};

const CONTRACT: Identity = Identity::from_bytes([0xc0; 20]);
const OWNER: Identity = Identity::from_bytes([0x01; 20]);
const APP: Identity = Identity::from_bytes([0x02; 20]);
const SUPPLIER: Identity = Identity::from_bytes([0x09; 20]);

fn deployment() -> LocalDeployment {
    LocalDeployment::bootstrap(
        GateConfig::new(CONTRACT, OWNER, APP),
        CoprocessorKeys::from_bytes([7u8; 32], [8u8; 32]),
    )
    .expect("bootstrap")
}

fn accepts(rules: [u16; 4], m: [u16; 4]) -> bool {
    m[0] <= rules[0] && m[1] <= rules[1] && m[2] >= rules[2] && m[3] >= rules[3]
}

fn submit(d: &LocalDeployment, label: &str, metrics: [u16; 4]) -> Result<bool, GateError> {
    let (sealed, proof) = d.seal_metrics(SUPPLIER, metrics).expect("seal");
    let verdict =
        d.gate()
            .submit_batch_and_check(SUPPLIER, BatchId::from_label(label), &sealed, &proof)?;
    Ok(d.coprocessor().decrypt_bool(verdict.handle()).expect("plaintext"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn defaults_accept_every_metric_vector(metrics in any::<[u16; 4]>()) {
        let d = deployment();
        prop_assert_eq!(submit(&d, "any", metrics), Ok(true));
    }

    #[test]
    fn verdicts_match_plaintext_predicate_and_repeat(
        rules in any::<[u16; 4]>(),
        metrics in any::<[u16; 4]>(),
    ) {
        let d = deployment();
        let (sealed, proof) = d.seal_rules(OWNER, rules).expect("seal");
        d.gate().set_rules_encrypted(OWNER, &sealed, &proof).expect("rules");
        let first = submit(&d, "first", metrics);
        let second = submit(&d, "second", metrics);
        prop_assert_eq!(first.clone(), Ok(accepts(rules, metrics)));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn second_registration_never_changes_the_record(
        label in "[a-z0-9]{1,12}",
        first in any::<[u16; 4]>(),
        second in any::<[u16; 4]>(),
    ) {
        let d = deployment();
        submit(&d, &label, first).expect("first");
        let id = BatchId::from_label(&label);
        let stored = d.gate().get_verdict_handle(&id);
        prop_assert_eq!(submit(&d, &label, second), Err(GateError::DuplicateBatch(id)));
        prop_assert_eq!(d.gate().get_verdict_handle(&id), stored);
        prop_assert_eq!(d.gate().batch_count(), 1);
    }

    #[test]
    fn unregistered_ids_are_absent(raw in any::<[u8; 32]>()) {
        let d = deployment();
        submit(&d, "known", [1, 2, 3, 4]).expect("submit");
        let id = BatchId::from_bytes(raw);
        prop_assume!(id != BatchId::from_label("known"));
        prop_assert_eq!(d.gate().get_verdict_handle(&id), None);
    }
}
