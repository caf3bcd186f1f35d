#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use qualitygate_core::{
    BatchId, CoprocessorKeys, Decryptor, GateConfig, GateError, Identity, LocalDeployment,
};
use std::collections::HashMap;

const CONTRACT: Identity = Identity::from_bytes([0xc0; 20]);

#[derive(Debug, Arbitrary)]
enum Op {
    SetRules { caller: u8, values: [u16; 4] },
    Submit { caller: u8, batch: u8, metrics: [u16; 4] },
    MakeRulesPublic { caller: u8 },
    MakeVerdictPublic { caller: u8, batch: u8 },
    TransferOwnership { caller: u8, new_owner: u8 },
    SetQualityApp { caller: u8, new_app: u8 },
}

fn identity(b: u8) -> Identity {
    // 0 maps to the zero identity so the zero-address guards are exercised.
    Identity::from_bytes([b % 4; 20])
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let Ok(ops) = Vec::<Op>::arbitrary(&mut u) else {
        return;
    };
    let Ok(d) = LocalDeployment::bootstrap(
        GateConfig::new(CONTRACT, identity(1), identity(2)),
        CoprocessorKeys::from_bytes([7u8; 32], [8u8; 32]),
    ) else {
        return;
    };
    let gate = d.gate();
    let mut rules = [u16::MAX, u16::MAX, 0, 0];
    let mut registered: HashMap<BatchId, (Identity, bool)> = HashMap::new();

    for op in ops.into_iter().take(64) {
        match op {
            Op::SetRules { caller, values } => {
                let caller = identity(caller);
                let Ok((sealed, proof)) = d.seal_rules(caller, values) else {
                    continue;
                };
                let owner = gate.owner();
                match gate.set_rules_encrypted(caller, &sealed, &proof) {
                    Ok(_) => {
                        assert_eq!(caller, owner);
                        rules = values;
                    }
                    Err(err) => assert!(matches!(err, GateError::Authorization { .. })),
                }
            }
            Op::Submit {
                caller,
                batch,
                metrics,
            } => {
                let caller = identity(caller);
                let batch_id = BatchId::from_bytes([batch % 8; 32]);
                let Ok((sealed, proof)) = d.seal_metrics(caller, metrics) else {
                    continue;
                };
                let expected = metrics[0] <= rules[0]
                    && metrics[1] <= rules[1]
                    && metrics[2] >= rules[2]
                    && metrics[3] >= rules[3];
                match gate.submit_batch_and_check(caller, batch_id, &sealed, &proof) {
                    Ok(verdict) => {
                        assert!(!registered.contains_key(&batch_id));
                        let plain = d.coprocessor().decrypt_bool(verdict.handle());
                        assert_eq!(plain, Ok(expected));
                        assert!(gate.acl().is_allowed(verdict.handle(), caller));
                        assert!(gate.acl().is_allowed(verdict.handle(), gate.quality_app()));
                        registered.insert(batch_id, (caller, expected));
                    }
                    Err(GateError::DuplicateBatch(id)) => {
                        assert_eq!(id, batch_id);
                        assert!(registered.contains_key(&batch_id));
                    }
                    Err(GateError::ZeroAddress { .. }) => assert!(caller.is_zero()),
                    Err(other) => panic!("unexpected submission failure: {other}"),
                }
            }
            Op::MakeRulesPublic { caller } => {
                let caller = identity(caller);
                let is_owner = caller == gate.owner();
                assert_eq!(gate.make_rules_public(caller).is_ok(), is_owner);
            }
            Op::MakeVerdictPublic { caller, batch } => {
                let caller = identity(caller);
                let batch_id = BatchId::from_bytes([batch % 8; 32]);
                let outcome = gate.make_verdict_public(caller, batch_id);
                if caller != gate.owner() {
                    assert!(matches!(outcome, Err(GateError::Authorization { .. })));
                } else if registered.contains_key(&batch_id) {
                    assert!(outcome.is_ok());
                } else {
                    assert_eq!(outcome, Err(GateError::UnknownBatch(batch_id)));
                }
            }
            Op::TransferOwnership { caller, new_owner } => {
                let _ = gate.transfer_ownership(identity(caller), identity(new_owner));
                assert!(!gate.owner().is_zero());
            }
            Op::SetQualityApp { caller, new_app } => {
                let _ = gate.set_quality_app(identity(caller), identity(new_app));
                assert!(!gate.quality_app().is_zero());
            }
        }
    }

    assert_eq!(gate.batch_count(), registered.len());
    for (batch_id, (submitter, _)) in &registered {
        let record = gate.batch_record(batch_id).expect("registered batch");
        assert_eq!(record.submitter, *submitter);
    }
});
