// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

use ed25519_dalek::SigningKey;
use qualitygate_core::decryption::{unix_now, SECONDS_PER_DAY};
use qualitygate_core::{
    AccessControlManager, BatchId, ClearValue, CoprocessorKeys, DecryptionError,
    DecryptionRequest, DecryptionService, Decryptor, GateConfig, GateResult, Handle, Identity,
    LocalDeployment, Verdict,
};
use std::sync::Arc;
use std::time::Duration;

const CONTRACT: Identity = Identity::from_bytes([0xc0; 20]);

struct Parties {
    owner: SigningKey,
    app: SigningKey,
    supplier: SigningKey,
    stranger: SigningKey,
}

fn id(key: &SigningKey) -> Identity {
    Identity::from_public_key(&key.verifying_key())
}

fn setup() -> (Parties, LocalDeployment) {
    let parties = Parties {
        owner: SigningKey::from_bytes(&[1u8; 32]),
        app: SigningKey::from_bytes(&[2u8; 32]),
        supplier: SigningKey::from_bytes(&[3u8; 32]),
        stranger: SigningKey::from_bytes(&[4u8; 32]),
    };
    let d = LocalDeployment::bootstrap(
        GateConfig::new(CONTRACT, id(&parties.owner), id(&parties.app)),
        CoprocessorKeys::from_bytes([7u8; 32], [8u8; 32]),
    )
    .expect("bootstrap");
    (parties, d)
}

fn register(p: &Parties, d: &LocalDeployment, label: &str, metrics: [u16; 4]) -> Handle {
    let supplier = id(&p.supplier);
    let (sealed, proof) = d.seal_metrics(supplier, metrics).expect("seal");
    d.gate()
        .submit_batch_and_check(supplier, BatchId::from_label(label), &sealed, &proof)
        .expect("submit")
        .handle()
}

#[tokio::test]
async fn submitter_and_app_decrypt_but_stranger_cannot() {
    let (p, d) = setup();
    let owner = id(&p.owner);
    let (rules, proof) = d.seal_rules(owner, [500, 1000, 300, 50]).expect("seal");
    d.gate()
        .set_rules_encrypted(owner, &rules, &proof)
        .expect("rules");
    let accepted = register(&p, &d, "A", [100, 200, 400, 60]);
    let rejected = register(&p, &d, "B", [600, 200, 400, 60]);

    let client = d.decryption_service().spawn(8, Duration::from_secs(5));
    for key in [&p.supplier, &p.app] {
        assert_eq!(
            client.user_decrypt_verdict(key, accepted).await,
            Ok(Verdict::Accept)
        );
        assert_eq!(
            client.user_decrypt_verdict(key, rejected).await,
            Ok(Verdict::Reject)
        );
    }
    assert!(matches!(
        client.user_decrypt_verdict(&p.stranger, accepted).await,
        Err(DecryptionError::Unauthorized { .. })
    ));
    assert!(matches!(
        client.user_decrypt_verdict(&p.owner, accepted).await,
        Err(DecryptionError::Unauthorized { .. })
    ));
}

#[tokio::test]
async fn public_verdict_opens_for_everyone_afterwards() {
    let (p, d) = setup();
    let verdict = register(&p, &d, "lot", [1, 2, 3, 4]);
    let client = d.decryption_service().spawn(8, Duration::from_secs(5));
    assert_eq!(
        client.public_decrypt(vec![verdict]).await,
        Err(DecryptionError::NotPublic(verdict))
    );

    d.gate()
        .make_verdict_public(id(&p.owner), BatchId::from_label("lot"))
        .expect("public");
    assert_eq!(
        client.public_decrypt(vec![verdict]).await,
        Ok(vec![ClearValue::Bool(true)])
    );
    assert_eq!(
        client.user_decrypt_verdict(&p.stranger, verdict).await,
        Ok(Verdict::Accept)
    );

    // Later operations do not revoke it.
    d.gate()
        .transfer_ownership(id(&p.owner), id(&p.stranger))
        .expect("transfer");
    register(&p, &d, "next", [1, 2, 3, 4]);
    assert!(client.public_decrypt(vec![verdict]).await.is_ok());
}

#[tokio::test]
async fn published_thresholds_decrypt_to_their_values() {
    let (p, d) = setup();
    let owner = id(&p.owner);
    let (rules, proof) = d.seal_rules(owner, [500, 1000, 300, 50]).expect("seal");
    d.gate()
        .set_rules_encrypted(owner, &rules, &proof)
        .expect("rules");
    d.gate().make_rules_public(owner).expect("public");

    let handles: Vec<Handle> = d
        .gate()
        .get_rule_handles()
        .handles()
        .iter()
        .map(|b| b.handle())
        .collect();
    let client = d.decryption_service().spawn(8, Duration::from_secs(5));
    assert_eq!(
        client.public_decrypt(handles).await,
        Ok(vec![
            ClearValue::U16(500),
            ClearValue::U16(1000),
            ClearValue::U16(300),
            ClearValue::U16(50),
        ])
    );
}

#[test]
fn captured_request_cannot_be_replayed_by_another_identity() {
    let (p, d) = setup();
    let verdict = register(&p, &d, "lot", [1, 2, 3, 4]);
    let service = d.decryption_service();
    let now = unix_now();
    let genuine = DecryptionRequest::sign(&p.supplier, CONTRACT, vec![verdict], [9u8; 32], now, 1);
    assert!(service.user_decrypt(&genuine, now).is_ok());

    let mut replayed = genuine.clone();
    replayed.requester_public_key = p.stranger.verifying_key().to_bytes();
    assert!(matches!(
        service.user_decrypt(&replayed, now),
        Err(DecryptionError::InvalidSignature(_))
    ));
    assert!(matches!(
        service.user_decrypt(&genuine, now + SECONDS_PER_DAY),
        Err(DecryptionError::Expired { .. })
    ));
}

#[tokio::test]
async fn dropping_the_future_cancels_without_effect() {
    let (p, d) = setup();
    let verdict = register(&p, &d, "lot", [1, 2, 3, 4]);
    let before = d.snapshot();
    let client = d.decryption_service().spawn(1, Duration::from_secs(5));

    let pending = client.user_decrypt_verdict(&p.supplier, verdict);
    let cancelled = tokio::time::timeout(Duration::from_nanos(1), pending).await;
    drop(cancelled);

    assert_eq!(
        client.user_decrypt_verdict(&p.supplier, verdict).await,
        Ok(Verdict::Accept)
    );
    assert_eq!(d.snapshot(), before);
}

struct SlowDecryptor;

impl Decryptor for SlowDecryptor {
    fn decrypt_bool(&self, _handle: Handle) -> GateResult<bool> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(true)
    }

    fn decrypt_u16(&self, _handle: Handle) -> GateResult<u16> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(0)
    }

    fn decrypt(&self, handle: Handle) -> GateResult<ClearValue> {
        self.decrypt_bool(handle).map(ClearValue::Bool)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_backend_times_out() {
    let acl = Arc::new(AccessControlManager::new(CONTRACT).expect("acl"));
    let handle = Handle::from_bytes([5u8; 32]);
    acl.grant_public(handle);
    let client = DecryptionService::new(acl, Arc::new(SlowDecryptor), 1)
        .spawn(1, Duration::from_millis(20));
    assert_eq!(
        client.public_decrypt(vec![handle]).await,
        Err(DecryptionError::TimedOut)
    );
}
