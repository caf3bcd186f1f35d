#![no_main]

use libfuzzer_sys::fuzz_target;
use qualitygate_core::{
    AccessControlManager, CoprocessorKeys, DecryptionRequest, DecryptionService, Identity,
    LocalCoprocessor,
};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = serde_json::from_slice::<DecryptionRequest>(data) else {
        return;
    };
    let Ok(acl) = AccessControlManager::new(Identity::from_bytes([0xc0; 20])) else {
        return;
    };
    let backend = Arc::new(LocalCoprocessor::new(CoprocessorKeys::from_bytes(
        [7u8; 32], [8u8; 32],
    )));
    let service = DecryptionService::new(Arc::new(acl), backend, 365);
    // Nothing is granted, so no request may succeed.
    assert!(service.user_decrypt(&request, request.start_timestamp).is_err());
});
