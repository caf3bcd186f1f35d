// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const USER_DECRYPT_DOMAIN: &str = "qualitygate.user-decrypt.v1";

pub type Identity20 = [u8; 20];
pub type Handle32 = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthProtocolError {
    #[error("invalid ed25519 public key")]
    InvalidPublicKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("requester identity does not match signing key")]
    RequesterMismatch,
    #[error("signature verification failed")]
    SignatureMismatch,
}

/// Everything a user-decrypt signature commits to.
#[derive(Debug, Clone, Copy)]
pub struct UserDecryptAuthorization<'a> {
    pub contract: Identity20,
    pub requester: Identity20,
    pub ephemeral_public_key: [u8; 32],
    pub start_timestamp: u64,
    pub duration_days: u32,
    pub handles: &'a [Handle32],
}

/// Derives the 20-byte identity of a signing party: the trailing 20 bytes of
/// `SHA-256(verifying_key)`.
pub fn identity_from_public_key(public_key: &[u8; 32]) -> Identity20 {
    let digest = Sha256::digest(public_key);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[12..]);
    out
}

/// Builds canonical user-decrypt signing material.
///
/// Format (newline separated):
/// - `qualitygate.user-decrypt.v1`
/// - `contract:{hex}`
/// - `requester:{hex}`
/// - `ephemeral:{hex}`
/// - `start:{unix seconds}`
/// - `days:{validity}`
/// - `handles:{hex},{hex},...` in request order
pub fn signing_material(auth: &UserDecryptAuthorization<'_>) -> String {
    let handles = auth
        .handles
        .iter()
        .map(hex::encode)
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{USER_DECRYPT_DOMAIN}\ncontract:{}\nrequester:{}\nephemeral:{}\nstart:{}\ndays:{}\nhandles:{handles}",
        hex::encode(auth.contract),
        hex::encode(auth.requester),
        hex::encode(auth.ephemeral_public_key),
        auth.start_timestamp,
        auth.duration_days,
    )
}

pub fn sign(signing_key: &SigningKey, auth: &UserDecryptAuthorization<'_>) -> [u8; 64] {
    signing_key
        .sign(signing_material(auth).as_bytes())
        .to_bytes()
}

pub fn sign_hex(signing_key: &SigningKey, auth: &UserDecryptAuthorization<'_>) -> String {
    hex::encode(sign(signing_key, auth))
}

/// Verifies a user-decrypt signature. The requester named in `auth` must be
/// the identity derived from `public_key`, so a captured request cannot be
/// replayed under another identity.
pub fn verify_signature(
    public_key: &[u8; 32],
    auth: &UserDecryptAuthorization<'_>,
    signature: &[u8],
) -> Result<(), AuthProtocolError> {
    if identity_from_public_key(public_key) != auth.requester {
        return Err(AuthProtocolError::RequesterMismatch);
    }
    let key =
        VerifyingKey::from_bytes(public_key).map_err(|_| AuthProtocolError::InvalidPublicKey)?;
    let sig = Signature::from_slice(signature).map_err(|_| AuthProtocolError::InvalidSignature)?;
    key.verify_strict(signing_material(auth).as_bytes(), &sig)
        .map_err(|_| AuthProtocolError::SignatureMismatch)
}
