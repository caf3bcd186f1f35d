// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Seam to the encrypted-computation capability.
//!
//! The gate orchestrates but never implements encrypted arithmetic: it asks an
//! [`EncryptedCompute`] backend to decode submitted inputs, compare, and
//! combine, and only ever sees the resulting handles.

use crate::error::GateResult;
use crate::handle::{EncryptedBool, EncryptedU16, ExternalU16, Handle, Identity};
use serde::{Deserialize, Serialize};

/// Binds a batch of externally sealed inputs to the contract that will
/// consume them and the user submitting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputContext {
    pub contract: Identity,
    pub user: Identity,
}

/// One validity proof shared by every value sealed in the same call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputProof {
    pub handles: Vec<Handle>,
    #[serde(with = "hex_mac")]
    pub mac: [u8; 32],
}

impl InputProof {
    /// Position of `handle` in the proof, if the proof covers it.
    pub fn position(&self, handle: Handle) -> Option<usize> {
        self.handles.iter().position(|h| *h == handle)
    }
}

/// Output of sealing: one external handle per value plus the shared proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedInputs {
    pub values: Vec<ExternalU16>,
    pub proof: InputProof,
}

pub trait EncryptedCompute: Send + Sync {
    /// Validates `input` as the value at position `index` of `proof` for
    /// `ctx` and returns the internal handle. Fails with `ProofValidation`
    /// when the pair does not match or the value sits at another position.
    fn decode_u16(
        &self,
        input: ExternalU16,
        index: usize,
        proof: &InputProof,
        ctx: &InputContext,
    ) -> GateResult<EncryptedU16>;

    /// Encrypts a public constant.
    fn trivial_u16(&self, value: u16) -> GateResult<EncryptedU16>;

    fn compare_le(&self, lhs: EncryptedU16, rhs: EncryptedU16) -> GateResult<EncryptedBool>;

    fn compare_ge(&self, lhs: EncryptedU16, rhs: EncryptedU16) -> GateResult<EncryptedBool>;

    fn and(&self, lhs: EncryptedBool, rhs: EncryptedBool) -> GateResult<EncryptedBool>;

    /// Fixed-width reference used in notifications and queries.
    fn serialize(&self, handle: Handle) -> [u8; 32] {
        *handle.as_bytes()
    }
}

/// A decrypted value tagged with its ciphertext type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ClearValue {
    Bool(bool),
    U16(u16),
}

impl ClearValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(b),
            Self::U16(_) => None,
        }
    }
}

/// Plaintext access for decryption services. The gate itself never holds one.
pub trait Decryptor: Send + Sync {
    fn decrypt_bool(&self, handle: Handle) -> GateResult<bool>;

    fn decrypt_u16(&self, handle: Handle) -> GateResult<u16>;

    /// Decrypts whichever type `handle` holds.
    fn decrypt(&self, handle: Handle) -> GateResult<ClearValue>;
}

mod hex_mac {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mac: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(mac))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(raw).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| de::Error::custom("mac must be 32 bytes"))
    }
}
