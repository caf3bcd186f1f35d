// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Local reference backend for [`EncryptedCompute`].
//!
//! Ciphertexts are AES-256-GCM records keyed by a handle; the handle and the
//! value type are bound into the AEAD associated data so a record cannot be
//! moved under another handle. Input proofs are HMAC-SHA256 tags over the
//! consuming contract, the submitting user, and the ordered handle list.
//! This backend is trusted: it opens ciphertexts internally to evaluate
//! comparisons. It stands in for an external coprocessor, not for FHE.

use crate::compute::{ClearValue, Decryptor, EncryptedCompute, InputContext, InputProof, SealedInputs};
use crate::error::{GateError, GateResult};
use crate::handle::{EncryptedBool, EncryptedU16, ExternalU16, Handle};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

const CIPHERTEXT_MAGIC: [u8; 4] = *b"QGCT";
const CIPHERTEXT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 4 + 1 + NONCE_LEN;
const TAG_LEN: usize = 16;
const HANDLE_DOMAIN: &[u8] = b"qualitygate.handle.v1";
const PROOF_DOMAIN: &[u8] = b"qualitygate.input-proof.v1";

pub const MAX_INPUTS_PER_PROOF: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiphertextKind {
    U16,
    Bool,
}

impl CiphertextKind {
    fn tag(self) -> u8 {
        match self {
            Self::U16 => 1,
            Self::Bool => 2,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::U16 => "u16",
            Self::Bool => "bool",
        }
    }
}

#[derive(Clone)]
pub struct CoprocessorKeys {
    pub(crate) sealing_key: [u8; 32],
    pub(crate) proof_key: [u8; 32],
}

impl CoprocessorKeys {
    pub fn generate() -> Self {
        let mut sealing_key = [0u8; 32];
        let mut proof_key = [0u8; 32];
        OsRng.fill_bytes(&mut sealing_key);
        OsRng.fill_bytes(&mut proof_key);
        Self {
            sealing_key,
            proof_key,
        }
    }

    pub fn from_bytes(sealing_key: [u8; 32], proof_key: [u8; 32]) -> Self {
        Self {
            sealing_key,
            proof_key,
        }
    }
}

impl fmt::Debug for CoprocessorKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CoprocessorKeys { .. }")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCiphertext {
    pub handle: Handle,
    pub kind: CiphertextKind,
    #[serde(with = "hex_vec")]
    pub sealed: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiphertextStoreSnapshot {
    pub counter: u64,
    pub ciphertexts: Vec<StoredCiphertext>,
}

#[derive(Debug, Default)]
struct CiphertextStore {
    ciphertexts: HashMap<Handle, StoredCiphertext>,
    counter: u64,
}

pub struct LocalCoprocessor {
    keys: CoprocessorKeys,
    store: Mutex<CiphertextStore>,
}

impl fmt::Debug for LocalCoprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCoprocessor")
            .field("ciphertexts", &self.len())
            .finish_non_exhaustive()
    }
}

impl LocalCoprocessor {
    pub fn new(keys: CoprocessorKeys) -> Self {
        Self {
            keys,
            store: Mutex::new(CiphertextStore::default()),
        }
    }

    pub fn restore(keys: CoprocessorKeys, snapshot: CiphertextStoreSnapshot) -> Self {
        let ciphertexts = snapshot
            .ciphertexts
            .into_iter()
            .map(|c| (c.handle, c))
            .collect();
        Self {
            keys,
            store: Mutex::new(CiphertextStore {
                ciphertexts,
                counter: snapshot.counter,
            }),
        }
    }

    pub fn snapshot(&self) -> CiphertextStoreSnapshot {
        let store = self.store.lock();
        let mut ciphertexts: Vec<StoredCiphertext> = store.ciphertexts.values().cloned().collect();
        ciphertexts.sort_by(|a, b| a.handle.cmp(&b.handle));
        CiphertextStoreSnapshot {
            counter: store.counter,
            ciphertexts,
        }
    }

    pub fn len(&self) -> usize {
        self.store.lock().ciphertexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every ciphertext whose handle `keep` rejects. The handle counter
    /// is untouched, so later handles never collide with dropped ones.
    /// Returns how many were dropped.
    pub fn retain(&self, keep: impl Fn(&Handle) -> bool) -> usize {
        let mut store = self.store.lock();
        let before = store.ciphertexts.len();
        store.ciphertexts.retain(|handle, _| keep(handle));
        before - store.ciphertexts.len()
    }

    /// Seals `values` for consumption by `ctx.contract` on behalf of
    /// `ctx.user`, producing one external handle per value and a single proof
    /// covering all of them.
    pub fn encrypt_inputs(&self, values: &[u16], ctx: &InputContext) -> GateResult<SealedInputs> {
        if values.is_empty() || values.len() > MAX_INPUTS_PER_PROOF {
            return Err(GateError::InvalidArgument(format!(
                "input batch must hold 1..={MAX_INPUTS_PER_PROOF} values"
            )));
        }
        let handles = values
            .iter()
            .map(|v| self.insert("input", &[], CiphertextKind::U16, &v.to_be_bytes()))
            .collect::<GateResult<Vec<_>>>()?;
        let mac = self.proof_mac(ctx, &handles);
        Ok(SealedInputs {
            values: handles.iter().copied().map(ExternalU16::from_handle).collect(),
            proof: InputProof { handles, mac },
        })
    }

    fn insert(
        &self,
        op: &str,
        operands: &[Handle],
        kind: CiphertextKind,
        plaintext: &[u8],
    ) -> GateResult<Handle> {
        let mut store = self.store.lock();
        store.counter = store
            .counter
            .checked_add(1)
            .ok_or_else(|| GateError::Internal("handle counter exhausted".to_string()))?;
        let handle = derive_handle(op, operands, kind, store.counter);
        let sealed = self.seal(handle, kind, plaintext)?;
        store.ciphertexts.insert(
            handle,
            StoredCiphertext {
                handle,
                kind,
                sealed,
            },
        );
        Ok(handle)
    }

    fn lookup(&self, handle: Handle, kind: CiphertextKind) -> GateResult<StoredCiphertext> {
        let stored = self
            .store
            .lock()
            .ciphertexts
            .get(&handle)
            .cloned()
            .ok_or(GateError::UnknownHandle(handle))?;
        if stored.kind != kind {
            return Err(GateError::InvalidArgument(format!(
                "handle {handle} is not a {} ciphertext",
                kind.name()
            )));
        }
        Ok(stored)
    }

    fn read_u16(&self, handle: Handle) -> GateResult<u16> {
        let plain = self.open(&self.lookup(handle, CiphertextKind::U16)?)?;
        let bytes: [u8; 2] = plain
            .as_slice()
            .try_into()
            .map_err(|_| GateError::Internal("malformed u16 ciphertext".to_string()))?;
        Ok(u16::from_be_bytes(bytes))
    }

    fn read_bool(&self, handle: Handle) -> GateResult<bool> {
        let plain = self.open(&self.lookup(handle, CiphertextKind::Bool)?)?;
        match plain.as_slice() {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(GateError::Internal("malformed bool ciphertext".to_string())),
        }
    }

    fn seal(&self, handle: Handle, kind: CiphertextKind, plaintext: &[u8]) -> GateResult<Vec<u8>> {
        let cipher = make_cipher(&self.keys.sealing_key)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        in_out.reserve(TAG_LEN);
        cipher
            .seal_in_place_append_tag(nonce, Aad::from(associated_data(handle, kind)), &mut in_out)
            .map_err(|_| GateError::Internal("ciphertext seal failed".to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + in_out.len());
        out.extend_from_slice(&CIPHERTEXT_MAGIC);
        out.push(CIPHERTEXT_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    fn open(&self, stored: &StoredCiphertext) -> GateResult<Vec<u8>> {
        let payload = &stored.sealed;
        if payload.len() < HEADER_LEN + TAG_LEN
            || payload[0..4] != CIPHERTEXT_MAGIC
            || payload[4] != CIPHERTEXT_VERSION
        {
            return Err(GateError::Internal("unsupported ciphertext format".to_string()));
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&payload[5..HEADER_LEN]);
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let cipher = make_cipher(&self.keys.sealing_key)?;
        let mut in_out = payload[HEADER_LEN..].to_vec();
        let plain = cipher
            .open_in_place(
                nonce,
                Aad::from(associated_data(stored.handle, stored.kind)),
                &mut in_out,
            )
            .map_err(|_| GateError::Internal("ciphertext open failed".to_string()))?;
        Ok(plain.to_vec())
    }

    fn proof_key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, &self.keys.proof_key)
    }

    fn proof_mac(&self, ctx: &InputContext, handles: &[Handle]) -> [u8; 32] {
        let tag = hmac::sign(&self.proof_key(), &proof_material(ctx, handles));
        let mut mac = [0u8; 32];
        mac.copy_from_slice(tag.as_ref());
        mac
    }
}

impl EncryptedCompute for LocalCoprocessor {
    fn decode_u16(
        &self,
        input: ExternalU16,
        index: usize,
        proof: &InputProof,
        ctx: &InputContext,
    ) -> GateResult<EncryptedU16> {
        if proof.handles.is_empty() || proof.handles.len() > MAX_INPUTS_PER_PROOF {
            return Err(GateError::ProofValidation(
                "proof covers an invalid number of values".to_string(),
            ));
        }
        hmac::verify(
            &self.proof_key(),
            &proof_material(ctx, &proof.handles),
            &proof.mac,
        )
        .map_err(|_| {
            GateError::ProofValidation("proof does not match contract and caller".to_string())
        })?;
        match proof.position(input.handle()) {
            Some(at) if at == index => {}
            Some(at) => {
                return Err(GateError::ProofValidation(format!(
                    "handle {} is sealed at position {at}, not {index}",
                    input.handle()
                )))
            }
            None => {
                return Err(GateError::ProofValidation(format!(
                    "handle {} is not covered by the proof",
                    input.handle()
                )))
            }
        }
        self.lookup(input.handle(), CiphertextKind::U16)?;
        Ok(EncryptedU16::from_handle(input.handle()))
    }

    fn trivial_u16(&self, value: u16) -> GateResult<EncryptedU16> {
        self.insert("trivial", &[], CiphertextKind::U16, &value.to_be_bytes())
            .map(EncryptedU16::from_handle)
    }

    fn compare_le(&self, lhs: EncryptedU16, rhs: EncryptedU16) -> GateResult<EncryptedBool> {
        let out = self.read_u16(lhs.handle())? <= self.read_u16(rhs.handle())?;
        self.insert(
            "le",
            &[lhs.handle(), rhs.handle()],
            CiphertextKind::Bool,
            &[u8::from(out)],
        )
        .map(EncryptedBool::from_handle)
    }

    fn compare_ge(&self, lhs: EncryptedU16, rhs: EncryptedU16) -> GateResult<EncryptedBool> {
        let out = self.read_u16(lhs.handle())? >= self.read_u16(rhs.handle())?;
        self.insert(
            "ge",
            &[lhs.handle(), rhs.handle()],
            CiphertextKind::Bool,
            &[u8::from(out)],
        )
        .map(EncryptedBool::from_handle)
    }

    fn and(&self, lhs: EncryptedBool, rhs: EncryptedBool) -> GateResult<EncryptedBool> {
        let out = self.read_bool(lhs.handle())? & self.read_bool(rhs.handle())?;
        self.insert(
            "and",
            &[lhs.handle(), rhs.handle()],
            CiphertextKind::Bool,
            &[u8::from(out)],
        )
        .map(EncryptedBool::from_handle)
    }
}

impl Decryptor for LocalCoprocessor {
    fn decrypt_bool(&self, handle: Handle) -> GateResult<bool> {
        self.read_bool(handle)
    }

    fn decrypt_u16(&self, handle: Handle) -> GateResult<u16> {
        self.read_u16(handle)
    }

    fn decrypt(&self, handle: Handle) -> GateResult<ClearValue> {
        let kind = self
            .store
            .lock()
            .ciphertexts
            .get(&handle)
            .map(|c| c.kind)
            .ok_or(GateError::UnknownHandle(handle))?;
        match kind {
            CiphertextKind::U16 => self.read_u16(handle).map(ClearValue::U16),
            CiphertextKind::Bool => self.read_bool(handle).map(ClearValue::Bool),
        }
    }
}

fn derive_handle(op: &str, operands: &[Handle], kind: CiphertextKind, counter: u64) -> Handle {
    let mut h = Sha256::new();
    h.update(HANDLE_DOMAIN);
    h.update(op.as_bytes());
    h.update([0u8]);
    for operand in operands {
        h.update(operand.as_bytes());
    }
    h.update([kind.tag()]);
    h.update(counter.to_be_bytes());
    Handle::from_bytes(h.finalize().into())
}

fn associated_data(handle: Handle, kind: CiphertextKind) -> [u8; 33] {
    let mut aad = [0u8; 33];
    aad[..32].copy_from_slice(handle.as_bytes());
    aad[32] = kind.tag();
    aad
}

fn proof_material(ctx: &InputContext, handles: &[Handle]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PROOF_DOMAIN.len() + 44 + handles.len() * 32);
    out.extend_from_slice(PROOF_DOMAIN);
    out.extend_from_slice(ctx.contract.as_bytes());
    out.extend_from_slice(ctx.user.as_bytes());
    out.extend_from_slice(&(handles.len() as u32).to_be_bytes());
    for handle in handles {
        out.extend_from_slice(handle.as_bytes());
    }
    out
}

fn make_cipher(key: &[u8; 32]) -> GateResult<LessSafeKey> {
    let unbound = UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| GateError::Internal("invalid sealing key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

mod hex_vec {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(de::Error::custom)
    }
}
