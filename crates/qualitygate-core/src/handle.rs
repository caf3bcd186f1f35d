// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Opaque identifiers: identities, batch ids, and ciphertext handles.
//!
//! None of these types carry plaintext. Typed ciphertext handles
//! ([`EncryptedU16`], [`EncryptedBool`]) can be copied freely but expose no
//! conversion to a value; only a decryption service holding key material can
//! turn them back into plaintext.

use ed25519_dalek::VerifyingKey;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseHexError {
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

macro_rules! hex_bytes_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(trimmed).map_err(|_| ParseHexError::InvalidHex)?;
                let actual = bytes.len();
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    ParseHexError::InvalidLength {
                        expected: $len,
                        actual,
                    }
                })?;
                Ok(Self(arr))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(de::Error::custom)
            }
        }
    };
}

hex_bytes_newtype!(
    /// A 20-byte account identity. [`Identity::ZERO`] is the null identity and
    /// is never a valid owner, application, or grantee.
    Identity,
    20
);

hex_bytes_newtype!(
    /// Identifier of one supplier batch.
    BatchId,
    32
);

hex_bytes_newtype!(
    /// Opaque reference to a ciphertext held by the compute backend.
    Handle,
    32
);

impl Identity {
    pub const ZERO: Identity = Identity([0u8; 20]);

    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(qualitygate_auth_protocol::identity_from_public_key(
            key.as_bytes(),
        ))
    }
}

impl BatchId {
    /// Hashes a human-readable label into a batch id.
    pub fn from_label(label: &str) -> Self {
        Self(Sha256::digest(label.as_bytes()).into())
    }

    /// Accepts either a 32-byte hex id (optionally `0x`-prefixed) or a label.
    pub fn parse_or_label(input: &str) -> Self {
        input.parse().unwrap_or_else(|_| Self::from_label(input))
    }
}

/// An encrypted 16-bit unsigned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedU16(Handle);

/// An encrypted boolean, e.g. a batch verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedBool(Handle);

impl EncryptedU16 {
    pub const fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    pub const fn handle(&self) -> Handle {
        self.0
    }
}

impl EncryptedBool {
    pub const fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    pub const fn handle(&self) -> Handle {
        self.0
    }
}

/// A value sealed off-core by a submitter, referenced by the external handle
/// listed in its [`crate::compute::InputProof`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalU16(Handle);

impl ExternalU16 {
    pub const fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    pub const fn handle(&self) -> Handle {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_parses_with_and_without_prefix() {
        let raw = "11".repeat(20);
        let a: Identity = raw.parse().expect("plain hex");
        let b: Identity = format!("0x{raw}").parse().expect("prefixed hex");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), format!("0x{raw}"));
    }

    #[test]
    fn identity_rejects_wrong_length() {
        let err = "0x1234".parse::<Identity>().expect_err("too short");
        assert_eq!(
            err,
            ParseHexError::InvalidLength {
                expected: 20,
                actual: 2
            }
        );
    }

    #[test]
    fn zero_identity_is_zero() {
        assert!(Identity::ZERO.is_zero());
        assert!(!Identity::from_bytes([1u8; 20]).is_zero());
    }

    #[test]
    fn batch_id_label_is_stable() {
        assert_eq!(BatchId::from_label("X"), BatchId::from_label("X"));
        assert_ne!(BatchId::from_label("X"), BatchId::from_label("Y"));
        let hex_id = BatchId::from_bytes([5u8; 32]);
        assert_eq!(BatchId::parse_or_label(&hex_id.to_string()), hex_id);
        assert_eq!(BatchId::parse_or_label("lot-7"), BatchId::from_label("lot-7"));
    }

    #[test]
    fn typed_handles_serialize_as_hex_strings() {
        let handle = Handle::from_bytes([0xab; 32]);
        let json = serde_json::to_string(&EncryptedBool::from_handle(handle)).expect("json");
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(32)));
        let back: EncryptedBool = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.handle(), handle);
    }
}
