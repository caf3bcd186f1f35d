// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Off-gate decryption of verdicts and published thresholds.
//!
//! A requester signs a request naming the contract, the handles, an ephemeral
//! key, and a validity window. The service checks the window, the signature,
//! and the ACL for every handle before returning any plaintext. Nothing here
//! mutates gate state, so a request may be repeated or abandoned freely.

use crate::acl::AccessControlManager;
use crate::compute::{ClearValue, Decryptor};
use crate::error::GateError;
use crate::handle::{Handle, Identity};
use ed25519_dalek::SigningKey;
use qualitygate_auth_protocol::{self as auth_protocol, AuthProtocolError, UserDecryptAuthorization};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub const SECONDS_PER_DAY: u64 = 86_400;
pub const MAX_HANDLES_PER_REQUEST: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptionError {
    #[error("decryption request names no handles")]
    EmptyRequest,
    #[error("decryption request names more than {MAX_HANDLES_PER_REQUEST} handles")]
    TooManyHandles,
    #[error("invalid validity window: {0}")]
    InvalidWindow(String),
    #[error("request is not valid before {start}")]
    NotYetValid { start: u64 },
    #[error("request expired at {expired_at}")]
    Expired { expired_at: u64 },
    #[error("request is bound to contract {actual}, expected {expected}")]
    WrongContract { expected: Identity, actual: Identity },
    #[error("signature rejected: {0}")]
    InvalidSignature(#[from] AuthProtocolError),
    #[error("{requester} may not decrypt handle {handle}")]
    Unauthorized { requester: Identity, handle: Handle },
    #[error("handle {0} is not publicly decryptable")]
    NotPublic(Handle),
    #[error("backend failure: {0}")]
    Backend(#[from] GateError),
    #[error("decryption service is not running")]
    ServiceUnavailable,
    #[error("decryption timed out")]
    TimedOut,
}

impl DecryptionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyRequest => "empty_request",
            Self::TooManyHandles => "too_many_handles",
            Self::InvalidWindow(_) => "invalid_window",
            Self::NotYetValid { .. } => "not_yet_valid",
            Self::Expired { .. } => "expired",
            Self::WrongContract { .. } => "wrong_contract",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::Unauthorized { .. } => "unauthorized",
            Self::NotPublic(_) => "not_public",
            Self::Backend(_) => "backend",
            Self::ServiceUnavailable => "service_unavailable",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Outcome of a decrypted batch verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Reject,
}

impl From<bool> for Verdict {
    fn from(accepted: bool) -> Self {
        if accepted {
            Self::Accept
        } else {
            Self::Reject
        }
    }
}

/// Signed user-decryption request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionRequest {
    pub handles: Vec<Handle>,
    pub contract: Identity,
    #[serde(with = "hex_array")]
    pub requester_public_key: [u8; 32],
    #[serde(with = "hex_array")]
    pub ephemeral_public_key: [u8; 32],
    pub start_timestamp: u64,
    pub duration_days: u32,
    #[serde(with = "hex_array")]
    pub signature: [u8; 64],
}

impl DecryptionRequest {
    pub fn sign(
        signing_key: &SigningKey,
        contract: Identity,
        handles: Vec<Handle>,
        ephemeral_public_key: [u8; 32],
        start_timestamp: u64,
        duration_days: u32,
    ) -> Self {
        let requester_public_key = signing_key.verifying_key().to_bytes();
        let raw_handles = raw_handles(&handles);
        let authorization = UserDecryptAuthorization {
            contract: *contract.as_bytes(),
            requester: auth_protocol::identity_from_public_key(&requester_public_key),
            ephemeral_public_key,
            start_timestamp,
            duration_days,
            handles: &raw_handles,
        };
        let signature = auth_protocol::sign(signing_key, &authorization);
        Self {
            handles,
            contract,
            requester_public_key,
            ephemeral_public_key,
            start_timestamp,
            duration_days,
            signature,
        }
    }

    pub fn requester(&self) -> Identity {
        Identity::from_bytes(auth_protocol::identity_from_public_key(
            &self.requester_public_key,
        ))
    }

    fn verify(&self) -> Result<(), AuthProtocolError> {
        let raw_handles = raw_handles(&self.handles);
        let authorization = UserDecryptAuthorization {
            contract: *self.contract.as_bytes(),
            requester: *self.requester().as_bytes(),
            ephemeral_public_key: self.ephemeral_public_key,
            start_timestamp: self.start_timestamp,
            duration_days: self.duration_days,
            handles: &raw_handles,
        };
        auth_protocol::verify_signature(&self.requester_public_key, &authorization, &self.signature)
    }
}

fn raw_handles(handles: &[Handle]) -> Vec<[u8; 32]> {
    handles.iter().map(|h| *h.as_bytes()).collect()
}

/// Fresh per-request key the response is bound to.
pub fn ephemeral_public_key() -> [u8; 32] {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    SigningKey::from_bytes(&seed).verifying_key().to_bytes()
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct DecryptionService {
    contract: Identity,
    acl: Arc<AccessControlManager>,
    decryptor: Arc<dyn Decryptor>,
    max_validity_days: u32,
}

impl std::fmt::Debug for DecryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionService")
            .field("contract", &self.contract)
            .field("max_validity_days", &self.max_validity_days)
            .finish_non_exhaustive()
    }
}

impl DecryptionService {
    pub fn new(
        acl: Arc<AccessControlManager>,
        decryptor: Arc<dyn Decryptor>,
        max_validity_days: u32,
    ) -> Self {
        Self {
            contract: acl.contract(),
            acl,
            decryptor,
            max_validity_days,
        }
    }

    /// Returns plaintexts in request order once every check passes.
    pub fn user_decrypt(
        &self,
        request: &DecryptionRequest,
        now: u64,
    ) -> Result<Vec<ClearValue>, DecryptionError> {
        let result = self.authorize(request, now).and_then(|()| self.open_all(&request.handles));
        match &result {
            Ok(_) => tracing::info!(
                target: "qualitygate.decryption",
                requester = %request.requester(),
                handles = request.handles.len(),
                "user decryption served"
            ),
            Err(err) => tracing::warn!(
                target: "qualitygate.decryption",
                requester = %request.requester(),
                kind = err.kind(),
                error = %err,
                "user decryption refused"
            ),
        }
        result
    }

    pub fn public_decrypt(&self, handles: &[Handle]) -> Result<Vec<ClearValue>, DecryptionError> {
        check_handle_count(handles)?;
        if let Some(handle) = handles.iter().find(|h| !self.acl.is_public(**h)) {
            tracing::warn!(target: "qualitygate.decryption", handle = %handle, "public decryption refused");
            return Err(DecryptionError::NotPublic(*handle));
        }
        self.open_all(handles)
    }

    fn authorize(&self, request: &DecryptionRequest, now: u64) -> Result<(), DecryptionError> {
        check_handle_count(&request.handles)?;
        if request.contract != self.contract {
            return Err(DecryptionError::WrongContract {
                expected: self.contract,
                actual: request.contract,
            });
        }
        if request.duration_days == 0 || request.duration_days > self.max_validity_days {
            return Err(DecryptionError::InvalidWindow(format!(
                "duration must be 1..={} days",
                self.max_validity_days
            )));
        }
        if now < request.start_timestamp {
            return Err(DecryptionError::NotYetValid {
                start: request.start_timestamp,
            });
        }
        let expired_at = request
            .start_timestamp
            .saturating_add(u64::from(request.duration_days) * SECONDS_PER_DAY);
        if now >= expired_at {
            return Err(DecryptionError::Expired { expired_at });
        }
        request.verify()?;
        let requester = request.requester();
        for handle in &request.handles {
            if !self.acl.is_allowed(*handle, requester) && !self.acl.is_public(*handle) {
                return Err(DecryptionError::Unauthorized {
                    requester,
                    handle: *handle,
                });
            }
        }
        Ok(())
    }

    fn open_all(&self, handles: &[Handle]) -> Result<Vec<ClearValue>, DecryptionError> {
        handles
            .iter()
            .map(|h| self.decryptor.decrypt(*h).map_err(DecryptionError::from))
            .collect()
    }

    /// Moves the service onto a tokio task. Requests are served in arrival
    /// order; the task exits once every client is dropped.
    pub fn spawn(self, buffer: usize, timeout: Duration) -> DecryptionClient {
        let (tx, mut rx) = mpsc::channel::<Job>(buffer.max(1));
        let contract = self.contract;
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let outcome = match &job.request {
                    JobRequest::User(request) => self.user_decrypt(request, unix_now()),
                    JobRequest::Public(handles) => self.public_decrypt(handles),
                };
                // The caller may have given up; nothing to undo.
                let _ = job.reply.send(outcome);
            }
            tracing::debug!(target: "qualitygate.decryption", "decryption service stopped");
        });
        DecryptionClient {
            contract,
            tx,
            timeout,
        }
    }
}

fn check_handle_count(handles: &[Handle]) -> Result<(), DecryptionError> {
    if handles.is_empty() {
        return Err(DecryptionError::EmptyRequest);
    }
    if handles.len() > MAX_HANDLES_PER_REQUEST {
        return Err(DecryptionError::TooManyHandles);
    }
    Ok(())
}

enum JobRequest {
    User(DecryptionRequest),
    Public(Vec<Handle>),
}

struct Job {
    request: JobRequest,
    reply: oneshot::Sender<Result<Vec<ClearValue>, DecryptionError>>,
}

/// Handle to a running [`DecryptionService`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DecryptionClient {
    contract: Identity,
    tx: mpsc::Sender<Job>,
    timeout: Duration,
}

impl DecryptionClient {
    pub fn contract(&self) -> Identity {
        self.contract
    }

    pub async fn submit(
        &self,
        request: DecryptionRequest,
    ) -> Result<Vec<ClearValue>, DecryptionError> {
        self.round_trip(JobRequest::User(request)).await
    }

    /// Signs a fresh request for `handles` valid from now for `duration_days`
    /// and awaits the result.
    pub async fn user_decrypt(
        &self,
        signing_key: &SigningKey,
        handles: Vec<Handle>,
        duration_days: u32,
    ) -> Result<Vec<ClearValue>, DecryptionError> {
        let request = DecryptionRequest::sign(
            signing_key,
            self.contract,
            handles,
            ephemeral_public_key(),
            unix_now(),
            duration_days,
        );
        self.submit(request).await
    }

    pub async fn user_decrypt_verdict(
        &self,
        signing_key: &SigningKey,
        verdict: Handle,
    ) -> Result<Verdict, DecryptionError> {
        let values = self.user_decrypt(signing_key, vec![verdict], 1).await?;
        expect_verdict(&values)
    }

    pub async fn public_decrypt(
        &self,
        handles: Vec<Handle>,
    ) -> Result<Vec<ClearValue>, DecryptionError> {
        self.round_trip(JobRequest::Public(handles)).await
    }

    async fn round_trip(&self, request: JobRequest) -> Result<Vec<ClearValue>, DecryptionError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Job { request, reply })
            .await
            .map_err(|_| DecryptionError::ServiceUnavailable)?;
        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DecryptionError::ServiceUnavailable),
            Err(_) => Err(DecryptionError::TimedOut),
        }
    }
}

fn expect_verdict(values: &[ClearValue]) -> Result<Verdict, DecryptionError> {
    match values {
        [ClearValue::Bool(accepted)] => Ok(Verdict::from(*accepted)),
        _ => Err(DecryptionError::Backend(GateError::InvalidArgument(
            "handle is not a verdict".to_string(),
        ))),
    }
}

mod hex_array {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(de::Error::custom)?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            de::Error::custom(format!("expected {N} bytes, got {}", b.len()))
        })
    }
}
