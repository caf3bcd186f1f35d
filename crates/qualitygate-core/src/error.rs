// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::handle::{BatchId, Handle, Identity};
use thiserror::Error;

pub type GateResult<T> = Result<T, GateError>;

/// Every failure aborts the whole operation; no variant carries plaintext or
/// ciphertext bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("caller {caller} is not authorized to {operation}")]
    Authorization {
        caller: Identity,
        operation: &'static str,
    },

    #[error("{field} must not be the zero identity")]
    ZeroAddress { field: &'static str },

    #[error("batch {0} is already registered")]
    DuplicateBatch(BatchId),

    #[error("batch {0} is not registered")]
    UnknownBatch(BatchId),

    #[error("input proof rejected: {0}")]
    ProofValidation(String),

    #[error("unknown ciphertext handle {0}")]
    UnknownHandle(Handle),

    #[error("evaluator holds no access grant on handle {0}")]
    HandleAccessDenied(Handle),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    /// Stable short name used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authorization { .. } => "authorization",
            Self::ZeroAddress { .. } => "zero_address",
            Self::DuplicateBatch(_) => "duplicate_batch",
            Self::UnknownBatch(_) => "unknown_batch",
            Self::ProofValidation(_) => "proof_validation",
            Self::UnknownHandle(_) => "unknown_handle",
            Self::HandleAccessDenied(_) => "handle_access_denied",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Internal(_) => "internal",
        }
    }
}
