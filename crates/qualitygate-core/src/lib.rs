// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod acl;
pub mod admin;
pub mod compute;
pub mod config;
pub mod coprocessor;
pub mod decryption;
pub mod deployment;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod gate;
pub mod handle;
pub mod registry;
pub mod snapshot;
pub mod thresholds;

pub use acl::{AccessControlManager, AclScope, StagedGrants};
pub use compute::{ClearValue, Decryptor, EncryptedCompute, InputContext, InputProof};
pub use config::GateConfig;
pub use coprocessor::{CoprocessorKeys, LocalCoprocessor};
pub use decryption::{DecryptionClient, DecryptionError, DecryptionRequest, DecryptionService, Verdict};
pub use deployment::LocalDeployment;
pub use error::{GateError, GateResult};
pub use evaluator::SealedMetrics;
pub use events::{EventRecord, GateEvent};
pub use gate::QualityGate;
pub use handle::{BatchId, EncryptedBool, EncryptedU16, ExternalU16, Handle, Identity};
pub use thresholds::{SealedRules, ThresholdSet};
