// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::handle::Identity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const OWNER_ENV: &str = "QUALITYGATE_OWNER";
pub const QUALITY_APP_ENV: &str = "QUALITYGATE_QUALITY_APP";
pub const DECRYPTION_TIMEOUT_MS_ENV: &str = "QUALITYGATE_DECRYPTION_TIMEOUT_MS";

pub const DEFAULT_DECRYPTION_MAX_VALIDITY_DAYS: u32 = 365;
pub const DEFAULT_DECRYPTION_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{var} is invalid: {reason}")]
    InvalidOverride { var: &'static str, reason: String },
    #[error("{0} must not be the zero identity")]
    ZeroIdentity(&'static str),
    #[error("{0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// The evaluator's own identity: target of self-grants and of input
    /// proof binding.
    pub contract_identity: Identity,
    pub initial_owner: Identity,
    pub initial_quality_app: Identity,
    #[serde(default = "default_max_validity_days")]
    pub decryption_max_validity_days: u32,
    #[serde(default = "default_timeout_ms")]
    pub decryption_timeout_ms: u64,
}

fn default_max_validity_days() -> u32 {
    DEFAULT_DECRYPTION_MAX_VALIDITY_DAYS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_DECRYPTION_TIMEOUT_MS
}

impl GateConfig {
    pub fn new(contract_identity: Identity, owner: Identity, quality_app: Identity) -> Self {
        Self {
            contract_identity,
            initial_owner: owner,
            initial_quality_app: quality_app,
            decryption_max_validity_days: DEFAULT_DECRYPTION_MAX_VALIDITY_DAYS,
            decryption_timeout_ms: DEFAULT_DECRYPTION_TIMEOUT_MS,
        }
    }

    /// Reads a JSON config, applies `QUALITYGATE_*` overrides, and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let payload = fs::read(path)?;
        let mut config: Self = serde_json::from_slice(&payload)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(raw) = lookup(OWNER_ENV) {
            self.initial_owner = parse_identity(OWNER_ENV, &raw)?;
        }
        if let Some(raw) = lookup(QUALITY_APP_ENV) {
            self.initial_quality_app = parse_identity(QUALITY_APP_ENV, &raw)?;
        }
        if let Some(raw) = lookup(DECRYPTION_TIMEOUT_MS_ENV) {
            self.decryption_timeout_ms =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidOverride {
                        var: DECRYPTION_TIMEOUT_MS_ENV,
                        reason: "expected milliseconds".to_string(),
                    })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contract_identity.is_zero() {
            return Err(ConfigError::ZeroIdentity("contract_identity"));
        }
        if self.initial_owner.is_zero() {
            return Err(ConfigError::ZeroIdentity("initial_owner"));
        }
        if self.initial_quality_app.is_zero() {
            return Err(ConfigError::ZeroIdentity("initial_quality_app"));
        }
        if self.decryption_max_validity_days == 0 {
            return Err(ConfigError::Invalid(
                "decryption_max_validity_days must be positive",
            ));
        }
        if self.decryption_timeout_ms == 0 {
            return Err(ConfigError::Invalid("decryption_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn decryption_timeout(&self) -> Duration {
        Duration::from_millis(self.decryption_timeout_ms)
    }
}

fn parse_identity(var: &'static str, raw: &str) -> Result<Identity, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e: crate::handle::ParseHexError| ConfigError::InvalidOverride {
            var,
            reason: e.to_string(),
        })
}
