// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! On-disk state for a local deployment.
//!
//! Layout under the data directory:
//! - `gate.json`: [`GateSnapshot`], replaced atomically on every save
//! - `keys/sealing.key`, `keys/proof.key`: hex-encoded backend keys
//! - `gate.lock`: held exclusively by whichever process has the directory open

use crate::acl::AclEntry;
use crate::admin::Roles;
use crate::config::{ConfigError, GateConfig};
use crate::coprocessor::{CiphertextStoreSnapshot, CoprocessorKeys};
use crate::error::GateError;
use crate::events::EventRecord;
use crate::registry::BatchRecord;
use crate::thresholds::ThresholdSet;
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_FILE: &str = "gate.json";
pub const KEYS_DIR: &str = "keys";
pub const LOCK_FILE: &str = "gate.lock";
const SEALING_KEY_FILE: &str = "sealing.key";
const PROOF_KEY_FILE: &str = "proof.key";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot json invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("key file {0} is malformed")]
    InvalidKey(PathBuf),
    #[error("data directory {0} is already initialized")]
    AlreadyInitialized(PathBuf),
    #[error("data directory {0} is not initialized")]
    NotInitialized(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gate(#[from] GateError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SnapshotError + '_ {
    move |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSnapshot {
    pub version: u32,
    pub config: GateConfig,
    pub roles: Roles,
    pub thresholds: ThresholdSet,
    pub batches: Vec<BatchRecord>,
    pub acl: Vec<AclEntry>,
    pub events: Vec<EventRecord>,
    pub ciphertexts: CiphertextStoreSnapshot,
}

/// Exclusive hold on a data directory. Released when dropped.
#[derive(Debug)]
pub struct DataDirLock {
    _file: File,
    path: PathBuf,
}

impl DataDirLock {
    /// Blocks until no other holder, in this process or another, has the
    /// directory open.
    pub fn acquire(data_dir: &Path) -> Result<Self, SnapshotError> {
        fs::create_dir_all(data_dir).map_err(io_error(data_dir))?;
        let path = data_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_error(&path))?;
        file.lock_exclusive().map_err(io_error(&path))?;
        tracing::debug!(target: "qualitygate.snapshot", path = %path.display(), "data directory locked");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE)
}

pub fn is_initialized(data_dir: &Path) -> bool {
    snapshot_path(data_dir).exists()
}

pub fn save_snapshot(data_dir: &Path, snapshot: &GateSnapshot) -> Result<(), SnapshotError> {
    fs::create_dir_all(data_dir).map_err(io_error(data_dir))?;
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    write_file_atomic_durable(&snapshot_path(data_dir), &bytes)
}

pub fn load_snapshot(data_dir: &Path) -> Result<GateSnapshot, SnapshotError> {
    let path = snapshot_path(data_dir);
    if !path.exists() {
        return Err(SnapshotError::NotInitialized(data_dir.to_path_buf()));
    }
    let bytes = fs::read(&path).map_err(io_error(&path))?;
    let snapshot: GateSnapshot = serde_json::from_slice(&bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(snapshot.version));
    }
    Ok(snapshot)
}

pub fn save_keys(data_dir: &Path, keys: &CoprocessorKeys) -> Result<(), SnapshotError> {
    let dir = data_dir.join(KEYS_DIR);
    fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    write_file_atomic_durable(
        &dir.join(SEALING_KEY_FILE),
        hex::encode(keys.sealing_key).as_bytes(),
    )?;
    write_file_atomic_durable(
        &dir.join(PROOF_KEY_FILE),
        hex::encode(keys.proof_key).as_bytes(),
    )
}

pub fn load_keys(data_dir: &Path) -> Result<CoprocessorKeys, SnapshotError> {
    let dir = data_dir.join(KEYS_DIR);
    let sealing = read_key(&dir.join(SEALING_KEY_FILE))?;
    let proof = read_key(&dir.join(PROOF_KEY_FILE))?;
    Ok(CoprocessorKeys::from_bytes(sealing, proof))
}

/// Reads a 32-byte hex key file, tolerating surrounding whitespace.
pub fn read_key(path: &Path) -> Result<[u8; 32], SnapshotError> {
    let raw = fs::read_to_string(path).map_err(io_error(path))?;
    let bytes = hex::decode(raw.trim()).map_err(|_| SnapshotError::InvalidKey(path.to_path_buf()))?;
    bytes
        .try_into()
        .map_err(|_| SnapshotError::InvalidKey(path.to_path_buf()))
}

pub fn write_file_atomic_durable(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => return Err(SnapshotError::NotInitialized(path.to_path_buf())),
    };
    let tmp = path.with_extension("tmp");
    let mut f = File::create(&tmp).map_err(io_error(&tmp))?;
    f.write_all(bytes).map_err(io_error(&tmp))?;
    f.sync_all().map_err(io_error(&tmp))?;
    fs::rename(&tmp, path).map_err(io_error(path))?;
    sync_directory(parent)
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> Result<(), SnapshotError> {
    let dir = File::open(path).map_err(io_error(path))?;
    dir.sync_all().map_err(io_error(path))
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> Result<(), SnapshotError> {
    Ok(())
}
