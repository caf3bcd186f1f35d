// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use qualitygate_core::decryption::DecryptionClient;
use qualitygate_core::snapshot::{self, write_file_atomic_durable};
use qualitygate_core::{
    BatchId, ClearValue, GateConfig, Handle, Identity, LocalDeployment, Verdict,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qualitygatectl")]
#[command(about = "Operate a local encrypted quality gate")]
struct Cli {
    #[arg(long, global = true, default_value = "./qualitygate-data")]
    data_dir: PathBuf,

    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a deployment in the data directory.
    Init {
        #[arg(long)]
        owner: Identity,
        #[arg(long)]
        quality_app: Identity,
        /// Defaults to a random identity.
        #[arg(long)]
        contract: Option<Identity>,
        #[arg(long)]
        max_validity_days: Option<u32>,
        #[arg(long)]
        decryption_timeout_ms: Option<u64>,
    },
    /// Write a fresh ed25519 signing key as hex.
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },
    Identity {
        #[arg(long = "as")]
        key: PathBuf,
    },
    /// Seal four thresholds and install them (owner only).
    SealRules {
        #[arg(long = "as")]
        key: PathBuf,
        #[arg(long)]
        max_impurity: u16,
        #[arg(long)]
        max_moisture: u16,
        #[arg(long)]
        min_density: u16,
        #[arg(long)]
        min_hardness: u16,
    },
    MakeRulesPublic {
        #[arg(long = "as")]
        key: PathBuf,
    },
    Rules,
    /// Seal four metrics and register the batch.
    Submit {
        #[arg(long = "as")]
        key: PathBuf,
        /// 32-byte hex id, or any label (hashed).
        #[arg(long)]
        batch: String,
        #[arg(long)]
        impurity: u16,
        #[arg(long)]
        moisture: u16,
        #[arg(long)]
        density: u16,
        #[arg(long)]
        hardness: u16,
    },
    Verdict {
        #[arg(long)]
        batch: String,
    },
    MakeVerdictPublic {
        #[arg(long = "as")]
        key: PathBuf,
        #[arg(long)]
        batch: String,
    },
    /// Run the decryption ceremony for a batch verdict.
    Decrypt {
        #[arg(long)]
        batch: String,
        /// Signing key of the requester; omit to use public decryption.
        #[arg(long = "as")]
        key: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        days: u32,
    },
    TransferOwnership {
        #[arg(long = "as")]
        key: PathBuf,
        #[arg(long)]
        new_owner: Identity,
    },
    SetQualityApp {
        #[arg(long = "as")]
        key: PathBuf,
        #[arg(long)]
        new_app: Identity,
    },
    Events {
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
    /// Drop stored ciphertexts that no grant references.
    Prune,
}

#[derive(Serialize)]
struct KeyInfo {
    identity: Identity,
    public_key: String,
}

impl KeyInfo {
    fn of(key: &SigningKey) -> Self {
        Self {
            identity: Identity::from_public_key(&key.verifying_key()),
            public_key: hex::encode(key.verifying_key().to_bytes()),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .with_writer(std::io::stderr)
        .init();
    match run(&cli.data_dir, cli.cmd).await {
        Ok(v) => println!("{}", v),
        Err(msg) => {
            println!("{}", json!({"error": msg}));
            std::process::exit(1);
        }
    }
}

async fn run(data_dir: &Path, cmd: Command) -> Result<serde_json::Value, String> {
    match cmd {
        Command::Init {
            owner,
            quality_app,
            contract,
            max_validity_days,
            decryption_timeout_ms,
        } => {
            let mut config = GateConfig::new(
                contract.unwrap_or_else(random_identity),
                owner,
                quality_app,
            );
            if let Some(days) = max_validity_days {
                config.decryption_max_validity_days = days;
            }
            if let Some(ms) = decryption_timeout_ms {
                config.decryption_timeout_ms = ms;
            }
            config.apply_env_overrides().map_err(|e| e.to_string())?;
            let d = LocalDeployment::init(data_dir, config).map_err(|e| e.to_string())?;
            Ok(json!({
                "contract": d.gate().contract_identity(),
                "owner": d.gate().owner(),
                "quality_app": d.gate().quality_app(),
                "rules": d.gate().get_rule_handles(),
            }))
        }
        Command::Keygen { out } => {
            if out.exists() {
                return Err(format!("{} already exists", out.display()));
            }
            let mut seed = [0u8; 32];
            OsRng.fill_bytes(&mut seed);
            let key = SigningKey::from_bytes(&seed);
            write_file_atomic_durable(&out, hex::encode(seed).as_bytes())
                .map_err(|e| e.to_string())?;
            Ok(json!(KeyInfo::of(&key)))
        }
        Command::Identity { key } => Ok(json!(KeyInfo::of(&load_signing_key(&key)?))),
        Command::SealRules {
            key,
            max_impurity,
            max_moisture,
            min_density,
            min_hardness,
        } => {
            let caller = caller_identity(&key)?;
            let d = open(data_dir)?;
            let (rules, proof) = d
                .seal_rules(caller, [max_impurity, max_moisture, min_density, min_hardness])
                .map_err(|e| e.to_string())?;
            let set = d
                .gate()
                .set_rules_encrypted(caller, &rules, &proof)
                .map_err(|e| e.to_string())?;
            save(&d, data_dir)?;
            Ok(json!({"rules": set}))
        }
        Command::MakeRulesPublic { key } => {
            let caller = caller_identity(&key)?;
            let d = open(data_dir)?;
            d.gate()
                .make_rules_public(caller)
                .map_err(|e| e.to_string())?;
            save(&d, data_dir)?;
            Ok(json!({"status": "ok"}))
        }
        Command::Rules => {
            let d = open(data_dir)?;
            Ok(json!({"rules": d.gate().get_rule_handles()}))
        }
        Command::Submit {
            key,
            batch,
            impurity,
            moisture,
            density,
            hardness,
        } => {
            let caller = caller_identity(&key)?;
            let batch_id = BatchId::parse_or_label(&batch);
            let d = open(data_dir)?;
            let (metrics, proof) = d
                .seal_metrics(caller, [impurity, moisture, density, hardness])
                .map_err(|e| e.to_string())?;
            let verdict = d
                .gate()
                .submit_batch_and_check(caller, batch_id, &metrics, &proof)
                .map_err(|e| e.to_string())?;
            save(&d, data_dir)?;
            Ok(json!({"batch_id": batch_id, "verdict": verdict}))
        }
        Command::Verdict { batch } => {
            let batch_id = BatchId::parse_or_label(&batch);
            let d = open(data_dir)?;
            Ok(json!({
                "batch_id": batch_id,
                "verdict": d.gate().get_verdict_handle(&batch_id),
            }))
        }
        Command::MakeVerdictPublic { key, batch } => {
            let caller = caller_identity(&key)?;
            let batch_id = BatchId::parse_or_label(&batch);
            let d = open(data_dir)?;
            d.gate()
                .make_verdict_public(caller, batch_id)
                .map_err(|e| e.to_string())?;
            save(&d, data_dir)?;
            Ok(json!({"status": "ok"}))
        }
        Command::Decrypt { batch, key, days } => {
            let batch_id = BatchId::parse_or_label(&batch);
            let d = open(data_dir)?;
            let handle = d
                .gate()
                .get_verdict_handle(&batch_id)
                .ok_or_else(|| format!("batch {batch_id} is not registered"))?
                .handle();
            let client = d
                .decryption_service()
                .spawn(1, d.config().decryption_timeout());
            let verdict = match key {
                Some(path) => {
                    let signer = load_signing_key(&path)?;
                    let values = client
                        .user_decrypt(&signer, vec![handle], days)
                        .await
                        .map_err(|e| e.to_string())?;
                    single_verdict(&values)?
                }
                None => public_verdict(&client, handle).await?,
            };
            Ok(json!({"batch_id": batch_id, "verdict": verdict}))
        }
        Command::TransferOwnership { key, new_owner } => {
            let caller = caller_identity(&key)?;
            let d = open(data_dir)?;
            d.gate()
                .transfer_ownership(caller, new_owner)
                .map_err(|e| e.to_string())?;
            save(&d, data_dir)?;
            Ok(json!({"owner": new_owner}))
        }
        Command::SetQualityApp { key, new_app } => {
            let caller = caller_identity(&key)?;
            let d = open(data_dir)?;
            d.gate()
                .set_quality_app(caller, new_app)
                .map_err(|e| e.to_string())?;
            save(&d, data_dir)?;
            Ok(json!({"quality_app": new_app}))
        }
        Command::Events { since } => {
            let d = open(data_dir)?;
            Ok(json!(d.gate().events_since(since)))
        }
        Command::Prune => {
            let mut d = open(data_dir)?;
            let dropped = d.prune_unreferenced();
            save(&d, data_dir)?;
            Ok(json!({"dropped": dropped, "kept": d.coprocessor().len()}))
        }
    }
}

fn open(data_dir: &Path) -> Result<LocalDeployment, String> {
    LocalDeployment::open(data_dir).map_err(|e| e.to_string())
}

fn save(d: &LocalDeployment, data_dir: &Path) -> Result<(), String> {
    d.save(data_dir).map_err(|e| e.to_string())
}

fn load_signing_key(path: &Path) -> Result<SigningKey, String> {
    let seed = snapshot::read_key(path).map_err(|e| e.to_string())?;
    Ok(SigningKey::from_bytes(&seed))
}

fn caller_identity(path: &Path) -> Result<Identity, String> {
    let key = load_signing_key(path)?;
    Ok(Identity::from_public_key(&key.verifying_key()))
}

fn random_identity() -> Identity {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    Identity::from_bytes(bytes)
}

async fn public_verdict(client: &DecryptionClient, handle: Handle) -> Result<Verdict, String> {
    let values = client
        .public_decrypt(vec![handle])
        .await
        .map_err(|e| e.to_string())?;
    single_verdict(&values)
}

fn single_verdict(values: &[ClearValue]) -> Result<Verdict, String> {
    match values {
        [value] => value
            .as_bool()
            .map(Verdict::from)
            .ok_or_else(|| "handle is not a verdict".to_string()),
        _ => Err("expected exactly one decrypted value".to_string()),
    }
}
