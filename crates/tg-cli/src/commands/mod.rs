//! Command handlers for the `tg` binary.
//!
//! Shared session wiring lives here; each subcommand family has its own
//! module.

pub mod audit;
pub mod gate;
pub mod risk;

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tg_audit::JsonlAuditTrail;
use tg_config::{SessionConfig, ENV_CONFIG_PATHS};
use tg_risk::RiskLedger;
use tg_schemas::SystemClock;
use tg_store::JsonlStateStore;
use tracing::info;

/// How a command ended, for the process exit code.
pub enum Outcome {
    Done,
    /// The command ran, but the system said no (denied, blocked, rejected).
    Refused,
}

pub struct Session {
    pub config: SessionConfig,
}

/// Load the session config from `--config` paths, or `TG_CONFIG` if none.
pub fn load_session(config_paths: &[String]) -> Result<Session> {
    let paths: Vec<String> = if config_paths.is_empty() {
        let raw = std::env::var(ENV_CONFIG_PATHS).with_context(|| {
            format!("no --config given and {ENV_CONFIG_PATHS} is not set")
        })?;
        tg_config::split_config_paths(&raw)
    } else {
        config_paths.to_vec()
    };
    if paths.is_empty() {
        anyhow::bail!("no session config paths");
    }

    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = tg_config::load_layered_yaml(&refs)?;
    let config = SessionConfig::from_loaded(&loaded)?;
    info!(
        session_id = %config.session.session_id,
        mode = %config.session.mode,
        config_hash = %loaded.config_hash,
        "session config loaded"
    );
    Ok(Session { config })
}

impl Session {
    pub fn store(&self) -> Result<JsonlStateStore> {
        JsonlStateStore::open(&self.config.storage.state_dir)
    }

    pub fn ledger(&self) -> Result<RiskLedger<JsonlStateStore, SystemClock>> {
        RiskLedger::open(
            &self.config.session.session_id,
            self.config.session.mode,
            self.config.session.account_equity,
            self.store()?,
            SystemClock,
        )
    }

    pub fn audit(&self) -> Result<JsonlAuditTrail> {
        JsonlAuditTrail::open(self.config.audit_log_path(), self.config.storage.hash_chain)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value).context("serialize output")?;
    std::fs::write(path, raw).with_context(|| format!("write {}", path.display()))
}

/// Read a JSON file, tolerating a UTF-8 BOM.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    serde_json::from_slice(bytes).with_context(|| format!("parse {}", path.display()))
}
