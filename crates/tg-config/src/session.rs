use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tg_schemas::MarketMode;

use crate::LoadedConfig;

/// Typed view of a merged session config.
///
/// ```yaml
/// session:
///   session_id: "default"
///   mode: "SWING"            # INTRADAY | SWING
///   account_equity: 1000000
/// storage:
///   state_dir: "state"
///   audit_log: "state/execution_audit.jsonl"   # optional
///   hash_chain: true                            # optional, default true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub session: SessionSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    #[serde(default = "default_session_id")]
    pub session_id: String,
    pub mode: MarketMode,
    pub account_equity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    pub state_dir: PathBuf,
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    #[serde(default = "default_hash_chain")]
    pub hash_chain: bool,
}

fn default_session_id() -> String {
    "default".to_string()
}

fn default_hash_chain() -> bool {
    true
}

impl SessionConfig {
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let cfg: SessionConfig = serde_json::from_value(loaded.config_json.clone())
            .context("CONFIG_INVALID: session config does not match schema")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.session_id.trim().is_empty() {
            bail!("CONFIG_INVALID: session.session_id must not be empty");
        }
        let eq = self.session.account_equity;
        if !eq.is_finite() || eq <= 0.0 {
            bail!("CONFIG_INVALID: session.account_equity must be > 0 (got {eq})");
        }
        Ok(())
    }

    /// Audit log path; defaults to `<state_dir>/execution_audit.jsonl`.
    pub fn audit_log_path(&self) -> PathBuf {
        self.storage
            .audit_log
            .clone()
            .unwrap_or_else(|| self.storage.state_dir.join("execution_audit.jsonl"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_layered_yaml_from_strings;

    const BASE: &str = r#"
session:
  mode: "SWING"
  account_equity: 1000000
storage:
  state_dir: "state"
"#;

    #[test]
    fn defaults_fill_optional_fields() {
        let loaded = load_layered_yaml_from_strings(&[BASE]).unwrap();
        let cfg = SessionConfig::from_loaded(&loaded).unwrap();
        assert_eq!(cfg.session.session_id, "default");
        assert_eq!(cfg.session.mode, MarketMode::Swing);
        assert!(cfg.storage.hash_chain);
        assert_eq!(cfg.audit_log_path(), PathBuf::from("state/execution_audit.jsonl"));
    }

    #[test]
    fn non_positive_equity_rejected() {
        let over = "session:\n  account_equity: 0\n";
        let loaded = load_layered_yaml_from_strings(&[BASE, over]).unwrap();
        let err = SessionConfig::from_loaded(&loaded).unwrap_err();
        assert!(err.to_string().contains("account_equity"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let over = "session:\n  max_risk_per_decision: 0.5\n";
        let loaded = load_layered_yaml_from_strings(&[BASE, over]).unwrap();
        assert!(SessionConfig::from_loaded(&loaded).is_err());
    }

    #[test]
    fn bad_mode_rejected() {
        let over = "session:\n  mode: \"SCALP\"\n";
        let loaded = load_layered_yaml_from_strings(&[BASE, over]).unwrap();
        assert!(SessionConfig::from_loaded(&loaded).is_err());
    }
}
