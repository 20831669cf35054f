//! Config model and persistence helpers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::validation::PollPolicy;

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend endpoints.
    pub gateway: GatewayCfg,
    /// Limits and polling of the upload pipeline.
    #[serde(default)]
    pub upload: UploadCfg,
    /// Where the last batch's state is kept.
    #[serde(default)]
    pub storage: StorageCfg,
}

/// Base URLs of the notification gateway and the sequence storage service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayCfg {
    /// Hosts `document-reference` and `notification-sequence`.
    pub igs_gateway_url: String,
    /// Hosts the `S3Controller` upload endpoints.
    pub igs_service_url: String,
    /// Sent as `Authorization: Bearer` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadCfg {
    /// Larger files are not attached.
    pub max_file_size_bytes: u64,
    /// Validation status polls per file.
    pub max_attempts: u32,
    pub wait_between_retries_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageCfg {
    /// Directory of the `IGS_*.json` state files.
    pub state_dir: PathBuf,
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(toml::from_str(&s).with_context(|| format!("invalid config {}", path.display()))?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            tracing::info!("wrote default config to {}", path.display());
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.upload.max_attempts,
            wait_between: Duration::from_millis(self.upload.wait_between_retries_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayCfg {
                igs_gateway_url: "http://localhost:8080/gateway/igs".into(),
                igs_service_url: "http://localhost:8080/igs-service".into(),
                bearer_token: None,
            },
            upload: UploadCfg::default(),
            storage: StorageCfg::default(),
        }
    }
}

impl Default for UploadCfg {
    /// 2 GiB limit, 40 polls one second apart.
    fn default() -> Self {
        Self {
            max_file_size_bytes: 2 * 1024 * 1024 * 1024,
            max_attempts: 40,
            wait_between_retries_ms: 1000,
        }
    }
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
        }
    }
}
