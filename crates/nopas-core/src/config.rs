//! nopas.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DATA_DIR: &str = "/var/lib/nopas";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NopasConfig {
    pub daemon: Option<DaemonConfig>,
    pub backend: Option<BackendConfig>,
    pub clock: Option<ClockConfig>,
    pub aws: Option<AwsConfig>,
    pub vault: Option<VaultConfig>,
    pub signals: Option<SignalsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Upper bound on any single backend call, e.g. "10s".
    pub call_timeout: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Offset from UTC used to compute the time of day for schedules.
    pub utc_offset_minutes: Option<i32>,
}

/// Where static AWS keys come from. Both unset means the default chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub access_key_env: Option<String>,
    pub secret_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    pub token_env: Option<String>,
}

/// Source of the cluster core ratio for CoreRatio policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    pub nomad_address: String,
    pub nomad_path: String,
}

impl NopasConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NopasConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn port(&self) -> u16 {
        self.daemon
            .as_ref()
            .and_then(|d| d.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.daemon
            .as_ref()
            .and_then(|d| d.data_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn call_timeout(&self) -> Duration {
        self.backend
            .as_ref()
            .and_then(|b| b.call_timeout.as_deref())
            .and_then(parse_duration)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_CALL_TIMEOUT)
    }

    pub fn utc_offset_minutes(&self) -> i32 {
        self.clock
            .as_ref()
            .and_then(|c| c.utc_offset_minutes)
            .unwrap_or(0)
    }

    /// Scaffold a nopas.toml with every section filled in.
    pub fn scaffold() -> Self {
        NopasConfig {
            daemon: Some(DaemonConfig {
                port: Some(DEFAULT_PORT),
                data_dir: Some(PathBuf::from(DEFAULT_DATA_DIR)),
            }),
            backend: Some(BackendConfig {
                call_timeout: Some("10s".to_string()),
            }),
            clock: Some(ClockConfig {
                utc_offset_minutes: Some(0),
            }),
            aws: Some(AwsConfig {
                access_key_env: Some("ASG_ID".to_string()),
                secret_key_env: Some("ASG_SECRET".to_string()),
            }),
            vault: Some(VaultConfig {
                address: "http://127.0.0.1:8200".to_string(),
                token_env: Some("VAULT_TOKEN".to_string()),
            }),
            signals: None,
        }
    }
}
