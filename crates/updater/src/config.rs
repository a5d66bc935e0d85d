use crate::error::{Result, UpdaterError};
use crate::hasher::DigestAlgorithm;
use crate::jitter::DEFAULT_MAX_JITTER_SECS;
use crate::restart::DEFAULT_RESTART_URL;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings for one update run, read once at process entry.
///
/// Keys are kebab-case so existing `update.toml` files keep working:
///
/// ```toml
/// endpoint = "https://updates.example.com/service.json"
/// exec = "service"
/// execpath = "/opt/service"
/// log-file = "/var/log/service-update.log"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AgentConfig {
    /// Manifest URL.
    pub endpoint: String,
    /// File name of the service binary.
    pub exec: String,
    /// Directory holding the service binary.
    pub execpath: PathBuf,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_restart_url")]
    pub restart_url: String,
    /// Defaults to `execpath` so promotion stays on one filesystem.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_jitter_secs")]
    pub max_jitter_secs: u64,
    #[serde(default)]
    pub digest: DigestAlgorithm,
}

fn default_restart_url() -> String {
    DEFAULT_RESTART_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_jitter_secs() -> u64 {
    DEFAULT_MAX_JITTER_SECS
}

impl AgentConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            UpdaterError::config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: AgentConfig = toml::from_str(raw)
            .map_err(|err| UpdaterError::config(format!("invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;
        self.restart_url()?;
        if self.exec.is_empty() {
            return Err(UpdaterError::config("exec must not be empty"));
        }
        if self.exec.contains('/') || self.exec.contains('\\') {
            return Err(UpdaterError::config(format!(
                "exec must be a bare file name: {}",
                self.exec
            )));
        }
        if !self.execpath.is_absolute() {
            return Err(UpdaterError::config(format!(
                "execpath must be absolute: {}",
                self.execpath.display()
            )));
        }
        if self.timeout_secs == 0 {
            return Err(UpdaterError::config("timeout-secs must be positive"));
        }
        Ok(())
    }

    pub fn endpoint_url(&self) -> Result<Url> {
        parse_url("endpoint", &self.endpoint)
    }

    pub fn restart_url(&self) -> Result<Url> {
        parse_url("restart-url", &self.restart_url)
    }

    /// Absolute path of the live service binary.
    pub fn binary_path(&self) -> PathBuf {
        self.execpath.join(&self.exec)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| self.execpath.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|err| UpdaterError::config(format!("invalid {key} {value:?}: {err}")))
}
