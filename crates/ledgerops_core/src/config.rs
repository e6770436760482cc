use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding [`LedgerConfig::rpc_url`].
pub const ENV_RPC_URL: &str = "LEDGEROPS_RPC_URL";
/// Environment variable overriding [`LedgerConfig::confirmation_depth`].
pub const ENV_CONFIRMATIONS: &str = "LEDGEROPS_CONFIRMATIONS";

const DEFAULT_RPC_URL: &str = "https://rpc.ithacanet.teztnets.xyz";

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// Network and confirmation settings stored at `~/.ledgerops/config.json`.
///
/// Key material is **never** part of this file. Signers are built from the
/// environment by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL of the node's JSON interface.
    pub rpc_url: String,

    /// Blocks that must follow the including block before an operation
    /// counts as confirmed.
    pub confirmation_depth: u32,

    /// Delay between two status polls.
    pub poll_interval_secs: u64,

    /// Ceiling on how long a single confirmation wait may take.
    pub polling_timeout_secs: u64,

    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,

    /// Addresses of contracts that were already deployed, keyed by name
    /// (`"token"`, `"crowdsale"`, `"wallet"`).
    pub deployments: BTreeMap<String, String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.into(),
            confirmation_depth: 1,
            poll_interval_secs: 5,
            polling_timeout_secs: 90_000,
            request_timeout_secs: 30,
            deployments: BTreeMap::new(),
        }
    }
}

impl LedgerConfig {
    /// Returns the base config directory: `~/.ledgerops/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".ledgerops"))
    }

    /// Returns the config file path: `~/.ledgerops/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.ledgerops/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn polling_timeout(&self) -> Duration {
        Duration::from_secs(self.polling_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Address recorded for a previously deployed contract.
    pub fn deployment(&self, name: &str) -> Option<&str> {
        self.deployments.get(name).map(String::as_str)
    }

    /// Load config from a specific file path. A missing file yields the
    /// defaults; an unreadable or corrupt file is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load config, falling back to defaults on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Unusable config file, using defaults: {e:#}");
                Self::default()
            }
        }
    }

    /// Save config to a specific file path, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc_url = url;
        }
        if let Some(depth) = lookup(ENV_CONFIRMATIONS) {
            self.confirmation_depth = depth
                .trim()
                .parse()
                .with_context(|| format!("{ENV_CONFIRMATIONS} must be a non-negative integer"))?;
        }
        self.validate()
    }

    /// Check the invariants the client relies on.
    pub fn validate(&self) -> Result<()> {
        if !validate_url(&self.rpc_url) {
            anyhow::bail!("invalid RPC URL: {}", self.rpc_url);
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        if self.polling_timeout_secs == 0 {
            anyhow::bail!("polling_timeout_secs must be positive");
        }
        Ok(())
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}
