//! Configuration management for ethertool
//!
//! Loads configuration from TOML files with environment variable
//! substitution. Every section has defaults so the CLI also runs with
//! command-line flags alone.

use crate::error::{ToolError, ToolResult};

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

pub const ETHGASSTATION_API_ENDPOINT: &str = "https://ethgasstation.info/api/ethgasAPI.json";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chain: ChainSettings,
    pub gas: GasSettings,
    pub redispatch: RedispatchSettings,
    pub wallet: WalletSettings,
    pub address_book: AddressBookSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// RPC endpoints in failover order.
    pub rpc_urls: Vec<String>,
    pub chain_id: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_urls: vec!["http://localhost:8545".to_string()],
            chain_id: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GasSettings {
    /// Urgency level: lowest | average | fast | fastest.
    pub level: String,
    pub endpoint: String,
    /// Delay between oracle retries when no cached quote exists.
    pub retry_delay_ms: u64,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            level: "fast".to_string(),
            endpoint: ETHGASSTATION_API_ENDPOINT.to_string(),
            retry_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedispatchSettings {
    /// Poll cadence; a transaction unmined for this long is stalled.
    pub watch_interval_ms: u64,
    /// Replacement gas price as a percentage of the previous one.
    pub escalation_percent: u64,
    /// Re-broadcasts allowed per nonce before giving up.
    pub max_resubmissions: u32,
    /// Pause after a failed poll.
    pub poll_backoff_ms: u64,
}

impl Default for RedispatchSettings {
    fn default() -> Self {
        Self {
            watch_interval_ms: 15_000,
            escalation_percent: 125,
            max_resubmissions: 5,
            poll_backoff_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletSettings {
    /// Name of the environment variable holding the hex private key.
    pub private_key_env: String,
    /// Durable accounts manage their own resubmission; skip the redispatcher.
    pub persistent: bool,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            private_key_env: "WALLET_PRIVATE_KEY".to_string(),
            persistent: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AddressBookSettings {
    pub path: PathBuf,
}

impl Default for AddressBookSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("addresses.txt"),
        }
    }
}

impl Settings {
    /// Load settings from a configuration file.
    ///
    /// An explicit path must exist; the default path is optional and falls
    /// back to built-in defaults when absent.
    pub fn load(path: Option<&Path>) -> ToolResult<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback
            }
        };

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            ToolError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;

        // Substitute environment variables
        let raw = substitute_env_vars(&raw);

        let settings: Settings = toml::from_str(&raw).map_err(|e| {
            ToolError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    pub fn validate(&self) -> ToolResult<()> {
        if self.chain.rpc_urls.is_empty() {
            return Err(ToolError::Config(
                "at least one RPC url must be configured".to_string(),
            ));
        }
        if self.redispatch.escalation_percent <= 100 {
            return Err(ToolError::Config(
                "redispatch.escalation_percent must be greater than 100".to_string(),
            ));
        }
        if self.redispatch.watch_interval_ms == 0 {
            return Err(ToolError::Config(
                "redispatch.watch_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
