use crate::errors::WalletError;
use crate::keystore::KdfKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Wallet configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// JSON-RPC endpoint of the trusted node
    pub rpc_url: String,

    /// Chain ID, packed into the high 16 bits of the transaction version
    pub chain_id: u16,

    /// Message version, packed into the low 16 bits
    pub msg_version: u16,

    /// Where exported keystore files go
    pub keystore_dir: PathBuf,

    /// KDF used when exporting keys
    pub default_kdf: KdfKind,

    pub default_gas_price: u128,
    pub default_gas_limit: u64,

    /// Per-request HTTP timeout in milliseconds
    pub request_timeout_ms: u64,

    pub retry: RetryPolicy,
    pub confirm: ConfirmConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let keystore_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".aster")
            .join("keystore");

        Self {
            rpc_url: "http://localhost:4201".to_string(),
            chain_id: 1,
            msg_version: 1,
            keystore_dir,
            default_kdf: KdfKind::Scrypt,
            default_gas_price: 2_000_000_000,
            default_gas_limit: 50,
            request_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            confirm: ConfirmConfig::default(),
        }
    }
}

impl WalletConfig {
    /// Local isolated server defaults
    pub fn devnet() -> Self {
        Self {
            rpc_url: "http://localhost:5555".to_string(),
            chain_id: 222,
            ..Self::default()
        }
    }

    /// `(chain_id << 16) | msg_version`
    pub fn version(&self) -> u32 {
        pack_version(self.chain_id, self.msg_version)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let content = std::fs::read_to_string(path)?;
        let config: WalletConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save as pretty JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WalletError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Transaction version for a chain and message version
pub fn pack_version(chain_id: u16, msg_version: u16) -> u32 {
    ((chain_id as u32) << 16) | msg_version as u32
}

/// Bounded exponential backoff for read-only RPC calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): 100ms, 200ms, 400ms, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self.initial_backoff_ms.saturating_mul(factor);
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}

/// Confirmation polling defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            max_attempts: 33,
            interval_ms: 1_000,
        }
    }
}

impl ConfirmConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
