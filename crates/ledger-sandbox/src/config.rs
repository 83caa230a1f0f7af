//! Backend configuration: defaults, `SANDBOX_*` environment overrides and
//! JSON loading.

use crate::domain::entities::BLOCK_GAS_LIMIT;
use crate::domain::value_objects::Address;
use crate::evm::DEFAULT_MAX_STEPS;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use tracing::warn;

/// One gwei in wei.
pub const GWEI: u64 = 1_000_000_000;

/// Gas allowance given to simulated calls.
pub const DEFAULT_SIMULATION_GAS_LIMIT: u64 = 100_000_000_000_000;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON could not be parsed.
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds an unusable value.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Logging options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Chain identifier exposed to contracts.
    pub chain_id: u64,
    /// Gas allowance for `constant_call` and `estimate_gas`.
    pub simulation_gas_limit: u64,
    /// Initial gas price returned by the oracle, in wei.
    pub default_gas_price: u64,
    /// Block gas limit.
    pub block_gas_limit: u64,
    /// Largest accepted payload, in bytes.
    pub max_payload_size: usize,
    /// Pending pool capacity.
    pub pool_capacity: usize,
    /// Number of state roots kept before pruning.
    pub state_history_limit: usize,
    /// Interpreter step budget per frame.
    pub max_execution_steps: u64,
    /// Fee recipient.
    #[serde(with = "hex_address")]
    pub coinbase: Address,
    /// Logging.
    pub log: LogConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            simulation_gas_limit: DEFAULT_SIMULATION_GAS_LIMIT,
            default_gas_price: GWEI,
            block_gas_limit: BLOCK_GAS_LIMIT,
            max_payload_size: 128 * 1024,
            pool_capacity: 4096,
            state_history_limit: 256,
            max_execution_steps: DEFAULT_MAX_STEPS,
            coinbase: Address::ZERO,
            log: LogConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Defaults overridden by `SANDBOX_*` environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SANDBOX_CHAIN_ID`
    /// - `SANDBOX_SIMULATION_GAS_LIMIT`
    /// - `SANDBOX_GAS_PRICE`
    /// - `SANDBOX_BLOCK_GAS_LIMIT`
    /// - `SANDBOX_MAX_PAYLOAD_SIZE`
    /// - `SANDBOX_POOL_CAPACITY`
    /// - `SANDBOX_STATE_HISTORY`
    /// - `SANDBOX_MAX_STEPS`
    /// - `SANDBOX_COINBASE` (hex)
    /// - `SANDBOX_LOG_LEVEL`
    /// - `SANDBOX_JSON_LOGS`
    ///
    /// Unparseable values keep the default and log a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`BackendConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str, default: u64| -> u64 {
            match lookup(key) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    warn!(key, value = %raw, "ignoring unparseable config value");
                    default
                }),
                None => default,
            }
        };
        let parsed_usize = |key: &str, default: usize| -> usize {
            usize::try_from(parsed(key, default as u64)).unwrap_or(default)
        };

        let coinbase = match lookup("SANDBOX_COINBASE") {
            Some(raw) => Address::from_hex(raw.trim()).unwrap_or_else(|| {
                warn!(value = %raw, "ignoring unparseable coinbase");
                defaults.coinbase
            }),
            None => defaults.coinbase,
        };

        Self {
            chain_id: parsed("SANDBOX_CHAIN_ID", defaults.chain_id),
            simulation_gas_limit: parsed(
                "SANDBOX_SIMULATION_GAS_LIMIT",
                defaults.simulation_gas_limit,
            ),
            default_gas_price: parsed("SANDBOX_GAS_PRICE", defaults.default_gas_price),
            block_gas_limit: parsed("SANDBOX_BLOCK_GAS_LIMIT", defaults.block_gas_limit),
            max_payload_size: parsed_usize("SANDBOX_MAX_PAYLOAD_SIZE", defaults.max_payload_size),
            pool_capacity: parsed_usize("SANDBOX_POOL_CAPACITY", defaults.pool_capacity),
            state_history_limit: parsed_usize(
                "SANDBOX_STATE_HISTORY",
                defaults.state_history_limit,
            ),
            max_execution_steps: parsed("SANDBOX_MAX_STEPS", defaults.max_execution_steps),
            coinbase,
            log: LogConfig {
                level: lookup("SANDBOX_LOG_LEVEL").unwrap_or(defaults.log.level),
                json: lookup("SANDBOX_JSON_LOGS")
                    .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                    .unwrap_or(defaults.log.json),
            },
        }
    }

    /// Parses JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` on malformed JSON, or any [`BackendConfig::validate`]
    /// failure.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero limits.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("simulation_gas_limit", self.simulation_gas_limit),
            ("block_gas_limit", self.block_gas_limit),
            ("max_payload_size", self.max_payload_size as u64),
            ("pool_capacity", self.pool_capacity as u64),
            ("state_history_limit", self.state_history_limit as u64),
            ("max_execution_steps", self.max_execution_steps),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// `0x`-prefixed hex (de)serialization for addresses.
mod hex_address {
    use crate::domain::value_objects::Address;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{address:?}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::from_hex(&raw).ok_or_else(|| de::Error::custom(format!("invalid address {raw}")))
    }
}
