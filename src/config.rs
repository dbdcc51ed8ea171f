//! Node configuration, loaded from JSON.
//!
//! Every field has a default, a config file only needs to name what differs.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{apps::AppKind, Address};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("app definition {0} is registered twice")]
    DuplicateDefinition(Address),
    #[error("{0:?} can not be registered as a regular app")]
    ReservedKind(AppKind),
}

/// Addresses of the contracts the commitments point to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkContext {
    pub challenge_registry: Address,
    pub conditional_transaction_delegate_target: Address,
    /// App definition of the free balance app.
    pub identity_app: Address,
    pub multi_asset_multi_party_coin_transfer_interpreter: Address,
    pub single_asset_two_party_coin_transfer_interpreter: Address,
    pub two_party_fixed_outcome_interpreter: Address,
    pub proxy_factory: Address,
    pub minimum_viable_multisig: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRegistryEntry {
    pub kind: AppKind,
    pub definition: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkContext,
    pub apps: Vec<AppRegistryEntry>,
    /// ETH (the zero address) is always supported and need not be listed.
    pub supported_token_addresses: Vec<Address>,
    pub protocol_timeout_ms: u64,
    pub busy_retries: u32,
    pub busy_backoff_ms: u64,
    pub state_hash_cache_size: usize,
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkContext::default(),
            apps: Vec::new(),
            supported_token_addresses: Vec::new(),
            protocol_timeout_ms: 10_000,
            busy_retries: 5,
            busy_backoff_ms: 25,
            state_hash_cache_size: 1024,
            event_capacity: 256,
        }
    }
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_timeout_ms)
    }

    pub fn busy_backoff(&self) -> Duration {
        Duration::from_millis(self.busy_backoff_ms)
    }

    pub fn is_supported_token(&self, token: &Address) -> bool {
        token.is_zero() || self.supported_token_addresses.contains(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.protocol_timeout(), Duration::from_secs(10));
        assert_eq!(config.busy_retries, 5);
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config = Config::from_json_str(
            r#"{
                "network": { "identity_app": "0x00000000000000000000000000000000000000aa" },
                "apps": [
                    { "kind": "tic_tac_toe", "definition": "0x00000000000000000000000000000000000000bb" }
                ],
                "protocol_timeout_ms": 250
            }"#,
        )
        .unwrap();

        assert_eq!(config.network.identity_app.0[19], 0xaa);
        assert!(config.network.challenge_registry.is_zero());
        assert_eq!(config.apps[0].kind, AppKind::TicTacToe);
        assert_eq!(config.protocol_timeout_ms, 250);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn eth_is_always_supported() {
        let mut config = Config::default();
        assert!(config.is_supported_token(&Address::zero()));
        let token = Address([1; 20]);
        assert!(!config.is_supported_token(&token));
        config.supported_token_addresses.push(token);
        assert!(config.is_supported_token(&token));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            Config::from_json_str(r#"{ "busy_retries": "many" }"#),
            Err(ConfigError::Json(_))
        ));
    }
}
