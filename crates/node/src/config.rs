//! Node Configuration

use alloy_primitives::{hex, Address, U256};
use anyhow::{Context, Result};
use k256::ecdsa::SigningKey;
use l2_consensus::seal::address_from_key;
use l2_runtime::{GenesisConfig, BLOCK_TIME_MS, DEFAULT_GAS_LIMIT, MAX_TXS_PER_BLOCK};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Devnet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Block time in milliseconds
    pub block_time_ms: u64,
    pub max_txs_per_block: usize,
    pub gas_limit: u64,
    /// Hex encoded sequencer signing keys
    pub sequencer_keys: Vec<String>,
    /// Hex encoded watchtower signing key
    pub watchtower_key: String,
    /// Hex encoded key of the account sending demo transfers
    pub user_key: String,
    pub user_balance: u64,
    /// Feed the follower a forged copy of this block to exercise fraud proofs
    pub forge_block: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            block_time_ms: BLOCK_TIME_MS,
            max_txs_per_block: MAX_TXS_PER_BLOCK,
            gas_limit: DEFAULT_GAS_LIMIT,
            sequencer_keys: vec![dev_key(1), dev_key(2), dev_key(3)],
            watchtower_key: dev_key(10),
            user_key: dev_key(20),
            user_balance: 1_000_000_000,
            forge_block: None,
        }
    }
}

fn dev_key(byte: u8) -> String {
    hex::encode([byte; 32])
}

fn parse_key(encoded: &str) -> Result<SigningKey> {
    let bytes = hex::decode(encoded).context("signing key is not hex")?;
    SigningKey::from_slice(&bytes).context("invalid signing key")
}

impl NodeConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn sequencer_keys(&self) -> Result<Vec<SigningKey>> {
        self.sequencer_keys.iter().map(|k| parse_key(k)).collect()
    }

    pub fn watchtower_key(&self) -> Result<SigningKey> {
        parse_key(&self.watchtower_key)
    }

    pub fn user_key(&self) -> Result<SigningKey> {
        parse_key(&self.user_key)
    }

    /// Genesis shared by every node of the devnet
    pub fn genesis(&self) -> Result<GenesisConfig> {
        let sequencers: Vec<Address> = self
            .sequencer_keys()?
            .iter()
            .map(address_from_key)
            .collect();
        let watchtower = address_from_key(&self.watchtower_key()?);
        let user = address_from_key(&self.user_key()?);

        Ok(GenesisConfig {
            gas_limit: self.gas_limit,
            timestamp: 0,
            validators: Vec::new(),
            sequencers,
            watchtowers: vec![watchtower],
            alloc: vec![(user, U256::from(self.user_balance))],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: NodeConfig = serde_json::from_str(r#"{ "block_time_ms": 250 }"#).unwrap();
        assert_eq!(config.block_time_ms, 250);
        assert_eq!(config.sequencer_keys.len(), 3);
        assert!(config.forge_block.is_none());
    }

    #[test]
    fn test_genesis_from_default_keys() {
        let genesis = NodeConfig::default().genesis().unwrap();
        assert_eq!(genesis.sequencers.len(), 3);
        assert_eq!(genesis.watchtowers.len(), 1);
        assert_eq!(genesis.alloc.len(), 1);
    }

    #[test]
    fn test_bad_key_rejected() {
        let config = NodeConfig {
            watchtower_key: "zz".to_string(),
            ..Default::default()
        };
        assert!(config.genesis().is_err());
    }
}
