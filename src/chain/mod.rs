//! Chain-wide consensus parameters that tie the engines together: fork
//! block numbers, gas limit bounds, and the few constants the difficulty
//! and header-validation rules need. Config loading (`from_toml`) is the
//! ambient counterpart of the teacher's `clap`-only CLI: real clients take
//! these from a file, not hardcoded literals.

use primitive_types::U256;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(deserialize_with = "deserialize_u256")]
    pub homestead_block: U256,
    #[serde(deserialize_with = "deserialize_u256")]
    pub bomb_delay_blocks: U256,
    pub gas_limit_bound_divisor: u64,
    pub min_gas_limit: u64,
    #[serde(deserialize_with = "deserialize_u256")]
    pub block_reward: U256,
    #[serde(deserialize_with = "deserialize_u256")]
    pub initial_difficulty: U256,
    #[serde(deserialize_with = "deserialize_u256")]
    pub minimum_difficulty: U256,
    pub difficulty_bound_divisor: u64,
    /// Bootnode addresses (`enode://...`), carried through config but not
    /// consumed by anything in this crate — there is no network layer here.
    pub nodes: Vec<String>,
}

/// TOML has no native 256-bit integer; config files spell these fields out
/// as decimal strings (or plain integers for values that fit in a u64).
fn deserialize_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }
    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(U256::from(n)),
        Repr::Text(s) => U256::from_dec_str(&s).map_err(serde::de::Error::custom),
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        ChainConfig {
            chain_id: 1,
            homestead_block: U256::from(1_150_000u64),
            bomb_delay_blocks: U256::zero(),
            gas_limit_bound_divisor: 1_024,
            min_gas_limit: 125_000,
            block_reward: U256::from(5u64) * U256::exp10(18),
            initial_difficulty: U256::from(131_072u64),
            minimum_difficulty: U256::from(131_072u64),
            difficulty_bound_divisor: 2_048,
            nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ChainConfig {
    pub fn from_toml(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: ChainConfig = toml::from_str(&text)?;
        Ok(config)
    }
}
