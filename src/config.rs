use crate::datasource::rpc::ChainEndpoint;
use crate::datasource::price_cache::DEFAULT_PRICE_CACHE_CAPACITY;
use crate::datasource::PriceFallback;
use crate::domain::Address;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub indexer_api_url: String,
    pub chains: BTreeMap<u64, ChainConfig>,
    pub sync_interval_secs: u64,
    pub sync_concurrency: usize,
    pub price_fallback: PriceFallback,
    pub price_cache_capacity: usize,
}

/// Per-chain endpoints, from `RPC_URL_<id>`, `DEPLOYMENT_BLOCK_<id>` and
/// `POSITION_MANAGER_<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub deployment_block: u64,
    pub position_manager: Address,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let indexer_api_url = required(&env_map, "INDEXER_API_URL")?;

        let chain_ids = required(&env_map, "CHAIN_IDS")?;
        let mut chains = BTreeMap::new();
        for raw in chain_ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let chain_id = raw.parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue(
                    "CHAIN_IDS".to_string(),
                    format!("{} is not a valid chain id", raw),
                )
            })?;
            chains.insert(chain_id, parse_chain(&env_map, chain_id)?);
        }
        if chains.is_empty() {
            return Err(ConfigError::InvalidValue(
                "CHAIN_IDS".to_string(),
                "must list at least one chain id".to_string(),
            ));
        }

        let sync_interval_secs = env_map
            .get("SYNC_INTERVAL_SECS")
            .map(|s| s.as_str())
            .unwrap_or("300")
            .parse::<u64>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SYNC_INTERVAL_SECS".to_string(),
                    "must be an integer >= 1".to_string(),
                )
            })?;

        let sync_concurrency = env_map
            .get("SYNC_CONCURRENCY")
            .map(|s| s.as_str())
            .unwrap_or("4")
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "SYNC_CONCURRENCY".to_string(),
                    "must be an integer >= 1".to_string(),
                )
            })?;

        let price_fallback = env_map
            .get("PRICE_FALLBACK")
            .map(|s| s.as_str())
            .unwrap_or("strict")
            .parse::<PriceFallback>()
            .map_err(|e| ConfigError::InvalidValue("PRICE_FALLBACK".to_string(), e))?;

        let price_cache_capacity = match env_map.get("PRICE_CACHE_CAPACITY") {
            None => DEFAULT_PRICE_CACHE_CAPACITY,
            Some(raw) => raw.parse::<usize>().ok().filter(|n| *n >= 1).ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PRICE_CACHE_CAPACITY".to_string(),
                    "must be an integer >= 1".to_string(),
                )
            })?,
        };

        Ok(Config {
            database_path,
            indexer_api_url,
            chains,
            sync_interval_secs,
            sync_concurrency,
            price_fallback,
            price_cache_capacity,
        })
    }

    pub fn deployment_blocks(&self) -> HashMap<u64, u64> {
        self.chains
            .iter()
            .map(|(id, chain)| (*id, chain.deployment_block))
            .collect()
    }

    pub fn chain_endpoints(&self) -> HashMap<u64, ChainEndpoint> {
        self.chains
            .iter()
            .map(|(id, chain)| {
                (
                    *id,
                    ChainEndpoint {
                        rpc_url: chain.rpc_url.clone(),
                        position_manager: chain.position_manager.clone(),
                    },
                )
            })
            .collect()
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_chain(env_map: &HashMap<String, String>, chain_id: u64) -> Result<ChainConfig, ConfigError> {
    let rpc_url = required(env_map, &format!("RPC_URL_{}", chain_id))?;

    let block_key = format!("DEPLOYMENT_BLOCK_{}", chain_id);
    let deployment_block = required(env_map, &block_key)?
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue(block_key, "must be a valid u64".to_string()))?;

    let position_manager = Address::new(required(
        env_map,
        &format!("POSITION_MANAGER_{}", chain_id),
    )?);

    Ok(ChainConfig {
        rpc_url,
        deployment_block,
        position_manager,
    })
}
