//! JSON-RPC chain client: pool prices, finality and position manager reads.

use super::{DataSourceError, FinalitySource, PositionReader, PriceSource};
use crate::domain::{Address, Amount, NftId, OnChainPosition, PoolMetadata, PriceSnapshot};
use alloy_primitives::{Address as EvmAddress, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

mod abi {
    use alloy_sol_types::sol;

    sol! {
        /// Uniswap V3 pool.
        #[derive(Debug)]
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );

        /// NonfungiblePositionManager.
        #[derive(Debug)]
        function positions(uint256 tokenId) external view returns (
            uint96 nonce,
            address operator,
            address token0,
            address token1,
            uint24 fee,
            int24 tickLower,
            int24 tickUpper,
            uint128 liquidity,
            uint256 feeGrowthInside0LastX128,
            uint256 feeGrowthInside1LastX128,
            uint128 tokensOwed0,
            uint128 tokensOwed1
        );

        #[derive(Debug)]
        function ownerOf(uint256 tokenId) external view returns (address owner);
    }
}

/// Per-chain endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
    pub rpc_url: String,
    pub position_manager: Address,
}

#[derive(Debug, Clone)]
pub struct RpcChainClient {
    client: Client,
    chains: HashMap<u64, ChainEndpoint>,
}

/// A block header subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockInfo {
    number: u64,
    timestamp: i64,
}

impl RpcChainClient {
    pub fn new(chains: HashMap<u64, ChainEndpoint>) -> Self {
        Self {
            client: Client::new(),
            chains,
        }
    }

    fn endpoint(&self, chain_id: u64) -> Result<&ChainEndpoint, DataSourceError> {
        self.chains
            .get(&chain_id)
            .ok_or(DataSourceError::UnknownChain(chain_id))
    }

    /// POST a JSON-RPC request with exponential backoff on transient failures.
    async fn call(
        &self,
        chain_id: u64,
        method: &str,
        params: Value,
    ) -> Result<Value, DataSourceError> {
        let endpoint = self.endpoint(chain_id)?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let response = retry(backoff, || async {
            let response = self
                .client
                .post(&endpoint.rpc_url)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await?;

        extract_result(response)
    }

    async fn block(&self, chain_id: u64, tag: &str) -> Result<BlockInfo, DataSourceError> {
        let result = self
            .call(chain_id, "eth_getBlockByNumber", json!([tag, false]))
            .await?;
        if result.is_null() {
            return Err(DataSourceError::Other(format!(
                "block {} not available on chain {}",
                tag, chain_id
            )));
        }
        parse_block(&result)
    }

    async fn eth_call<C: SolCall>(
        &self,
        chain_id: u64,
        to: &Address,
        call: &C,
        block_tag: &str,
    ) -> Result<C::Return, DataSourceError> {
        let data = format!("0x{}", hex::encode(call.abi_encode()));
        let result = self
            .call(
                chain_id,
                "eth_call",
                json!([{ "to": to.as_str(), "data": data }, block_tag]),
            )
            .await?;
        let hex_data = result
            .as_str()
            .ok_or_else(|| DataSourceError::ParseError("eth_call result not a string".to_string()))?;
        decode_returns::<C>(hex_data)
    }

    async fn slot0_at(
        &self,
        pool: &PoolMetadata,
        block: BlockInfo,
    ) -> Result<PriceSnapshot, DataSourceError> {
        let slot0 = self
            .eth_call(
                pool.chain_id,
                &pool.address,
                &abi::slot0Call {},
                &to_block_tag(block.number),
            )
            .await?;

        Ok(PriceSnapshot {
            sqrt_price_x96: Amount::from_be_bytes_unsigned(&slot0.sqrtPriceX96.to_be_bytes_vec()),
            block_number: block.number,
            timestamp: block.timestamp,
            degraded: false,
        })
    }
}

#[async_trait]
impl PriceSource for RpcChainClient {
    async fn price_at(
        &self,
        pool: &PoolMetadata,
        block_number: u64,
    ) -> Result<PriceSnapshot, DataSourceError> {
        debug!(pool = %pool.address, block_number, "reading slot0");
        let block = self.block(pool.chain_id, &to_block_tag(block_number)).await?;
        self.slot0_at(pool, block).await
    }

    async fn latest_price(&self, pool: &PoolMetadata) -> Result<PriceSnapshot, DataSourceError> {
        let block = self.block(pool.chain_id, "latest").await?;
        self.slot0_at(pool, block).await
    }
}

#[async_trait]
impl FinalitySource for RpcChainClient {
    async fn last_finalized_block(&self, chain_id: u64) -> Result<u64, DataSourceError> {
        Ok(self.block(chain_id, "finalized").await?.number)
    }
}

#[async_trait]
impl PositionReader for RpcChainClient {
    async fn read_position(
        &self,
        chain_id: u64,
        nft_id: &NftId,
    ) -> Result<OnChainPosition, DataSourceError> {
        let manager = self.endpoint(chain_id)?.position_manager.clone();
        let token = token_id(nft_id)?;

        let position = match self
            .eth_call(chain_id, &manager, &abi::positionsCall { tokenId: token }, "latest")
            .await
        {
            Ok(position) => position,
            // Burned tokens revert; they hold nothing.
            Err(DataSourceError::RpcError { message, .. }) if is_revert(&message) => {
                debug!(chain_id, nft = %nft_id, "positions() reverted, treating as burned");
                return Ok(OnChainPosition::default());
            }
            Err(e) => return Err(e),
        };

        let owner_address = match self
            .eth_call(chain_id, &manager, &abi::ownerOfCall { tokenId: token }, "latest")
            .await
        {
            Ok(owner) => Some(to_address(owner)),
            Err(DataSourceError::RpcError { message, .. }) if is_revert(&message) => None,
            Err(e) => {
                warn!(chain_id, nft = %nft_id, error = %e, "ownerOf failed");
                None
            }
        };

        Ok(to_on_chain_position(position, owner_address))
    }
}

fn is_revert(message: &str) -> bool {
    message.to_ascii_lowercase().contains("revert")
}

fn to_block_tag(block_number: u64) -> String {
    format!("0x{:x}", block_number)
}

fn extract_result(response: Value) -> Result<Value, DataSourceError> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Err(DataSourceError::RpcError { code, message });
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| DataSourceError::ParseError("Missing result".to_string()))
}

fn parse_hex_u64(value: &Value, field: &str) -> Result<u64, DataSourceError> {
    let s = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| DataSourceError::ParseError(format!("Missing {}", field)))?;
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| DataSourceError::ParseError(format!("{} not hex: {}", field, s)))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| DataSourceError::ParseError(format!("Invalid {}: {}", field, e)))
}

fn parse_block(value: &Value) -> Result<BlockInfo, DataSourceError> {
    let number = parse_hex_u64(value, "number")?;
    let timestamp = parse_hex_u64(value, "timestamp")?;
    let timestamp = i64::try_from(timestamp)
        .map_err(|_| DataSourceError::ParseError(format!("timestamp overflow: {}", timestamp)))?;
    Ok(BlockInfo { number, timestamp })
}

fn decode_returns<C: SolCall>(data: &str) -> Result<C::Return, DataSourceError> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    let bytes =
        hex::decode(digits).map_err(|e| DataSourceError::ParseError(format!("Invalid hex: {}", e)))?;
    C::abi_decode_returns(&bytes).map_err(|e| {
        DataSourceError::ParseError(format!("Invalid {} return data: {}", C::SIGNATURE, e))
    })
}

/// Token ids are decimal strings of a uint256.
fn token_id(nft_id: &NftId) -> Result<U256, DataSourceError> {
    U256::from_str_radix(nft_id.as_str(), 10)
        .map_err(|e| DataSourceError::ParseError(format!("Invalid token id {}: {}", nft_id, e)))
}

fn to_amount(value: U256) -> Amount {
    Amount::from_be_bytes_unsigned(&value.to_be_bytes::<32>())
}

fn to_address(address: EvmAddress) -> Address {
    Address::new(format!("0x{}", hex::encode(address.as_slice())))
}

fn to_on_chain_position(
    position: abi::positionsReturn,
    owner_address: Option<Address>,
) -> OnChainPosition {
    OnChainPosition {
        owner_address,
        liquidity: Amount::from(position.liquidity),
        fee_growth_inside0_last_x128: to_amount(position.feeGrowthInside0LastX128),
        fee_growth_inside1_last_x128: to_amount(position.feeGrowthInside1LastX128),
        tokens_owed0: Amount::from(position.tokensOwed0),
        tokens_owed1: Amount::from(position.tokensOwed1),
    }
}
