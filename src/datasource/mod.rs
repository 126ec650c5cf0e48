//! Collaborator abstractions: event history, prices, finality, on-chain
//! position reads and the downstream aggregate trigger.

use crate::domain::{NftId, OnChainPosition, PoolMetadata, PriceSnapshot, RawEvent};
use async_trait::async_trait;
use std::fmt;

pub mod indexer;
pub mod mock;
pub mod price_cache;
pub mod rpc;

pub use indexer::IndexerEventSource;
pub use mock::{MockDataSource, RecordingAggregator};
pub use price_cache::{CachedPriceSource, PriceFallback};
pub use rpc::{ChainEndpoint, RpcChainClient};

/// Event-history provider (blockchain indexing API).
///
/// Implementations must handle pagination and retry/backoff.
#[async_trait]
pub trait EventHistorySource: Send + Sync + fmt::Debug {
    /// Fetch position events for an NFT within an inclusive block range.
    ///
    /// # Arguments
    /// * `chain_id` - Chain the position lives on
    /// * `nft_id` - Position NFT token id
    /// * `from_block` - First block (inclusive), or from genesis when None
    /// * `to_block` - Last block (inclusive), or latest when None
    async fn fetch_events(
        &self,
        chain_id: u64,
        nft_id: &NftId,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<RawEvent>, DataSourceError>;
}

/// Historic pool price provider.
#[async_trait]
pub trait PriceSource: Send + Sync + fmt::Debug {
    /// Pool price at exactly `block_number`.
    async fn price_at(
        &self,
        pool: &PoolMetadata,
        block_number: u64,
    ) -> Result<PriceSnapshot, DataSourceError>;

    /// Pool price at the chain head.
    async fn latest_price(&self, pool: &PoolMetadata) -> Result<PriceSnapshot, DataSourceError>;
}

/// Finality horizon provider.
#[async_trait]
pub trait FinalitySource: Send + Sync + fmt::Debug {
    async fn last_finalized_block(&self, chain_id: u64) -> Result<u64, DataSourceError>;
}

/// Reads a position's current state from the position manager contract.
#[async_trait]
pub trait PositionReader: Send + Sync + fmt::Debug {
    async fn read_position(
        &self,
        chain_id: u64,
        nft_id: &NftId,
    ) -> Result<OnChainPosition, DataSourceError>;
}

/// Downstream aggregate recompute (APR periods). Fire-and-forget.
#[async_trait]
pub trait AggregateSink: Send + Sync + fmt::Debug {
    async fn recompute_periods(&self, position_id: i64) -> Result<(), DataSourceError>;
}

/// Aggregate sink that only logs; used when no downstream service is wired.
#[derive(Debug, Clone, Default)]
pub struct LoggingAggregator;

#[async_trait]
impl AggregateSink for LoggingAggregator {
    async fn recompute_periods(&self, position_id: i64) -> Result<(), DataSourceError> {
        tracing::debug!(position_id, "aggregate recompute requested");
        Ok(())
    }
}

/// Error type for data source operations.
#[derive(Debug, Clone)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded (caller should implement backoff)
    RateLimited,
    /// JSON-RPC error object returned by the node
    RpcError { code: i64, message: String },
    /// Chain id the client has no endpoint for
    UnknownChain(u64),
    /// Other error
    Other(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::RpcError { code, message } => {
                write!(f, "RPC error {}: {}", code, message)
            }
            DataSourceError::UnknownChain(chain_id) => write!(f, "Unknown chain: {}", chain_id),
            DataSourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DataSourceError {}
