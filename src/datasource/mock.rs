//! Mock data sources for testing without network calls.

use super::{
    AggregateSink, DataSourceError, EventHistorySource, FinalitySource, PositionReader,
    PriceSource,
};
use crate::domain::{Amount, NftId, OnChainPosition, PoolMetadata, PriceSnapshot, RawEvent};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

const MOCK_GENESIS_TS: i64 = 1_700_000_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Timestamp the mock assigns to a block (12 second slots).
pub fn mock_block_timestamp(block_number: u64) -> i64 {
    MOCK_GENESIS_TS + (block_number as i64) * 12
}

/// Mock chain + indexer returning predefined test data.
///
/// Prices default to sqrtPriceX96 = 2^96 (price 1) for any block that has no
/// explicit entry. State can be mutated through `&self` so a test can share
/// one instance with a running sync.
#[derive(Debug)]
pub struct MockDataSource {
    events: Mutex<Vec<RawEvent>>,
    prices: Mutex<HashMap<u64, Amount>>,
    latest: Mutex<(u64, Amount)>,
    failing_price_blocks: Mutex<HashSet<u64>>,
    finalized_block: Mutex<u64>,
    positions: Mutex<HashMap<(u64, NftId), OnChainPosition>>,
    events_unavailable: Mutex<bool>,
    price_calls: AtomicUsize,
}

impl MockDataSource {
    /// Create a new mock data source with empty data.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            prices: Mutex::new(HashMap::new()),
            latest: Mutex::new((0, Amount::pow2(96))),
            failing_price_blocks: Mutex::new(HashSet::new()),
            finalized_block: Mutex::new(0),
            positions: Mutex::new(HashMap::new()),
            events_unavailable: Mutex::new(false),
            price_calls: AtomicUsize::new(0),
        }
    }

    /// Add an indexed event.
    pub fn with_event(self, event: RawEvent) -> Self {
        self.push_event(event);
        self
    }

    /// Add multiple indexed events.
    pub fn with_events(self, events: Vec<RawEvent>) -> Self {
        lock(&self.events).extend(events);
        self
    }

    /// Set sqrtPriceX96 for one block.
    pub fn with_price(self, block_number: u64, sqrt_price_x96: Amount) -> Self {
        lock(&self.prices).insert(block_number, sqrt_price_x96);
        self
    }

    /// Make historic reads at `block_number` fail.
    pub fn with_failing_price_block(self, block_number: u64) -> Self {
        lock(&self.failing_price_blocks).insert(block_number);
        self
    }

    /// Set the chain head and its price.
    pub fn with_latest_price(self, block_number: u64, sqrt_price_x96: Amount) -> Self {
        *lock(&self.latest) = (block_number, sqrt_price_x96);
        self
    }

    pub fn with_finalized_block(self, block_number: u64) -> Self {
        self.set_finalized_block(block_number);
        self
    }

    pub fn with_on_chain_position(
        self,
        chain_id: u64,
        nft_id: NftId,
        position: OnChainPosition,
    ) -> Self {
        self.set_on_chain_position(chain_id, nft_id, position);
        self
    }

    /// Index one more event, as if the indexer caught up.
    pub fn push_event(&self, event: RawEvent) {
        lock(&self.events).push(event);
    }

    pub fn set_finalized_block(&self, block_number: u64) {
        *lock(&self.finalized_block) = block_number;
    }

    pub fn set_on_chain_position(&self, chain_id: u64, nft_id: NftId, position: OnChainPosition) {
        lock(&self.positions).insert((chain_id, nft_id), position);
    }

    /// Simulate an indexer outage.
    pub fn set_events_unavailable(&self, unavailable: bool) {
        *lock(&self.events_unavailable) = unavailable;
    }

    /// Number of historic price reads served (successful or not).
    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHistorySource for MockDataSource {
    async fn fetch_events(
        &self,
        chain_id: u64,
        nft_id: &NftId,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<Vec<RawEvent>, DataSourceError> {
        if *lock(&self.events_unavailable) {
            return Err(DataSourceError::HttpError {
                status: 503,
                message: "indexer unavailable".to_string(),
            });
        }

        Ok(lock(&self.events)
            .iter()
            .filter(|e| {
                e.chain_id == chain_id
                    && &e.token_id == nft_id
                    && from_block.map_or(true, |from| e.block_number >= from)
                    && to_block.map_or(true, |to| e.block_number <= to)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PriceSource for MockDataSource {
    async fn price_at(
        &self,
        _pool: &PoolMetadata,
        block_number: u64,
    ) -> Result<PriceSnapshot, DataSourceError> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing_price_blocks).contains(&block_number) {
            return Err(DataSourceError::RpcError {
                code: -32000,
                message: "missing trie node".to_string(),
            });
        }

        let sqrt_price_x96 = lock(&self.prices)
            .get(&block_number)
            .cloned()
            .unwrap_or_else(|| Amount::pow2(96));

        Ok(PriceSnapshot {
            sqrt_price_x96,
            block_number,
            timestamp: mock_block_timestamp(block_number),
            degraded: false,
        })
    }

    async fn latest_price(&self, _pool: &PoolMetadata) -> Result<PriceSnapshot, DataSourceError> {
        let (block_number, sqrt_price_x96) = lock(&self.latest).clone();
        Ok(PriceSnapshot {
            sqrt_price_x96,
            block_number,
            timestamp: mock_block_timestamp(block_number),
            degraded: false,
        })
    }
}

#[async_trait]
impl FinalitySource for MockDataSource {
    async fn last_finalized_block(&self, _chain_id: u64) -> Result<u64, DataSourceError> {
        Ok(*lock(&self.finalized_block))
    }
}

#[async_trait]
impl PositionReader for MockDataSource {
    async fn read_position(
        &self,
        chain_id: u64,
        nft_id: &NftId,
    ) -> Result<OnChainPosition, DataSourceError> {
        Ok(lock(&self.positions)
            .get(&(chain_id, nft_id.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

/// Aggregate sink that records every recompute request.
#[derive(Debug, Default)]
pub struct RecordingAggregator {
    calls: Mutex<Vec<i64>>,
    fail: Mutex<bool>,
}

impl RecordingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent recompute fail.
    pub fn set_failing(&self, fail: bool) {
        *lock(&self.fail) = fail;
    }

    pub fn calls(&self) -> Vec<i64> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl AggregateSink for RecordingAggregator {
    async fn recompute_periods(&self, position_id: i64) -> Result<(), DataSourceError> {
        lock(&self.calls).push(position_id);
        if *lock(&self.fail) {
            return Err(DataSourceError::Other("aggregator down".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockchainEventType, TxHash};

    fn event(token_id: &str, block: u64) -> RawEvent {
        RawEvent {
            event_type: BlockchainEventType::IncreaseLiquidity,
            token_id: NftId::new(token_id),
            transaction_hash: TxHash::new(format!("0x{}", block)),
            block_number: block,
            transaction_index: 0,
            log_index: 0,
            block_timestamp: mock_block_timestamp(block),
            chain_id: 1,
            liquidity: Some(Amount::from(1u64)),
            amount0: Amount::from(1u64),
            amount1: Amount::zero(),
            recipient: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_events_filters_by_position_and_range() {
        let mock = MockDataSource::new().with_events(vec![
            event("1", 10),
            event("1", 20),
            event("2", 15),
            event("1", 30),
        ]);

        let all = mock.fetch_events(1, &NftId::new("1"), None, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let ranged = mock
            .fetch_events(1, &NftId::new("1"), Some(15), Some(25))
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);
        assert_eq!(ranged[0].block_number, 20);

        let other_chain = mock.fetch_events(10, &NftId::new("1"), None, None).await.unwrap();
        assert!(other_chain.is_empty());
    }

    #[tokio::test]
    async fn test_outage_fails_fetch() {
        let mock = MockDataSource::new().with_event(event("1", 10));
        mock.set_events_unavailable(true);
        assert!(mock.fetch_events(1, &NftId::new("1"), None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_recording_aggregator() {
        let agg = RecordingAggregator::new();
        agg.recompute_periods(4).await.unwrap();
        agg.set_failing(true);
        assert!(agg.recompute_periods(5).await.is_err());
        assert_eq!(agg.calls(), vec![4, 5]);
    }
}
