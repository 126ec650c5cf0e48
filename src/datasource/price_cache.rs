//! Block-keyed price cache with an optional latest-block fallback.

use super::{DataSourceError, PriceSource};
use crate::domain::{PoolMetadata, PriceSnapshot};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// What to do when the historic price at an event block cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceFallback {
    /// Fail the sync; it is retried on the next run.
    #[default]
    Strict,
    /// Value the event at the latest block and flag it as degraded.
    LatestBlock,
}

impl FromStr for PriceFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(PriceFallback::Strict),
            "latest-block" => Ok(PriceFallback::LatestBlock),
            other => Err(format!("unknown price fallback: {}", other)),
        }
    }
}

impl fmt::Display for PriceFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceFallback::Strict => f.write_str("strict"),
            PriceFallback::LatestBlock => f.write_str("latest-block"),
        }
    }
}

/// Entries kept before the oldest are evicted.
pub const DEFAULT_PRICE_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Default)]
struct PriceCache {
    entries: HashMap<(i64, u64), PriceSnapshot>,
    /// Insertion order, oldest first.
    order: VecDeque<(i64, u64)>,
}

impl PriceCache {
    fn insert(&mut self, key: (i64, u64), snapshot: PriceSnapshot, capacity: usize) {
        if self.entries.insert(key, snapshot).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

/// Caches exact historic prices by (pool id, block).
///
/// Several events in the same block share one read. Degraded prices are
/// never cached so a later sync can still pick up the exact value. The
/// cache holds at most `capacity` entries, evicting the oldest first.
#[derive(Debug, Clone)]
pub struct CachedPriceSource {
    inner: Arc<dyn PriceSource>,
    fallback: PriceFallback,
    capacity: usize,
    cache: Arc<Mutex<PriceCache>>,
}

impl CachedPriceSource {
    pub fn new(inner: Arc<dyn PriceSource>, fallback: PriceFallback) -> Self {
        Self::with_capacity(inner, fallback, DEFAULT_PRICE_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn PriceSource>, fallback: PriceFallback, capacity: usize) -> Self {
        Self {
            inner,
            fallback,
            capacity: capacity.max(1),
            cache: Arc::new(Mutex::new(PriceCache::default())),
        }
    }

    pub async fn price_at(
        &self,
        pool: &PoolMetadata,
        block_number: u64,
    ) -> Result<PriceSnapshot, DataSourceError> {
        let key = (pool.id, block_number);
        if let Some(snapshot) = self.cache.lock().await.entries.get(&key) {
            return Ok(snapshot.clone());
        }

        match self.inner.price_at(pool, block_number).await {
            Ok(snapshot) => {
                self.cache
                    .lock()
                    .await
                    .insert(key, snapshot.clone(), self.capacity);
                Ok(snapshot)
            }
            Err(err) => match self.fallback {
                PriceFallback::Strict => Err(err),
                PriceFallback::LatestBlock => {
                    warn!(
                        pool_id = pool.id,
                        block_number,
                        error = %err,
                        "historic price unavailable, using latest block"
                    );
                    let mut snapshot = self.inner.latest_price(pool).await?;
                    snapshot.degraded = true;
                    Ok(snapshot)
                }
            },
        }
    }

    #[cfg(test)]
    async fn cached_len(&self) -> usize {
        self.cache.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockDataSource;
    use crate::domain::{Address, Amount, QuoteToken, TokenMetadata};

    fn pool() -> PoolMetadata {
        let token = |id: i64| TokenMetadata {
            id,
            chain_id: 1,
            address: Address::new(format!("0xt{}", id)),
            symbol: format!("T{}", id),
            decimals: 18,
        };
        PoolMetadata {
            id: 1,
            chain_id: 1,
            address: Address::new("0xpool"),
            token0: token(1),
            token1: token(2),
            fee: 500,
            quote_token: QuoteToken::Token1,
        }
    }

    #[test]
    fn test_fallback_from_str() {
        assert_eq!("strict".parse::<PriceFallback>().unwrap(), PriceFallback::Strict);
        assert_eq!(
            "latest-block".parse::<PriceFallback>().unwrap(),
            PriceFallback::LatestBlock
        );
        assert!("sometimes".parse::<PriceFallback>().is_err());
    }

    #[tokio::test]
    async fn test_exact_prices_are_cached() {
        let mock = Arc::new(MockDataSource::new().with_price(10, Amount::from(5u64)));
        let cached = CachedPriceSource::new(mock.clone(), PriceFallback::Strict);

        let first = cached.price_at(&pool(), 10).await.unwrap();
        let second = cached.price_at(&pool(), 10).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sqrt_price_x96, Amount::from(5u64));
        assert_eq!(mock.price_calls(), 1);
        assert_eq!(cached.cached_len().await, 1);
    }

    #[tokio::test]
    async fn test_strict_propagates_failure() {
        let mock = Arc::new(MockDataSource::new().with_failing_price_block(10));
        let cached = CachedPriceSource::new(mock, PriceFallback::Strict);
        assert!(cached.price_at(&pool(), 10).await.is_err());
    }

    #[tokio::test]
    async fn test_latest_block_fallback_is_degraded_and_uncached() {
        let mock = Arc::new(
            MockDataSource::new()
                .with_failing_price_block(10)
                .with_latest_price(99, Amount::from(7u64)),
        );
        let cached = CachedPriceSource::new(mock, PriceFallback::LatestBlock);

        let snapshot = cached.price_at(&pool(), 10).await.unwrap();
        assert!(snapshot.degraded);
        assert_eq!(snapshot.block_number, 99);
        assert_eq!(snapshot.sqrt_price_x96, Amount::from(7u64));
        assert_eq!(cached.cached_len().await, 0);
    }

    #[tokio::test]
    async fn test_cache_evicts_oldest_beyond_capacity() {
        let mock = Arc::new(MockDataSource::new());
        let cached = CachedPriceSource::with_capacity(mock.clone(), PriceFallback::Strict, 2);

        for block in [10, 11, 12] {
            cached.price_at(&pool(), block).await.unwrap();
        }
        assert_eq!(cached.cached_len().await, 2);
        assert_eq!(mock.price_calls(), 3);

        // 11 and 12 are still cached, 10 was evicted.
        cached.price_at(&pool(), 12).await.unwrap();
        cached.price_at(&pool(), 11).await.unwrap();
        assert_eq!(mock.price_calls(), 3);
        cached.price_at(&pool(), 10).await.unwrap();
        assert_eq!(mock.price_calls(), 4);
        assert_eq!(cached.cached_len().await, 2);
    }
}
