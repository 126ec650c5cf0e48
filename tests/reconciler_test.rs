use lpledger::datasource::mock::mock_block_timestamp;
use lpledger::datasource::{CachedPriceSource, MockDataSource, PriceFallback, RecordingAggregator};
use lpledger::db::init_db;
use lpledger::domain::{OnChainPosition, Position, QuoteToken};
use lpledger::orchestration::{CreatePosition, LedgerSyncDeps};
use lpledger::sync::MissingEvent;
use lpledger::{
    Address, Amount, BlockchainEventType, LedgerSync, NftId, PositionReconciler, RawEvent,
    Repository, TxHash,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_err;

struct Harness {
    reconciler: PositionReconciler,
    sync: Arc<LedgerSync>,
    repo: Arc<Repository>,
    mock: Arc<MockDataSource>,
    position: Position,
    _temp: TempDir,
}

fn raw(kind: BlockchainEventType, block: u64, liquidity: Option<u64>, a1: u64) -> RawEvent {
    RawEvent {
        event_type: kind,
        token_id: NftId::new("9"),
        transaction_hash: TxHash::new(format!("0x{:04x}", block)),
        block_number: block,
        transaction_index: 0,
        log_index: 0,
        block_timestamp: mock_block_timestamp(block),
        chain_id: 1,
        liquidity: liquidity.map(Amount::from),
        amount0: Amount::zero(),
        amount1: Amount::from(a1),
        recipient: None,
    }
}

fn on_chain(liquidity: u64, tokens_owed1: u64) -> OnChainPosition {
    OnChainPosition {
        owner_address: Some(Address::new("0xowner")),
        liquidity: Amount::from(liquidity),
        tokens_owed1: Amount::from(tokens_owed1),
        ..OnChainPosition::default()
    }
}

/// Tracks one position whose history is `events`.
async fn setup(events: Vec<RawEvent>) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let repo = Arc::new(Repository::new(init_db(&db_path).await.unwrap()));

    let token0 = repo
        .insert_token(1, &Address::new("0xweth"), "WETH", 18)
        .await
        .unwrap();
    let token1 = repo
        .insert_token(1, &Address::new("0xdai"), "DAI", 18)
        .await
        .unwrap();
    let pool_id = repo
        .insert_pool(1, &Address::new("0xpool"), token0.id, token1.id, 3000, QuoteToken::Token1)
        .await
        .unwrap();

    let mock = Arc::new(MockDataSource::new().with_events(events));
    let sync = Arc::new(LedgerSync::new(LedgerSyncDeps {
        repo: repo.clone(),
        events: mock.clone(),
        prices: CachedPriceSource::new(mock.clone(), PriceFallback::Strict),
        finality: mock.clone(),
        aggregator: Arc::new(RecordingAggregator::new()),
        deployment_blocks: HashMap::from([(1, 0)]),
    }));

    let (position, _) = sync
        .create_position(CreatePosition {
            chain_id: 1,
            nft_id: NftId::new("9"),
            pool_id,
            tick_lower: -600,
            tick_upper: 600,
        })
        .await
        .unwrap();

    Harness {
        reconciler: PositionReconciler::new(sync.clone(), mock.clone()),
        sync,
        repo,
        mock,
        position,
        _temp: temp_dir,
    }
}

#[tokio::test]
async fn test_fully_collected_position_is_closed_without_chain_read() {
    let h = setup(vec![
        raw(BlockchainEventType::IncreaseLiquidity, 10, Some(100), 1000),
        raw(BlockchainEventType::DecreaseLiquidity, 20, Some(100), 1000),
        raw(BlockchainEventType::Collect, 30, None, 1000),
    ])
    .await;

    let outcome = h.reconciler.refresh(h.position.id).await.unwrap();
    assert!(!outcome.on_chain_read);
    assert!(outcome.resync.is_none());
    assert!(outcome.is_closed);

    let position = h.repo.get_position(h.position.id).await.unwrap().unwrap();
    assert!(!position.rollup.is_active);
    assert_eq!(
        position.rollup.position_closed_at.map(|t| t.timestamp()),
        Some(mock_block_timestamp(30))
    );
    assert_eq!(position.state, OnChainPosition::default());
}

#[tokio::test]
async fn test_decrease_to_zero_is_not_closed() {
    let h = setup(vec![
        raw(BlockchainEventType::IncreaseLiquidity, 10, Some(100), 1000),
        raw(BlockchainEventType::DecreaseLiquidity, 20, Some(100), 1000),
    ])
    .await;

    let outcome = h.reconciler.refresh(h.position.id).await.unwrap();
    assert!(!outcome.on_chain_read);
    assert!(!outcome.is_closed);

    let position = h.repo.get_position(h.position.id).await.unwrap().unwrap();
    assert!(position.rollup.is_active);
    assert!(position.rollup.position_closed_at.is_none());
    assert_eq!(position.rollup.uncollected_principal1, Amount::from(1000u64));
}

#[tokio::test]
async fn test_matching_liquidity_stores_unclaimed_fees() {
    let h = setup(vec![
        raw(BlockchainEventType::IncreaseLiquidity, 10, Some(100), 1000),
        raw(BlockchainEventType::DecreaseLiquidity, 20, Some(50), 500),
    ])
    .await;
    h.mock
        .set_on_chain_position(1, NftId::new("9"), on_chain(50, 530));

    let outcome = h.reconciler.refresh(h.position.id).await.unwrap();
    assert!(outcome.on_chain_read);
    assert!(outcome.resync.is_none());
    assert!(!outcome.is_closed);

    let position = h.repo.get_position(h.position.id).await.unwrap().unwrap();
    assert_eq!(position.state.liquidity, Amount::from(50u64));
    assert_eq!(position.state.owner_address, Some(Address::new("0xowner")));
    // 530 owed, 500 of it is principal from the decrease.
    assert_eq!(position.rollup.unclaimed_fees1, Amount::from(30u64));
    assert_eq!(position.rollup.unclaimed_fees0, Amount::zero());
}

#[tokio::test]
async fn test_liquidity_mismatch_triggers_resync() {
    let h = setup(vec![raw(
        BlockchainEventType::IncreaseLiquidity,
        10,
        Some(100),
        1000,
    )])
    .await;
    assert_eq!(h.position.rollup.liquidity, Amount::from(100u64));

    // The chain already saw a second deposit that the last sync missed.
    h.mock
        .push_event(raw(BlockchainEventType::IncreaseLiquidity, 40, Some(50), 500));
    h.mock
        .set_on_chain_position(1, NftId::new("9"), on_chain(150, 0));

    let outcome = h.reconciler.refresh(h.position.id).await.unwrap();
    assert!(outcome.on_chain_read);
    let resync = outcome.resync.expect("mismatch should resync");
    assert!(resync.events_added >= 1);

    let position = h.repo.get_position(h.position.id).await.unwrap().unwrap();
    assert_eq!(position.rollup.liquidity, Amount::from(150u64));
    assert_eq!(position.rollup.cost_basis, Amount::from(1500u64));
    assert_eq!(h.repo.count_ledger_events(h.position.id).await.unwrap(), 2);

    let again = h.reconciler.refresh(h.position.id).await.unwrap();
    assert!(again.resync.is_none());
}

fn missing_collect(block: u64, amount1: u64) -> MissingEvent {
    MissingEvent::from(&raw(BlockchainEventType::Collect, block, None, amount1))
}

#[tokio::test]
async fn test_refresh_abandons_pending_collect_when_liquidity_matches() {
    let h = setup(vec![
        raw(BlockchainEventType::IncreaseLiquidity, 10, Some(100), 1000),
        raw(BlockchainEventType::DecreaseLiquidity, 20, Some(50), 500),
        raw(BlockchainEventType::Collect, 30, None, 500),
    ])
    .await;
    h.mock.set_finalized_block(25);
    h.sync
        .report_missing_event(h.position.id, missing_collect(50, 7))
        .await
        .unwrap();
    assert_eq!(h.repo.count_ledger_events(h.position.id).await.unwrap(), 4);

    // The reported collect never landed; the chain agrees on liquidity.
    h.mock
        .set_on_chain_position(1, NftId::new("9"), on_chain(50, 0));
    h.mock.set_finalized_block(60);

    let outcome = h.reconciler.refresh(h.position.id).await.unwrap();
    assert!(outcome.on_chain_read);
    let resync = outcome.resync.expect("pending entries should resync");
    assert_eq!(resync.missing_abandoned, 1);

    assert_eq!(h.repo.count_ledger_events(h.position.id).await.unwrap(), 3);
    assert!(!h.repo.load_sync_state(h.position.id).await.unwrap().has_pending());
    let position = h.repo.get_position(h.position.id).await.unwrap().unwrap();
    assert_eq!(position.rollup.collected_fees, Amount::zero());
}

#[tokio::test]
async fn test_refresh_reconciles_pending_on_closed_position() {
    let h = setup(vec![
        raw(BlockchainEventType::IncreaseLiquidity, 10, Some(100), 1000),
        raw(BlockchainEventType::DecreaseLiquidity, 20, Some(100), 1000),
        raw(BlockchainEventType::Collect, 30, None, 1000),
    ])
    .await;
    h.mock.set_finalized_block(25);
    h.sync
        .report_missing_event(h.position.id, missing_collect(50, 5))
        .await
        .unwrap();

    // Still pending: refresh keeps it and stays off-chain.
    let outcome = h.reconciler.refresh(h.position.id).await.unwrap();
    assert!(!outcome.on_chain_read);
    assert_eq!(outcome.resync.map(|r| r.missing_abandoned), Some(0));
    assert_eq!(h.repo.count_ledger_events(h.position.id).await.unwrap(), 4);

    h.mock.set_finalized_block(60);
    let outcome = h.reconciler.refresh(h.position.id).await.unwrap();
    assert!(!outcome.on_chain_read);
    assert_eq!(outcome.resync.map(|r| r.missing_abandoned), Some(1));
    assert!(outcome.is_closed);
    assert_eq!(h.repo.count_ledger_events(h.position.id).await.unwrap(), 3);

    let position = h.repo.get_position(h.position.id).await.unwrap().unwrap();
    assert_eq!(
        position.rollup.position_closed_at.map(|t| t.timestamp()),
        Some(mock_block_timestamp(30))
    );
}

#[tokio::test]
async fn test_refresh_unknown_position_is_not_found() {
    let h = setup(vec![]).await;
    let err = assert_err!(h.reconciler.refresh(h.position.id + 100).await);
    assert!(matches!(err, lpledger::LedgerError::NotFound(_)));
}
