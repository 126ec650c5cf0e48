//! Assembles persistable ledger records from raw events.

use super::price::pool_price;
use super::processors::process_event;
use super::{PreviousEventState, ProcessError, ProcessedEvent};
use crate::domain::{LedgerEventInput, PoolMetadata, PriceSnapshot, RawEvent};

/// Build the ledger record for `event` on top of `prev`.
///
/// Side-effect free apart from hashing the event coordinates.
pub fn build_ledger_event(
    event: &RawEvent,
    prev: &PreviousEventState,
    pool: &PoolMetadata,
    basis: &PriceSnapshot,
    previous_event_id: Option<i64>,
    position_id: i64,
) -> Result<LedgerEventInput, ProcessError> {
    let ProcessedEvent { delta, state, .. } = process_event(event, prev, basis, pool)?;
    let coordinates = event.coordinates();

    Ok(LedgerEventInput {
        previous_id: previous_event_id,
        position_id,
        chain_id: event.chain_id,
        nft_id: event.token_id.clone(),
        block_number: event.block_number,
        tx_index: event.transaction_index,
        log_index: event.log_index,
        tx_hash: event.transaction_hash.clone(),
        block_timestamp: event.block_timestamp,
        event_type: event.event_type.ledger_type(),

        token0_amount: event.amount0.clone(),
        token1_amount: event.amount1.clone(),
        pool_price: pool_price(&basis.sqrt_price_x96, pool)?,
        token_value: delta.token_value,
        delta_cost_basis: delta.delta_cost_basis,
        cost_basis_after: state.cost_basis,
        delta_pnl: delta.delta_pnl,
        pnl_after: state.pnl,
        rewards: delta.rewards,

        delta_l: delta.delta_l,
        liquidity_after: state.liquidity,
        fees_collected0: delta.fees_collected0,
        fees_collected1: delta.fees_collected1,
        uncollected_principal0_after: state.uncollected_principal0,
        uncollected_principal1_after: state.uncollected_principal1,
        sqrt_price_x96: basis.sqrt_price_x96.clone(),
        price_degraded: basis.degraded,

        input_hash: coordinates.input_hash(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Address, Amount, BlockchainEventType, EventCoordinates, LedgerEventType, NftId, QuoteToken,
        TokenMetadata, TxHash,
    };

    fn pool() -> PoolMetadata {
        let token = |id: i64, decimals: u32| TokenMetadata {
            id,
            chain_id: 1,
            address: Address::new(format!("0xt{}", id)),
            symbol: format!("T{}", id),
            decimals,
        };
        PoolMetadata {
            id: 3,
            chain_id: 1,
            address: Address::new("0xpool"),
            token0: token(1, 18),
            token1: token(2, 6),
            fee: 3000,
            quote_token: QuoteToken::Token1,
        }
    }

    fn event(kind: BlockchainEventType) -> RawEvent {
        RawEvent {
            event_type: kind,
            token_id: NftId::new("42"),
            transaction_hash: TxHash::new("0xfeed"),
            block_number: 500,
            transaction_index: 4,
            log_index: 12,
            block_timestamp: 1_700_000_123,
            chain_id: 1,
            liquidity: Some(Amount::from(10u64)),
            amount0: Amount::from(100u64),
            amount1: Amount::from(50u64),
            recipient: None,
        }
    }

    fn basis(degraded: bool) -> PriceSnapshot {
        PriceSnapshot {
            sqrt_price_x96: Amount::pow2(96),
            block_number: 500,
            timestamp: 1_700_000_123,
            degraded,
        }
    }

    #[test]
    fn test_build_maps_coordinates_and_hash() {
        let ev = event(BlockchainEventType::IncreaseLiquidity);
        let input =
            build_ledger_event(&ev, &PreviousEventState::zero(), &pool(), &basis(false), Some(9), 77)
                .unwrap();

        assert_eq!(input.position_id, 77);
        assert_eq!(input.previous_id, Some(9));
        assert_eq!(input.event_type, LedgerEventType::IncreasePosition);
        assert_eq!(input.coordinates(), EventCoordinates::new(500, 4, 12));
        assert_eq!(input.input_hash, EventCoordinates::new(500, 4, 12).input_hash());
        assert_eq!(input.token_value, Amount::from(150u64));
        assert_eq!(input.cost_basis_after, Amount::from(150u64));
        assert_eq!(input.liquidity_after, Amount::from(10u64));
        assert_eq!(input.pool_price, Amount::pow10(18));
        assert!(!input.price_degraded);
    }

    #[test]
    fn test_build_maps_every_event_type() {
        let prev = PreviousEventState {
            liquidity: Amount::from(10u64),
            cost_basis: Amount::from(100u64),
            ..PreviousEventState::zero()
        };
        let cases = [
            (BlockchainEventType::IncreaseLiquidity, LedgerEventType::IncreasePosition),
            (BlockchainEventType::DecreaseLiquidity, LedgerEventType::DecreasePosition),
            (BlockchainEventType::Collect, LedgerEventType::Collect),
        ];
        for (raw_type, ledger_type) in cases {
            let input =
                build_ledger_event(&event(raw_type), &prev, &pool(), &basis(false), None, 1).unwrap();
            assert_eq!(input.event_type, ledger_type);
        }
    }

    #[test]
    fn test_build_carries_degraded_price_flag() {
        let ev = event(BlockchainEventType::IncreaseLiquidity);
        let input =
            build_ledger_event(&ev, &PreviousEventState::zero(), &pool(), &basis(true), None, 1)
                .unwrap();
        assert!(input.price_degraded);
    }
}
