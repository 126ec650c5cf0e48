//! Chronological ordering and cross-source deduplication of raw events.

use crate::domain::{EventCoordinates, RawEvent, TxHash};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Stable ordering key for raw events.
///
/// Ordering: block_number -> transaction_index -> log_index -> transaction_hash.
/// The hash only breaks ties between malformed duplicates so the sort stays total.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventOrderingKey {
    pub coordinates: EventCoordinates,
    pub tx_hash: TxHash,
}

impl EventOrderingKey {
    pub fn from_event(event: &RawEvent) -> Self {
        EventOrderingKey {
            coordinates: event.coordinates(),
            tx_hash: event.transaction_hash.clone(),
        }
    }
}

/// Replay order: ascending by chain coordinates.
pub fn compare_chronological(a: &RawEvent, b: &RawEvent) -> Ordering {
    EventOrderingKey::from_event(a).cmp(&EventOrderingKey::from_event(b))
}

/// Sort events deterministically for replay.
pub fn sort_events_chronological(events: &mut [RawEvent]) {
    events.sort_by(compare_chronological);
}

/// Union indexer-fetched and user-submitted events, dropping duplicates.
///
/// Duplicates are keyed by `(transaction_hash, log_index)`. The indexer copy
/// always wins; within one source the first occurrence is kept. The result is
/// sorted for replay.
pub fn merge_and_dedupe(indexed: Vec<RawEvent>, submitted: Vec<RawEvent>) -> Vec<RawEvent> {
    let mut seen: HashSet<(TxHash, u64)> = HashSet::with_capacity(indexed.len());
    let mut merged = Vec::with_capacity(indexed.len() + submitted.len());

    for event in indexed.into_iter().chain(submitted) {
        if seen.insert(event.dedup_key()) {
            merged.push(event);
        }
    }

    sort_events_chronological(&mut merged);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Amount, BlockchainEventType, NftId};

    fn make_event(tx: &str, block: u64, tx_index: u64, log_index: u64, amount0: u64) -> RawEvent {
        RawEvent {
            event_type: BlockchainEventType::IncreaseLiquidity,
            token_id: NftId::new("1"),
            transaction_hash: TxHash::new(tx),
            block_number: block,
            transaction_index: tx_index,
            log_index,
            block_timestamp: 1_700_000_000,
            chain_id: 1,
            liquidity: Some(Amount::from(10u64)),
            amount0: Amount::from(amount0),
            amount1: Amount::zero(),
            recipient: None,
        }
    }

    #[test]
    fn test_event_ordering_by_block() {
        let a = make_event("0xa", 1, 5, 5, 0);
        let b = make_event("0xb", 2, 0, 0, 0);
        assert_eq!(compare_chronological(&a, &b), Ordering::Less);
        assert_eq!(compare_chronological(&b, &a), Ordering::Greater);
    }

    #[test]
    fn test_event_ordering_same_block_by_tx_then_log() {
        let a = make_event("0xa", 5, 0, 9, 0);
        let b = make_event("0xb", 5, 1, 0, 0);
        let c = make_event("0xb", 5, 1, 1, 0);
        assert_eq!(compare_chronological(&a, &b), Ordering::Less);
        assert_eq!(compare_chronological(&b, &c), Ordering::Less);
    }

    #[test]
    fn test_sort_events_chronological() {
        let mut events = vec![
            make_event("0xc", 3, 0, 0, 0),
            make_event("0xa", 1, 1, 0, 0),
            make_event("0xb", 1, 0, 4, 0),
        ];
        sort_events_chronological(&mut events);
        let order: Vec<&str> = events.iter().map(|e| e.transaction_hash.as_str()).collect();
        assert_eq!(order, vec!["0xb", "0xa", "0xc"]);
    }

    #[test]
    fn test_merge_prefers_indexed_copy() {
        let indexed = vec![make_event("0xa", 10, 0, 1, 111)];
        let submitted = vec![make_event("0xa", 10, 0, 1, 999)];
        let merged = merge_and_dedupe(indexed, submitted);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].amount0, Amount::from(111u64));
    }

    #[test]
    fn test_merge_keeps_unmatched_submitted_events_in_order() {
        let indexed = vec![make_event("0xa", 10, 0, 1, 1), make_event("0xc", 12, 0, 0, 3)];
        let submitted = vec![make_event("0xb", 11, 0, 0, 2)];
        let merged = merge_and_dedupe(indexed, submitted);
        let blocks: Vec<u64> = merged.iter().map(|e| e.block_number).collect();
        assert_eq!(blocks, vec![10, 11, 12]);
    }

    #[test]
    fn test_merge_same_tx_different_log_is_not_duplicate() {
        let indexed = vec![make_event("0xa", 10, 0, 1, 1)];
        let submitted = vec![make_event("0xa", 10, 0, 2, 2)];
        assert_eq!(merge_and_dedupe(indexed, submitted).len(), 2);
    }

    #[test]
    fn test_merge_drops_duplicates_within_one_source() {
        let indexed = vec![make_event("0xa", 10, 0, 1, 1), make_event("0xa", 10, 0, 1, 2)];
        let merged = merge_and_dedupe(indexed, Vec::new());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].amount0, Amount::from(1u64));
    }
}
