//! Sync bookkeeping: missing (not yet indexed) events and the replay fold.
//!
//! This module provides:
//! - `SyncState`, persisted per position between runs
//! - Missing-event reconciliation against indexer results and finality
//! - The sequential replay fold over merged raw events

use crate::domain::{
    Address, Amount, BlockchainEventType, EventCoordinates, NftId, RawEvent, TxHash,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub mod replay;

pub use replay::{replay_events, ReplayOutcome};

/// An event reported by a caller (e.g. right after submitting a transaction)
/// before the indexer has picked it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingEvent {
    pub event_type: BlockchainEventType,
    /// Block timestamp, seconds.
    pub timestamp: i64,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    pub transaction_hash: TxHash,
    pub liquidity: Option<Amount>,
    pub amount0: Amount,
    pub amount1: Amount,
    pub recipient: Option<Address>,
}

impl MissingEvent {
    pub fn coordinates(&self) -> EventCoordinates {
        EventCoordinates::new(self.block_number, self.transaction_index, self.log_index)
    }

    pub fn dedup_key(&self) -> (TxHash, u64) {
        (self.transaction_hash.clone(), self.log_index)
    }

    pub fn to_raw_event(&self, chain_id: u64, nft_id: &NftId) -> RawEvent {
        RawEvent {
            event_type: self.event_type,
            token_id: nft_id.clone(),
            transaction_hash: self.transaction_hash.clone(),
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
            block_timestamp: self.timestamp,
            chain_id,
            liquidity: self.liquidity.clone(),
            amount0: self.amount0.clone(),
            amount1: self.amount1.clone(),
            recipient: self.recipient.clone(),
        }
    }
}

impl From<&RawEvent> for MissingEvent {
    fn from(event: &RawEvent) -> Self {
        Self {
            event_type: event.event_type,
            timestamp: event.block_timestamp,
            block_number: event.block_number,
            transaction_index: event.transaction_index,
            log_index: event.log_index,
            transaction_hash: event.transaction_hash.clone(),
            liquidity: event.liquidity.clone(),
            amount0: event.amount0.clone(),
            amount1: event.amount1.clone(),
            recipient: event.recipient.clone(),
        }
    }
}

/// Counts from one missing-event reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissingReconciliation {
    /// Entries the indexer now returns.
    pub confirmed: usize,
    /// Entries at or below finality that the indexer never returned.
    pub abandoned: usize,
}

/// Per-position sync bookkeeping.
///
/// `missing_events` is kept sorted by coordinates and free of duplicate
/// `(transaction_hash, log_index)` keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub position_id: i64,
    pub missing_events: Vec<MissingEvent>,
    pub last_finalized_block: Option<u64>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncState {
    pub fn new(position_id: i64) -> Self {
        Self {
            position_id,
            missing_events: Vec::new(),
            last_finalized_block: None,
            last_synced_at: None,
        }
    }

    /// Record a missing event. Returns false if the same
    /// `(transaction_hash, log_index)` is already pending.
    pub fn add_missing_event(&mut self, event: MissingEvent) -> bool {
        let key = event.dedup_key();
        if self.missing_events.iter().any(|e| e.dedup_key() == key) {
            return false;
        }
        let pos = self
            .missing_events
            .partition_point(|e| e.coordinates() <= event.coordinates());
        self.missing_events.insert(pos, event);
        true
    }

    /// Pending entries as raw events, limited to `block >= from_block`.
    pub fn pending_raw_events(&self, chain_id: u64, nft_id: &NftId, from_block: u64) -> Vec<RawEvent> {
        self.missing_events
            .iter()
            .filter(|e| e.block_number >= from_block)
            .map(|e| e.to_raw_event(chain_id, nft_id))
            .collect()
    }

    /// Drop entries the indexer confirmed and entries finality has passed.
    pub fn reconcile(&mut self, indexed: &[RawEvent], finalized_block: u64) -> MissingReconciliation {
        let indexed_keys: HashSet<(TxHash, u64)> = indexed.iter().map(RawEvent::dedup_key).collect();
        let mut result = MissingReconciliation::default();

        self.missing_events.retain(|event| {
            if indexed_keys.contains(&event.dedup_key()) {
                result.confirmed += 1;
                false
            } else if event.block_number <= finalized_block {
                result.abandoned += 1;
                false
            } else {
                true
            }
        });

        self.last_finalized_block = Some(
            self.last_finalized_block
                .map_or(finalized_block, |prev| prev.max(finalized_block)),
        );
        result
    }

    /// Lowest block among pending entries that finality has reached; they
    /// are confirmed or abandoned by the next reconciliation.
    pub fn earliest_expiring_block(&self, finalized_block: u64) -> Option<u64> {
        self.missing_events
            .iter()
            .map(|e| e.block_number)
            .filter(|&block| block <= finalized_block)
            .min()
    }

    pub fn has_pending(&self) -> bool {
        !self.missing_events.is_empty()
    }
}
