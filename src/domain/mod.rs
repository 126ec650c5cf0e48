//! Domain types and determinism layer for the position ledger.
//!
//! This module provides:
//! - Exact integer amounts via the Amount wrapper
//! - Domain primitives: Address, TxHash, NftId, EventCoordinates
//! - Raw events, ledger event records, pool and position types
//! - Chronological ordering and deduplication helpers for replay

pub mod amount;
pub mod event;
pub mod ledger_event;
pub mod ordering;
pub mod pool;
pub mod position;
pub mod primitives;

pub use amount::{Amount, AmountParseError};
pub use event::{BlockchainEventType, LedgerEventType, RawEvent};
pub use ledger_event::{LedgerEvent, LedgerEventInput, Reward};
pub use ordering::{merge_and_dedupe, sort_events_chronological, EventOrderingKey};
pub use pool::{PoolMetadata, PriceSnapshot, QuoteToken, TokenMetadata};
pub use position::{OnChainPosition, Position, PositionConfig, PositionRollup};
pub use primitives::{Address, EventCoordinates, NftId, TxHash};
