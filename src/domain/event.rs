//! Raw position mutation events as reported by the event-history provider.

use crate::domain::{Address, Amount, EventCoordinates, NftId, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Event kinds emitted by the position manager contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockchainEventType {
    IncreaseLiquidity,
    DecreaseLiquidity,
    Collect,
}

impl BlockchainEventType {
    /// Ledger classification for this on-chain event.
    pub fn ledger_type(self) -> LedgerEventType {
        match self {
            BlockchainEventType::IncreaseLiquidity => LedgerEventType::IncreasePosition,
            BlockchainEventType::DecreaseLiquidity => LedgerEventType::DecreasePosition,
            BlockchainEventType::Collect => LedgerEventType::Collect,
        }
    }
}

/// Ledger event classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEventType {
    IncreasePosition,
    DecreasePosition,
    Collect,
}

impl LedgerEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEventType::IncreasePosition => "INCREASE_POSITION",
            LedgerEventType::DecreasePosition => "DECREASE_POSITION",
            LedgerEventType::Collect => "COLLECT",
        }
    }
}

impl fmt::Display for LedgerEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCREASE_POSITION" => Ok(LedgerEventType::IncreasePosition),
            "DECREASE_POSITION" => Ok(LedgerEventType::DecreasePosition),
            "COLLECT" => Ok(LedgerEventType::Collect),
            other => Err(format!("unknown ledger event type: {}", other)),
        }
    }
}

/// A single IncreaseLiquidity / DecreaseLiquidity / Collect log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub event_type: BlockchainEventType,
    pub token_id: NftId,
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
    /// Block time in seconds since Unix epoch.
    pub block_timestamp: i64,
    pub chain_id: u64,
    /// Liquidity delta; absent on Collect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquidity: Option<Amount>,
    pub amount0: Amount,
    pub amount1: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Address>,
}

impl RawEvent {
    pub fn coordinates(&self) -> EventCoordinates {
        EventCoordinates::new(self.block_number, self.transaction_index, self.log_index)
    }

    /// Identity of this log across event sources.
    pub fn dedup_key(&self) -> (TxHash, u64) {
        (self.transaction_hash.clone(), self.log_index)
    }
}
