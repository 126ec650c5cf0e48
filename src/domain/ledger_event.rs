//! Ledger event records: the append-only accounting log per position.

use crate::domain::{Amount, EventCoordinates, LedgerEventType, NftId, TxHash};
use serde::{Deserialize, Serialize};

/// Fee income in one token, reported on a COLLECT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub token_id: i64,
    pub token_amount: Amount,
    /// Fee amount valued in the pool's quote token.
    pub token_value: Amount,
}

/// A fully derived ledger record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEventInput {
    pub previous_id: Option<i64>,
    pub position_id: i64,
    pub chain_id: u64,
    pub nft_id: NftId,
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub tx_hash: TxHash,
    pub block_timestamp: i64,
    pub event_type: LedgerEventType,

    pub token0_amount: Amount,
    pub token1_amount: Amount,
    /// Quote raw units per one whole base token at the event block.
    pub pool_price: Amount,
    pub token_value: Amount,
    pub delta_cost_basis: Amount,
    pub cost_basis_after: Amount,
    pub delta_pnl: Amount,
    pub pnl_after: Amount,
    pub rewards: Vec<Reward>,

    pub delta_l: Amount,
    pub liquidity_after: Amount,
    /// Fee portion of this event's collected amounts.
    pub fees_collected0: Amount,
    pub fees_collected1: Amount,
    pub uncollected_principal0_after: Amount,
    pub uncollected_principal1_after: Amount,
    pub sqrt_price_x96: Amount,
    /// Set when the price basis came from the latest-block fallback.
    pub price_degraded: bool,

    pub input_hash: String,
}

impl LedgerEventInput {
    pub fn coordinates(&self) -> EventCoordinates {
        EventCoordinates::new(self.block_number, self.tx_index, self.log_index)
    }
}

/// A persisted ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub id: i64,
    #[serde(flatten)]
    pub input: LedgerEventInput,
}

impl LedgerEvent {
    pub fn coordinates(&self) -> EventCoordinates {
        self.input.coordinates()
    }

    pub fn event_type(&self) -> LedgerEventType {
        self.input.event_type
    }
}
