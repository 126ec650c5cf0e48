//! Position aggregate: immutable config, on-chain state and ledger rollups.

use crate::domain::{Address, Amount, NftId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable identity of a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionConfig {
    pub chain_id: u64,
    pub nft_id: NftId,
    pub pool_id: i64,
    pub pool_address: Address,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

/// Fields read from the position manager contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnChainPosition {
    pub owner_address: Option<Address>,
    pub liquidity: Amount,
    pub fee_growth_inside0_last_x128: Amount,
    pub fee_growth_inside1_last_x128: Amount,
    pub tokens_owed0: Amount,
    pub tokens_owed1: Amount,
}

/// Totals derived from the ledger. Liquidity here is authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRollup {
    pub liquidity: Amount,
    pub cost_basis: Amount,
    pub realized_pnl: Amount,
    /// Quote value of every fee collected so far.
    pub collected_fees: Amount,
    pub uncollected_principal0: Amount,
    pub uncollected_principal1: Amount,
    /// Tokens owed on-chain beyond uncollected principal.
    pub unclaimed_fees0: Amount,
    pub unclaimed_fees1: Amount,
    pub is_active: bool,
    pub position_closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: i64,
    pub config: PositionConfig,
    pub state: OnChainPosition,
    pub rollup: PositionRollup,
}
