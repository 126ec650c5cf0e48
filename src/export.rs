//! CSV export of a position's ledger for audit.

use crate::domain::LedgerEvent;
use serde::Serialize;
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("rewards encoding error: {0}")]
    Rewards(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct Row<'a> {
    id: i64,
    previous_id: Option<i64>,
    block_number: u64,
    tx_index: u64,
    log_index: u64,
    tx_hash: &'a str,
    block_timestamp: i64,
    event_type: &'a str,
    token0_amount: String,
    token1_amount: String,
    pool_price: String,
    token_value: String,
    delta_cost_basis: String,
    cost_basis_after: String,
    delta_pnl: String,
    pnl_after: String,
    delta_l: String,
    liquidity_after: String,
    fees_collected0: String,
    fees_collected1: String,
    uncollected_principal0_after: String,
    uncollected_principal1_after: String,
    sqrt_price_x96: String,
    price_degraded: bool,
    rewards: String,
    input_hash: &'a str,
}

/// Write events (expected in ascending order) as CSV with a header row.
pub fn write_ledger_csv<W: Write>(events: &[LedgerEvent], writer: W) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for event in events {
        let e = &event.input;
        csv_writer.serialize(Row {
            id: event.id,
            previous_id: e.previous_id,
            block_number: e.block_number,
            tx_index: e.tx_index,
            log_index: e.log_index,
            tx_hash: e.tx_hash.as_str(),
            block_timestamp: e.block_timestamp,
            event_type: e.event_type.as_str(),
            token0_amount: e.token0_amount.to_canonical_string(),
            token1_amount: e.token1_amount.to_canonical_string(),
            pool_price: e.pool_price.to_canonical_string(),
            token_value: e.token_value.to_canonical_string(),
            delta_cost_basis: e.delta_cost_basis.to_canonical_string(),
            cost_basis_after: e.cost_basis_after.to_canonical_string(),
            delta_pnl: e.delta_pnl.to_canonical_string(),
            pnl_after: e.pnl_after.to_canonical_string(),
            delta_l: e.delta_l.to_canonical_string(),
            liquidity_after: e.liquidity_after.to_canonical_string(),
            fees_collected0: e.fees_collected0.to_canonical_string(),
            fees_collected1: e.fees_collected1.to_canonical_string(),
            uncollected_principal0_after: e.uncollected_principal0_after.to_canonical_string(),
            uncollected_principal1_after: e.uncollected_principal1_after.to_canonical_string(),
            sqrt_price_x96: e.sqrt_price_x96.to_canonical_string(),
            price_degraded: e.price_degraded,
            rewards: serde_json::to_string(&e.rewards)?,
            input_hash: &e.input_hash,
        })?;
    }

    csv_writer.flush()?;
    Ok(())
}
