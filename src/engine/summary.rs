//! Rollups derived from a position's ledger, including closure detection.

use crate::domain::{Amount, LedgerEvent, LedgerEventType, OnChainPosition, PositionRollup};
use chrono::{DateTime, TimeZone, Utc};

/// Snapshot of a position's ledger after its most recent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedgerSummary {
    pub event_count: usize,
    pub liquidity: Amount,
    pub cost_basis: Amount,
    pub realized_pnl: Amount,
    pub collected_fees: Amount,
    pub uncollected_principal0: Amount,
    pub uncollected_principal1: Amount,
    pub last_event_type: Option<LedgerEventType>,
    pub last_block_timestamp: Option<i64>,
}

impl LedgerSummary {
    /// Summarize events given in ascending chronological order.
    pub fn from_events(events: &[LedgerEvent]) -> Self {
        let collected_fees: Amount = events
            .iter()
            .flat_map(|e| e.input.rewards.iter())
            .map(|r| &r.token_value)
            .sum();

        match events.last() {
            None => LedgerSummary::default(),
            Some(last) => LedgerSummary {
                event_count: events.len(),
                liquidity: last.input.liquidity_after.clone(),
                cost_basis: last.input.cost_basis_after.clone(),
                realized_pnl: last.input.pnl_after.clone(),
                collected_fees,
                uncollected_principal0: last.input.uncollected_principal0_after.clone(),
                uncollected_principal1: last.input.uncollected_principal1_after.clone(),
                last_event_type: Some(last.input.event_type),
                last_block_timestamp: Some(last.input.block_timestamp),
            },
        }
    }

    /// A position is closed only once its last event is a COLLECT that left
    /// no liquidity and no uncollected principal behind.
    ///
    /// A DECREASE to zero is not closure: the principal may still be owed.
    pub fn is_closed(&self) -> bool {
        self.liquidity.is_zero()
            && self.last_event_type == Some(LedgerEventType::Collect)
            && self.uncollected_principal0.is_zero()
            && self.uncollected_principal1.is_zero()
    }

    /// Time of the closing COLLECT, if the position is closed.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        if !self.is_closed() {
            return None;
        }
        self.last_block_timestamp
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    /// Position rollup from this summary and the last on-chain read.
    pub fn to_rollup(&self, on_chain: &OnChainPosition) -> PositionRollup {
        PositionRollup {
            liquidity: self.liquidity.clone(),
            cost_basis: self.cost_basis.clone(),
            realized_pnl: self.realized_pnl.clone(),
            collected_fees: self.collected_fees.clone(),
            uncollected_principal0: self.uncollected_principal0.clone(),
            uncollected_principal1: self.uncollected_principal1.clone(),
            unclaimed_fees0: on_chain
                .tokens_owed0
                .saturating_sub_zero(&self.uncollected_principal0),
            unclaimed_fees1: on_chain
                .tokens_owed1
                .saturating_sub_zero(&self.uncollected_principal1),
            is_active: !self.is_closed(),
            position_closed_at: self.closed_at(),
        }
    }
}
