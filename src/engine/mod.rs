//! Pure computation engine(s) for deterministic ledger logic.

use crate::domain::{Amount, LedgerEventInput, Reward};
use thiserror::Error;

pub mod builder;
pub mod price;
pub mod processors;
pub mod summary;

pub use builder::build_ledger_event;
pub use price::{pool_price, value_in_quote};
pub use processors::{process_collect, process_decrease, process_event, process_increase};
pub use summary::LedgerSummary;

/// Minimal state needed to process the next event of a position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreviousEventState {
    pub uncollected_principal0: Amount,
    pub uncollected_principal1: Amount,
    pub liquidity: Amount,
    pub cost_basis: Amount,
    pub pnl: Amount,
}

impl PreviousEventState {
    /// State of a position before its first event.
    pub fn zero() -> Self {
        Self::default()
    }
}

impl From<&LedgerEventInput> for PreviousEventState {
    fn from(event: &LedgerEventInput) -> Self {
        Self {
            uncollected_principal0: event.uncollected_principal0_after.clone(),
            uncollected_principal1: event.uncollected_principal1_after.clone(),
            liquidity: event.liquidity_after.clone(),
            cost_basis: event.cost_basis_after.clone(),
            pnl: event.pnl_after.clone(),
        }
    }
}

/// Accounting deltas produced by one event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventDelta {
    pub delta_l: Amount,
    pub token_value: Amount,
    pub delta_cost_basis: Amount,
    pub delta_pnl: Amount,
    pub fees_collected0: Amount,
    pub fees_collected1: Amount,
    pub rewards: Vec<Reward>,
}

/// Type-specific details of a processed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Increase,
    Decrease {
        /// Cost basis removed by this withdrawal.
        proportional_cost_basis: Amount,
    },
    Collect {
        principal0: Amount,
        principal1: Amount,
        fee0: Amount,
        fee1: Amount,
    },
}

/// Output of a processor: deltas, the state after the event, and the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEvent {
    pub delta: EventDelta,
    pub state: PreviousEventState,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    /// The event cannot be applied to the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("division by zero: {0}")]
    Division(String),
}
