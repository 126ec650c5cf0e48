//! Sequential replay of raw events into the ledger.

use crate::datasource::CachedPriceSource;
use crate::db::Repository;
use crate::domain::{LedgerEvent, PoolMetadata, RawEvent};
use crate::engine::{build_ledger_event, PreviousEventState};
use crate::error::LedgerError;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Rows actually written.
    pub events_added: usize,
    /// Events folded, including ones already stored.
    pub events_replayed: usize,
    pub degraded_prices: usize,
}

/// Fold `events` (already merged and sorted) onto `seed`, the last event kept
/// after tail deletion, writing each derived record through the idempotent
/// insert. Each event depends on the one before it, so this never runs
/// concurrently for one position.
pub async fn replay_events(
    repo: &Repository,
    prices: &CachedPriceSource,
    pool: &PoolMetadata,
    position_id: i64,
    events: &[RawEvent],
    seed: Option<&LedgerEvent>,
) -> Result<ReplayOutcome, LedgerError> {
    let mut prev_state = seed
        .map(|e| PreviousEventState::from(&e.input))
        .unwrap_or_else(PreviousEventState::zero);
    let mut prev_id = seed.map(|e| e.id);
    let mut outcome = ReplayOutcome::default();

    for event in events {
        let basis = prices.price_at(pool, event.block_number).await?;
        if basis.degraded {
            outcome.degraded_prices += 1;
        }

        let input = build_ledger_event(event, &prev_state, pool, &basis, prev_id, position_id)?;
        let stored = repo.insert_ledger_event(&input).await?;
        trace!(
            position_id,
            coordinates = %input.coordinates(),
            inserted = stored.inserted,
            "replayed event"
        );

        if stored.inserted {
            outcome.events_added += 1;
        }
        outcome.events_replayed += 1;
        prev_state = PreviousEventState::from(&input);
        prev_id = Some(stored.id);
    }

    debug!(
        position_id,
        added = outcome.events_added,
        replayed = outcome.events_replayed,
        "replay finished"
    );
    Ok(outcome)
}
