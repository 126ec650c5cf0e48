//! Ledger sync: rebuilds a position's ledger tail from indexer and missing events.

use crate::datasource::{AggregateSink, CachedPriceSource, EventHistorySource, FinalitySource};
use crate::db::Repository;
use crate::domain::{merge_and_dedupe, Position};
use crate::engine::LedgerSummary;
use crate::error::LedgerError;
use crate::sync::{replay_events, MissingEvent};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// How much of the ledger a sync rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Everything from the chain's deployment block.
    Full,
    /// From the last persisted block, capped at the finality horizon.
    Incremental,
}

/// Phases of one sync run, in order. `Failed` can follow any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    DeterminingWindow,
    Deleting,
    Fetching,
    Merging,
    Replaying,
    ReconcilingMissing,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::DeterminingWindow => "determining_window",
            SyncPhase::Deleting => "deleting",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Merging => "merging",
            SyncPhase::Replaying => "replaying",
            SyncPhase::ReconcilingMissing => "reconciling_missing",
            SyncPhase::Persisting => "persisting",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub position_id: i64,
    pub events_added: usize,
    pub events_replayed: usize,
    pub from_block: u64,
    pub finalized_block: u64,
    pub missing_confirmed: usize,
    pub missing_abandoned: usize,
    /// Events valued with the latest-block price fallback.
    pub degraded_prices: usize,
}

/// Collaborators of a ledger sync.
#[derive(Clone)]
pub struct LedgerSyncDeps {
    pub repo: Arc<Repository>,
    pub events: Arc<dyn EventHistorySource>,
    pub prices: CachedPriceSource,
    pub finality: Arc<dyn FinalitySource>,
    pub aggregator: Arc<dyn AggregateSink>,
    /// Position manager deployment block per supported chain.
    pub deployment_blocks: HashMap<u64, u64>,
}

/// Per-position ledger sync state machine.
///
/// Runs for one position are serialized; runs for different positions are
/// independent and may proceed concurrently.
pub struct LedgerSync {
    pub(crate) deps: LedgerSyncDeps,
    position_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl LedgerSync {
    pub fn new(deps: LedgerSyncDeps) -> Self {
        Self {
            deps,
            position_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.deps.repo
    }

    pub(crate) fn deployment_block(&self, chain_id: u64) -> Result<u64, LedgerError> {
        self.deps
            .deployment_blocks
            .get(&chain_id)
            .copied()
            .ok_or(LedgerError::UnsupportedChain(chain_id))
    }

    async fn position_lock(&self, position_id: i64) -> Arc<Mutex<()>> {
        self.position_locks
            .lock()
            .await
            .entry(position_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Sync one position's ledger.
    pub async fn sync_position(
        &self,
        position_id: i64,
        mode: SyncMode,
    ) -> Result<SyncResult, LedgerError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ledger_sync", %run_id, position_id, ?mode);

        async {
            let lock = self.position_lock(position_id).await;
            let _guard = lock.lock().await;

            let mut phase = SyncPhase::Idle;
            match self.run(position_id, mode, &mut phase).await {
                Ok(result) => {
                    info!(
                        added = result.events_added,
                        replayed = result.events_replayed,
                        from_block = result.from_block,
                        finalized_block = result.finalized_block,
                        missing_confirmed = result.missing_confirmed,
                        missing_abandoned = result.missing_abandoned,
                        "ledger sync complete"
                    );
                    Ok(result)
                }
                Err(err) => {
                    error!(phase = %phase, error = %err, "ledger sync failed");
                    set_phase(&mut phase, SyncPhase::Failed);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Record an event the indexer has not returned yet and resync.
    ///
    /// Returns None when the same `(transaction_hash, log_index)` was already
    /// pending; nothing is synced in that case.
    pub async fn report_missing_event(
        &self,
        position_id: i64,
        event: MissingEvent,
    ) -> Result<Option<SyncResult>, LedgerError> {
        {
            let lock = self.position_lock(position_id).await;
            let _guard = lock.lock().await;

            if self.deps.repo.get_position(position_id).await?.is_none() {
                return Err(LedgerError::NotFound(format!("position {}", position_id)));
            }

            let mut state = self.deps.repo.load_sync_state(position_id).await?;
            if !state.add_missing_event(event) {
                debug!(position_id, "missing event already pending");
                return Ok(None);
            }
            self.deps.repo.save_sync_state(&state).await?;
        }

        self.sync_position(position_id, SyncMode::Incremental)
            .await
            .map(Some)
    }

    async fn run(
        &self,
        position_id: i64,
        mode: SyncMode,
        phase: &mut SyncPhase,
    ) -> Result<SyncResult, LedgerError> {
        let repo = &self.deps.repo;

        set_phase(phase, SyncPhase::DeterminingWindow);
        let position = load_position(repo, position_id).await?;
        let chain_id = position.config.chain_id;
        let pool = repo
            .get_pool(position.config.pool_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("pool {}", position.config.pool_id)))?;
        let deployment_block = self.deployment_block(chain_id)?;
        let finalized_block = self.deps.finality.last_finalized_block(chain_id).await?;

        let mut sync_state = repo.load_sync_state(position_id).await?;

        let from_block = match mode {
            SyncMode::Full => deployment_block,
            SyncMode::Incremental => {
                let last_block = repo
                    .get_last_ledger_event(position_id)
                    .await?
                    .map(|e| e.input.block_number)
                    .unwrap_or(deployment_block);
                let window_start = last_block.min(finalized_block);
                // Rows replayed from entries that expire this run must be rebuilt.
                match sync_state.earliest_expiring_block(finalized_block) {
                    Some(block) if block < window_start => {
                        debug!(block, window_start, "window lowered to expiring missing event");
                        block
                    }
                    _ => window_start,
                }
            }
        };

        set_phase(phase, SyncPhase::Deleting);
        let deleted = repo
            .delete_ledger_events_from_block(position_id, from_block)
            .await?;
        debug!(from_block, deleted, "ledger tail deleted");

        set_phase(phase, SyncPhase::Fetching);
        let indexed = self
            .deps
            .events
            .fetch_events(chain_id, &position.config.nft_id, Some(from_block), None)
            .await?;
        // Unconfirmed entries at or below finality are abandoned this run,
        // so they never reach the ledger.
        let pending: Vec<_> = sync_state
            .pending_raw_events(chain_id, &position.config.nft_id, from_block)
            .into_iter()
            .filter(|e| e.block_number > finalized_block)
            .collect();
        debug!(indexed = indexed.len(), pending = pending.len(), "events fetched");

        set_phase(phase, SyncPhase::Merging);
        let merged = merge_and_dedupe(indexed.clone(), pending);

        set_phase(phase, SyncPhase::Replaying);
        let seed = repo.get_last_ledger_event(position_id).await?;
        let replay = replay_events(
            repo,
            &self.deps.prices,
            &pool,
            position_id,
            &merged,
            seed.as_ref(),
        )
        .await?;
        if replay.degraded_prices > 0 {
            warn!(
                degraded = replay.degraded_prices,
                "events valued at latest-block prices"
            );
        }

        set_phase(phase, SyncPhase::ReconcilingMissing);
        let reconciliation = sync_state.reconcile(&indexed, finalized_block);

        set_phase(phase, SyncPhase::Persisting);
        sync_state.last_synced_at = Some(Utc::now());
        repo.save_sync_state(&sync_state).await?;

        let events = repo.query_ledger_events(position_id).await?;
        let summary = LedgerSummary::from_events(&events);
        repo.update_position_rollup(position_id, &summary.to_rollup(&position.state))
            .await?;

        if let Err(e) = self.deps.aggregator.recompute_periods(position_id).await {
            warn!(error = %e, "aggregate recompute failed");
        }

        set_phase(phase, SyncPhase::Done);
        Ok(SyncResult {
            position_id,
            events_added: replay.events_added,
            events_replayed: replay.events_replayed,
            from_block,
            finalized_block,
            missing_confirmed: reconciliation.confirmed,
            missing_abandoned: reconciliation.abandoned,
            degraded_prices: replay.degraded_prices,
        })
    }
}

fn set_phase(phase: &mut SyncPhase, next: SyncPhase) {
    debug!(from = %phase, to = %next, "sync phase");
    *phase = next;
}

pub(crate) async fn load_position(
    repo: &Repository,
    position_id: i64,
) -> Result<Position, LedgerError> {
    repo.get_position(position_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("position {}", position_id)))
}
