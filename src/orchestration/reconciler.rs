//! Position reconciler: compares on-chain state with the ledger and detects closure.

use super::ledger_sync::{load_position, LedgerSync, SyncMode, SyncResult};
use crate::datasource::PositionReader;
use crate::engine::LedgerSummary;
use crate::error::LedgerError;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

/// Outcome of one refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub position_id: i64,
    /// False when the ledger already had zero liquidity and the chain was not read.
    pub on_chain_read: bool,
    /// Set when pending missing events or a liquidity mismatch triggered an
    /// incremental sync.
    pub resync: Option<SyncResult>,
    pub is_closed: bool,
}

pub struct PositionReconciler {
    sync: Arc<LedgerSync>,
    reader: Arc<dyn PositionReader>,
}

impl PositionReconciler {
    pub fn new(sync: Arc<LedgerSync>, reader: Arc<dyn PositionReader>) -> Self {
        Self { sync, reader }
    }

    /// Refresh one position's on-chain state and rollups.
    ///
    /// The ledger is authoritative for liquidity. A mismatch with the chain
    /// means events are missing, so an incremental sync runs before the
    /// rollups are stored.
    pub async fn refresh(&self, position_id: i64) -> Result<RefreshOutcome, LedgerError> {
        let span = info_span!("position_refresh", position_id);
        self.refresh_inner(position_id).instrument(span).await
    }

    async fn refresh_inner(&self, position_id: i64) -> Result<RefreshOutcome, LedgerError> {
        let repo = self.sync.repo();
        let position = load_position(repo, position_id).await?;

        // Pending missing events only converge through a sync, and a COLLECT
        // never shows up as a liquidity mismatch.
        let mut resync = None;
        if repo.load_sync_state(position_id).await?.has_pending() {
            debug!("missing events pending, resyncing");
            resync = Some(
                self.sync
                    .sync_position(position_id, SyncMode::Incremental)
                    .await?,
            );
        }

        let events = repo.query_ledger_events(position_id).await?;
        let mut summary = LedgerSummary::from_events(&events);

        if summary.liquidity.is_zero() {
            debug!("ledger liquidity is zero, skipping on-chain read");
            repo.update_position_rollup(position_id, &summary.to_rollup(&position.state))
                .await?;
            return Ok(RefreshOutcome {
                position_id,
                on_chain_read: false,
                resync,
                is_closed: summary.is_closed(),
            });
        }

        let on_chain = self
            .reader
            .read_position(position.config.chain_id, &position.config.nft_id)
            .await?;
        repo.update_position_chain_state(position_id, &on_chain)
            .await?;

        if on_chain.liquidity != summary.liquidity {
            info!(
                ledger = %summary.liquidity,
                on_chain = %on_chain.liquidity,
                "liquidity mismatch, resyncing"
            );
            resync = Some(
                self.sync
                    .sync_position(position_id, SyncMode::Incremental)
                    .await?,
            );
            let events = repo.query_ledger_events(position_id).await?;
            summary = LedgerSummary::from_events(&events);
        }

        repo.update_position_rollup(position_id, &summary.to_rollup(&on_chain))
            .await?;

        Ok(RefreshOutcome {
            position_id,
            on_chain_read: true,
            resync,
            is_closed: summary.is_closed(),
        })
    }
}
