//! Position registration: insert plus initial full sync, undone on failure.

use super::ledger_sync::{load_position, LedgerSync, SyncMode, SyncResult};
use crate::domain::{NftId, Position, PositionConfig};
use crate::error::LedgerError;
use tracing::{error, info, warn};

/// A position to start tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePosition {
    pub chain_id: u64,
    pub nft_id: NftId,
    pub pool_id: i64,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

impl LedgerSync {
    /// Register a position and build its ledger from the deployment block.
    ///
    /// If the position is already tracked, it is synced incrementally instead.
    /// If the initial sync fails, the new position row is deleted (cascading
    /// to anything written) and the sync error is returned.
    pub async fn create_position(
        &self,
        request: CreatePosition,
    ) -> Result<(Position, SyncResult), LedgerError> {
        let repo = self.repo().clone();
        self.deployment_block(request.chain_id)?;

        let pool = repo
            .get_pool(request.pool_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("pool {}", request.pool_id)))?;
        if pool.chain_id != request.chain_id {
            return Err(LedgerError::StateInvariant(format!(
                "pool {} is on chain {}, position on chain {}",
                pool.id, pool.chain_id, request.chain_id
            )));
        }

        if let Some(existing) = repo
            .get_position_by_nft(request.chain_id, &request.nft_id)
            .await?
        {
            info!(position_id = existing.id, "position already tracked");
            let result = self
                .sync_position(existing.id, SyncMode::Incremental)
                .await?;
            let position = load_position(&repo, existing.id).await?;
            return Ok((position, result));
        }

        let config = PositionConfig {
            chain_id: request.chain_id,
            nft_id: request.nft_id,
            pool_id: pool.id,
            pool_address: pool.address.clone(),
            tick_lower: request.tick_lower,
            tick_upper: request.tick_upper,
        };
        let position_id = repo.insert_position(&config).await?;

        match self.sync_position(position_id, SyncMode::Full).await {
            Ok(result) => {
                let position = load_position(&repo, position_id).await?;
                info!(position_id, events = result.events_added, "position created");
                Ok((position, result))
            }
            Err(err) => {
                warn!(position_id, error = %err, "initial sync failed, removing position");
                if let Err(cleanup) = repo.delete_position(position_id).await {
                    error!(position_id, error = %cleanup, "failed to remove position");
                }
                Err(err)
            }
        }
    }
}
