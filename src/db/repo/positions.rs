//! Token, pool and position operations for the repository.

use super::{amount_column, from_db_int, to_db_int, Repository};
use crate::domain::{
    Address, NftId, OnChainPosition, PoolMetadata, Position, PositionConfig, PositionRollup,
    QuoteToken, TokenMetadata,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

const POSITION_COLUMNS: &str = r#"
    id, chain_id, nft_id, pool_id, pool_address, tick_lower, tick_upper,
    owner_address, onchain_liquidity, fee_growth_inside0_last_x128,
    fee_growth_inside1_last_x128, tokens_owed0, tokens_owed1,
    liquidity, cost_basis, realized_pnl, collected_fees,
    uncollected_principal0, uncollected_principal1, unclaimed_fees0, unclaimed_fees1,
    is_active, position_closed_at
"#;

impl Repository {
    // =========================================================================
    // Tokens and pools
    // =========================================================================

    /// Insert a token, or return the stored one for the same (chain, address).
    ///
    /// # Errors
    /// Returns an error if the insert or read-back fails.
    pub async fn insert_token(
        &self,
        chain_id: u64,
        address: &Address,
        symbol: &str,
        decimals: u32,
    ) -> Result<TokenMetadata, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tokens (chain_id, address, symbol, decimals)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chain_id, address) DO NOTHING
            "#,
        )
        .bind(to_db_int(chain_id))
        .bind(address.as_str())
        .bind(symbol)
        .bind(decimals)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, chain_id, address, symbol, decimals FROM tokens WHERE chain_id = ? AND address = ?",
        )
        .bind(to_db_int(chain_id))
        .bind(address.as_str())
        .fetch_one(&self.pool)
        .await?;

        token_from_row(&row, "")
    }

    /// Insert a pool and return its id.
    ///
    /// # Errors
    /// Returns an error if the insert fails (e.g. unknown token ids).
    pub async fn insert_pool(
        &self,
        chain_id: u64,
        address: &Address,
        token0_id: i64,
        token1_id: i64,
        fee: u32,
        quote_token: QuoteToken,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO pools (chain_id, address, token0_id, token1_id, fee, quote_token)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_db_int(chain_id))
        .bind(address.as_str())
        .bind(token0_id)
        .bind(token1_id)
        .bind(fee)
        .bind(quote_token.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Load a pool together with both token records.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn get_pool(&self, pool_id: i64) -> Result<Option<PoolMetadata>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.chain_id, p.address, p.fee, p.quote_token,
                   t0.id AS t0_id, t0.chain_id AS t0_chain_id, t0.address AS t0_address,
                   t0.symbol AS t0_symbol, t0.decimals AS t0_decimals,
                   t1.id AS t1_id, t1.chain_id AS t1_chain_id, t1.address AS t1_address,
                   t1.symbol AS t1_symbol, t1.decimals AS t1_decimals
            FROM pools p
            JOIN tokens t0 ON p.token0_id = t0.id
            JOIN tokens t1 ON p.token1_id = t1.id
            WHERE p.id = ?
            "#,
        )
        .bind(pool_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let quote_token: String = row.try_get("quote_token")?;
        let quote_token =
            QuoteToken::from_str(&quote_token).map_err(|e| sqlx::Error::ColumnDecode {
                index: "quote_token".to_string(),
                source: e.into(),
            })?;

        Ok(Some(PoolMetadata {
            id: row.try_get("id")?,
            chain_id: from_db_int(&row, "chain_id")?,
            address: Address::new(row.try_get::<String, _>("address")?),
            token0: token_from_row(&row, "t0_")?,
            token1: token_from_row(&row, "t1_")?,
            fee: row.try_get("fee")?,
            quote_token,
        }))
    }

    // =========================================================================
    // Positions
    // =========================================================================

    /// Insert a position with empty on-chain state and rollups.
    ///
    /// # Errors
    /// Returns an error if the insert fails (e.g. duplicate (chain, nft) or unknown pool).
    pub async fn insert_position(&self, config: &PositionConfig) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO positions (chain_id, nft_id, pool_id, pool_address, tick_lower, tick_upper)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_db_int(config.chain_id))
        .bind(config.nft_id.as_str())
        .bind(config.pool_id)
        .bind(config.pool_address.as_str())
        .bind(config.tick_lower)
        .bind(config.tick_upper)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn get_position(&self, position_id: i64) -> Result<Option<Position>, sqlx::Error> {
        let sql = format!("SELECT {} FROM positions WHERE id = ?", POSITION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn get_position_by_nft(
        &self,
        chain_id: u64,
        nft_id: &NftId,
    ) -> Result<Option<Position>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM positions WHERE chain_id = ? AND nft_id = ?",
            POSITION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(to_db_int(chain_id))
            .bind(nft_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    /// All positions ordered by id.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn list_positions(&self) -> Result<Vec<Position>, sqlx::Error> {
        let sql = format!("SELECT {} FROM positions ORDER BY id ASC", POSITION_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(position_from_row).collect()
    }

    /// Store the latest on-chain read of a position.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update_position_chain_state(
        &self,
        position_id: i64,
        state: &OnChainPosition,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE positions SET
                owner_address = ?,
                onchain_liquidity = ?,
                fee_growth_inside0_last_x128 = ?,
                fee_growth_inside1_last_x128 = ?,
                tokens_owed0 = ?,
                tokens_owed1 = ?
            WHERE id = ?
            "#,
        )
        .bind(state.owner_address.as_ref().map(|a| a.as_str()))
        .bind(state.liquidity.to_canonical_string())
        .bind(state.fee_growth_inside0_last_x128.to_canonical_string())
        .bind(state.fee_growth_inside1_last_x128.to_canonical_string())
        .bind(state.tokens_owed0.to_canonical_string())
        .bind(state.tokens_owed1.to_canonical_string())
        .bind(position_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store ledger-derived rollups.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn update_position_rollup(
        &self,
        position_id: i64,
        rollup: &PositionRollup,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE positions SET
                liquidity = ?,
                cost_basis = ?,
                realized_pnl = ?,
                collected_fees = ?,
                uncollected_principal0 = ?,
                uncollected_principal1 = ?,
                unclaimed_fees0 = ?,
                unclaimed_fees1 = ?,
                is_active = ?,
                position_closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(rollup.liquidity.to_canonical_string())
        .bind(rollup.cost_basis.to_canonical_string())
        .bind(rollup.realized_pnl.to_canonical_string())
        .bind(rollup.collected_fees.to_canonical_string())
        .bind(rollup.uncollected_principal0.to_canonical_string())
        .bind(rollup.uncollected_principal1.to_canonical_string())
        .bind(rollup.unclaimed_fees0.to_canonical_string())
        .bind(rollup.unclaimed_fees1.to_canonical_string())
        .bind(rollup.is_active)
        .bind(rollup.position_closed_at.map(|t| t.to_rfc3339()))
        .bind(position_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a position; ledger events and sync state cascade.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete_position(&self, position_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM positions WHERE id = ?")
            .bind(position_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn token_from_row(row: &SqliteRow, prefix: &str) -> Result<TokenMetadata, sqlx::Error> {
    let col = |name: &str| format!("{}{}", prefix, name);
    Ok(TokenMetadata {
        id: row.try_get(col("id").as_str())?,
        chain_id: from_db_int(row, &col("chain_id"))?,
        address: Address::new(row.try_get::<String, _>(col("address").as_str())?),
        symbol: row.try_get(col("symbol").as_str())?,
        decimals: row.try_get(col("decimals").as_str())?,
    })
}

fn position_from_row(row: &SqliteRow) -> Result<Position, sqlx::Error> {
    let closed_at: Option<String> = row.try_get("position_closed_at")?;
    let position_closed_at = closed_at
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| sqlx::Error::ColumnDecode {
                    index: "position_closed_at".to_string(),
                    source: Box::new(e),
                })
        })
        .transpose()?;

    Ok(Position {
        id: row.try_get("id")?,
        config: PositionConfig {
            chain_id: from_db_int(row, "chain_id")?,
            nft_id: NftId::new(row.try_get::<String, _>("nft_id")?),
            pool_id: row.try_get("pool_id")?,
            pool_address: Address::new(row.try_get::<String, _>("pool_address")?),
            tick_lower: row.try_get("tick_lower")?,
            tick_upper: row.try_get("tick_upper")?,
        },
        state: OnChainPosition {
            owner_address: row
                .try_get::<Option<String>, _>("owner_address")?
                .map(Address::new),
            liquidity: amount_column(row, "onchain_liquidity")?,
            fee_growth_inside0_last_x128: amount_column(row, "fee_growth_inside0_last_x128")?,
            fee_growth_inside1_last_x128: amount_column(row, "fee_growth_inside1_last_x128")?,
            tokens_owed0: amount_column(row, "tokens_owed0")?,
            tokens_owed1: amount_column(row, "tokens_owed1")?,
        },
        rollup: PositionRollup {
            liquidity: amount_column(row, "liquidity")?,
            cost_basis: amount_column(row, "cost_basis")?,
            realized_pnl: amount_column(row, "realized_pnl")?,
            collected_fees: amount_column(row, "collected_fees")?,
            uncollected_principal0: amount_column(row, "uncollected_principal0")?,
            uncollected_principal1: amount_column(row, "uncollected_principal1")?,
            unclaimed_fees0: amount_column(row, "unclaimed_fees0")?,
            unclaimed_fees1: amount_column(row, "unclaimed_fees1")?,
            is_active: row.try_get("is_active")?,
            position_closed_at,
        },
    })
}
