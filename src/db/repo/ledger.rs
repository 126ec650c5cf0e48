//! Ledger event persistence: idempotent append, tail deletion and ordered reads.

use super::{amount_column, from_db_int, to_db_int, Repository};
use crate::domain::{
    EventCoordinates, LedgerEvent, LedgerEventInput, LedgerEventType, NftId, Reward, TxHash,
};
use crate::error::LedgerError;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

const LEDGER_COLUMNS: &str = r#"
    id, previous_id, position_id, chain_id, nft_id, block_number, tx_index, log_index,
    tx_hash, block_timestamp, event_type, token0_amount, token1_amount, pool_price,
    token_value, delta_cost_basis, cost_basis_after, delta_pnl, pnl_after, rewards,
    delta_l, liquidity_after, fees_collected0, fees_collected1,
    uncollected_principal0_after, uncollected_principal1_after, sqrt_price_x96,
    price_degraded, input_hash
"#;

/// Result of an idempotent ledger insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub id: i64,
    /// False when a row with the same `(position_id, input_hash)` already existed.
    pub inserted: bool,
}

impl Repository {
    /// Append a ledger event.
    ///
    /// An event whose `(position_id, input_hash)` is already stored returns the
    /// existing id with `inserted = false`. Otherwise the event must sort
    /// strictly after the position's last stored event.
    ///
    /// # Errors
    /// `OrderingViolation` if the event precedes the last stored event, or a
    /// database error.
    pub async fn insert_ledger_event(
        &self,
        input: &LedgerEventInput,
    ) -> Result<InsertOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id FROM ledger_events WHERE position_id = ? AND input_hash = ?",
        )
        .bind(input.position_id)
        .bind(&input.input_hash)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let id: i64 = row.get("id");
            debug!(
                position_id = input.position_id,
                input_hash = %input.input_hash,
                id,
                "ledger event already stored"
            );
            return Ok(InsertOutcome {
                id,
                inserted: false,
            });
        }

        let last = sqlx::query(
            r#"
            SELECT block_number, tx_index, log_index FROM ledger_events
            WHERE position_id = ?
            ORDER BY block_number DESC, tx_index DESC, log_index DESC
            LIMIT 1
            "#,
        )
        .bind(input.position_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = last {
            let last = EventCoordinates::new(
                from_db_int(&row, "block_number")?,
                from_db_int(&row, "tx_index")?,
                from_db_int(&row, "log_index")?,
            );
            let attempted = input.coordinates();
            if attempted <= last {
                return Err(LedgerError::OrderingViolation {
                    position_id: input.position_id,
                    attempted,
                    last,
                });
            }
        }

        let rewards = serde_json::to_string(&input.rewards)?;
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_events (
                previous_id, position_id, chain_id, nft_id, block_number, tx_index, log_index,
                tx_hash, block_timestamp, event_type, token0_amount, token1_amount, pool_price,
                token_value, delta_cost_basis, cost_basis_after, delta_pnl, pnl_after, rewards,
                delta_l, liquidity_after, fees_collected0, fees_collected1,
                uncollected_principal0_after, uncollected_principal1_after, sqrt_price_x96,
                price_degraded, input_hash
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.previous_id)
        .bind(input.position_id)
        .bind(to_db_int(input.chain_id))
        .bind(input.nft_id.as_str())
        .bind(to_db_int(input.block_number))
        .bind(to_db_int(input.tx_index))
        .bind(to_db_int(input.log_index))
        .bind(input.tx_hash.as_str())
        .bind(input.block_timestamp)
        .bind(input.event_type.as_str())
        .bind(input.token0_amount.to_canonical_string())
        .bind(input.token1_amount.to_canonical_string())
        .bind(input.pool_price.to_canonical_string())
        .bind(input.token_value.to_canonical_string())
        .bind(input.delta_cost_basis.to_canonical_string())
        .bind(input.cost_basis_after.to_canonical_string())
        .bind(input.delta_pnl.to_canonical_string())
        .bind(input.pnl_after.to_canonical_string())
        .bind(rewards)
        .bind(input.delta_l.to_canonical_string())
        .bind(input.liquidity_after.to_canonical_string())
        .bind(input.fees_collected0.to_canonical_string())
        .bind(input.fees_collected1.to_canonical_string())
        .bind(input.uncollected_principal0_after.to_canonical_string())
        .bind(input.uncollected_principal1_after.to_canonical_string())
        .bind(input.sqrt_price_x96.to_canonical_string())
        .bind(input.price_degraded)
        .bind(&input.input_hash)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();
        tx.commit().await?;

        Ok(InsertOutcome { id, inserted: true })
    }

    /// Delete the ledger tail: every event of the position at `block >= from_block`.
    ///
    /// # Errors
    /// Returns an error if the delete fails.
    pub async fn delete_ledger_events_from_block(
        &self,
        position_id: i64,
        from_block: u64,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM ledger_events WHERE position_id = ? AND block_number >= ?")
                .bind(position_id)
                .bind(to_db_int(from_block))
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Most recent event of the position by blockchain coordinates.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn get_last_ledger_event(
        &self,
        position_id: i64,
    ) -> Result<Option<LedgerEvent>, sqlx::Error> {
        let mut events = self.query_ledger_events_desc(position_id, Some(1)).await?;
        Ok(events.pop())
    }

    /// All events of the position in replay order (ascending coordinates).
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn query_ledger_events(
        &self,
        position_id: i64,
    ) -> Result<Vec<LedgerEvent>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM ledger_events WHERE position_id = ? \
             ORDER BY block_number ASC, tx_index ASC, log_index ASC",
            LEDGER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(position_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(ledger_event_from_row).collect()
    }

    /// Events of the position newest first, optionally limited.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn query_ledger_events_desc(
        &self,
        position_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<LedgerEvent>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM ledger_events WHERE position_id = ? \
             ORDER BY block_number DESC, tx_index DESC, log_index DESC LIMIT ?",
            LEDGER_COLUMNS
        );
        // SQLite treats a negative LIMIT as unbounded.
        let rows = sqlx::query(&sql)
            .bind(position_id)
            .bind(limit.unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(ledger_event_from_row).collect()
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_ledger_events(&self, position_id: i64) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM ledger_events WHERE position_id = ?")
            .bind(position_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

fn ledger_event_from_row(row: &SqliteRow) -> Result<LedgerEvent, sqlx::Error> {
    let event_type: String = row.try_get("event_type")?;
    let event_type =
        LedgerEventType::from_str(&event_type).map_err(|e| sqlx::Error::ColumnDecode {
            index: "event_type".to_string(),
            source: e.into(),
        })?;
    let rewards: String = row.try_get("rewards")?;
    let rewards: Vec<Reward> =
        serde_json::from_str(&rewards).map_err(|e| sqlx::Error::ColumnDecode {
            index: "rewards".to_string(),
            source: Box::new(e),
        })?;

    Ok(LedgerEvent {
        id: row.try_get("id")?,
        input: LedgerEventInput {
            previous_id: row.try_get("previous_id")?,
            position_id: row.try_get("position_id")?,
            chain_id: from_db_int(row, "chain_id")?,
            nft_id: NftId::new(row.try_get::<String, _>("nft_id")?),
            block_number: from_db_int(row, "block_number")?,
            tx_index: from_db_int(row, "tx_index")?,
            log_index: from_db_int(row, "log_index")?,
            tx_hash: TxHash::new(row.try_get::<String, _>("tx_hash")?),
            block_timestamp: row.try_get("block_timestamp")?,
            event_type,
            token0_amount: amount_column(row, "token0_amount")?,
            token1_amount: amount_column(row, "token1_amount")?,
            pool_price: amount_column(row, "pool_price")?,
            token_value: amount_column(row, "token_value")?,
            delta_cost_basis: amount_column(row, "delta_cost_basis")?,
            cost_basis_after: amount_column(row, "cost_basis_after")?,
            delta_pnl: amount_column(row, "delta_pnl")?,
            pnl_after: amount_column(row, "pnl_after")?,
            rewards,
            delta_l: amount_column(row, "delta_l")?,
            liquidity_after: amount_column(row, "liquidity_after")?,
            fees_collected0: amount_column(row, "fees_collected0")?,
            fees_collected1: amount_column(row, "fees_collected1")?,
            uncollected_principal0_after: amount_column(row, "uncollected_principal0_after")?,
            uncollected_principal1_after: amount_column(row, "uncollected_principal1_after")?,
            sqrt_price_x96: amount_column(row, "sqrt_price_x96")?,
            price_degraded: row.try_get("price_degraded")?,
            input_hash: row.try_get("input_hash")?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::super::tests::{seed_position, setup_test_db};
    use super::*;
    use crate::domain::Amount;

    fn input(position_id: i64, block: u64, tx: u64, log: u64) -> LedgerEventInput {
        let coordinates = EventCoordinates::new(block, tx, log);
        LedgerEventInput {
            previous_id: None,
            position_id,
            chain_id: 1,
            nft_id: NftId::new("42"),
            block_number: block,
            tx_index: tx,
            log_index: log,
            tx_hash: TxHash::new(format!("0x{}", block)),
            block_timestamp: 1_700_000_000 + block as i64,
            event_type: LedgerEventType::Collect,
            token0_amount: Amount::from(5u64),
            token1_amount: Amount::zero(),
            pool_price: Amount::pow10(18),
            token_value: Amount::from(5u64),
            delta_cost_basis: Amount::zero(),
            cost_basis_after: Amount::from(1000u64),
            delta_pnl: Amount::from(-3i64),
            pnl_after: Amount::from(-3i64),
            rewards: vec![Reward {
                token_id: 1,
                token_amount: Amount::from(5u64),
                token_value: Amount::from(5u64),
            }],
            delta_l: Amount::zero(),
            liquidity_after: Amount::from(u128::MAX),
            fees_collected0: Amount::from(5u64),
            fees_collected1: Amount::zero(),
            uncollected_principal0_after: Amount::zero(),
            uncollected_principal1_after: Amount::zero(),
            sqrt_price_x96: Amount::pow2(96),
            price_degraded: false,
            input_hash: coordinates.input_hash(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let (repo, _temp) = setup_test_db().await;
        let (_, position_id) = seed_position(&repo).await;

        let event = input(position_id, 100, 0, 1);
        let outcome = repo.insert_ledger_event(&event).await.expect("insert failed");
        assert!(outcome.inserted);

        let stored = repo.query_ledger_events(position_id).await.expect("query failed");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, outcome.id);
        assert_eq!(stored[0].input, event);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_noop() {
        let (repo, _temp) = setup_test_db().await;
        let (_, position_id) = seed_position(&repo).await;

        let event = input(position_id, 100, 0, 1);
        let first = repo.insert_ledger_event(&event).await.unwrap();
        let second = repo.insert_ledger_event(&event).await.unwrap();
        assert!(!second.inserted);
        assert_eq!(second.id, first.id);
        assert_eq!(repo.count_ledger_events(position_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_insert_rejected() {
        let (repo, _temp) = setup_test_db().await;
        let (_, position_id) = seed_position(&repo).await;

        repo.insert_ledger_event(&input(position_id, 100, 2, 0))
            .await
            .unwrap();
        let err = repo
            .insert_ledger_event(&input(position_id, 100, 1, 5))
            .await
            .unwrap_err();
        match err {
            LedgerError::OrderingViolation {
                attempted, last, ..
            } => {
                assert_eq!(attempted, EventCoordinates::new(100, 1, 5));
                assert_eq!(last, EventCoordinates::new(100, 2, 0));
            }
            other => panic!("expected OrderingViolation, got {:?}", other),
        }

        repo.insert_ledger_event(&input(position_id, 100, 2, 1))
            .await
            .expect("later log in same tx is accepted");
    }

    #[tokio::test]
    async fn test_ordered_reads_and_tail_delete() {
        let (repo, _temp) = setup_test_db().await;
        let (_, position_id) = seed_position(&repo).await;

        for (block, tx, log) in [(10, 0, 0), (10, 1, 0), (20, 0, 3), (30, 0, 0)] {
            repo.insert_ledger_event(&input(position_id, block, tx, log))
                .await
                .unwrap();
        }

        let desc = repo
            .query_ledger_events_desc(position_id, Some(2))
            .await
            .unwrap();
        let coords: Vec<EventCoordinates> = desc.iter().map(|e| e.coordinates()).collect();
        assert_eq!(
            coords,
            vec![EventCoordinates::new(30, 0, 0), EventCoordinates::new(20, 0, 3)]
        );

        let last = repo.get_last_ledger_event(position_id).await.unwrap().unwrap();
        assert_eq!(last.coordinates(), EventCoordinates::new(30, 0, 0));

        let deleted = repo
            .delete_ledger_events_from_block(position_id, 20)
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        let remaining = repo.query_ledger_events(position_id).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[1].coordinates(), EventCoordinates::new(10, 1, 0));
    }

    #[tokio::test]
    async fn test_last_event_of_empty_ledger() {
        let (repo, _temp) = setup_test_db().await;
        let (_, position_id) = seed_position(&repo).await;
        assert!(repo.get_last_ledger_event(position_id).await.unwrap().is_none());
        assert!(repo.query_ledger_events_desc(position_id, None).await.unwrap().is_empty());
    }
}
