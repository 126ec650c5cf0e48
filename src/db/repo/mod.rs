//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `ledger.rs` - Ledger event append, tail deletion and ordered reads
//! - `positions.rs` - Token, pool and position records

mod ledger;
mod positions;

pub use ledger::InsertOutcome;

use crate::domain::Amount;
use crate::error::LedgerError;
use crate::sync::SyncState;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Sync state operations
    // =========================================================================

    /// Store the sync state of a position, replacing any previous one.
    ///
    /// # Errors
    /// Returns an error if serialization or the upsert fails.
    pub async fn save_sync_state(&self, state: &SyncState) -> Result<(), LedgerError> {
        let json = serde_json::to_string(state)?;

        sqlx::query(
            r#"
            INSERT INTO sync_states (position_id, state_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(position_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.position_id)
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the sync state of a position, or a fresh one if none is stored.
    ///
    /// # Errors
    /// Returns an error if the query fails or the stored JSON is corrupt.
    pub async fn load_sync_state(&self, position_id: i64) -> Result<SyncState, LedgerError> {
        let row = sqlx::query("SELECT state_json FROM sync_states WHERE position_id = ?")
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(SyncState::new(position_id)),
            Some(row) => {
                let json: String = row.get("state_json");
                Ok(serde_json::from_str(&json)?)
            }
        }
    }
}

/// Read a canonical decimal TEXT column as an `Amount`.
pub(crate) fn amount_column(row: &SqliteRow, column: &str) -> Result<Amount, sqlx::Error> {
    let text: String = row.try_get(column)?;
    Amount::from_str_canonical(&text).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

/// Block numbers and indices are stored as SQLite INTEGER (i64).
pub(crate) fn to_db_int(value: u64) -> i64 {
    value as i64
}

pub(crate) fn from_db_int(row: &SqliteRow, column: &str) -> Result<u64, sqlx::Error> {
    let value: i64 = row.try_get(column)?;
    u64::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
