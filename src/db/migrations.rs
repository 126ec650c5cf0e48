//! Ledger database bootstrap: connection options and the versioned schema.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Bumped whenever schema.sql changes shape.
pub const SCHEMA_VERSION: i64 = 1;

/// Open (creating if needed) the ledger database at `db_path` and bring its
/// schema up to [`SCHEMA_VERSION`].
///
/// Foreign keys are enabled on every connection; deleting a position relies
/// on them to cascade into its ledger events and sync state.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(dir) = Path::new(db_path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(sqlx::Error::Io)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let version = migrate(&pool).await?;
    info!(db_path, schema_version = version, "ledger database ready");
    Ok(pool)
}

async fn schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Apply schema.sql in one transaction when the stored version is behind.
async fn migrate(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let current = schema_version(pool).await?;
    if current >= SCHEMA_VERSION {
        debug!(current, "schema up to date");
        return Ok(current);
    }

    let mut tx = pool.begin().await?;
    for statement in include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    // PRAGMA does not accept bound parameters.
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(from = current, to = SCHEMA_VERSION, "schema migrated");
    Ok(SCHEMA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db_path(dir: &TempDir) -> String {
        dir.path()
            .join("nested")
            .join("ledger.db")
            .to_string_lossy()
            .to_string()
    }

    #[tokio::test]
    async fn test_init_db_creates_file_and_tables() {
        let temp_dir = TempDir::new().unwrap();
        let path = db_path(&temp_dir);
        let pool = init_db(&path).await.expect("init_db failed");
        assert!(Path::new(&path).exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            vec!["ledger_events", "pools", "positions", "sync_states", "tokens"]
        );
        assert_eq!(schema_version(&pool).await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data_and_skips_migration() {
        let temp_dir = TempDir::new().unwrap();
        let path = db_path(&temp_dir);

        let pool = init_db(&path).await.unwrap();
        sqlx::query("INSERT INTO tokens (chain_id, address, symbol, decimals) VALUES (1, '0xa', 'A', 18)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let pool = init_db(&path).await.unwrap();
        assert_eq!(migrate(&pool).await.unwrap(), SCHEMA_VERSION);
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tokens")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced_on_every_connection() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(&db_path(&temp_dir)).await.unwrap();

        for _ in 0..3 {
            let mut conn = pool.acquire().await.unwrap();
            let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
                .fetch_one(&mut *conn)
                .await
                .unwrap();
            assert_eq!(enabled, 1);
        }

        let orphan = sqlx::query(
            "INSERT INTO pools (chain_id, address, token0_id, token1_id, fee, quote_token) \
             VALUES (1, '0xpool', 98, 99, 500, 'token1')",
        )
        .execute(&pool)
        .await;
        assert!(orphan.is_err());
    }
}
