use crate::datasource::DataSourceError;
use crate::domain::EventCoordinates;
use crate::engine::ProcessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Position, pool or token missing. Not retried.
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unsupported chain: {0}")]
    UnsupportedChain(u64),
    /// A new event precedes the last persisted event of the position.
    #[error("Ordering violation for position {position_id}: {attempted} is not after {last}")]
    OrderingViolation {
        position_id: i64,
        attempted: EventCoordinates,
        last: EventCoordinates,
    },
    /// Upstream data that cannot be applied (negative liquidity and the like).
    #[error("State invariant violated: {0}")]
    StateInvariant(String),
    #[error("Division error: {0}")]
    Division(String),
    #[error("Provider error: {0}")]
    TransientProvider(#[from] DataSourceError),
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ProcessError> for LedgerError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::InvalidState(msg) => LedgerError::StateInvariant(msg),
            ProcessError::Division(msg) => LedgerError::Division(msg),
        }
    }
}
