pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod export;
pub mod orchestration;
pub mod sync;

pub use config::Config;
pub use datasource::{DataSourceError, MockDataSource};
pub use db::{init_db, Repository};
pub use domain::{
    Address, Amount, BlockchainEventType, EventCoordinates, LedgerEvent, LedgerEventType, NftId,
    RawEvent, TxHash,
};
pub use error::LedgerError;
pub use orchestration::{LedgerSync, PositionReconciler, SyncMode, SyncResult};
pub use sync::{MissingEvent, SyncState};
