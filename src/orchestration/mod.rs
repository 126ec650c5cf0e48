//! Per-position workflows: ledger sync, position creation and reconciliation.

pub mod ledger_sync;
pub mod positions;
pub mod reconciler;

pub use ledger_sync::{LedgerSync, LedgerSyncDeps, SyncMode, SyncPhase, SyncResult};
pub use positions::CreatePosition;
pub use reconciler::{PositionReconciler, RefreshOutcome};
