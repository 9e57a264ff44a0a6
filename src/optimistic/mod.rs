// ============================================================================
// Optimistic Update Module
// ============================================================================
//
// Mutations are shown to readers before the service confirms them:
//
// - State Pattern: `OptimisticTransaction` (Pending, Committed, RolledBack)
// - Copy-on-Write: snapshots are immutable `Arc`s, rollback swaps them back
// - Field ownership: overlapping mutations settle per field
//
// ============================================================================

pub mod coordinator;
pub mod snapshot;
pub mod transaction;

pub use coordinator::OptimisticCoordinator;
pub use snapshot::{Accepted, SnapshotStore};
pub use transaction::{MutationId, OptimisticTransaction, TransactionState};
