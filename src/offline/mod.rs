// ============================================================================
// Offline Queue Module
// ============================================================================
//
// Deferred mutations with bounded replays. Items are added by the recovery
// chain and replayed when the caller decides connectivity is back.
//
// ============================================================================

pub mod item;
pub mod queue;

pub use item::{OfflineQueueItem, ReplayStatus};
pub use queue::{OfflineQueue, QueueReport, ReplayRecord};
