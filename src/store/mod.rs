// ============================================================================
// Profile Sync Store
// ============================================================================
//
// Session facade over the cache tables, the optimistic coordinator, the
// offline queue, the recovery chain and the completeness engine.
//
// ============================================================================

mod error_slot;
mod sync_store;

pub use error_slot::StoreError;
pub use sync_store::{MutationOutcome, ProfileResource, ProfileSyncStore};
