// ============================================================================
// Cache Module
// ============================================================================
//
// TTL cache tables keyed by `(resource, owner)` with single-flight fetches.
//
// ============================================================================

pub mod entry;
pub mod manager;

pub use entry::CacheEntry;
pub use manager::{CacheManager, CacheStats};

use crate::core::ProfileSnapshot;
use std::sync::Arc;

/// Cache table holding profile snapshots.
pub type ProfileCache = CacheManager<Arc<ProfileSnapshot>>;
