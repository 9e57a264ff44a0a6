// ============================================================================
// profile-sync Library
// ============================================================================
//
// Client-side synchronization core for user profiles:
//
// - `cache`        TTL cache tables with single-flight fetches
// - `completeness` weighted completion score and suggestions
// - `optimistic`   optimistic mutations with rollback and retries
// - `offline`      deferred mutations with bounded replays
// - `recovery`     ordered recovery strategies for failed operations
// - `store`        the session facade tying them together
//
// The network layer is reached only through `service::ProfileService`.
//
// ============================================================================

pub mod cache;
pub mod completeness;
pub mod config;
pub mod core;
pub mod offline;
pub mod optimistic;
pub mod recovery;
pub mod service;
pub mod store;

pub use cache::{CacheManager, CacheStats};
pub use completeness::{CompletenessEngine, CompletenessResult, ProfileTier, Suggestion};
pub use config::{RetryPolicy, SyncConfig, ValidationLimits};
pub use core::{
    AvatarUpload, CacheKey, PrivacyPatch, ProfileChange, ProfileField, ProfilePatch,
    ProfileSnapshot, Result, SyncError,
};
pub use offline::{OfflineQueue, OfflineQueueItem, QueueReport};
pub use optimistic::OptimisticCoordinator;
pub use recovery::{ErrorRecoveryChain, RecoveryOutcome, RecoveryStrategyKind};
pub use service::{InMemoryProfileService, ProfileService};
pub use store::{MutationOutcome, ProfileResource, ProfileSyncStore, StoreError};
