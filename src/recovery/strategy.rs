use crate::cache::ProfileCache;
use crate::core::{CacheKey, ProfileChange, ProfileSnapshot, ResourceType, SyncError};
use crate::offline::OfflineQueue;
use crate::optimistic::SnapshotStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, event};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategyKind {
    CacheFallback,
    OfflineQueue,
    DefaultState,
}

impl RecoveryStrategyKind {
    pub const DEFAULT_ORDER: [RecoveryStrategyKind; 3] = [
        RecoveryStrategyKind::CacheFallback,
        RecoveryStrategyKind::OfflineQueue,
        RecoveryStrategyKind::DefaultState,
    ];
}

impl fmt::Display for RecoveryStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CacheFallback => write!(f, "cache_fallback"),
            Self::OfflineQueue => write!(f, "offline_queue"),
            Self::DefaultState => write!(f, "default_state"),
        }
    }
}

impl FromStr for RecoveryStrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "cache_fallback" => Ok(Self::CacheFallback),
            "offline_queue" => Ok(Self::OfflineQueue),
            "default_state" => Ok(Self::DefaultState),
            other => Err(format!("unknown recovery strategy '{other}'")),
        }
    }
}

/// The operation that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryTarget {
    Read { key: CacheKey },
    Mutation { user_id: String, change: ProfileChange },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryContext {
    pub target: RecoveryTarget,
}

impl RecoveryContext {
    pub fn read(key: CacheKey) -> Self {
        Self {
            target: RecoveryTarget::Read { key },
        }
    }

    pub fn mutation(user_id: impl Into<String>, change: ProfileChange) -> Self {
        Self {
            target: RecoveryTarget::Mutation {
                user_id: user_id.into(),
                change,
            },
        }
    }

    /// Key of the resource the failed operation was about.
    pub fn key(&self) -> CacheKey {
        match &self.target {
            RecoveryTarget::Read { key } => key.clone(),
            RecoveryTarget::Mutation { user_id, change } => change.cache_key(user_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// A live cached snapshot was served in place of the failed read.
    ServedFromCache(Arc<ProfileSnapshot>),
    /// The mutation was deferred to the offline queue.
    Queued(Uuid),
    /// The last known-good snapshot was republished to readers and the
    /// caller's transient flags are to be cleared; the error is still
    /// reported.
    StateReset,
    /// No strategy applied.
    Unrecovered,
}

impl RecoveryOutcome {
    /// `true` when the caller can treat the operation as handled.
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::ServedFromCache(_) | Self::Queued(_))
    }
}

/// One step of the recovery chain.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn kind(&self) -> RecoveryStrategyKind;

    fn can_handle(&self, error: &SyncError, context: &RecoveryContext) -> bool;

    /// `None` means the strategy applied but could not help; the chain moves
    /// on to the next one.
    async fn recover(
        &self,
        error: &SyncError,
        context: &RecoveryContext,
    ) -> Option<RecoveryOutcome>;
}

/// Serves a still-live cached profile when a read fails.
pub struct CacheFallbackStrategy {
    profiles: Arc<ProfileCache>,
}

impl CacheFallbackStrategy {
    pub fn new(profiles: Arc<ProfileCache>) -> Self {
        Self { profiles }
    }
}

#[async_trait]
impl RecoveryStrategy for CacheFallbackStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::CacheFallback
    }

    fn can_handle(&self, _error: &SyncError, context: &RecoveryContext) -> bool {
        matches!(
            &context.target,
            RecoveryTarget::Read { key } if key.resource == ResourceType::Profile
        )
    }

    async fn recover(
        &self,
        _error: &SyncError,
        context: &RecoveryContext,
    ) -> Option<RecoveryOutcome> {
        let RecoveryTarget::Read { key } = &context.target else {
            return None;
        };
        self.profiles.peek(key).await.map(RecoveryOutcome::ServedFromCache)
    }
}

/// Defers a failed mutation to the offline queue.
pub struct OfflineQueueStrategy {
    queue: Arc<OfflineQueue>,
}

impl OfflineQueueStrategy {
    pub fn new(queue: Arc<OfflineQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl RecoveryStrategy for OfflineQueueStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::OfflineQueue
    }

    fn can_handle(&self, error: &SyncError, context: &RecoveryContext) -> bool {
        error.is_retryable() && matches!(context.target, RecoveryTarget::Mutation { .. })
    }

    async fn recover(
        &self,
        _error: &SyncError,
        context: &RecoveryContext,
    ) -> Option<RecoveryOutcome> {
        let RecoveryTarget::Mutation { user_id, change } = &context.target else {
            return None;
        };
        match self.queue.enqueue(user_id, change.clone()).await {
            Ok(id) => Some(RecoveryOutcome::Queued(id)),
            Err(err) => {
                event!(
                    Level::WARN,
                    user_id = %user_id,
                    error = %err,
                    "mutation could not be queued"
                );
                None
            }
        }
    }
}

/// Last resort: put the owner's last known-good profile back in front of
/// readers.
pub struct DefaultStateStrategy {
    profiles: Arc<ProfileCache>,
    snapshots: Arc<SnapshotStore>,
}

impl DefaultStateStrategy {
    pub fn new(profiles: Arc<ProfileCache>, snapshots: Arc<SnapshotStore>) -> Self {
        Self { profiles, snapshots }
    }
}

#[async_trait]
impl RecoveryStrategy for DefaultStateStrategy {
    fn kind(&self) -> RecoveryStrategyKind {
        RecoveryStrategyKind::DefaultState
    }

    fn can_handle(&self, _error: &SyncError, _context: &RecoveryContext) -> bool {
        true
    }

    async fn recover(
        &self,
        _error: &SyncError,
        context: &RecoveryContext,
    ) -> Option<RecoveryOutcome> {
        let key = context.key();
        let restored = self.snapshots.reset(&key.owner_id, &self.profiles).await;
        event!(
            Level::DEBUG,
            key = %key,
            version = restored.as_ref().map(|snapshot| snapshot.version),
            "known-good profile republished"
        );
        Some(RecoveryOutcome::StateReset)
    }
}
