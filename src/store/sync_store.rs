use super::error_slot::{ErrorSlot, StoreError};
use crate::cache::{CacheManager, CacheStats, ProfileCache};
use crate::completeness::{CompletenessEngine, CompletenessResult, SuggestionPreferences};
use crate::config::SyncConfig;
use crate::core::{
    CacheKey, ProfileChange, ProfileField, ProfileSnapshot, ResourceType, Result, SyncError,
};
use crate::offline::{OfflineQueue, OfflineQueueItem, QueueReport, ReplayStatus};
use crate::optimistic::{OptimisticCoordinator, SnapshotStore};
use crate::recovery::{ErrorRecoveryChain, RecoveryContext, RecoveryOutcome};
use crate::service::ProfileService;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::watch;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

/// Value returned by [`ProfileSyncStore::read`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileResource {
    Profile(Arc<ProfileSnapshot>),
    /// Public URL of the avatar image
    Avatar(String),
}

impl ProfileResource {
    pub fn as_profile(&self) -> Option<&Arc<ProfileSnapshot>> {
        match self {
            Self::Profile(profile) => Some(profile),
            Self::Avatar(_) => None,
        }
    }

    pub fn as_avatar_url(&self) -> Option<&str> {
        match self {
            Self::Avatar(url) => Some(url),
            Self::Profile(_) => None,
        }
    }
}

/// Result of a mutation that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// Confirmed by the service.
    Committed(Arc<ProfileSnapshot>),
    /// Deferred to the offline queue; the optimistic change was reverted and
    /// will be applied again when the queue is flushed.
    Queued(Uuid),
}

impl MutationOutcome {
    pub fn committed(&self) -> Option<&Arc<ProfileSnapshot>> {
        match self {
            Self::Committed(snapshot) => Some(snapshot),
            Self::Queued(_) => None,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

struct LoadingEntry {
    generation: u64,
    count: usize,
}

/// Per-key loading counters.
///
/// A reset starts a new generation for the key; guards taken before it no
/// longer touch the counter when they drop.
#[derive(Default)]
struct LoadingFlags {
    entries: StdMutex<HashMap<CacheKey, LoadingEntry>>,
    next_generation: AtomicU64,
}

impl LoadingFlags {
    fn enter(&self, key: CacheKey) -> LoadingGuard<'_> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(key.clone()).or_insert_with(|| LoadingEntry {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            count: 0,
        });
        entry.count += 1;
        LoadingGuard {
            flags: self,
            key,
            generation: entry.generation,
        }
    }

    fn reset(&self, key: &CacheKey) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

/// Marks a key as loading for as long as it is alive.
struct LoadingGuard<'a> {
    flags: &'a LoadingFlags,
    key: CacheKey,
    generation: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.flags.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&self.key) {
            if entry.generation != self.generation {
                return;
            }
            entry.count -= 1;
            if entry.count == 0 {
                entries.remove(&self.key);
            }
        }
    }
}

/// Session-scoped entry point of the synchronization core.
///
/// One store is created per signed-in session and torn down with
/// [`shutdown`](Self::shutdown) (or [`logout`](Self::logout) for a single
/// user). Nothing in the crate is global.
pub struct ProfileSyncStore {
    config: SyncConfig,
    service: Arc<dyn ProfileService>,
    profiles: Arc<ProfileCache>,
    avatars: Arc<CacheManager<String>>,
    snapshots: Arc<SnapshotStore>,
    coordinator: Arc<OptimisticCoordinator>,
    queue: Arc<OfflineQueue>,
    recovery: ErrorRecoveryChain,
    completeness: CompletenessEngine,
    errors: ErrorSlot,
    loading: LoadingFlags,
}

impl ProfileSyncStore {
    pub fn new(service: Arc<dyn ProfileService>, config: SyncConfig) -> Result<Self> {
        config.validate().map_err(SyncError::Config)?;

        let profiles = Arc::new(ProfileCache::new(
            "profile",
            Some(config.profile_ttl),
            config.cache_capacity,
        ));
        let avatars = Arc::new(CacheManager::new(
            "avatar",
            config.avatar_ttl,
            config.cache_capacity,
        ));
        let snapshots = Arc::new(SnapshotStore::new());
        let coordinator = Arc::new(OptimisticCoordinator::new(
            Arc::clone(&service),
            Arc::clone(&profiles),
            Arc::clone(&snapshots),
            config.validation.clone(),
            config.retry.clone(),
        ));
        let queue = Arc::new(OfflineQueue::new(
            Arc::clone(&coordinator),
            config.queue_max_retries,
            config.queue_capacity,
        ));
        let recovery = ErrorRecoveryChain::from_kinds(
            &config.recovery_strategies,
            Arc::clone(&profiles),
            Arc::clone(&snapshots),
            Arc::clone(&queue),
        );

        event!(
            Level::INFO,
            profile_ttl_secs = config.profile_ttl.as_secs(),
            tier = %config.tier,
            strategies = ?config.recovery_strategies,
            "profile sync store created"
        );

        Ok(Self {
            completeness: CompletenessEngine::new(config.tier),
            config,
            service,
            profiles,
            avatars,
            snapshots,
            coordinator,
            queue,
            recovery,
            errors: ErrorSlot::new(),
            loading: LoadingFlags::default(),
        })
    }

    /// Boosts suggestions in the preferred categories.
    pub fn with_suggestion_preferences(mut self, preferences: SuggestionPreferences) -> Self {
        self.completeness = CompletenessEngine::new(self.config.tier).with_preferences(preferences);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<OptimisticCoordinator> {
        &self.coordinator
    }

    pub fn offline_queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Returns the resource for `key`, served from cache while it is live.
    pub async fn read(&self, key: &CacheKey) -> Result<Option<ProfileResource>> {
        self.load(key, false).await
    }

    /// Like [`read`](Self::read) but always asks the service. Concurrent
    /// refreshes of the same key share one request.
    pub async fn refresh(&self, key: &CacheKey) -> Result<Option<ProfileResource>> {
        self.load(key, true).await
    }

    pub async fn profile(&self, user_id: &str) -> Result<Option<Arc<ProfileSnapshot>>> {
        let resource = self.read(&CacheKey::profile(user_id)).await?;
        Ok(resource.and_then(|resource| resource.as_profile().cloned()))
    }

    pub async fn avatar_url(&self, user_id: &str) -> Result<Option<String>> {
        let resource = self.read(&CacheKey::avatar(user_id)).await?;
        Ok(resource.and_then(|resource| resource.as_avatar_url().map(str::to_string)))
    }

    async fn load(&self, key: &CacheKey, force_refresh: bool) -> Result<Option<ProfileResource>> {
        let span = info_span!("store.read", key = %key, force_refresh);
        async {
            let _loading = self.loading.enter(key.clone());

            let loaded = match key.resource {
                ResourceType::Profile => self
                    .load_profile(key, force_refresh)
                    .await
                    .map(|found| found.map(ProfileResource::Profile)),
                ResourceType::Avatar => self
                    .load_avatar(key, force_refresh)
                    .await
                    .map(|found| found.map(ProfileResource::Avatar)),
            };

            match loaded {
                Ok(resource) => {
                    self.errors.clear_for(key);
                    Ok(resource)
                }
                Err(err) => match self
                    .recovery
                    .recover(&err, &RecoveryContext::read(key.clone()))
                    .await
                {
                    RecoveryOutcome::ServedFromCache(snapshot) => {
                        Ok(Some(ProfileResource::Profile(snapshot)))
                    }
                    RecoveryOutcome::StateReset => {
                        self.reset_state(key, &err);
                        Err(err)
                    }
                    RecoveryOutcome::Queued(_) | RecoveryOutcome::Unrecovered => {
                        self.errors.set(key.clone(), err.clone());
                        Err(err)
                    }
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn load_profile(
        &self,
        key: &CacheKey,
        force_refresh: bool,
    ) -> Result<Option<Arc<ProfileSnapshot>>> {
        let service = Arc::clone(&self.service);
        let user_id = key.owner_id.clone();
        let fetched = self
            .profiles
            .get(key, force_refresh, move || async move {
                service
                    .get_profile(&user_id)
                    .await
                    .map(|found| found.map(Arc::new))
            })
            .await?;

        let Some(remote) = fetched else {
            return Ok(None);
        };

        // Pending optimistic fields win over what the service returned.
        let merged = self
            .snapshots
            .absorb_remote_mirrored(&key.owner_id, remote, &self.profiles)
            .await;
        Ok(Some(merged))
    }

    async fn load_avatar(&self, key: &CacheKey, force_refresh: bool) -> Result<Option<String>> {
        let service = Arc::clone(&self.service);
        let user_id = key.owner_id.clone();
        self.avatars
            .get(key, force_refresh, move || async move {
                service
                    .get_profile(&user_id)
                    .await
                    .map(|found| found.and_then(|profile| profile.avatar_url))
            })
            .await
    }

    /// Last snapshot held for `user_id`, including pending optimistic fields.
    pub async fn snapshot(&self, user_id: &str) -> Option<Arc<ProfileSnapshot>> {
        self.snapshots.current(user_id).await
    }

    pub async fn dirty_fields(&self, user_id: &str) -> Vec<ProfileField> {
        self.snapshots.dirty_fields(user_id).await
    }

    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.loading.contains(key)
    }

    /// Clears the transient state of `key` after the recovery chain put the
    /// last known-good snapshot back, then records `err`.
    fn reset_state(&self, key: &CacheKey, err: &SyncError) {
        self.loading.reset(key);
        self.errors.clear_for(key);
        self.errors.set(key.clone(), err.clone());
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Applies `change` optimistically and confirms it with the service.
    ///
    /// A retryable failure is deferred to the offline queue when the recovery
    /// chain allows it; every other failure is reported through the error
    /// slot and returned.
    pub async fn mutate(&self, user_id: &str, change: ProfileChange) -> Result<MutationOutcome> {
        let result = {
            let _loading = self.loading.enter(change.cache_key(user_id));
            self.coordinator.apply(user_id, &change).await
        };
        self.settle_mutation(user_id, change, result).await
    }

    /// [`mutate`](Self::mutate) with the configured retry policy applied
    /// before recovery kicks in.
    pub async fn mutate_with_retry(
        &self,
        user_id: &str,
        change: ProfileChange,
    ) -> Result<MutationOutcome> {
        let result = {
            let _loading = self.loading.enter(change.cache_key(user_id));
            self.coordinator.update_with_retry(user_id, &change).await
        };
        self.settle_mutation(user_id, change, result).await
    }

    async fn settle_mutation(
        &self,
        user_id: &str,
        change: ProfileChange,
        result: Result<Arc<ProfileSnapshot>>,
    ) -> Result<MutationOutcome> {
        match result {
            Ok(snapshot) => {
                if change.touches_avatar() {
                    self.avatars.invalidate_all().await;
                }
                self.errors.clear_for(&CacheKey::profile(user_id));
                self.errors.clear_for(&CacheKey::avatar(user_id));
                Ok(MutationOutcome::Committed(snapshot))
            }
            Err(err) => {
                let context = RecoveryContext::mutation(user_id, change);
                match self.recovery.recover(&err, &context).await {
                    RecoveryOutcome::Queued(id) => Ok(MutationOutcome::Queued(id)),
                    RecoveryOutcome::StateReset => {
                        self.reset_state(&context.key(), &err);
                        Err(err)
                    }
                    RecoveryOutcome::ServedFromCache(_) | RecoveryOutcome::Unrecovered => {
                        self.errors.set(context.key(), err.clone());
                        Err(err)
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Offline queue
    // ------------------------------------------------------------------

    /// Replays queued mutations once. Call this when connectivity returns.
    ///
    /// Dropped items are reported through the error slot.
    pub async fn flush_offline_queue(&self) -> QueueReport {
        let report = self.queue.process_queue().await;

        let mut avatar_synced = false;
        for record in &report.records {
            match record.status {
                ReplayStatus::Synced => {
                    avatar_synced |= record.key.resource == ResourceType::Avatar;
                    self.errors.clear_for(&record.key);
                }
                ReplayStatus::Exhausted => {
                    let dropped = report.exhausted.iter().find(|err| {
                        matches!(err, SyncError::QueueExhausted { id, .. } if *id == record.id)
                    });
                    if let Some(err) = dropped {
                        self.errors.set(record.key.clone(), err.clone());
                    }
                }
                ReplayStatus::Requeued => {}
            }
        }
        if avatar_synced {
            self.avatars.invalidate_all().await;
        }
        report
    }

    pub async fn queued_mutations(&self, user_id: &str) -> Vec<OfflineQueueItem> {
        self.queue.items_for(user_id).await
    }

    // ------------------------------------------------------------------
    // Completeness
    // ------------------------------------------------------------------

    pub fn get_completeness(&self, profile: &ProfileSnapshot) -> CompletenessResult {
        self.completeness.calculate(profile, None)
    }

    /// Scores the current profile of `user_id`, loading it if needed.
    pub async fn completeness_for(&self, user_id: &str) -> Result<Option<CompletenessResult>> {
        let profile = self.profile(user_id).await?;
        Ok(profile.map(|profile| self.get_completeness(&profile)))
    }

    // ------------------------------------------------------------------
    // Error slot
    // ------------------------------------------------------------------

    pub fn last_error(&self) -> Option<StoreError> {
        self.errors.current()
    }

    pub fn subscribe_errors(&self) -> watch::Receiver<Option<StoreError>> {
        self.errors.subscribe()
    }

    pub fn clear_error(&self) {
        self.errors.clear();
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn cache_stats(&self) -> (CacheStats, CacheStats) {
        (self.profiles.stats().await, self.avatars.stats().await)
    }

    /// Drops everything held for `user_id`: cached entries, snapshots and
    /// queued mutations.
    pub async fn logout(&self, user_id: &str) {
        self.queue.clear_user(user_id).await;
        self.profiles.invalidate_owner(user_id).await;
        self.avatars.invalidate_owner(user_id).await;
        self.snapshots.remove_user(user_id).await;
        self.errors.clear_owner(user_id);
        event!(Level::INFO, user_id = %user_id, "user state cleared");
    }

    /// Clears all session state.
    pub async fn shutdown(&self) {
        self.queue.clear().await;
        self.profiles.invalidate_all().await;
        self.avatars.invalidate_all().await;
        self.snapshots.clear().await;
        self.errors.clear();
        event!(Level::INFO, "profile sync store shut down");
    }
}
