use super::snapshot::{Accepted, SnapshotStore};
use super::transaction::{MutationId, OptimisticTransaction};
use crate::cache::ProfileCache;
use crate::config::{RetryPolicy, ValidationLimits};
use crate::core::{ProfileChange, ProfileField, ProfileSnapshot, Result, SyncError};
use crate::service::ProfileService;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};

/// Applies mutations to the in-memory profile before the service confirms
/// them, and reverts them when it does not.
///
/// Unrelated mutations are not serialized against each other; see
/// [`SnapshotStore`] for how overlapping ones settle.
pub struct OptimisticCoordinator {
    service: Arc<dyn ProfileService>,
    profile_cache: Arc<ProfileCache>,
    snapshots: Arc<SnapshotStore>,
    limits: ValidationLimits,
    retry: RetryPolicy,
    next_id: AtomicU64,
    in_flight: Mutex<HashMap<MutationId, String>>,
}

impl OptimisticCoordinator {
    pub fn new(
        service: Arc<dyn ProfileService>,
        profile_cache: Arc<ProfileCache>,
        snapshots: Arc<SnapshotStore>,
        limits: ValidationLimits,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            profile_cache,
            snapshots,
            limits,
            retry,
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Applies `change` optimistically, then confirms it remotely.
    ///
    /// On failure the profile is restored before the error is returned.
    /// Validation errors are returned before anything is touched.
    pub async fn apply(
        &self,
        user_id: &str,
        change: &ProfileChange,
    ) -> Result<Arc<ProfileSnapshot>> {
        let id = MutationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let span = info_span!(
            "optimistic.apply",
            mutation_id = %id,
            user_id = %user_id,
            operation = %change.operation_kind()
        );
        self.apply_inner(id, user_id, change).instrument(span).await
    }

    async fn apply_inner(
        &self,
        id: MutationId,
        user_id: &str,
        change: &ProfileChange,
    ) -> Result<Arc<ProfileSnapshot>> {
        if let Err(err) = change.validate(&self.limits) {
            event!(Level::WARN, error = %err, "change rejected before remote call");
            return Err(err);
        }

        let cache = Some(self.profile_cache.as_ref());
        let mut txn = self.snapshots.begin(id, user_id, change, cache).await;
        self.in_flight.lock().await.insert(id, user_id.to_string());
        event!(Level::DEBUG, fields = ?txn.touched(), "optimistic snapshot published");

        let outcome = self.confirm_remote(&txn).await;
        self.in_flight.lock().await.remove(&id);

        match outcome {
            Ok(accepted) => {
                let committed = self.snapshots.commit(&txn, accepted, cache).await;
                txn.mark_committed();
                event!(
                    Level::INFO,
                    version = committed.version,
                    elapsed_ms = txn.duration().as_millis() as u64,
                    "mutation committed"
                );
                Ok(committed)
            }
            Err(err) => {
                self.snapshots.rollback(&txn, cache).await;
                txn.mark_rolled_back();
                event!(Level::WARN, error = %err, "mutation rolled back");
                Err(err)
            }
        }
    }

    async fn confirm_remote(&self, txn: &OptimisticTransaction) -> Result<Accepted> {
        let user_id = txn.user_id();
        match txn.change() {
            ProfileChange::Update(patch) => {
                let server = self.service.update_profile(user_id, patch).await?;
                let base_version = txn.base_version();
                if server.version < base_version {
                    return Err(SyncError::Conflict {
                        expected: base_version,
                        actual: server.version,
                    });
                }
                Ok(Accepted::Snapshot(Arc::new(server)))
            }
            ProfileChange::UploadAvatar(image) => {
                let url = self.service.upload_avatar(user_id, image).await?;
                let mut values = (**txn.optimistic()).clone();
                values.avatar_url = Some(url);
                Ok(Accepted::Fields(values))
            }
            ProfileChange::DeleteAvatar => {
                self.service.delete_avatar(user_id).await?;
                Ok(Accepted::Fields((**txn.optimistic()).clone()))
            }
            ProfileChange::UpdatePrivacy(patch) => {
                let privacy = self.service.update_privacy_settings(user_id, patch).await?;
                let mut values = (**txn.optimistic()).clone();
                values.privacy = privacy;
                Ok(Accepted::Fields(values))
            }
        }
    }

    /// [`apply`](Self::apply) with bounded retries.
    ///
    /// Attempt `n` that fails with a retryable error is followed by a sleep of
    /// `retry.backoff(n)`. Non-retryable errors are returned at once; after the
    /// last attempt the last error is returned.
    pub async fn update_with_retry(
        &self,
        user_id: &str,
        change: &ProfileChange,
    ) -> Result<Arc<ProfileSnapshot>> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.apply(user_id, change).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        event!(
                            Level::WARN,
                            user_id = %user_id,
                            attempts = attempt,
                            error = %err,
                            "mutation retries exhausted"
                        );
                        return Err(err);
                    }
                    let delay = self.retry.backoff(attempt - 1);
                    event!(
                        Level::DEBUG,
                        user_id = %user_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying mutation"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Mutations for `user_id` whose remote call is still outstanding.
    pub async fn pending_transactions(&self, user_id: &str) -> Vec<MutationId> {
        let in_flight = self.in_flight.lock().await;
        let mut ids: Vec<MutationId> = in_flight
            .iter()
            .filter(|(_, owner)| owner.as_str() == user_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    pub async fn is_dirty(&self, user_id: &str, field: ProfileField) -> bool {
        self.snapshots.is_dirty(user_id, field).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AvatarUpload, ProfilePatch, RemoteErrorKind};
    use crate::service::InMemoryProfileService;
    use std::time::Duration;

    fn coordinator(service: Arc<InMemoryProfileService>) -> OptimisticCoordinator {
        OptimisticCoordinator::new(
            service,
            Arc::new(ProfileCache::new("profile", Some(Duration::from_secs(300)), 16)),
            Arc::new(SnapshotStore::new()),
            ValidationLimits::default(),
            RetryPolicy::new(3, Duration::from_millis(100)),
        )
    }

    async fn seeded(
        coordinator: &OptimisticCoordinator,
        service: &InMemoryProfileService,
    ) -> Arc<ProfileSnapshot> {
        let mut profile = ProfileSnapshot::new("u1");
        profile.first_name = Some("Ann".into());
        service.seed(profile.clone()).await;
        coordinator.snapshots().absorb_remote("u1", Arc::new(profile)).await
    }

    #[tokio::test]
    async fn test_apply_commits_server_snapshot() {
        let service = Arc::new(InMemoryProfileService::new());
        let coordinator = coordinator(Arc::clone(&service));
        seeded(&coordinator, &service).await;

        let change = ProfileChange::Update(ProfilePatch::new().bio("hello"));
        let committed = coordinator.apply("u1", &change).await.unwrap();

        assert_eq!(committed.version, 1);
        assert_eq!(committed.bio.as_deref(), Some("hello"));
        assert!(!coordinator.is_dirty("u1", ProfileField::Bio).await);
        assert!(coordinator.pending_transactions("u1").await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_apply_restores_previous_snapshot() {
        let service = Arc::new(InMemoryProfileService::new());
        let coordinator = coordinator(Arc::clone(&service));
        let before = seeded(&coordinator, &service).await;

        service.fail_next(SyncError::remote(RemoteErrorKind::Server, "500")).await;
        let change = ProfileChange::Update(ProfilePatch::new().bio("lost"));
        let err = coordinator.apply("u1", &change).await.unwrap_err();

        assert!(matches!(err, SyncError::Remote { .. }));
        let after = coordinator.snapshots().current("u1").await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
    }

    #[tokio::test]
    async fn test_validation_error_skips_remote() {
        let service = Arc::new(InMemoryProfileService::new());
        let coordinator = coordinator(Arc::clone(&service));
        let before = seeded(&coordinator, &service).await;

        let change = ProfileChange::Update(ProfilePatch::new().first_name(""));
        let err = coordinator.apply("u1", &change).await.unwrap_err();

        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(service.calls().mutations(), 0);
        assert!(Arc::ptr_eq(&before, &coordinator.snapshots().current("u1").await.unwrap()));
    }

    #[tokio::test]
    async fn test_upload_replaces_local_uri_with_server_url() {
        let service = Arc::new(InMemoryProfileService::new());
        let coordinator = coordinator(Arc::clone(&service));
        seeded(&coordinator, &service).await;

        let image = AvatarUpload::new("file:///me.jpg", "image/jpeg", 2048);
        let change = ProfileChange::UploadAvatar(image);
        let committed = coordinator.apply("u1", &change).await.unwrap();

        assert_eq!(
            committed.avatar_url.as_deref(),
            Some("https://cdn.example.com/avatars/u1/1.jpeg")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_with_retry_recovers_after_transient_failures() {
        let service = Arc::new(InMemoryProfileService::new());
        let coordinator = coordinator(Arc::clone(&service));
        seeded(&coordinator, &service).await;

        service.fail_next(SyncError::network("blip")).await;
        service.fail_next(SyncError::network("blip")).await;

        let started = tokio::time::Instant::now();
        let change = ProfileChange::Update(ProfilePatch::new().company("Acme"));
        let committed = coordinator.update_with_retry("u1", &change).await.unwrap();

        assert_eq!(committed.company.as_deref(), Some("Acme"));
        assert_eq!(service.calls().update_profile, 3);
        // 100ms + 200ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_with_retry_surfaces_last_error() {
        let service = Arc::new(InMemoryProfileService::new());
        let coordinator = coordinator(Arc::clone(&service));
        seeded(&coordinator, &service).await;
        service.set_offline(true);

        let change = ProfileChange::Update(ProfilePatch::new().company("Acme"));
        let err = coordinator.update_with_retry("u1", &change).await.unwrap_err();

        assert!(matches!(err, SyncError::Remote { kind: RemoteErrorKind::Network, .. }));
        assert_eq!(service.calls().update_profile, 3);
    }

    #[tokio::test]
    async fn test_update_with_retry_does_not_retry_unauthorized() {
        let service = Arc::new(InMemoryProfileService::new());
        let coordinator = coordinator(Arc::clone(&service));
        seeded(&coordinator, &service).await;
        service
            .fail_next(SyncError::remote(RemoteErrorKind::Unauthorized, "expired"))
            .await;

        let change = ProfileChange::Update(ProfilePatch::new().company("Acme"));
        assert!(coordinator.update_with_retry("u1", &change).await.is_err());
        assert_eq!(service.calls().update_profile, 1);
    }
}
