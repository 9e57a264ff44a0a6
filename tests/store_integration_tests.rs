/// Store integration tests
///
/// End-to-end session flows through `ProfileSyncStore`
/// Run with: cargo test --test store_integration_tests

use profile_sync::completeness::ProfileTier;
use profile_sync::config::RetryPolicy;
use profile_sync::core::{
    CacheKey, PrivacyPatch, ProfileChange, ProfileField, ProfilePatch, ProfileSnapshot,
    ProfileVisibility, SyncError,
};
use profile_sync::{
    InMemoryProfileService, MutationOutcome, ProfileResource, ProfileService, ProfileSyncStore,
    SyncConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn seeded_service() -> Arc<InMemoryProfileService> {
    let mut profile = ProfileSnapshot::new("u1");
    profile.first_name = Some("Ann".into());
    profile.last_name = Some("Lee".into());
    Arc::new(InMemoryProfileService::with_profiles([
        profile,
        ProfileSnapshot::new("u2"),
    ]))
}

fn store(service: &Arc<InMemoryProfileService>, config: SyncConfig) -> Arc<ProfileSyncStore> {
    let backend: Arc<dyn ProfileService> = service.clone();
    Arc::new(ProfileSyncStore::new(backend, config).unwrap())
}

#[tokio::test]
async fn test_session_edit_flow_updates_completeness() {
    let service = seeded_service();
    let store = store(&service, SyncConfig::default());

    let before = store.completeness_for("u1").await.unwrap().unwrap();
    assert_eq!(before.percentage, 20);

    let patch = ProfilePatch::new()
        .email("ann@example.com")
        .bio("Backend engineer focused on storage engines and sync protocols.")
        .skills(["rust", "postgres", "tokio"]);
    let outcome = store.mutate("u1", ProfileChange::Update(patch)).await.unwrap();
    let committed = outcome.committed().unwrap();
    assert_eq!(committed.version, 1);

    let after = store.completeness_for("u1").await.unwrap().unwrap();
    assert!(after.percentage > before.percentage);
    assert!(after.completed_fields.contains(&ProfileField::Bio));
    assert!(after.completed_fields.contains(&ProfileField::Skills));
    assert_eq!(service.calls().get_profile, 1);
}

#[tokio::test]
async fn test_reads_during_mutation_see_optimistic_value() {
    let service = seeded_service();
    let store = store(&service, SyncConfig::default());
    store.profile("u1").await.unwrap();
    service.set_latency(Duration::from_millis(50));

    let task = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .mutate("u1", ProfileChange::Update(ProfilePatch::new().company("Acme")))
                .await
        })
    };
    while store.dirty_fields("u1").await.is_empty() {
        tokio::task::yield_now().await;
    }

    assert!(store.is_loading(&CacheKey::profile("u1")));
    let during = store.profile("u1").await.unwrap().unwrap();
    assert_eq!(during.company.as_deref(), Some("Acme"));

    assert_ok!(task.await.unwrap());
    assert!(!store.is_loading(&CacheKey::profile("u1")));
    assert!(store.dirty_fields("u1").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_mutate_with_retry_recovers_from_transient_failures() {
    let service = seeded_service();
    let config = SyncConfig::new().retry(RetryPolicy::new(4, Duration::from_millis(250)));
    let store = store(&service, config);

    service.fail_next(SyncError::network("flaky")).await;
    service.fail_next(SyncError::network("flaky")).await;

    let change = ProfileChange::Update(ProfilePatch::new().job_title("Staff Engineer"));
    let outcome = store.mutate_with_retry("u1", change).await.unwrap();

    assert!(matches!(outcome, MutationOutcome::Committed(_)));
    assert_eq!(service.calls().update_profile, 3);
    assert!(store.offline_queue().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_mutate_with_retry_queues_after_last_attempt() {
    let service = seeded_service();
    let config = SyncConfig::new().retry(RetryPolicy::new(2, Duration::from_millis(100)));
    let store = store(&service, config);
    service.set_offline(true);

    let change = ProfileChange::Update(ProfilePatch::new().job_title("Staff Engineer"));
    let outcome = store.mutate_with_retry("u1", change).await.unwrap();

    assert!(outcome.is_queued());
    assert_eq!(service.calls().update_profile, 2);
}

#[tokio::test]
async fn test_privacy_and_avatar_changes() {
    let service = seeded_service();
    let store = store(&service, SyncConfig::default());

    let privacy = PrivacyPatch {
        profile_visibility: Some(ProfileVisibility::Connections),
        show_email: Some(true),
        ..PrivacyPatch::default()
    };
    let outcome = store
        .mutate("u1", ProfileChange::UpdatePrivacy(privacy))
        .await
        .unwrap();
    let committed = outcome.committed().unwrap();
    assert_eq!(committed.privacy.profile_visibility, ProfileVisibility::Connections);
    assert!(committed.privacy.show_email);

    let upload = profile_sync::AvatarUpload::new("file:///me.webp", "image/webp", 2048);
    store.mutate("u1", ProfileChange::UploadAvatar(upload)).await.unwrap();
    let url = store.avatar_url("u1").await.unwrap().unwrap();
    assert!(url.ends_with(".webp"));

    store.mutate("u1", ProfileChange::DeleteAvatar).await.unwrap();
    assert_eq!(store.avatar_url("u1").await.unwrap(), None);
    assert_eq!(store.snapshot("u1").await.unwrap().avatar_url, None);
}

#[tokio::test]
async fn test_read_dispatches_on_resource_type() {
    let service = seeded_service();
    let store = store(&service, SyncConfig::default());

    let profile = store.read(&CacheKey::profile("u1")).await.unwrap().unwrap();
    assert!(matches!(profile, ProfileResource::Profile(ref p) if p.user_id == "u1"));

    let avatar = store.read(&CacheKey::avatar("u1")).await.unwrap();
    assert_eq!(avatar, None);
}

#[tokio::test]
async fn test_logout_keeps_other_users() {
    let service = seeded_service();
    let store = store(&service, SyncConfig::default());
    store.profile("u1").await.unwrap();
    store.profile("u2").await.unwrap();

    store.logout("u1").await;

    assert!(store.snapshot("u1").await.is_none());
    assert!(store.snapshot("u2").await.is_some());
    store.profile("u1").await.unwrap();
    assert_eq!(service.calls().get_profile, 3);
}

#[tokio::test]
async fn test_shutdown_clears_session_state() {
    let service = seeded_service();
    let store = store(&service, SyncConfig::new().tier(ProfileTier::Enterprise));
    store.profile("u1").await.unwrap();
    service.set_offline(true);
    store
        .mutate("u1", ProfileChange::Update(ProfilePatch::new().bio("queued")))
        .await
        .unwrap();
    assert!(store.read(&CacheKey::avatar("u1")).await.is_err());

    store.shutdown().await;

    assert!(store.offline_queue().is_empty().await);
    assert!(store.snapshot("u1").await.is_none());
    assert!(store.last_error().is_none());
    let (profiles, avatars) = store.cache_stats().await;
    assert_eq!(profiles.entries + avatars.entries, 0);
}
