use super::ProfileService;
use crate::core::{
    AvatarUpload, PrivacyPatch, PrivacySettings, ProfilePatch, ProfileSnapshot, Result, SyncError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct CallCounters {
    get_profile: AtomicUsize,
    update_profile: AtomicUsize,
    upload_avatar: AtomicUsize,
    delete_avatar: AtomicUsize,
    update_privacy: AtomicUsize,
}

/// Number of calls each service operation received (including failed ones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceCalls {
    pub get_profile: usize,
    pub update_profile: usize,
    pub upload_avatar: usize,
    pub delete_avatar: usize,
    pub update_privacy: usize,
}

impl ServiceCalls {
    pub fn mutations(&self) -> usize {
        self.update_profile + self.upload_avatar + self.delete_avatar + self.update_privacy
    }
}

/// Profile service backed by a map, with switches for latency, connectivity
/// and scripted failures.
///
/// Every mutation bumps the stored version and `updated_at`, the way a real
/// backend would.
#[derive(Default)]
pub struct InMemoryProfileService {
    profiles: RwLock<HashMap<String, ProfileSnapshot>>,
    latency_ms: AtomicU64,
    offline: AtomicBool,
    scripted_failures: Mutex<VecDeque<SyncError>>,
    calls: CallCounters,
}

impl InMemoryProfileService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: impl IntoIterator<Item = ProfileSnapshot>) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|profile| (profile.user_id.clone(), profile))
            .collect();
        Self {
            profiles: RwLock::new(profiles),
            ..Self::default()
        }
    }

    /// Delay applied to every call before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        let millis = latency.as_millis().min(u64::MAX as u128) as u64;
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Makes the next call (of any kind) fail with `error`.
    pub async fn fail_next(&self, error: SyncError) {
        self.scripted_failures.lock().await.push_back(error);
    }

    pub async fn seed(&self, profile: ProfileSnapshot) {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile);
    }

    /// Server-side state for `user_id`.
    pub async fn stored(&self, user_id: &str) -> Option<ProfileSnapshot> {
        self.profiles.read().await.get(user_id).cloned()
    }

    pub fn calls(&self) -> ServiceCalls {
        ServiceCalls {
            get_profile: self.calls.get_profile.load(Ordering::SeqCst),
            update_profile: self.calls.update_profile.load(Ordering::SeqCst),
            upload_avatar: self.calls.upload_avatar.load(Ordering::SeqCst),
            delete_avatar: self.calls.delete_avatar.load(Ordering::SeqCst),
            update_privacy: self.calls.update_privacy.load(Ordering::SeqCst),
        }
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.is_offline() {
            return Err(SyncError::network("profile service unreachable"));
        }
        if let Some(error) = self.scripted_failures.lock().await.pop_front() {
            return Err(error);
        }
        Ok(())
    }

    /// Runs `mutate` on the stored profile (created empty if missing) and
    /// bumps its version.
    async fn mutate_stored<R>(
        &self,
        user_id: &str,
        mutate: impl FnOnce(&mut ProfileSnapshot) -> R,
    ) -> (ProfileSnapshot, R) {
        let mut profiles = self.profiles.write().await;
        let stored = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| ProfileSnapshot::new(user_id));
        let result = mutate(stored);
        stored.version += 1;
        stored.updated_at = Utc::now();
        (stored.clone(), result)
    }
}

#[async_trait]
impl ProfileService for InMemoryProfileService {
    async fn get_profile(&self, user_id: &str) -> Result<Option<ProfileSnapshot>> {
        self.enter(&self.calls.get_profile).await?;
        Ok(self.stored(user_id).await)
    }

    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> Result<ProfileSnapshot> {
        self.enter(&self.calls.update_profile).await?;

        if let Some(expected) = patch.expected_version {
            let actual = self
                .profiles
                .read()
                .await
                .get(user_id)
                .map(|profile| profile.version)
                .unwrap_or(0);
            if actual != expected {
                return Err(SyncError::Conflict { expected, actual });
            }
        }

        let (stored, ()) = self
            .mutate_stored(user_id, |profile| *profile = patch.apply_to(profile))
            .await;
        Ok(stored)
    }

    async fn upload_avatar(&self, user_id: &str, image: &AvatarUpload) -> Result<String> {
        self.enter(&self.calls.upload_avatar).await?;

        let extension = image.mime_type.trim_start_matches("image/").to_string();
        let (_, url) = self
            .mutate_stored(user_id, |profile| {
                let url = format!(
                    "https://cdn.example.com/avatars/{}/{}.{}",
                    user_id,
                    profile.version + 1,
                    extension
                );
                profile.avatar_url = Some(url.clone());
                url
            })
            .await;
        Ok(url)
    }

    async fn delete_avatar(&self, user_id: &str) -> Result<()> {
        self.enter(&self.calls.delete_avatar).await?;
        self.mutate_stored(user_id, |profile| profile.avatar_url = None)
            .await;
        Ok(())
    }

    async fn update_privacy_settings(
        &self,
        user_id: &str,
        patch: &PrivacyPatch,
    ) -> Result<PrivacySettings> {
        self.enter(&self.calls.update_privacy).await?;
        let (stored, ()) = self
            .mutate_stored(user_id, |profile| profile.privacy = patch.apply_to(&profile.privacy))
            .await;
        Ok(stored.privacy)
    }
}
