// ============================================================================
// Profile Service Collaborator
// ============================================================================
//
// The network/persistence layer lives outside this crate. The core only sees
// this trait; any rejection is a `SyncError` and is routed uniformly.
//
// ============================================================================

pub mod memory;

use crate::core::{
    AvatarUpload, PrivacyPatch, PrivacySettings, ProfilePatch, ProfileSnapshot, Result,
};
use async_trait::async_trait;

pub use memory::InMemoryProfileService;

#[async_trait]
pub trait ProfileService: Send + Sync {
    /// Fetches the stored profile, `Ok(None)` when the user has none.
    async fn get_profile(&self, user_id: &str) -> Result<Option<ProfileSnapshot>>;

    /// Applies `patch` and returns the stored profile with its new version.
    async fn update_profile(&self, user_id: &str, patch: &ProfilePatch) -> Result<ProfileSnapshot>;

    /// Uploads the picked image and returns its public URL.
    async fn upload_avatar(&self, user_id: &str, image: &AvatarUpload) -> Result<String>;

    async fn delete_avatar(&self, user_id: &str) -> Result<()>;

    async fn update_privacy_settings(
        &self,
        user_id: &str,
        patch: &PrivacyPatch,
    ) -> Result<PrivacySettings>;
}
