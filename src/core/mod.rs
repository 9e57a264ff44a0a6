pub mod change;
pub mod error;
pub mod types;

pub use change::{AvatarUpload, OperationKind, PrivacyPatch, ProfileChange, ProfilePatch};
pub use error::{RemoteErrorKind, Result, SyncError};
pub use types::{
    CacheKey, PrivacySettings, ProfileField, ProfileSnapshot, ProfileVisibility, ResourceType,
};
