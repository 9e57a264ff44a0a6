// ============================================================================
// Profile Changes
// ============================================================================
//
// A `ProfileChange` is the unit that flows through the optimistic
// coordinator and the offline queue. It knows which fields it touches, how to
// project itself onto a snapshot, and how to validate itself before any
// remote call is made.
//
// ============================================================================

use super::{CacheKey, ProfileField, ProfileSnapshot, ProfileVisibility, PrivacySettings};
use super::{Result, SyncError};
use crate::config::ValidationLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Partial update of the editable profile fields.
///
/// `Some("")` (or whitespace only) clears an optional field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub skills: Option<Vec<String>>,
    pub social_links: Option<BTreeMap<String, String>>,
    pub custom_fields: Option<BTreeMap<String, String>>,
    /// Version the patch was computed against. The service rejects the patch
    /// with a conflict when its stored version differs.
    pub expected_version: Option<u64>,
}

impl ProfilePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_name(mut self, value: impl Into<String>) -> Self {
        self.first_name = Some(value.into());
        self
    }

    pub fn last_name(mut self, value: impl Into<String>) -> Self {
        self.last_name = Some(value.into());
        self
    }

    pub fn email(mut self, value: impl Into<String>) -> Self {
        self.email = Some(value.into());
        self
    }

    pub fn bio(mut self, value: impl Into<String>) -> Self {
        self.bio = Some(value.into());
        self
    }

    pub fn company(mut self, value: impl Into<String>) -> Self {
        self.company = Some(value.into());
        self
    }

    pub fn job_title(mut self, value: impl Into<String>) -> Self {
        self.job_title = Some(value.into());
        self
    }

    pub fn location(mut self, value: impl Into<String>) -> Self {
        self.location = Some(value.into());
        self
    }

    pub fn skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills = Some(skills.into_iter().map(Into::into).collect());
        self
    }

    pub fn social_link(mut self, network: impl Into<String>, url: impl Into<String>) -> Self {
        self.social_links
            .get_or_insert_with(BTreeMap::new)
            .insert(network.into(), url.into());
        self
    }

    pub fn custom_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    pub fn touched_fields(&self) -> Vec<ProfileField> {
        let candidates = [
            (self.first_name.is_some(), ProfileField::FirstName),
            (self.last_name.is_some(), ProfileField::LastName),
            (self.display_name.is_some(), ProfileField::DisplayName),
            (self.email.is_some(), ProfileField::Email),
            (self.phone.is_some(), ProfileField::Phone),
            (self.location.is_some(), ProfileField::Location),
            (self.website.is_some(), ProfileField::Website),
            (self.bio.is_some(), ProfileField::Bio),
            (self.company.is_some(), ProfileField::Company),
            (self.job_title.is_some(), ProfileField::JobTitle),
            (self.skills.is_some(), ProfileField::Skills),
            (self.social_links.is_some(), ProfileField::SocialLinks),
            (self.custom_fields.is_some(), ProfileField::CustomFields),
        ];
        candidates
            .into_iter()
            .filter_map(|(present, field)| present.then_some(field))
            .collect()
    }

    /// Projects the patch onto `base`, producing the next snapshot.
    ///
    /// `version` and `updated_at` are left alone; only the service assigns
    /// those.
    pub fn apply_to(&self, base: &ProfileSnapshot) -> ProfileSnapshot {
        let mut next = base.clone();
        assign_text(&mut next.first_name, &self.first_name);
        assign_text(&mut next.last_name, &self.last_name);
        assign_text(&mut next.display_name, &self.display_name);
        assign_text(&mut next.email, &self.email);
        assign_text(&mut next.phone, &self.phone);
        assign_text(&mut next.location, &self.location);
        assign_text(&mut next.website, &self.website);
        assign_text(&mut next.bio, &self.bio);
        assign_text(&mut next.company, &self.company);
        assign_text(&mut next.job_title, &self.job_title);

        if let Some(skills) = &self.skills {
            next.skills = skills.iter().map(|skill| skill.trim().to_string()).collect();
        }
        if let Some(links) = &self.social_links {
            next.social_links = links
                .iter()
                .filter(|(_, url)| !url.trim().is_empty())
                .map(|(network, url)| (network.clone(), url.trim().to_string()))
                .collect();
        }
        if let Some(fields) = &self.custom_fields {
            next.custom_fields = fields
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
        }
        next
    }

    pub fn validate(&self, limits: &ValidationLimits) -> Result<()> {
        if self.is_empty() {
            return Err(SyncError::Validation("patch does not change any field".into()));
        }

        for (value, field) in [
            (&self.first_name, ProfileField::FirstName),
            (&self.last_name, ProfileField::LastName),
        ] {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    return Err(SyncError::Validation(format!("{field} is required")));
                }
            }
        }

        if let Some(email) = self.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            if !looks_like_email(email) {
                return Err(SyncError::Validation(format!("invalid email '{email}'")));
            }
        }

        if let Some(website) = self.website.as_deref().map(str::trim).filter(|w| !w.is_empty()) {
            if !(website.starts_with("https://") || website.starts_with("http://")) {
                return Err(SyncError::Validation(format!(
                    "website must be an http(s) URL, got '{website}'"
                )));
            }
        }

        if let Some(bio) = &self.bio {
            let length = bio.trim().chars().count();
            if length > limits.max_bio_chars {
                return Err(SyncError::Validation(format!(
                    "bio is {length} characters, limit is {}",
                    limits.max_bio_chars
                )));
            }
        }

        if let Some(skills) = &self.skills {
            if skills.len() > limits.max_skills {
                return Err(SyncError::Validation(format!(
                    "{} skills given, limit is {}",
                    skills.len(),
                    limits.max_skills
                )));
            }
            if skills.iter().any(|skill| skill.trim().is_empty()) {
                return Err(SyncError::Validation("skills cannot contain blank entries".into()));
            }
        }

        if let Some(fields) = &self.custom_fields {
            if fields.keys().any(|key| key.trim().is_empty()) {
                return Err(SyncError::Validation("custom field keys cannot be blank".into()));
            }
        }

        Ok(())
    }
}

fn assign_text(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        let trimmed = value.trim();
        *target = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.contains('.')
        && !email.contains(char::is_whitespace)
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacyPatch {
    pub profile_visibility: Option<ProfileVisibility>,
    pub show_email: Option<bool>,
    pub show_phone: Option<bool>,
    pub show_location: Option<bool>,
    pub searchable: Option<bool>,
}

impl PrivacyPatch {
    pub fn is_empty(&self) -> bool {
        self.profile_visibility.is_none()
            && self.show_email.is_none()
            && self.show_phone.is_none()
            && self.show_location.is_none()
            && self.searchable.is_none()
    }

    pub fn apply_to(&self, base: &PrivacySettings) -> PrivacySettings {
        PrivacySettings {
            profile_visibility: self.profile_visibility.unwrap_or(base.profile_visibility),
            show_email: self.show_email.unwrap_or(base.show_email),
            show_phone: self.show_phone.unwrap_or(base.show_phone),
            show_location: self.show_location.unwrap_or(base.show_location),
            searchable: self.searchable.unwrap_or(base.searchable),
        }
    }
}

/// A picked image that has not been uploaded yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarUpload {
    /// Device-local URI, shown optimistically until the upload settles.
    pub local_uri: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl AvatarUpload {
    pub fn new(
        local_uri: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            local_uri: local_uri.into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    pub fn validate(&self, limits: &ValidationLimits) -> Result<()> {
        if self.local_uri.trim().is_empty() {
            return Err(SyncError::Validation("avatar URI is empty".into()));
        }
        if !self.mime_type.starts_with("image/") {
            return Err(SyncError::Validation(format!(
                "avatar must be an image, got '{}'",
                self.mime_type
            )));
        }
        if self.size_bytes == 0 || self.size_bytes > limits.max_avatar_bytes {
            return Err(SyncError::Validation(format!(
                "avatar size {} bytes outside 1..={}",
                self.size_bytes, limits.max_avatar_bytes
            )));
        }
        Ok(())
    }
}

/// Coarse operation class recorded on offline queue items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Update,
    Create,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => write!(f, "update"),
            Self::Create => write!(f, "create"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A mutation requested by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ProfileChange {
    Update(ProfilePatch),
    UploadAvatar(AvatarUpload),
    DeleteAvatar,
    UpdatePrivacy(PrivacyPatch),
}

impl ProfileChange {
    pub fn operation_kind(&self) -> OperationKind {
        match self {
            Self::Update(_) | Self::UpdatePrivacy(_) => OperationKind::Update,
            Self::UploadAvatar(_) => OperationKind::Create,
            Self::DeleteAvatar => OperationKind::Delete,
        }
    }

    pub fn touched_fields(&self) -> Vec<ProfileField> {
        match self {
            Self::Update(patch) => patch.touched_fields(),
            Self::UploadAvatar(_) | Self::DeleteAvatar => vec![ProfileField::Avatar],
            Self::UpdatePrivacy(_) => vec![ProfileField::Privacy],
        }
    }

    pub fn touches_avatar(&self) -> bool {
        matches!(self, Self::UploadAvatar(_) | Self::DeleteAvatar)
    }

    /// Key under which loading state and errors for this change are tracked.
    pub fn cache_key(&self, user_id: &str) -> CacheKey {
        if self.touches_avatar() {
            CacheKey::avatar(user_id)
        } else {
            CacheKey::profile(user_id)
        }
    }

    pub fn validate(&self, limits: &ValidationLimits) -> Result<()> {
        match self {
            Self::Update(patch) => patch.validate(limits),
            Self::UploadAvatar(upload) => upload.validate(limits),
            Self::DeleteAvatar => Ok(()),
            Self::UpdatePrivacy(patch) => {
                if patch.is_empty() {
                    Err(SyncError::Validation(
                        "privacy patch does not change any setting".into(),
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// The snapshot a reader should see while the change is in flight.
    pub fn apply_optimistic(&self, base: &ProfileSnapshot) -> ProfileSnapshot {
        match self {
            Self::Update(patch) => patch.apply_to(base),
            Self::UploadAvatar(upload) => {
                let mut next = base.clone();
                next.avatar_url = Some(upload.local_uri.clone());
                next
            }
            Self::DeleteAvatar => {
                let mut next = base.clone();
                next.avatar_url = None;
                next
            }
            Self::UpdatePrivacy(patch) => {
                let mut next = base.clone();
                next.privacy = patch.apply_to(&base.privacy);
                next
            }
        }
    }
}
