use chrono::{DateTime, Utc};
use im::{OrdMap, Vector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who may see a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProfileVisibility {
    #[default]
    Public,
    Connections,
    Private,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettings {
    pub profile_visibility: ProfileVisibility,
    pub show_email: bool,
    pub show_phone: bool,
    pub show_location: bool,
    pub searchable: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            profile_visibility: ProfileVisibility::Public,
            show_email: false,
            show_phone: false,
            show_location: true,
            searchable: true,
        }
    }
}

/// A user profile as of one point in time.
///
/// Snapshots are never edited in place once published: every successful
/// fetch or mutation produces a new `Arc<ProfileSnapshot>`. The collection
/// fields are persistent `im` structures, so cloning a snapshot to derive the
/// next one shares everything that did not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileSnapshot {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub website: Option<String>,
    pub bio: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub skills: Vector<String>,
    pub social_links: OrdMap<String, String>,
    pub custom_fields: OrdMap<String, String>,
    pub privacy: PrivacySettings,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProfileSnapshot {
    /// Creates an empty profile for `user_id` at version 0.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Copies a single field's value from `source`, leaving everything else
    /// (including `version` and `updated_at`) untouched.
    pub fn copy_field_from(&mut self, source: &ProfileSnapshot, field: ProfileField) {
        match field {
            ProfileField::FirstName => self.first_name = source.first_name.clone(),
            ProfileField::LastName => self.last_name = source.last_name.clone(),
            ProfileField::DisplayName => self.display_name = source.display_name.clone(),
            ProfileField::Avatar => self.avatar_url = source.avatar_url.clone(),
            ProfileField::Email => self.email = source.email.clone(),
            ProfileField::Phone => self.phone = source.phone.clone(),
            ProfileField::Location => self.location = source.location.clone(),
            ProfileField::Website => self.website = source.website.clone(),
            ProfileField::Bio => self.bio = source.bio.clone(),
            ProfileField::Company => self.company = source.company.clone(),
            ProfileField::JobTitle => self.job_title = source.job_title.clone(),
            ProfileField::Skills => self.skills = source.skills.clone(),
            ProfileField::SocialLinks => self.social_links = source.social_links.clone(),
            ProfileField::CustomFields => self.custom_fields = source.custom_fields.clone(),
            ProfileField::Privacy => self.privacy = source.privacy.clone(),
        }
    }

    /// Returns `true` when `field` holds the same value in both snapshots.
    pub fn field_eq(&self, other: &ProfileSnapshot, field: ProfileField) -> bool {
        match field {
            ProfileField::FirstName => self.first_name == other.first_name,
            ProfileField::LastName => self.last_name == other.last_name,
            ProfileField::DisplayName => self.display_name == other.display_name,
            ProfileField::Avatar => self.avatar_url == other.avatar_url,
            ProfileField::Email => self.email == other.email,
            ProfileField::Phone => self.phone == other.phone,
            ProfileField::Location => self.location == other.location,
            ProfileField::Website => self.website == other.website,
            ProfileField::Bio => self.bio == other.bio,
            ProfileField::Company => self.company == other.company,
            ProfileField::JobTitle => self.job_title == other.job_title,
            ProfileField::Skills => self.skills == other.skills,
            ProfileField::SocialLinks => self.social_links == other.social_links,
            ProfileField::CustomFields => self.custom_fields == other.custom_fields,
            ProfileField::Privacy => self.privacy == other.privacy,
        }
    }
}

/// Every user-editable field of a [`ProfileSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProfileField {
    FirstName,
    LastName,
    DisplayName,
    Avatar,
    Email,
    Phone,
    Location,
    Website,
    Bio,
    Company,
    JobTitle,
    Skills,
    SocialLinks,
    CustomFields,
    Privacy,
}

impl ProfileField {
    pub const ALL: [ProfileField; 15] = [
        Self::FirstName,
        Self::LastName,
        Self::DisplayName,
        Self::Avatar,
        Self::Email,
        Self::Phone,
        Self::Location,
        Self::Website,
        Self::Bio,
        Self::Company,
        Self::JobTitle,
        Self::Skills,
        Self::SocialLinks,
        Self::CustomFields,
        Self::Privacy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstName => "firstName",
            Self::LastName => "lastName",
            Self::DisplayName => "displayName",
            Self::Avatar => "avatar",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Location => "location",
            Self::Website => "website",
            Self::Bio => "bio",
            Self::Company => "company",
            Self::JobTitle => "jobTitle",
            Self::Skills => "skills",
            Self::SocialLinks => "socialLinks",
            Self::CustomFields => "customFields",
            Self::Privacy => "privacy",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of remote resource a cache entry mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Profile,
    Avatar,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile => write!(f, "profile"),
            Self::Avatar => write!(f, "avatar"),
        }
    }
}

/// Cache and error-slot key: one resource of one owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub resource: ResourceType,
    pub owner_id: String,
}

impl CacheKey {
    pub fn new(resource: ResourceType, owner_id: impl Into<String>) -> Self {
        Self {
            resource,
            owner_id: owner_id.into(),
        }
    }

    pub fn profile(owner_id: impl Into<String>) -> Self {
        Self::new(ResourceType::Profile, owner_id)
    }

    pub fn avatar(owner_id: impl Into<String>) -> Self {
        Self::new(ResourceType::Avatar, owner_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.owner_id)
    }
}
