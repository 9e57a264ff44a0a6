// ============================================================================
// Completeness Weight Tables
// ============================================================================
//
// One rule per scored field: base weight, suggestion priority, business
// impact, effort and estimated minutes. Tiers override individual values;
// they never scale the table.
//
// ============================================================================

use crate::core::ProfileField;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileTier {
    #[default]
    Basic,
    Premium,
    Enterprise,
}

impl fmt::Display for ProfileTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Premium => write!(f, "premium"),
            Self::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl FromStr for ProfileTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown tier '{other}' (basic|premium|enterprise)")),
        }
    }
}

/// Suggestion urgency. Declared lowest first so `Ord` ranks `Critical` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 0.7,
            Self::High => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Identity,
    Contact,
    Professional,
    Social,
    Personal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldRule {
    pub field: ProfileField,
    pub weight: f64,
    pub priority: Priority,
    /// 0-100
    pub business_impact: u8,
    pub effort: Effort,
    pub estimated_minutes: u32,
    pub category: Category,
    pub hint: &'static str,
}

/// Scored fields in insertion order; ties in suggestion ranking keep this order.
pub const BASE_RULES: [FieldRule; 13] = [
    FieldRule {
        field: ProfileField::FirstName,
        weight: 1.5,
        priority: Priority::Critical,
        business_impact: 95,
        effort: Effort::Low,
        estimated_minutes: 1,
        category: Category::Identity,
        hint: "Add your first name",
    },
    FieldRule {
        field: ProfileField::LastName,
        weight: 1.5,
        priority: Priority::Critical,
        business_impact: 90,
        effort: Effort::Low,
        estimated_minutes: 1,
        category: Category::Identity,
        hint: "Add your last name",
    },
    FieldRule {
        field: ProfileField::Email,
        weight: 1.0,
        priority: Priority::High,
        business_impact: 85,
        effort: Effort::Low,
        estimated_minutes: 2,
        category: Category::Contact,
        hint: "Add a contact email",
    },
    FieldRule {
        field: ProfileField::Avatar,
        weight: 1.0,
        priority: Priority::High,
        business_impact: 80,
        effort: Effort::Medium,
        estimated_minutes: 5,
        category: Category::Identity,
        hint: "Upload a profile picture",
    },
    FieldRule {
        field: ProfileField::Bio,
        weight: 2.0,
        priority: Priority::High,
        business_impact: 75,
        effort: Effort::Medium,
        estimated_minutes: 15,
        category: Category::Personal,
        hint: "Write a bio of at least 50 characters",
    },
    FieldRule {
        field: ProfileField::Skills,
        weight: 2.0,
        priority: Priority::High,
        business_impact: 70,
        effort: Effort::Medium,
        estimated_minutes: 10,
        category: Category::Professional,
        hint: "List at least 3 skills",
    },
    FieldRule {
        field: ProfileField::Company,
        weight: 1.5,
        priority: Priority::Medium,
        business_impact: 60,
        effort: Effort::Low,
        estimated_minutes: 2,
        category: Category::Professional,
        hint: "Add your company",
    },
    FieldRule {
        field: ProfileField::JobTitle,
        weight: 1.5,
        priority: Priority::Medium,
        business_impact: 60,
        effort: Effort::Low,
        estimated_minutes: 2,
        category: Category::Professional,
        hint: "Add your job title",
    },
    FieldRule {
        field: ProfileField::SocialLinks,
        weight: 1.0,
        priority: Priority::Medium,
        business_impact: 45,
        effort: Effort::Medium,
        estimated_minutes: 10,
        category: Category::Social,
        hint: "Link a social profile",
    },
    FieldRule {
        field: ProfileField::Location,
        weight: 0.5,
        priority: Priority::Low,
        business_impact: 35,
        effort: Effort::Low,
        estimated_minutes: 1,
        category: Category::Contact,
        hint: "Add your location",
    },
    FieldRule {
        field: ProfileField::Phone,
        weight: 0.5,
        priority: Priority::Low,
        business_impact: 30,
        effort: Effort::Low,
        estimated_minutes: 2,
        category: Category::Contact,
        hint: "Add a phone number",
    },
    FieldRule {
        field: ProfileField::Website,
        weight: 0.5,
        priority: Priority::Low,
        business_impact: 30,
        effort: Effort::Low,
        estimated_minutes: 3,
        category: Category::Social,
        hint: "Add your website",
    },
    FieldRule {
        field: ProfileField::CustomFields,
        weight: 0.5,
        priority: Priority::Low,
        business_impact: 20,
        effort: Effort::High,
        estimated_minutes: 20,
        category: Category::Personal,
        hint: "Fill in a custom field",
    },
];

struct TierOverride {
    field: ProfileField,
    weight: Option<f64>,
    priority: Option<Priority>,
}

const fn weight(field: ProfileField, weight: f64) -> TierOverride {
    TierOverride {
        field,
        weight: Some(weight),
        priority: None,
    }
}

const PREMIUM_OVERRIDES: &[TierOverride] = &[
    weight(ProfileField::Bio, 2.5),
    weight(ProfileField::Skills, 2.5),
    weight(ProfileField::Website, 1.0),
    weight(ProfileField::SocialLinks, 1.5),
];

const ENTERPRISE_OVERRIDES: &[TierOverride] = &[
    TierOverride {
        field: ProfileField::Company,
        weight: Some(2.5),
        priority: Some(Priority::High),
    },
    TierOverride {
        field: ProfileField::JobTitle,
        weight: Some(2.5),
        priority: Some(Priority::High),
    },
    weight(ProfileField::Email, 1.5),
    weight(ProfileField::Phone, 1.0),
    weight(ProfileField::CustomFields, 1.0),
];

fn overrides_for(tier: ProfileTier) -> &'static [TierOverride] {
    match tier {
        ProfileTier::Basic => &[],
        ProfileTier::Premium => PREMIUM_OVERRIDES,
        ProfileTier::Enterprise => ENTERPRISE_OVERRIDES,
    }
}

/// The rule table for `tier`, in insertion order.
pub fn rules_for(tier: ProfileTier) -> Vec<FieldRule> {
    let overrides = overrides_for(tier);
    BASE_RULES
        .iter()
        .map(|base| {
            let mut rule = *base;
            if let Some(over) = overrides.iter().find(|over| over.field == rule.field) {
                if let Some(weight) = over.weight {
                    rule.weight = weight;
                }
                if let Some(priority) = over.priority {
                    rule.priority = priority;
                }
            }
            rule
        })
        .collect()
}

pub fn category_of(field: ProfileField) -> Option<Category> {
    BASE_RULES
        .iter()
        .find(|rule| rule.field == field)
        .map(|rule| rule.category)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight_of(tier: ProfileTier, field: ProfileField) -> f64 {
        rules_for(tier)
            .into_iter()
            .find(|rule| rule.field == field)
            .map(|rule| rule.weight)
            .unwrap()
    }

    #[test]
    fn test_basic_total_weight() {
        let total: f64 = rules_for(ProfileTier::Basic).iter().map(|r| r.weight).sum();
        assert!((total - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_enterprise_overrides_company_weight() {
        assert_eq!(weight_of(ProfileTier::Basic, ProfileField::Company), 1.5);
        assert_eq!(weight_of(ProfileTier::Enterprise, ProfileField::Company), 2.5);
        assert_eq!(weight_of(ProfileTier::Enterprise, ProfileField::Bio), 2.0);
        assert_eq!(weight_of(ProfileTier::Premium, ProfileField::Bio), 2.5);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!("Premium".parse::<ProfileTier>(), Ok(ProfileTier::Premium));
        assert!("gold".parse::<ProfileTier>().is_err());
    }

    #[test]
    fn test_display_name_and_privacy_are_not_scored() {
        assert_eq!(category_of(ProfileField::DisplayName), None);
        assert_eq!(category_of(ProfileField::Privacy), None);
    }
}
