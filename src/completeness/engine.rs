use super::weights::{Category, Effort, FieldRule, Priority, ProfileTier, category_of, rules_for};
use crate::core::{ProfileField, ProfileSnapshot};
use serde::{Deserialize, Serialize};

pub const MIN_BIO_CHARS: usize = 50;
pub const MIN_SKILLS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletenessLevel {
    Starter,
    Intermediate,
    Advanced,
    Expert,
}

impl CompletenessLevel {
    pub fn from_percentage(percentage: u8) -> Self {
        match percentage {
            0..=39 => Self::Starter,
            40..=69 => Self::Intermediate,
            70..=89 => Self::Advanced,
            _ => Self::Expert,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub field: ProfileField,
    pub category: Category,
    pub priority: Priority,
    pub business_impact: u8,
    pub effort: Effort,
    pub estimated_minutes: u32,
    pub roi: u32,
    /// Ranked ahead of its tier peers because of caller preferences.
    pub boosted: bool,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessResult {
    pub percentage: u8,
    pub weighted_score: f64,
    pub total_possible_weight: f64,
    pub level: CompletenessLevel,
    pub completed_fields: Vec<ProfileField>,
    pub missing_fields: Vec<ProfileField>,
    pub estimated_minutes_remaining: u32,
    pub suggestions: Vec<Suggestion>,
}

impl CompletenessResult {
    pub fn is_complete(&self) -> bool {
        self.missing_fields.is_empty()
    }

    pub fn next_suggestion(&self) -> Option<&Suggestion> {
        self.suggestions.first()
    }
}

/// Behavioral hints used to personalize suggestion order.
///
/// A suggestion is boosted when its category is preferred, or when the user
/// recently completed another field of the same category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SuggestionPreferences {
    pub preferred_categories: Vec<Category>,
    pub recently_completed: Vec<ProfileField>,
}

impl SuggestionPreferences {
    pub fn boosts(&self, category: Category) -> bool {
        self.preferred_categories.contains(&category)
            || self
                .recently_completed
                .iter()
                .any(|field| category_of(*field) == Some(category))
    }
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|text| !text.trim().is_empty())
}

/// Field-specific completion predicate.
pub fn is_field_complete(profile: &ProfileSnapshot, field: ProfileField) -> bool {
    match field {
        ProfileField::Bio => profile
            .bio
            .as_deref()
            .is_some_and(|bio| bio.trim().chars().count() >= MIN_BIO_CHARS),
        ProfileField::Skills => {
            profile
                .skills
                .iter()
                .filter(|skill| !skill.trim().is_empty())
                .count()
                >= MIN_SKILLS
        }
        ProfileField::SocialLinks => profile.social_links.values().any(|v| !v.trim().is_empty()),
        ProfileField::CustomFields => profile.custom_fields.values().any(|v| !v.trim().is_empty()),
        ProfileField::FirstName => has_text(&profile.first_name),
        ProfileField::LastName => has_text(&profile.last_name),
        ProfileField::DisplayName => has_text(&profile.display_name),
        ProfileField::Avatar => has_text(&profile.avatar_url),
        ProfileField::Email => has_text(&profile.email),
        ProfileField::Phone => has_text(&profile.phone),
        ProfileField::Location => has_text(&profile.location),
        ProfileField::Website => has_text(&profile.website),
        ProfileField::Company => has_text(&profile.company),
        ProfileField::JobTitle => has_text(&profile.job_title),
        ProfileField::Privacy => true,
    }
}

/// `round(impact * effort_multiplier * max(0.3, 1 - minutes / 60))`
pub fn roi(business_impact: u8, effort: Effort, estimated_minutes: u32) -> u32 {
    let time_penalty = (1.0 - f64::from(estimated_minutes) / 60.0).max(0.3);
    (f64::from(business_impact) * effort.multiplier() * time_penalty).round() as u32
}

fn suggestion_for(rule: &FieldRule, preferences: Option<&SuggestionPreferences>) -> Suggestion {
    Suggestion {
        field: rule.field,
        category: rule.category,
        priority: rule.priority,
        business_impact: rule.business_impact,
        effort: rule.effort,
        estimated_minutes: rule.estimated_minutes,
        roi: roi(rule.business_impact, rule.effort, rule.estimated_minutes),
        boosted: preferences.is_some_and(|prefs| prefs.boosts(rule.category)),
        hint: rule.hint.to_string(),
    }
}

/// Scores `profile` for `tier` without personalization.
pub fn calculate(profile: &ProfileSnapshot, tier: ProfileTier) -> CompletenessResult {
    calculate_with_preferences(profile, tier, None)
}

pub fn calculate_with_preferences(
    profile: &ProfileSnapshot,
    tier: ProfileTier,
    preferences: Option<&SuggestionPreferences>,
) -> CompletenessResult {
    let rules = rules_for(tier);

    let mut weighted_score = 0.0;
    let mut total_possible_weight = 0.0;
    let mut completed_fields = Vec::new();
    let mut missing_fields = Vec::new();
    let mut suggestions = Vec::new();

    for rule in &rules {
        total_possible_weight += rule.weight;
        if is_field_complete(profile, rule.field) {
            weighted_score += rule.weight;
            completed_fields.push(rule.field);
        } else {
            missing_fields.push(rule.field);
            suggestions.push(suggestion_for(rule, preferences));
        }
    }

    // Stable sort: equal keys keep table order.
    suggestions.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.boosted.cmp(&a.boosted))
            .then(b.roi.cmp(&a.roi))
    });

    let percentage = if total_possible_weight > 0.0 {
        (weighted_score / total_possible_weight * 100.0)
            .round()
            .clamp(0.0, 100.0) as u8
    } else {
        0
    };

    CompletenessResult {
        percentage,
        weighted_score,
        total_possible_weight,
        level: CompletenessLevel::from_percentage(percentage),
        completed_fields,
        missing_fields,
        estimated_minutes_remaining: suggestions.iter().map(|s| s.estimated_minutes).sum(),
        suggestions,
    }
}

/// Completeness scoring bound to a tier and optional preferences.
#[derive(Debug, Clone, Default)]
pub struct CompletenessEngine {
    tier: ProfileTier,
    preferences: Option<SuggestionPreferences>,
}

impl CompletenessEngine {
    pub fn new(tier: ProfileTier) -> Self {
        Self {
            tier,
            preferences: None,
        }
    }

    pub fn with_preferences(mut self, preferences: SuggestionPreferences) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn tier(&self) -> ProfileTier {
        self.tier
    }

    /// Scores `profile`, using `tier` when given and the engine's tier otherwise.
    pub fn calculate(
        &self,
        profile: &ProfileSnapshot,
        tier: Option<ProfileTier>,
    ) -> CompletenessResult {
        calculate_with_preferences(profile, tier.unwrap_or(self.tier), self.preferences.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(first: &str, last: &str) -> ProfileSnapshot {
        let mut profile = ProfileSnapshot::new("u1");
        profile.first_name = Some(first.into());
        profile.last_name = Some(last.into());
        profile
    }

    #[test]
    fn test_roi_formula() {
        assert_eq!(roi(85, Effort::Low, 2), 82);
        assert_eq!(roi(75, Effort::Medium, 15), 39);
        // time penalty floors at 0.3
        assert_eq!(roi(100, Effort::High, 120), 12);
    }

    #[test]
    fn test_bio_boundary() {
        let mut profile = ProfileSnapshot::new("u1");
        profile.bio = Some("a".repeat(49));
        assert!(!is_field_complete(&profile, ProfileField::Bio));

        profile.bio = Some("a".repeat(50));
        assert!(is_field_complete(&profile, ProfileField::Bio));

        profile.bio = Some(format!("   {}   ", "a".repeat(49)));
        assert!(!is_field_complete(&profile, ProfileField::Bio));
    }

    #[test]
    fn test_skills_need_three_entries() {
        let mut profile = ProfileSnapshot::new("u1");
        profile.skills = im::vector!["rust".to_string(), "go".to_string()];
        assert!(!is_field_complete(&profile, ProfileField::Skills));

        profile.skills.push_back("sql".to_string());
        assert!(is_field_complete(&profile, ProfileField::Skills));
    }

    #[test]
    fn test_whitespace_scalar_is_incomplete() {
        let profile = named("   ", "Lee");
        assert!(!is_field_complete(&profile, ProfileField::FirstName));
        assert!(is_field_complete(&profile, ProfileField::LastName));
    }

    #[test]
    fn test_name_only_profile() {
        let result = calculate(&named("Ann", "Lee"), ProfileTier::Basic);

        assert_eq!(result.weighted_score, 3.0);
        assert_eq!(result.total_possible_weight, 15.0);
        assert_eq!(result.percentage, 20);
        assert_eq!(result.level, CompletenessLevel::Starter);
        assert_eq!(result.completed_fields, vec![ProfileField::FirstName, ProfileField::LastName]);
        assert_eq!(result.suggestions.len(), 11);
        assert_eq!(result.next_suggestion().map(|s| s.field), Some(ProfileField::Email));
    }

    #[test]
    fn test_suggestions_sorted_by_priority_then_roi() {
        let result = calculate(&ProfileSnapshot::new("u1"), ProfileTier::Basic);
        let order: Vec<ProfileField> = result.suggestions.iter().map(|s| s.field).collect();

        assert_eq!(&order[..2], &[ProfileField::FirstName, ProfileField::LastName]);
        for pair in result.suggestions.windows(2) {
            assert!(
                pair[0].priority > pair[1].priority
                    || (pair[0].priority == pair[1].priority && pair[0].roi >= pair[1].roi)
            );
        }
    }

    #[test]
    fn test_equal_keys_keep_table_order() {
        // company and jobTitle share priority, impact, effort and minutes
        let result = calculate(&ProfileSnapshot::new("u1"), ProfileTier::Basic);
        let company = result.suggestions.iter().position(|s| s.field == ProfileField::Company);
        let title = result.suggestions.iter().position(|s| s.field == ProfileField::JobTitle);
        assert!(company < title);
    }

    #[test]
    fn test_enterprise_promotes_professional_fields() {
        let result = calculate(&named("Ann", "Lee"), ProfileTier::Enterprise);
        let company = result
            .suggestions
            .iter()
            .find(|s| s.field == ProfileField::Company)
            .unwrap();
        assert_eq!(company.priority, Priority::High);
        assert_eq!(result.total_possible_weight, 18.5);
    }

    #[test]
    fn test_preferences_boost_within_tier() {
        let prefs = SuggestionPreferences {
            preferred_categories: vec![Category::Professional],
            recently_completed: Vec::new(),
        };
        let engine = CompletenessEngine::new(ProfileTier::Basic).with_preferences(prefs);
        let result = engine.calculate(&named("Ann", "Lee"), None);

        // skills is the only professional field in the high tier
        assert_eq!(result.suggestions[0].field, ProfileField::Skills);
        assert!(result.suggestions[0].boosted);
        assert_eq!(result.suggestions[1].field, ProfileField::Email);
    }

    #[test]
    fn test_recently_completed_boosts_same_category() {
        let prefs = SuggestionPreferences {
            preferred_categories: Vec::new(),
            recently_completed: vec![ProfileField::Website],
        };
        assert!(prefs.boosts(Category::Social));
        assert!(!prefs.boosts(Category::Contact));
    }

    #[test]
    fn test_full_profile_is_complete() {
        let mut profile = named("Ann", "Lee");
        profile.email = Some("ann@example.com".into());
        profile.avatar_url = Some("https://cdn/a.png".into());
        profile.bio = Some("b".repeat(60));
        profile.skills = im::vector!["a".into(), "b".into(), "c".into()];
        profile.company = Some("Acme".into());
        profile.job_title = Some("Engineer".into());
        profile.social_links.insert("github".into(), "https://github.com/ann".into());
        profile.location = Some("Oslo".into());
        profile.phone = Some("+47".into());
        profile.website = Some("https://ann.dev".into());
        profile.custom_fields.insert("pronouns".into(), "she/her".into());

        let result = calculate(&profile, ProfileTier::Premium);
        assert_eq!(result.percentage, 100);
        assert!(result.is_complete());
        assert_eq!(result.level, CompletenessLevel::Expert);
        assert_eq!(result.estimated_minutes_remaining, 0);
    }

    #[test]
    fn test_deterministic() {
        let profile = named("Ann", "Lee");
        assert_eq!(
            calculate(&profile, ProfileTier::Premium),
            calculate(&profile, ProfileTier::Premium)
        );
    }
}
