// ============================================================================
// Completeness Module
// ============================================================================
//
// Weighted profile completion score and ranked improvement suggestions.
// Everything here is a pure function of a `ProfileSnapshot`.
//
// ============================================================================

pub mod engine;
pub mod weights;

pub use engine::{
    CompletenessEngine, CompletenessLevel, CompletenessResult, Suggestion, SuggestionPreferences,
    calculate, calculate_with_preferences, is_field_complete, roi,
};
pub use weights::{Category, Effort, FieldRule, Priority, ProfileTier, rules_for};
