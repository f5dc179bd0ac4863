//! Experiment and feature decisions.
mod feature_decision;
mod forced_variations;
mod service;
mod user_profile;

pub use feature_decision::{DecisionSource, FeatureDecision};
pub use forced_variations::ForcedVariationStore;
pub use service::{bucketing_id, DecisionService};
pub use user_profile::{
    InMemoryUserProfileService, StoredDecision, UserProfile, UserProfileService,
    UserProfileServiceError,
};
