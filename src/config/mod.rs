//! Datafile model and its indexed, immutable snapshot.
mod models;
mod project_config;

pub use models::{
    Audience, Experiment, ExperimentStatus, FeatureFlag, FeatureVariable, Group, GroupPolicy,
    Rollout, TrafficAllocation, VariableType, VariableUsage, VariableValue, Variation,
};
pub use project_config::{ProjectConfig, SUPPORTED_DATAFILE_VERSIONS};
