use std::sync::Arc;

use derive_more::Display;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A decision could not be made because of bad input or an inconsistent config. Only
    /// returned when the installed [`ErrorHandler`](crate::ErrorHandler) chooses to raise.
    #[error(transparent)]
    Decision(DecisionError),

    /// The datafile is not valid JSON or does not have the expected shape.
    #[error("error parsing datafile")]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    ConfigurationParseError(#[source] Arc<serde_json::Error>),

    /// The datafile declares a version this crate cannot read.
    #[error("unsupported datafile version {0:?}")]
    UnsupportedDatafileVersion(String),
}

impl From<DecisionError> for Error {
    fn from(value: DecisionError) -> Self {
        Error::Decision(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::ConfigurationParseError(Arc::new(value))
    }
}

/// Kind of datafile entity referenced by an error.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    #[display(fmt = "experiment")]
    Experiment,
    #[display(fmt = "variation")]
    Variation,
    #[display(fmt = "group")]
    Group,
    #[display(fmt = "feature flag")]
    FeatureFlag,
    #[display(fmt = "feature variable")]
    FeatureVariable,
    #[display(fmt = "rollout")]
    Rollout,
}

/// Abnormal reasons for a decision to be denied.
///
/// Normal denials (experiment not running, audience mismatch, traffic miss) are not errors and
/// never reach the caller as one.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecisionError {
    /// An id or key referenced from the datafile or by the caller is absent from the config
    /// snapshot.
    #[error("{kind} {id:?} is not in the datafile")]
    ConfigInconsistency { kind: EntityKind, id: String },

    #[error("user id must not be empty")]
    EmptyUserId,

    #[error("{0} key must not be empty")]
    EmptyKey(EntityKind),

    /// The caller asked to force a variation the experiment does not define.
    #[error("variation {variation_key:?} is not defined in experiment {experiment_key:?}")]
    UnknownVariationKey {
        experiment_key: String,
        variation_key: String,
    },
}

impl DecisionError {
    pub(crate) fn missing(kind: EntityKind, id: impl Into<String>) -> Self {
        DecisionError::ConfigInconsistency {
            kind,
            id: id.into(),
        }
    }

    /// Return `true` if the error was caused by caller input rather than by the datafile.
    pub fn is_invalid_input(&self) -> bool {
        match self {
            DecisionError::EmptyUserId
            | DecisionError::EmptyKey(_)
            | DecisionError::UnknownVariationKey { .. } => true,
            DecisionError::ConfigInconsistency { .. } => false,
        }
    }
}

/// Why an experiment decision produced no variation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecisionFailure {
    #[error("experiment is not running")]
    ExperimentNotRunning,

    /// User was bucketed into another member of a mutually exclusive group, or into no member.
    #[error("user is not bucketed into this experiment of its mutually exclusive group")]
    ExcludedByGroup,

    #[error("user does not meet audience conditions")]
    AudienceMismatch,

    #[error("user is not allocated to any variation")]
    NotAllocated,

    #[error(transparent)]
    Error(#[from] DecisionError),
}
