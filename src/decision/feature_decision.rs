use derive_more::Display;
use serde::Serialize;

use crate::config::{Experiment, Variation};

/// Where a feature decision came from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    #[display(fmt = "feature-test")]
    FeatureTest,
    #[display(fmt = "rollout")]
    Rollout,
}

/// Result of deciding a feature flag for a user.
///
/// `experiment` is the feature test or rollout rule that produced `variation`. Both are `None`
/// when no rule matched, in which case the source is [`DecisionSource::Rollout`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureDecision<'a> {
    pub experiment: Option<&'a Experiment>,
    pub variation: Option<&'a Variation>,
    pub source: DecisionSource,
}

impl<'a> FeatureDecision<'a> {
    pub(crate) fn matched(
        experiment: &'a Experiment,
        variation: &'a Variation,
        source: DecisionSource,
    ) -> Self {
        FeatureDecision {
            experiment: Some(experiment),
            variation: Some(variation),
            source,
        }
    }

    pub(crate) fn none() -> Self {
        FeatureDecision {
            experiment: None,
            variation: None,
            source: DecisionSource::Rollout,
        }
    }

    pub fn is_feature_enabled(&self) -> bool {
        self.variation.is_some_and(Variation::is_feature_enabled)
    }
}
