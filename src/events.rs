use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::{Experiment, FeatureFlag, FeatureVariable, VariableType, VariableValue, Variation},
    decision::{DecisionSource, FeatureDecision},
    Attributes,
};

/// Record of a single decision, handed to the [`DecisionListener`](crate::DecisionListener).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNotification {
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub user_id: String,
    pub attributes: Attributes,
    pub decision_info: DecisionInfo,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionType {
    AbTest,
    Feature,
    FeatureVariable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecisionInfo {
    AbTest(ExperimentDecisionInfo),
    Feature(FeatureDecisionInfo),
    FeatureVariable(FeatureVariableDecisionInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentDecisionInfo {
    pub experiment_key: String,
    pub variation_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDecisionInfo {
    pub feature_key: String,
    pub feature_enabled: bool,
    pub source: DecisionSource,
    /// Only present for feature-test decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_info: Option<ExperimentDecisionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVariableDecisionInfo {
    pub feature_key: String,
    pub feature_enabled: bool,
    pub source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_info: Option<ExperimentDecisionInfo>,
    pub variable_key: String,
    pub variable_type: VariableType,
    pub variable_value: Option<VariableValue>,
}

impl DecisionNotification {
    pub fn for_experiment(
        experiment: &Experiment,
        variation: Option<&Variation>,
        user_id: &str,
        attributes: &Attributes,
        now: DateTime<Utc>,
    ) -> Self {
        DecisionNotification {
            decision_type: DecisionType::AbTest,
            user_id: user_id.to_owned(),
            attributes: attributes.clone(),
            decision_info: DecisionInfo::AbTest(ExperimentDecisionInfo {
                experiment_key: experiment.key.clone(),
                variation_key: variation.map(|v| v.key.clone()),
            }),
            timestamp: now,
        }
    }

    pub fn for_feature(
        feature: &FeatureFlag,
        decision: &FeatureDecision<'_>,
        user_id: &str,
        attributes: &Attributes,
        now: DateTime<Utc>,
    ) -> Self {
        DecisionNotification {
            decision_type: DecisionType::Feature,
            user_id: user_id.to_owned(),
            attributes: attributes.clone(),
            decision_info: DecisionInfo::Feature(FeatureDecisionInfo {
                feature_key: feature.key.clone(),
                feature_enabled: decision.is_feature_enabled(),
                source: decision.source,
                source_info: feature_test_info(decision),
            }),
            timestamp: now,
        }
    }

    pub fn for_feature_variable(
        feature: &FeatureFlag,
        variable: &FeatureVariable,
        value: Option<&VariableValue>,
        decision: &FeatureDecision<'_>,
        user_id: &str,
        attributes: &Attributes,
        now: DateTime<Utc>,
    ) -> Self {
        DecisionNotification {
            decision_type: DecisionType::FeatureVariable,
            user_id: user_id.to_owned(),
            attributes: attributes.clone(),
            decision_info: DecisionInfo::FeatureVariable(FeatureVariableDecisionInfo {
                feature_key: feature.key.clone(),
                feature_enabled: decision.is_feature_enabled(),
                source: decision.source,
                source_info: feature_test_info(decision),
                variable_key: variable.key.clone(),
                variable_type: variable.effective_type(),
                variable_value: value.cloned(),
            }),
            timestamp: now,
        }
    }
}

fn feature_test_info(decision: &FeatureDecision<'_>) -> Option<ExperimentDecisionInfo> {
    if decision.source != DecisionSource::FeatureTest {
        return None;
    }
    let (experiment, variation) = decision.experiment.zip(decision.variation)?;
    Some(ExperimentDecisionInfo {
        experiment_key: experiment.key.clone(),
        variation_key: Some(variation.key.clone()),
    })
}
