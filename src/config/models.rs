use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::conditions::{AudienceRef, ConditionNode, UserCondition};

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

/// Datafile as it appears on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatafileWire {
    pub version: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub groups: Vec<GroupWire>,
    #[serde(default)]
    pub audiences: Vec<TryParse<Audience>>,
    #[serde(default)]
    pub typed_audiences: Vec<TryParse<Audience>>,
    #[serde(default)]
    pub feature_flags: Vec<FeatureFlag>,
    #[serde(default)]
    pub rollouts: Vec<Rollout>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupWire {
    pub id: String,
    pub policy: GroupPolicy,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentStatus {
    Running,
    Launched,
    Paused,
    #[serde(rename = "Not started")]
    NotStarted,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub key: String,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub layer_id: String,
    /// Set when the experiment belongs to a group.
    #[serde(skip)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub audience_ids: Vec<String>,
    #[serde(default)]
    pub audience_conditions: Option<ConditionNode<AudienceRef>>,
    #[serde(default)]
    pub variations: Vec<Variation>,
    /// Whitelisted users: user id to variation key.
    #[serde(default)]
    pub forced_variations: HashMap<String, String>,
    #[serde(default)]
    pub traffic_allocation: Vec<TrafficAllocation>,
}

impl Experiment {
    /// Only running and launched experiments are eligible for decisions.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            ExperimentStatus::Running | ExperimentStatus::Launched
        )
    }

    pub fn variation_by_id(&self, id: &str) -> Option<&Variation> {
        self.variations.iter().find(|variation| variation.id == id)
    }

    pub fn variation_by_key(&self, key: &str) -> Option<&Variation> {
        self.variations.iter().find(|variation| variation.key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub feature_enabled: Option<bool>,
    #[serde(default)]
    pub variables: Vec<VariableUsage>,
}

impl Variation {
    pub fn is_feature_enabled(&self) -> bool {
        self.feature_enabled.unwrap_or(false)
    }

    /// Value this variation assigns to a feature variable, if it overrides the default.
    pub fn variable_value(&self, variable_id: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|usage| usage.id == variable_id)
            .map(|usage| usage.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariableUsage {
    pub id: String,
    pub value: String,
}

/// Entry of a traffic allocation. The entry covers bucket values from the previous entry's
/// `end_of_range` (inclusive) up to its own `end_of_range` (exclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAllocation {
    /// Variation id, or experiment id for group allocations. Empty for de-allocated traffic.
    pub entity_id: String,
    pub end_of_range: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Members are mutually exclusive: the group allocation picks one experiment per user.
    Random,
    Overlapping,
}

/// Group with its member experiments moved into the config's experiment index.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: String,
    pub policy: GroupPolicy,
    pub experiment_ids: Vec<String>,
    pub traffic_allocation: Vec<TrafficAllocation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Audience {
    pub id: String,
    pub name: String,
    pub conditions: ConditionNode<UserCondition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlag {
    pub id: String,
    pub key: String,
    /// Empty when the feature has no rollout.
    #[serde(default)]
    pub rollout_id: String,
    /// Feature-test experiments, tried in order.
    #[serde(default)]
    pub experiment_ids: Vec<String>,
    #[serde(default)]
    pub variables: Vec<FeatureVariable>,
}

impl FeatureFlag {
    pub fn variable(&self, key: &str) -> Option<&FeatureVariable> {
        self.variables.iter().find(|variable| variable.key == key)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVariable {
    pub id: String,
    pub key: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    /// Older datafiles encode JSON variables as `"type": "string", "subType": "json"`.
    #[serde(default)]
    pub sub_type: Option<VariableType>,
    pub default_value: String,
}

impl FeatureVariable {
    pub fn effective_type(&self) -> VariableType {
        match (self.variable_type, self.sub_type) {
            (VariableType::String, Some(VariableType::Json)) => VariableType::Json,
            (variable_type, _) => variable_type,
        }
    }

    /// Parse a raw variable value according to the variable type.
    pub fn parse_value(&self, raw: &str) -> Option<VariableValue> {
        Some(match self.effective_type() {
            VariableType::String => VariableValue::String(raw.to_owned()),
            VariableType::Integer => VariableValue::Integer(raw.parse().ok()?),
            VariableType::Double => VariableValue::Double(raw.parse().ok()?),
            VariableType::Boolean => VariableValue::Boolean(raw.parse().ok()?),
            VariableType::Json => VariableValue::Json(serde_json::from_str(raw).ok()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Integer,
    Double,
    Boolean,
    Json,
}

/// Typed value of a feature variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VariableValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Json(serde_json::Value),
}

/// Ordered targeting rules of a feature. The last rule is the "everyone else" rule.
#[derive(Debug, Clone, Deserialize)]
pub struct Rollout {
    pub id: String,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}
