use serde_json::Value;

use super::{ConditionLeaf, ConditionNode, ConditionParseError, Tribool, UserCondition};
use crate::{
    config::{Experiment, ProjectConfig},
    Attributes,
};

/// Reference to an audience by id, the leaf of an experiment's `audienceConditions`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudienceRef(pub String);

impl ConditionLeaf for AudienceRef {
    fn from_json(value: &Value) -> Result<Self, ConditionParseError> {
        match value {
            Value::String(id) => Ok(AudienceRef(id.clone())),
            other => Err(ConditionParseError::InvalidLeaf(other.to_string())),
        }
    }
}

/// Decide whether the user is in the experiment's (or rollout rule's) audience.
///
/// `audienceConditions` takes precedence over `audienceIds`. Plain `audienceIds` are combined
/// with `or`. An experiment without any audience is open to everyone. Audience ids missing from
/// the config evaluate to `Unknown`.
pub fn evaluate_audience(
    config: &ProjectConfig,
    experiment: &Experiment,
    attributes: &Attributes,
) -> Tribool {
    let mut eval_audience = |AudienceRef(audience_id): &AudienceRef| {
        let Some(audience) = config.audience(audience_id) else {
            log::error!(target: "experiment_engine",
                experiment_key:display = experiment.key,
                audience_id:display = audience_id;
                "audience is not in the datafile, evaluating to unknown");
            return Tribool::Unknown;
        };
        let result = audience
            .conditions
            .evaluate(&mut |condition: &UserCondition| condition.evaluate(attributes));
        log::debug!(target: "experiment_engine",
            experiment_key:display = experiment.key,
            audience_id:display = audience_id,
            result:debug = result;
            "evaluated audience");
        result
    };

    let result = match &experiment.audience_conditions {
        Some(conditions) => conditions.evaluate(&mut eval_audience),
        None if experiment.audience_ids.is_empty() => Tribool::True,
        None => ConditionNode::Or(
            experiment
                .audience_ids
                .iter()
                .map(|id| ConditionNode::Leaf(AudienceRef(id.clone())))
                .collect(),
        )
        .evaluate(&mut eval_audience),
    };

    log::debug!(target: "experiment_engine",
        experiment_key:display = experiment.key,
        result:debug = result;
        "evaluated experiment audiences");
    result
}
