use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ConditionLeaf, ConditionParseError, SemanticVersion, Tribool};
use crate::{AttributeValue, Attributes};

/// The only leaf type evaluated against user attributes.
pub const CUSTOM_ATTRIBUTE_CONDITION_TYPE: &str = "custom_attribute";

/// Numbers outside of this range can't be represented exactly and are rejected.
const MAX_SAFE_NUMBER: f64 = 9_007_199_254_740_992.0; // 2^53

/// Matcher applied by a [`UserCondition`].
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Substring,
    Gt,
    Lt,
    Ge,
    Le,
    Exists,
    SemverEq,
    SemverGt,
    SemverLt,
    SemverGe,
    SemverLe,
    /// A matcher this version does not know. Always evaluates to `Unknown`.
    #[serde(other)]
    Unsupported,
}

/// A leaf condition on a single user attribute.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserCondition {
    pub name: String,
    #[serde(rename = "type")]
    pub condition_type: String,
    /// `None` for legacy audiences, which only support exact string matching.
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub value: Option<AttributeValue>,
}

impl ConditionLeaf for UserCondition {
    fn from_json(value: &Value) -> Result<Self, ConditionParseError> {
        UserCondition::deserialize(value)
            .map_err(|err| ConditionParseError::InvalidLeaf(err.to_string()))
    }
}

/// Why a matcher could not be applied.
enum MatchError {
    /// Condition value is missing or of a type the matcher does not accept.
    InvalidCondition,
    /// Attribute value has a type the matcher cannot compare against the condition value.
    TypeMismatch,
    /// Numeric attribute is not finite or exceeds 2^53 in magnitude.
    NumberOutOfRange,
}

impl UserCondition {
    pub fn evaluate(&self, attributes: &Attributes) -> Tribool {
        if self.condition_type != CUSTOM_ATTRIBUTE_CONDITION_TYPE {
            log::warn!(target: "experiment_engine",
                condition_name:display = self.name,
                condition_type:display = self.condition_type;
                "audience condition has an unknown condition type, evaluating to unknown");
            return Tribool::Unknown;
        }

        let match_type = self.match_type;
        if match_type == Some(MatchType::Unsupported) {
            log::warn!(target: "experiment_engine",
                condition_name:display = self.name;
                "audience condition uses an unsupported match type, evaluating to unknown");
            return Tribool::Unknown;
        }

        let attribute = attributes.get(&self.name);
        if match_type == Some(MatchType::Exists) {
            return attribute.is_some().into();
        }

        let attribute = match attribute {
            None | Some(AttributeValue::Null) => {
                log::debug!(target: "experiment_engine",
                    condition_name:display = self.name;
                    "attribute is missing or null, evaluating condition to unknown");
                return Tribool::Unknown;
            }
            Some(attribute) => attribute,
        };

        match self.try_match(attribute) {
            Ok(result) => result.into(),
            Err(MatchError::InvalidCondition) => {
                log::warn!(target: "experiment_engine",
                    condition_name:display = self.name,
                    condition_value:serde = self.value;
                    "audience condition has an invalid value for its match type, evaluating to unknown");
                Tribool::Unknown
            }
            Err(MatchError::TypeMismatch) => {
                log::warn!(target: "experiment_engine",
                    condition_name:display = self.name,
                    attribute_type = attribute.type_name();
                    "attribute type does not match the condition, evaluating to unknown");
                Tribool::Unknown
            }
            Err(MatchError::NumberOutOfRange) => {
                log::warn!(target: "experiment_engine",
                    condition_name:display = self.name;
                    "attribute is not a finite number within +/-2^53, evaluating to unknown");
                Tribool::Unknown
            }
        }
    }

    fn try_match(&self, attribute: &AttributeValue) -> Result<bool, MatchError> {
        let condition_value = self.value.as_ref();
        match self.match_type {
            None => {
                let Some(AttributeValue::String(expected)) = condition_value else {
                    return Err(MatchError::InvalidCondition);
                };
                let AttributeValue::String(actual) = attribute else {
                    return Err(MatchError::TypeMismatch);
                };
                Ok(actual == expected)
            }

            Some(MatchType::Exact) => match (condition_value, attribute) {
                (Some(AttributeValue::String(expected)), AttributeValue::String(actual)) => {
                    Ok(actual == expected)
                }
                (Some(AttributeValue::Boolean(expected)), AttributeValue::Boolean(actual)) => {
                    Ok(actual == expected)
                }
                (Some(AttributeValue::Number(expected)), AttributeValue::Number(actual)) => {
                    let expected = safe_number(*expected).ok_or(MatchError::InvalidCondition)?;
                    let actual = safe_number(*actual).ok_or(MatchError::NumberOutOfRange)?;
                    Ok(actual == expected)
                }
                (
                    Some(
                        AttributeValue::String(_)
                        | AttributeValue::Boolean(_)
                        | AttributeValue::Number(_),
                    ),
                    _,
                ) => Err(MatchError::TypeMismatch),
                _ => Err(MatchError::InvalidCondition),
            },

            Some(MatchType::Substring) => {
                let Some(AttributeValue::String(expected)) = condition_value else {
                    return Err(MatchError::InvalidCondition);
                };
                let AttributeValue::String(actual) = attribute else {
                    return Err(MatchError::TypeMismatch);
                };
                Ok(actual.contains(expected.as_str()))
            }

            Some(
                match_type @ (MatchType::Gt | MatchType::Lt | MatchType::Ge | MatchType::Le),
            ) => {
                let expected = match condition_value {
                    Some(AttributeValue::Number(n)) => {
                        safe_number(*n).ok_or(MatchError::InvalidCondition)?
                    }
                    _ => return Err(MatchError::InvalidCondition),
                };
                let actual = match attribute {
                    AttributeValue::Number(n) => {
                        safe_number(*n).ok_or(MatchError::NumberOutOfRange)?
                    }
                    _ => return Err(MatchError::TypeMismatch),
                };
                Ok(match match_type {
                    MatchType::Gt => actual > expected,
                    MatchType::Lt => actual < expected,
                    MatchType::Ge => actual >= expected,
                    _ => actual <= expected,
                })
            }

            Some(
                match_type @ (MatchType::SemverEq
                | MatchType::SemverGt
                | MatchType::SemverLt
                | MatchType::SemverGe
                | MatchType::SemverLe),
            ) => {
                let target = match condition_value {
                    Some(AttributeValue::String(s)) => s
                        .parse::<SemanticVersion>()
                        .map_err(|_| MatchError::InvalidCondition)?,
                    _ => return Err(MatchError::InvalidCondition),
                };
                let actual = match attribute {
                    AttributeValue::String(s) => s
                        .parse::<SemanticVersion>()
                        .map_err(|_| MatchError::TypeMismatch)?,
                    _ => return Err(MatchError::TypeMismatch),
                };
                let ordering = actual.compare_to_target(&target);
                Ok(match match_type {
                    MatchType::SemverEq => ordering == Ordering::Equal,
                    MatchType::SemverGt => ordering == Ordering::Greater,
                    MatchType::SemverLt => ordering == Ordering::Less,
                    MatchType::SemverGe => ordering != Ordering::Less,
                    _ => ordering != Ordering::Greater,
                })
            }

            // Handled before reaching here.
            Some(MatchType::Exists | MatchType::Unsupported) => Err(MatchError::InvalidCondition),
        }
    }
}

fn safe_number(n: f64) -> Option<f64> {
    (n.is_finite() && n.abs() <= MAX_SAFE_NUMBER).then_some(n)
}
