use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use super::ConditionNode;

/// A type that can appear as a leaf of a condition tree.
pub trait ConditionLeaf: Sized {
    fn from_json(value: &Value) -> Result<Self, ConditionParseError>;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionParseError {
    #[error("condition string is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("\"not\" requires an operand")]
    MissingNotOperand,

    #[error("invalid condition leaf: {0}")]
    InvalidLeaf(String),
}

const AND: &str = "and";
const OR: &str = "or";
const NOT: &str = "not";

/// Parse the datafile representation of a condition tree.
///
/// Arrays whose first element is `"and"`, `"or"`, or `"not"` are operators over the remaining
/// elements. Any other array is an implicit `or` over all of its elements, and an empty array is
/// an empty `and`. `not` applies to its first operand only. A JSON string holding an array is
/// parsed first, which is how legacy audiences encode their conditions. Anything else is a leaf.
pub fn parse_condition_tree<L: ConditionLeaf>(
    value: &Value,
) -> Result<ConditionNode<L>, ConditionParseError> {
    match value {
        Value::Array(items) => parse_operator(items),
        Value::String(s) if s.trim_start().starts_with('[') => {
            let inner: Value = serde_json::from_str(s)
                .map_err(|err| ConditionParseError::InvalidJson(err.to_string()))?;
            parse_condition_tree(&inner)
        }
        leaf => Ok(ConditionNode::Leaf(L::from_json(leaf)?)),
    }
}

fn parse_operator<L: ConditionLeaf>(
    items: &[Value],
) -> Result<ConditionNode<L>, ConditionParseError> {
    let (operator, operands) = match items.first() {
        None => return Ok(ConditionNode::And(Vec::new())),
        Some(Value::String(s)) if s == AND || s == OR || s == NOT => (s.as_str(), &items[1..]),
        Some(_) => (OR, items),
    };

    let mut children = operands
        .iter()
        .map(|operand| match operand {
            Value::Array(nested) => parse_operator(nested),
            leaf => L::from_json(leaf).map(ConditionNode::Leaf),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(match operator {
        AND => ConditionNode::And(children),
        NOT => {
            if children.is_empty() {
                return Err(ConditionParseError::MissingNotOperand);
            }
            ConditionNode::Not(Box::new(children.swap_remove(0)))
        }
        _ => ConditionNode::Or(children),
    })
}

impl<'de, L: ConditionLeaf> Deserialize<'de> for ConditionNode<L> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        parse_condition_tree(&value).map_err(de::Error::custom)
    }
}
