use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Attribute key that overrides the user id as the bucketing input.
pub const BUCKETING_ID_ATTRIBUTE: &str = "$opt_bucketing_id";

/// User attributes passed into a decision.
///
/// # Examples
/// ```
/// # use experiment_engine::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("beta_tester".to_owned(), true.into()),
///     ("browser_type".to_owned(), "firefox".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// A single attribute value.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, `i64`, and `bool`.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Number(f64),
    Boolean(bool),
    /// Attribute is present but explicitly null.
    Null,
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Human-readable type name, used in log messages.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "string",
            AttributeValue::Number(_) => "number",
            AttributeValue::Boolean(_) => "boolean",
            AttributeValue::Null => "null",
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}
