//! Audience condition trees and their three-valued evaluation.
//!
//! A condition tree is made of `and`/`or`/`not` operators over leaves. Two kinds of leaves exist:
//! [`UserCondition`] (attribute matchers, used inside audiences) and [`AudienceRef`] (audience
//! ids, used in an experiment's `audienceConditions`). Evaluation yields a [`Tribool`]: `Unknown`
//! propagates when a leaf cannot be evaluated (missing attribute, type mismatch, unsupported
//! matcher) and is treated as "not in audience" by the decision layer.

mod audience;
mod matchers;
mod parse;
mod semantic_version;

use std::ops::Not;

pub use audience::{evaluate_audience, AudienceRef};
pub use matchers::{MatchType, UserCondition, CUSTOM_ATTRIBUTE_CONDITION_TYPE};
pub use parse::{parse_condition_tree, ConditionLeaf, ConditionParseError};
pub use semantic_version::{SemanticVersion, SemanticVersionParseError};

/// Three-valued boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tribool {
    True,
    False,
    Unknown,
}

impl Tribool {
    pub fn is_true(self) -> bool {
        self == Tribool::True
    }
}

impl From<bool> for Tribool {
    fn from(value: bool) -> Self {
        if value {
            Tribool::True
        } else {
            Tribool::False
        }
    }
}

impl From<Option<bool>> for Tribool {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Tribool::Unknown, Tribool::from)
    }
}

impl From<Tribool> for Option<bool> {
    fn from(value: Tribool) -> Self {
        match value {
            Tribool::True => Some(true),
            Tribool::False => Some(false),
            Tribool::Unknown => None,
        }
    }
}

impl Not for Tribool {
    type Output = Tribool;

    fn not(self) -> Tribool {
        match self {
            Tribool::True => Tribool::False,
            Tribool::False => Tribool::True,
            Tribool::Unknown => Tribool::Unknown,
        }
    }
}

/// A boolean expression tree over leaves of type `L`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode<L> {
    /// True when every child is true. An empty `And` is true.
    And(Vec<ConditionNode<L>>),
    /// True when any child is true. An empty `Or` is false.
    Or(Vec<ConditionNode<L>>),
    Not(Box<ConditionNode<L>>),
    Leaf(L),
}

impl<L> ConditionNode<L> {
    /// Evaluate the tree, delegating leaves to `eval_leaf`.
    ///
    /// `And` returns `False` as soon as a child is false, otherwise `Unknown` if any child was
    /// unknown. `Or` returns `True` as soon as a child is true, otherwise `Unknown` if any child
    /// was unknown. Children after a short-circuit are not evaluated.
    pub fn evaluate<F>(&self, eval_leaf: &mut F) -> Tribool
    where
        F: FnMut(&L) -> Tribool,
    {
        match self {
            ConditionNode::And(children) => {
                let mut saw_unknown = false;
                for child in children {
                    match child.evaluate(eval_leaf) {
                        Tribool::False => return Tribool::False,
                        Tribool::Unknown => saw_unknown = true,
                        Tribool::True => {}
                    }
                }
                if saw_unknown {
                    Tribool::Unknown
                } else {
                    Tribool::True
                }
            }
            ConditionNode::Or(children) => {
                let mut saw_unknown = false;
                for child in children {
                    match child.evaluate(eval_leaf) {
                        Tribool::True => return Tribool::True,
                        Tribool::Unknown => saw_unknown = true,
                        Tribool::False => {}
                    }
                }
                if saw_unknown {
                    Tribool::Unknown
                } else {
                    Tribool::False
                }
            }
            ConditionNode::Not(child) => !child.evaluate(eval_leaf),
            ConditionNode::Leaf(leaf) => eval_leaf(leaf),
        }
    }
}
