//! Threshold rule DSL
//!
//! Rules look like `warning: > historical * 1.2 AND > 70`. They are compiled
//! once when an alert is built and evaluated on every sample.

pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::{evaluate_rule, first_match, resolve_threshold};
pub use parser::{
    sort_by_severity, ArithOp, Comparator, Expression, LogicalOp, Modifier, Rule, Threshold,
};

/// Malformed rule text
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid rule {raw:?}: {reason}")]
pub struct RuleSyntaxError {
    pub raw: String,
    pub reason: String,
}

impl RuleSyntaxError {
    pub fn new(raw: &str, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}
