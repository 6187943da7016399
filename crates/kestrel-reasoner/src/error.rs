//! Reasoner errors.
//!
//! Errors are `Clone` because one termination cause is delivered to every
//! resolver of a registry and to every root still waiting on answers.

use kestrel_pattern::Conjunction;

pub type Result<T, E = ReasonerError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReasonerError {
    /// The traversal collaborator failed while reading stored facts.
    #[error("traversal of {pattern} failed: {message}")]
    Traversal { pattern: String, message: String },

    /// A rule conclusion could not be materialised from its body answer.
    #[error("rule `{rule}` could not conclude: {message}")]
    Conclusion { rule: String, message: String },

    /// Resolution was terminated, either by the caller or because the
    /// registry is closing.
    #[error("resolution terminated: {0}")]
    Terminated(String),

    /// A rule depends on itself through a negation.
    #[error("rule `{rule}` negates a pattern concluded by `{negated}`, which depends on it")]
    Unstratified { rule: String, negated: String },

    #[error("resolution did not reach a fixpoint within {limit} iterations")]
    IterationLimit { limit: u32 },

    #[error("invalid reasoner configuration: {0}")]
    Config(String),

    #[error("failed to start resolver runtime: {0}")]
    Runtime(String),
}

impl ReasonerError {
    pub(crate) fn traversal(pattern: &Conjunction, err: &anyhow::Error) -> Self {
        ReasonerError::Traversal {
            pattern: pattern.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn terminated(reason: impl Into<String>) -> Self {
        ReasonerError::Terminated(reason.into())
    }
}
