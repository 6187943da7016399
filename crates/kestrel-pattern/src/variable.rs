//! Pattern variables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A variable slot in a pattern.
///
/// Named variables are *retrievable*: they are surfaced to the caller in
/// final answers. Anonymous variables are internal plumbing introduced by
/// pattern construction (e.g. the attribute in `$p has age 42`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variable {
    Named(String),
    Anonymous(u32),
}

impl Variable {
    /// Id reserved for the variable a rule conclusion generates.
    pub const CONCLUSION_ID: u32 = u32::MAX;

    pub fn named(name: impl Into<String>) -> Self {
        Variable::Named(name.into())
    }

    pub fn anonymous(id: u32) -> Self {
        Variable::Anonymous(id)
    }

    /// The variable bound to the attribute or relation a rule produces.
    pub fn conclusion() -> Self {
        Variable::Anonymous(Self::CONCLUSION_ID)
    }

    pub fn is_retrievable(&self) -> bool {
        matches!(self, Variable::Named(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Variable::Named(name) => Some(name),
            Variable::Anonymous(_) => None,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Named(name) => write!(f, "${name}"),
            Variable::Anonymous(id) if *id == Self::CONCLUSION_ID => write!(f, "$_then"),
            Variable::Anonymous(id) => write!(f, "$_{id}"),
        }
    }
}

impl From<&str> for Variable {
    fn from(name: &str) -> Self {
        Variable::named(name)
    }
}

impl From<String> for Variable {
    fn from(name: String) -> Self {
        Variable::Named(name)
    }
}
