//! Atomic constraints.

use crate::concept::Value;
use crate::variable::Variable;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A role-player in a relation constraint: `role: $player`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RolePlayer {
    pub role: String,
    pub player: Variable,
}

impl RolePlayer {
    pub fn new(role: impl Into<String>, player: impl Into<Variable>) -> Self {
        Self {
            role: role.into(),
            player: player.into(),
        }
    }
}

/// A single constraint over one or more variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Constraint {
    /// `$thing isa type_label` (exact label match).
    Isa { thing: Variable, type_label: String },
    /// `$owner has $attribute`
    Has { owner: Variable, attribute: Variable },
    /// `$attribute = value`
    Value { attribute: Variable, value: Value },
    /// `$relation (role: $player, ...) isa type_label`
    Relation {
        relation: Variable,
        type_label: String,
        players: Vec<RolePlayer>,
    },
}

impl Constraint {
    /// Variables in order of first appearance, without repeats.
    pub fn variables(&self) -> Vec<Variable> {
        let mut vars = Vec::new();
        let mut push = |v: &Variable| {
            if !vars.contains(v) {
                vars.push(v.clone());
            }
        };
        match self {
            Constraint::Isa { thing, .. } => push(thing),
            Constraint::Has { owner, attribute } => {
                push(owner);
                push(attribute);
            }
            Constraint::Value { attribute, .. } => push(attribute),
            Constraint::Relation {
                relation, players, ..
            } => {
                push(relation);
                for rp in players {
                    push(&rp.player);
                }
            }
        }
        vars
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Isa { thing, type_label } => write!(f, "{thing} isa {type_label}"),
            Constraint::Has { owner, attribute } => write!(f, "{owner} has {attribute}"),
            Constraint::Value { attribute, value } => write!(f, "{attribute} = {value}"),
            Constraint::Relation {
                relation,
                type_label,
                players,
            } => {
                write!(f, "{relation} (")?;
                for (i, rp) in players.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", rp.role, rp.player)?;
                }
                write!(f, ") isa {type_label}")
            }
        }
    }
}
