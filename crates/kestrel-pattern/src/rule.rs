//! Inference rules: `rule label: when { ... } then { ... }`.

use crate::concept::Value;
use crate::conjunction::Conjunction;
use crate::constraint::RolePlayer;
use crate::variable::Variable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Errors raised while validating a rule definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("rule `{rule}`: `when` pattern is empty")]
    EmptyWhen { rule: String },

    #[error("rule `{rule}`: conclusion variable {variable} is not bound by `when`")]
    UnboundConclusionVariable { rule: String, variable: Variable },

    #[error("rule `{rule}`: generated variable {variable} must not appear in `when`")]
    GeneratedVariableInWhen { rule: String, variable: Variable },

    #[error("rule `{rule}`: relation conclusion has no role players")]
    NoRolePlayers { rule: String },
}

/// A concrete attribute produced by a `has` conclusion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducedAttribute {
    pub type_label: String,
    pub value: Value,
}

/// The single constraint a rule concludes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Conclusion {
    /// `$owner has $attribute`. When `produced` is set the attribute is a
    /// new value (`$owner has age 42`) bound to `attribute`, otherwise
    /// `attribute` is bound by the rule body.
    Has {
        owner: Variable,
        attribute: Variable,
        produced: Option<ProducedAttribute>,
    },
    /// `(role: $player, ...) isa type_label`, bound to `relation`.
    Relation {
        relation: Variable,
        type_label: String,
        players: Vec<RolePlayer>,
    },
}

impl Conclusion {
    /// `$owner has type_label value`
    pub fn has_value(owner: impl Into<Variable>, type_label: &str, value: impl Into<Value>) -> Self {
        Conclusion::Has {
            owner: owner.into(),
            attribute: Variable::conclusion(),
            produced: Some(ProducedAttribute {
                type_label: type_label.to_string(),
                value: value.into(),
            }),
        }
    }

    /// `$owner has $attribute` with both bound by the rule body.
    pub fn has(owner: impl Into<Variable>, attribute: impl Into<Variable>) -> Self {
        Conclusion::Has {
            owner: owner.into(),
            attribute: attribute.into(),
            produced: None,
        }
    }

    pub fn relation<I, R, P>(type_label: &str, players: I) -> Self
    where
        I: IntoIterator<Item = (R, P)>,
        R: Into<String>,
        P: Into<Variable>,
    {
        Conclusion::Relation {
            relation: Variable::conclusion(),
            type_label: type_label.to_string(),
            players: players
                .into_iter()
                .map(|(role, player)| RolePlayer::new(role, player))
                .collect(),
        }
    }

    /// The variable the conclusion binds to a new concept, if any.
    pub fn generated(&self) -> Option<&Variable> {
        match self {
            Conclusion::Has {
                attribute,
                produced: Some(_),
                ..
            } => Some(attribute),
            Conclusion::Has { produced: None, .. } => None,
            Conclusion::Relation { relation, .. } => Some(relation),
        }
    }

    /// Variables the rule body must bind.
    pub fn bound_variables(&self) -> BTreeSet<Variable> {
        match self {
            Conclusion::Has {
                owner,
                attribute,
                produced,
            } => {
                let mut vars = BTreeSet::from([owner.clone()]);
                if produced.is_none() {
                    vars.insert(attribute.clone());
                }
                vars
            }
            Conclusion::Relation { players, .. } => {
                players.iter().map(|rp| rp.player.clone()).collect()
            }
        }
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        let mut vars = self.bound_variables();
        vars.extend(self.generated().cloned());
        vars
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conclusion::Has {
                owner,
                produced: Some(produced),
                ..
            } => write!(f, "{owner} has {} {}", produced.type_label, produced.value),
            Conclusion::Has { owner, attribute, .. } => write!(f, "{owner} has {attribute}"),
            Conclusion::Relation {
                type_label, players, ..
            } => {
                write!(f, "(")?;
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

/// A validated inference rule. Rules are identified by label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    label: String,
    when: Conjunction,
    then: Conclusion,
}

impl Rule {
    pub fn new(label: impl Into<String>, when: Conjunction, then: Conclusion) -> Result<Self, RuleError> {
        let label = label.into();
        if when.is_empty() {
            return Err(RuleError::EmptyWhen { rule: label });
        }
        if let Conclusion::Relation { players, .. } = &then {
            if players.is_empty() {
                return Err(RuleError::NoRolePlayers { rule: label });
            }
        }

        // Variables bound in every branch are the only ones safe to rely on.
        let bound = when.variables();
        for variable in then.bound_variables() {
            if !bound.contains(&variable) {
                return Err(RuleError::UnboundConclusionVariable { rule: label, variable });
            }
        }
        if let Some(generated) = then.generated() {
            let mentioned = when.negations().iter().any(|n| n.variables().contains(generated));
            if mentioned || when.all_variables().contains(generated) {
                return Err(RuleError::GeneratedVariableInWhen {
                    rule: label,
                    variable: generated.clone(),
                });
            }
        }

        Ok(Self { label, when, then })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn when(&self) -> &Conjunction {
        &self.when
    }

    pub fn then(&self) -> &Conclusion {
        &self.then
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}: when {} then {{ {}; }}", self.label, self.when, self.then)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_rule() {
        let rule = Rule::new(
            "bobs-are-42",
            Conjunction::builder().has_value("p", "name", "Bob").build(),
            Conclusion::has_value("p", "age", 42),
        )
        .unwrap();
        assert_eq!(rule.label(), "bobs-are-42");
        assert_eq!(rule.then().generated(), Some(&Variable::conclusion()));
    }

    #[test]
    fn test_unbound_conclusion_variable_rejected() {
        let err = Rule::new(
            "broken",
            Conjunction::builder().isa("x", "person").build(),
            Conclusion::relation("friendship", [("friend", "x"), ("friend", "y")]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RuleError::UnboundConclusionVariable {
                rule: "broken".into(),
                variable: Variable::named("y"),
            }
        );
    }

    #[test]
    fn test_empty_when_rejected() {
        let err = Rule::new("empty", Conjunction::default(), Conclusion::has("x", "a")).unwrap_err();
        assert!(matches!(err, RuleError::EmptyWhen { .. }));
    }

    #[test]
    fn test_generated_variable_in_negation_rejected() {
        let err = Rule::new(
            "strangers",
            Conjunction::builder()
                .isa("x", "person")
                .isa("y", "person")
                .not([Conjunction::builder().isa("r", "friendship").build()])
                .build(),
            Conclusion::Relation {
                relation: Variable::named("r"),
                type_label: "strangership".into(),
                players: vec![RolePlayer::new("stranger", "x"), RolePlayer::new("stranger", "y")],
            },
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::GeneratedVariableInWhen { .. }));
    }
}
