//! Conjunctions, disjunctions and the pattern builder.

use crate::concept::Value;
use crate::constraint::{Constraint, RolePlayer};
use crate::variable::Variable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Conjunction
// ============================================================================

/// An ordered set of constraints, optionally with nested disjunctions and
/// negated blocks.
///
/// Equality and hashing are structural, which is what resolver caches key
/// on. Constraint order is kept as written: it is the insertion order used
/// to break planning ties.
///
/// A negated block matches when it has no answer under the bindings of the
/// enclosing conjunction. Variables that only occur inside it are local to
/// it and never appear in answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conjunction {
    constraints: Vec<Constraint>,
    disjunctions: Vec<Disjunction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    negations: Vec<Disjunction>,
}

impl Conjunction {
    pub fn new(constraints: Vec<Constraint>) -> Self {
        Self {
            constraints,
            disjunctions: Vec::new(),
            negations: Vec::new(),
        }
    }

    pub fn with_disjunctions(constraints: Vec<Constraint>, disjunctions: Vec<Disjunction>) -> Self {
        Self {
            constraints,
            disjunctions,
            negations: Vec::new(),
        }
    }

    /// Attach negated blocks.
    pub fn with_negations(mut self, negations: Vec<Disjunction>) -> Self {
        self.negations = negations;
        self
    }

    pub fn builder() -> ConjunctionBuilder {
        ConjunctionBuilder::default()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn disjunctions(&self) -> &[Disjunction] {
        &self.disjunctions
    }

    pub fn negations(&self) -> &[Disjunction] {
        &self.negations
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty() && self.disjunctions.is_empty() && self.negations.is_empty()
    }

    /// Variables of this conjunction's own constraints.
    pub fn variables(&self) -> BTreeSet<Variable> {
        self.constraints
            .iter()
            .flat_map(|c| c.variables())
            .collect()
    }

    /// Variables including those of nested disjunctions. Negated blocks
    /// bind nothing and are not included.
    pub fn all_variables(&self) -> BTreeSet<Variable> {
        let mut vars = self.variables();
        for disjunction in &self.disjunctions {
            vars.extend(disjunction.variables());
        }
        vars
    }

    /// Named variables anywhere in the pattern.
    pub fn retrieved(&self) -> BTreeSet<Variable> {
        self.all_variables()
            .into_iter()
            .filter(Variable::is_retrievable)
            .collect()
    }

    /// Highest anonymous id in use, negated blocks included, ignoring the
    /// reserved conclusion id.
    pub fn max_anonymous(&self) -> Option<u32> {
        let mut variables = self.all_variables();
        for negation in &self.negations {
            variables.extend(negation.variables());
        }
        variables
            .iter()
            .filter_map(|v| match v {
                Variable::Anonymous(id) if *id != Variable::CONCLUSION_ID => Some(*id),
                _ => None,
            })
            .max()
    }

    /// Renumber anonymous variables by `offset`, leaving the reserved
    /// conclusion slot alone.
    pub fn shift_anonymous(&self, offset: u32) -> Conjunction {
        if offset == 0 {
            return self.clone();
        }
        let shift = |v: &Variable| match v {
            Variable::Anonymous(id) if *id != Variable::CONCLUSION_ID => Variable::anonymous(id + offset),
            other => other.clone(),
        };
        let constraints = self
            .constraints
            .iter()
            .map(|c| match c {
                Constraint::Isa { thing, type_label } => Constraint::Isa {
                    thing: shift(thing),
                    type_label: type_label.clone(),
                },
                Constraint::Has { owner, attribute } => Constraint::Has {
                    owner: shift(owner),
                    attribute: shift(attribute),
                },
                Constraint::Value { attribute, value } => Constraint::Value {
                    attribute: shift(attribute),
                    value: value.clone(),
                },
                Constraint::Relation {
                    relation,
                    type_label,
                    players,
                } => Constraint::Relation {
                    relation: shift(relation),
                    type_label: type_label.clone(),
                    players: players
                        .iter()
                        .map(|rp| RolePlayer {
                            role: rp.role.clone(),
                            player: shift(&rp.player),
                        })
                        .collect(),
                },
            })
            .collect();
        let shift_branches =
            |d: &Disjunction| Disjunction::new(d.branches().iter().map(|b| b.shift_anonymous(offset)).collect());
        Conjunction {
            constraints,
            disjunctions: self.disjunctions.iter().map(shift_branches).collect(),
            negations: self.negations.iter().map(shift_branches).collect(),
        }
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for constraint in &self.constraints {
            write!(f, " {constraint};")?;
        }
        for disjunction in &self.disjunctions {
            write!(f, " {disjunction};")?;
        }
        for negation in &self.negations {
            write!(f, " not {negation};")?;
        }
        write!(f, " }}")
    }
}

// ============================================================================
// Disjunction
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Disjunction {
    branches: Vec<Conjunction>,
}

impl Disjunction {
    pub fn new(branches: Vec<Conjunction>) -> Self {
        Self { branches }
    }

    pub fn branches(&self) -> &[Conjunction] {
        &self.branches
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.branches
            .iter()
            .flat_map(|b| b.all_variables())
            .collect()
    }

    pub fn retrieved(&self) -> BTreeSet<Variable> {
        self.variables()
            .into_iter()
            .filter(Variable::is_retrievable)
            .collect()
    }
}

impl fmt::Display for Disjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, branch) in self.branches.iter().enumerate() {
            if i > 0 {
                write!(f, " or ")?;
            }
            write!(f, "{branch}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent construction of conjunctions.
///
/// Anonymous variables are allocated from one counter; nested disjunction
/// branches are renumbered on the way in so they never reuse an outer slot.
///
/// ```
/// use kestrel_pattern::Conjunction;
///
/// let query = Conjunction::builder()
///     .isa("p", "person")
///     .has_value("p", "age", 42)
///     .build();
/// assert_eq!(query.constraints().len(), 4);
/// ```
#[derive(Debug, Default)]
pub struct ConjunctionBuilder {
    constraints: Vec<Constraint>,
    disjunctions: Vec<Disjunction>,
    negations: Vec<Disjunction>,
    next_anonymous: u32,
}

impl ConjunctionBuilder {
    fn fresh(&mut self) -> Variable {
        let var = Variable::anonymous(self.next_anonymous);
        self.next_anonymous += 1;
        var
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn isa(self, thing: impl Into<Variable>, type_label: &str) -> Self {
        self.constraint(Constraint::Isa {
            thing: thing.into(),
            type_label: type_label.to_string(),
        })
    }

    pub fn has(self, owner: impl Into<Variable>, attribute: impl Into<Variable>) -> Self {
        self.constraint(Constraint::Has {
            owner: owner.into(),
            attribute: attribute.into(),
        })
    }

    /// `$owner has type_label value`, through a fresh attribute variable.
    pub fn has_value(mut self, owner: impl Into<Variable>, type_label: &str, value: impl Into<Value>) -> Self {
        let attribute = self.fresh();
        self.constraints.push(Constraint::Has {
            owner: owner.into(),
            attribute: attribute.clone(),
        });
        self.constraints.push(Constraint::Isa {
            thing: attribute.clone(),
            type_label: type_label.to_string(),
        });
        self.constraints.push(Constraint::Value {
            attribute,
            value: value.into(),
        });
        self
    }

    pub fn value(self, attribute: impl Into<Variable>, value: impl Into<Value>) -> Self {
        self.constraint(Constraint::Value {
            attribute: attribute.into(),
            value: value.into(),
        })
    }

    /// A relation bound to a fresh anonymous variable.
    pub fn relation<I, R, P>(mut self, type_label: &str, players: I) -> Self
    where
        I: IntoIterator<Item = (R, P)>,
        R: Into<String>,
        P: Into<Variable>,
    {
        let relation = self.fresh();
        self.relation_as(relation, type_label, players)
    }

    pub fn relation_as<I, R, P>(self, relation: impl Into<Variable>, type_label: &str, players: I) -> Self
    where
        I: IntoIterator<Item = (R, P)>,
        R: Into<String>,
        P: Into<Variable>,
    {
        self.constraint(Constraint::Relation {
            relation: relation.into(),
            type_label: type_label.to_string(),
            players: players
                .into_iter()
                .map(|(role, player)| RolePlayer::new(role, player))
                .collect(),
        })
    }

    /// A nested disjunction. Anonymous variables of each branch are shifted
    /// past the ones this builder has handed out so they never collide.
    pub fn or(mut self, branches: impl IntoIterator<Item = Conjunction>) -> Self {
        let disjunction = self.shifted(branches);
        self.disjunctions.push(disjunction);
        self
    }

    /// A negated block: `not { branch } or { branch } ...`, shifted like
    /// [`or`](Self::or).
    pub fn not(mut self, branches: impl IntoIterator<Item = Conjunction>) -> Self {
        let negation = self.shifted(branches);
        self.negations.push(negation);
        self
    }

    fn shifted(&mut self, branches: impl IntoIterator<Item = Conjunction>) -> Disjunction {
        let mut shifted = Vec::new();
        for branch in branches {
            let offset = self.next_anonymous;
            let branch = branch.shift_anonymous(offset);
            if let Some(max) = branch.max_anonymous() {
                self.next_anonymous = self.next_anonymous.max(max + 1);
            }
            shifted.push(branch);
        }
        Disjunction::new(shifted)
    }

    pub fn build(self) -> Conjunction {
        Conjunction::with_disjunctions(self.constraints, self.disjunctions).with_negations(self.negations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_value_allocates_distinct_anonymous_variables() {
        let conj = Conjunction::builder()
            .has_value("p", "age", 42)
            .has_value("p", "name", "Bob")
            .build();

        let anonymous: Vec<_> = conj
            .variables()
            .into_iter()
            .filter(|v| !v.is_retrievable())
            .collect();
        assert_eq!(anonymous, vec![Variable::anonymous(0), Variable::anonymous(1)]);
    }

    #[test]
    fn test_disjunction_branches_do_not_reuse_outer_slots() {
        let conj = Conjunction::builder()
            .relation("twins", [("twin1", "p1"), ("twin2", "p2")])
            .or([
                Conjunction::builder().has_value("p1", "age", 24).build(),
                Conjunction::builder().has_value("p1", "age", 26).build(),
            ])
            .build();

        let outer = conj.variables();
        for branch in conj.disjunctions()[0].branches() {
            let inner: BTreeSet<_> = branch
                .variables()
                .into_iter()
                .filter(|v| !v.is_retrievable())
                .collect();
            assert!(inner.is_disjoint(&outer));
        }
        assert_eq!(conj.max_anonymous(), Some(2));
        assert_eq!(
            conj.retrieved(),
            BTreeSet::from([Variable::named("p1"), Variable::named("p2")])
        );
    }

    #[test]
    fn test_negated_variables_are_local() {
        let conj = Conjunction::builder()
            .isa("p", "person")
            .not([Conjunction::builder().has_value("p", "nickname", "Bobby").build()])
            .build();

        assert_eq!(conj.negations().len(), 1);
        assert_eq!(conj.retrieved(), BTreeSet::from([Variable::named("p")]));
        assert_eq!(conj.all_variables(), BTreeSet::from([Variable::named("p")]));
        assert_eq!(conj.max_anonymous(), Some(0));
        assert!(conj.to_string().contains("not {"));
    }

    #[test]
    fn test_structural_equality() {
        let a = Conjunction::builder().isa("x", "person").build();
        let b = Conjunction::builder().isa("x", "person").build();
        let c = Conjunction::builder().isa("y", "person").build();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
