//! Unification of concludables with rule conclusions.
//!
//! A unifier maps each variable of a canonical concludable to one or more
//! variables of a rule's `then`. Going forward it turns a concludable's
//! bounds into bounds for the rule; going back it turns a materialised
//! conclusion into an answer for the concludable.
//!
//! ```text
//!   concludable  $_0 has $_1 (age 42)          then  $p has age 42
//!   unifier      $_0 → {$p}   $_1 → {$_then}
//! ```
//!
//! When a rule's `has` conclusion reuses an attribute from its body, the
//! attribute type and value the concludable demands can only be checked at
//! runtime; they are kept as requirements.

use crate::resolvable::ConcludableShape;
use kestrel_pattern::{Concept, ConceptMap, Conclusion, RolePlayer, Value, Variable};
use std::collections::{BTreeMap, BTreeSet};

/// Runtime checks on concepts bound to concludable variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    types: BTreeMap<Variable, String>,
    values: BTreeMap<Variable, Value>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.values.is_empty()
    }

    fn admits(&self, variable: &Variable, concept: &Concept) -> bool {
        let type_ok = self
            .types
            .get(variable)
            .map_or(true, |t| t == concept.type_label());
        let value_ok = self
            .values
            .get(variable)
            .map_or(true, |v| concept.value() == Some(v));
        type_ok && value_ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unifier {
    mapping: BTreeMap<Variable, BTreeSet<Variable>>,
    requirements: Requirements,
}

impl Unifier {
    pub fn mapping(&self) -> &BTreeMap<Variable, BTreeSet<Variable>> {
        &self.mapping
    }

    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Translate concludable bounds into rule bounds. `None` when the bounds
    /// violate a requirement or bind one rule variable two ways.
    pub fn unify(&self, bounds: &ConceptMap) -> Option<ConceptMap> {
        let mut unified: BTreeMap<Variable, Concept> = BTreeMap::new();
        for (variable, concept) in bounds.iter() {
            if !self.requirements.admits(variable, concept) {
                return None;
            }
            for target in self.mapping.get(variable).into_iter().flatten() {
                match unified.get(target) {
                    Some(existing) if existing != concept => return None,
                    Some(_) => {}
                    None => {
                        unified.insert(target.clone(), concept.clone());
                    }
                }
            }
        }
        Some(unified.into_iter().collect())
    }

    /// Translate a materialised conclusion back into concludable variables.
    /// `None` when variables mapped to the same concludable variable got
    /// different concepts, or a requirement fails.
    pub fn unify_back(&self, conclusion: &ConceptMap) -> Option<ConceptMap> {
        let mut answer: BTreeMap<Variable, Concept> = BTreeMap::new();
        for (variable, targets) in &self.mapping {
            let mut concept: Option<&Concept> = None;
            for target in targets {
                let bound = conclusion.get(target)?;
                match concept {
                    Some(c) if c != bound => return None,
                    _ => concept = Some(bound),
                }
            }
            let concept = concept?;
            if !self.requirements.admits(variable, concept) {
                return None;
            }
            answer.insert(variable.clone(), concept.clone());
        }
        Some(answer.into_iter().collect())
    }
}

/// Every way `shape` can unify with `conclusion`. Empty when the conclusion
/// can never produce an answer to the shape.
pub fn unifiers(shape: &ConcludableShape, conclusion: &Conclusion) -> Vec<Unifier> {
    match (shape, conclusion) {
        (
            ConcludableShape::Has {
                owner,
                attribute,
                attribute_type,
                value,
            },
            Conclusion::Has {
                owner: then_owner,
                attribute: then_attribute,
                produced,
            },
        ) => {
            let mut requirements = Requirements::default();
            match produced {
                Some(produced) => {
                    if attribute_type.as_ref().is_some_and(|t| t != &produced.type_label)
                        || value.as_ref().is_some_and(|v| v != &produced.value)
                    {
                        return Vec::new();
                    }
                }
                None => {
                    if let Some(t) = attribute_type {
                        requirements.types.insert(attribute.clone(), t.clone());
                    }
                    if let Some(v) = value {
                        requirements.values.insert(attribute.clone(), v.clone());
                    }
                }
            }
            let mut mapping: BTreeMap<Variable, BTreeSet<Variable>> = BTreeMap::new();
            mapping.entry(owner.clone()).or_default().insert(then_owner.clone());
            mapping
                .entry(attribute.clone())
                .or_default()
                .insert(then_attribute.clone());
            vec![Unifier { mapping, requirements }]
        }
        (
            ConcludableShape::Relation {
                relation,
                type_label,
                players,
            },
            Conclusion::Relation {
                relation: then_relation,
                type_label: then_type,
                players: then_players,
            },
        ) => {
            if type_label != then_type || players.len() > then_players.len() {
                return Vec::new();
            }
            let mut unifiers: Vec<Unifier> = Vec::new();
            let mut taken = vec![false; then_players.len()];
            let mut assignment = Vec::with_capacity(players.len());
            assign_players(players, then_players, &mut taken, &mut assignment, &mut |assignment: &[usize]| {
                let mut mapping: BTreeMap<Variable, BTreeSet<Variable>> = BTreeMap::new();
                mapping.entry(relation.clone()).or_default().insert(then_relation.clone());
                for (rp, &target) in players.iter().zip(assignment) {
                    mapping
                        .entry(rp.player.clone())
                        .or_default()
                        .insert(then_players[target].player.clone());
                }
                let unifier = Unifier {
                    mapping,
                    requirements: Requirements::default(),
                };
                if !unifiers.contains(&unifier) {
                    unifiers.push(unifier);
                }
            });
            unifiers
        }
        (ConcludableShape::Isa { thing, type_label }, Conclusion::Relation { relation, type_label: then_type, .. }) => {
            if type_label != then_type {
                return Vec::new();
            }
            vec![Unifier {
                mapping: BTreeMap::from([(thing.clone(), BTreeSet::from([relation.clone()]))]),
                requirements: Requirements::default(),
            }]
        }
        // A has conclusion whose attribute comes from the body creates no
        // new attribute, so only produced attributes answer an isa.
        (
            ConcludableShape::Isa { thing, type_label },
            Conclusion::Has {
                attribute,
                produced: Some(produced),
                ..
            },
        ) => {
            if &produced.type_label != type_label {
                return Vec::new();
            }
            vec![Unifier {
                mapping: BTreeMap::from([(thing.clone(), BTreeSet::from([attribute.clone()]))]),
                requirements: Requirements::default(),
            }]
        }
        _ => Vec::new(),
    }
}

/// Injective, role-preserving assignments of query players to conclusion
/// players.
fn assign_players(
    players: &[RolePlayer],
    then_players: &[RolePlayer],
    taken: &mut [bool],
    assignment: &mut Vec<usize>,
    emit: &mut dyn FnMut(&[usize]),
) {
    let Some(rp) = players.get(assignment.len()) else {
        emit(assignment);
        return;
    };
    for (i, candidate) in then_players.iter().enumerate() {
        if taken[i] || candidate.role != rp.role {
            continue;
        }
        taken[i] = true;
        assignment.push(i);
        assign_players(players, then_players, taken, assignment, emit);
        assignment.pop();
        taken[i] = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::named(name)
    }

    fn friendship(players: &[(&str, &str)]) -> ConcludableShape {
        ConcludableShape::Relation {
            relation: var("r"),
            type_label: "friendship".into(),
            players: players.iter().map(|(role, p)| RolePlayer::new(*role, *p)).collect(),
        }
    }

    #[test]
    fn test_produced_attribute_is_checked_statically() {
        let then = Conclusion::has_value("p", "age", 42);
        let matching = ConcludableShape::Has {
            owner: var("x"),
            attribute: var("a"),
            attribute_type: Some("age".into()),
            value: Some(Value::Long(42)),
        };
        let wrong_value = ConcludableShape::Has {
            owner: var("x"),
            attribute: var("a"),
            attribute_type: Some("age".into()),
            value: Some(Value::Long(41)),
        };
        assert_eq!(unifiers(&matching, &then).len(), 1);
        assert!(unifiers(&wrong_value, &then).is_empty());
    }

    #[test]
    fn test_body_attribute_is_checked_at_runtime() {
        let then = Conclusion::has("p", "n");
        let shape = ConcludableShape::Has {
            owner: var("x"),
            attribute: var("a"),
            attribute_type: Some("nickname".into()),
            value: None,
        };
        let unifier = &unifiers(&shape, &then)[0];
        assert!(!unifier.requirements().is_empty());

        let nickname: ConceptMap = [(var("a"), Concept::attribute("nickname", "Bo"))].into_iter().collect();
        let unified = unifier.unify(&nickname).unwrap();
        assert_eq!(unified.get(&var("n")), Some(&Concept::attribute("nickname", "Bo")));

        let name: ConceptMap = [(var("a"), Concept::attribute("name", "Bo"))].into_iter().collect();
        assert!(unifier.unify(&name).is_none());

        let conclusion: ConceptMap = [
            (var("p"), Concept::entity(1, "person")),
            (var("n"), Concept::attribute("name", "Bo")),
        ]
        .into_iter()
        .collect();
        assert!(unifier.unify_back(&conclusion).is_none());
    }

    #[test]
    fn test_repeated_roles_yield_one_unifier_per_assignment() {
        let then = Conclusion::relation("friendship", [("friend", "x"), ("friend", "y")]);
        assert_eq!(unifiers(&friendship(&[("friend", "a"), ("friend", "b")]), &then).len(), 2);
        assert_eq!(unifiers(&friendship(&[("friend", "a")]), &then).len(), 2);
        // Both assignments of a repeated player give the same mapping.
        assert_eq!(unifiers(&friendship(&[("friend", "a"), ("friend", "a")]), &then).len(), 1);
        assert!(unifiers(&friendship(&[("enemy", "a")]), &then).is_empty());
    }

    #[test]
    fn test_unify_back_requires_agreement() {
        let then = Conclusion::relation("friendship", [("friend", "x"), ("friend", "y")]);
        let shape = friendship(&[("friend", "a"), ("friend", "a")]);
        let unifier = &unifiers(&shape, &then)[0];

        let alice = Concept::entity(1, "person");
        let bob = Concept::entity(2, "person");
        let relation = Concept::Relation {
            iid: 9,
            type_label: "friendship".into(),
            inferred: true,
        };
        let distinct: ConceptMap = [
            (Variable::conclusion(), relation.clone()),
            (var("x"), alice.clone()),
            (var("y"), bob),
        ]
        .into_iter()
        .collect();
        assert!(unifier.unify_back(&distinct).is_none());

        let same: ConceptMap = [(Variable::conclusion(), relation), (var("x"), alice.clone()), (var("y"), alice)]
            .into_iter()
            .collect();
        let answer = unifier.unify_back(&same).unwrap();
        assert_eq!(answer.len(), 2);
    }

    #[test]
    fn test_unify_rejects_conflicting_bounds() {
        let unifier = Unifier {
            mapping: BTreeMap::from([
                (var("a"), BTreeSet::from([var("x")])),
                (var("b"), BTreeSet::from([var("x")])),
            ]),
            requirements: Requirements::default(),
        };
        let bounds: ConceptMap = [(var("a"), Concept::entity(1, "person")), (var("b"), Concept::entity(2, "person"))]
            .into_iter()
            .collect();
        assert!(unifier.unify(&bounds).is_none());
    }
}
