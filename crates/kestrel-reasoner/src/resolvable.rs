//! Resolvables: the units a conjunction is split into.
//!
//! ```text
//!   { $p isa person; $p has $a; $a isa age; $a = 42; $p has name "Bob" }
//!        │
//!        ▼ classify
//!   Concludable  $p has $a (age 42)        ← some rule concludes `has age`
//!   Retrievable  { $p isa person; $p has $_0; $_0 isa name; $_0 = "Bob" }
//! ```
//!
//! A *concludable* is one constraint a rule could conclude, folded together
//! with the type and value constraints on the variable it generates. A
//! *retrievable* is a maximal connected group of the remaining constraints,
//! answered from stored facts alone. A *negated* resolvable is one `not`
//! block; it filters answers and binds nothing.
//!
//! Concludables are compared modulo variable names through their canonical
//! shape, so `$x has $y` and `$a has $b` share one resolver.

use crate::logic::LogicManager;
use crate::planner::Schedulable;
use kestrel_pattern::{Conjunction, Constraint, Disjunction, RolePlayer, Value, Variable};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Concludable shapes
// ============================================================================

/// The structure of a concludable constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConcludableShape {
    /// `$owner has $attribute`, optionally narrowed by `$attribute isa T`
    /// and `$attribute = v`.
    Has {
        owner: Variable,
        attribute: Variable,
        attribute_type: Option<String>,
        value: Option<Value>,
    },
    /// `$relation (role: $player, ...) isa T`
    Relation {
        relation: Variable,
        type_label: String,
        players: Vec<RolePlayer>,
    },
    /// `$thing isa T`
    Isa { thing: Variable, type_label: String },
}

impl ConcludableShape {
    /// The variable a rule would bind to newly produced data.
    pub fn generating(&self) -> &Variable {
        match self {
            ConcludableShape::Has { attribute, .. } => attribute,
            ConcludableShape::Relation { relation, .. } => relation,
            ConcludableShape::Isa { thing, .. } => thing,
        }
    }

    /// Variables in order of first appearance.
    pub fn variables(&self) -> Vec<Variable> {
        let mut vars: Vec<Variable> = Vec::new();
        for constraint in self.constraints() {
            for v in constraint.variables() {
                if !vars.contains(&v) {
                    vars.push(v);
                }
            }
        }
        vars
    }

    /// The shape as plain constraints, for reading stored facts.
    pub fn constraints(&self) -> Vec<Constraint> {
        match self {
            ConcludableShape::Has {
                owner,
                attribute,
                attribute_type,
                value,
            } => {
                let mut constraints = vec![Constraint::Has {
                    owner: owner.clone(),
                    attribute: attribute.clone(),
                }];
                if let Some(type_label) = attribute_type {
                    constraints.push(Constraint::Isa {
                        thing: attribute.clone(),
                        type_label: type_label.clone(),
                    });
                }
                if let Some(value) = value {
                    constraints.push(Constraint::Value {
                        attribute: attribute.clone(),
                        value: value.clone(),
                    });
                }
                constraints
            }
            ConcludableShape::Relation {
                relation,
                type_label,
                players,
            } => vec![Constraint::Relation {
                relation: relation.clone(),
                type_label: type_label.clone(),
                players: players.clone(),
            }],
            ConcludableShape::Isa { thing, type_label } => vec![Constraint::Isa {
                thing: thing.clone(),
                type_label: type_label.clone(),
            }],
        }
    }

    pub fn pattern(&self) -> Conjunction {
        Conjunction::new(self.constraints())
    }

    fn rename(&self, mapping: &BTreeMap<Variable, Variable>) -> ConcludableShape {
        let r = |v: &Variable| mapping.get(v).cloned().unwrap_or_else(|| v.clone());
        match self {
            ConcludableShape::Has {
                owner,
                attribute,
                attribute_type,
                value,
            } => ConcludableShape::Has {
                owner: r(owner),
                attribute: r(attribute),
                attribute_type: attribute_type.clone(),
                value: value.clone(),
            },
            ConcludableShape::Relation {
                relation,
                type_label,
                players,
            } => ConcludableShape::Relation {
                relation: r(relation),
                type_label: type_label.clone(),
                players: players
                    .iter()
                    .map(|rp| RolePlayer::new(rp.role.clone(), r(&rp.player)))
                    .collect(),
            },
            ConcludableShape::Isa { thing, type_label } => ConcludableShape::Isa {
                thing: r(thing),
                type_label: type_label.clone(),
            },
        }
    }

    /// Rename variables to `$_0, $_1, ...` in order of appearance, after
    /// sorting role players by role. Alpha-equivalent shapes produce equal
    /// canonical shapes. Returns the shape and the local → canonical map.
    pub fn canonical(&self) -> (ConcludableShape, BTreeMap<Variable, Variable>) {
        let ordered = match self {
            ConcludableShape::Relation {
                relation,
                type_label,
                players,
            } => {
                let mut players = players.clone();
                players.sort_by(|a, b| a.role.cmp(&b.role));
                ConcludableShape::Relation {
                    relation: relation.clone(),
                    type_label: type_label.clone(),
                    players,
                }
            }
            other => other.clone(),
        };
        let mapping: BTreeMap<Variable, Variable> = ordered
            .variables()
            .into_iter()
            .zip(0u32..)
            .map(|(v, i)| (v, Variable::anonymous(i)))
            .collect();
        (ordered.rename(&mapping), mapping)
    }
}

impl fmt::Display for ConcludableShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.constraints().iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

// ============================================================================
// Concludable
// ============================================================================

/// A concludable constraint in the variables of its conjunction, together
/// with its canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concludable {
    shape: ConcludableShape,
    canonical: ConcludableShape,
    to_canonical: BTreeMap<Variable, Variable>,
    from_canonical: BTreeMap<Variable, Variable>,
}

impl Concludable {
    pub fn new(shape: ConcludableShape) -> Self {
        let (canonical, to_canonical) = shape.canonical();
        let from_canonical = to_canonical.iter().map(|(l, c)| (c.clone(), l.clone())).collect();
        Self {
            shape,
            canonical,
            to_canonical,
            from_canonical,
        }
    }

    pub fn shape(&self) -> &ConcludableShape {
        &self.shape
    }

    pub fn canonical(&self) -> &ConcludableShape {
        &self.canonical
    }

    pub fn to_canonical(&self) -> &BTreeMap<Variable, Variable> {
        &self.to_canonical
    }

    pub fn from_canonical(&self) -> &BTreeMap<Variable, Variable> {
        &self.from_canonical
    }
}

// ============================================================================
// Resolvable
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvableKind {
    Retrievable(Conjunction),
    Concludable(Concludable),
    Negated(Disjunction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolvable {
    kind: ResolvableKind,
    /// Indices of the source conjunction's constraints this covers.
    constraints: Vec<usize>,
    variables: BTreeSet<Variable>,
    generating: Option<Variable>,
    required: BTreeSet<Variable>,
}

impl Resolvable {
    pub fn kind(&self) -> &ResolvableKind {
        &self.kind
    }

    pub fn is_concludable(&self) -> bool {
        matches!(self.kind, ResolvableKind::Concludable(_))
    }

    pub fn is_negated(&self) -> bool {
        matches!(self.kind, ResolvableKind::Negated(_))
    }

    pub fn constraint_indices(&self) -> &[usize] {
        &self.constraints
    }

    /// The constraints this resolvable answers, in the source variables.
    pub fn pattern(&self) -> Conjunction {
        match &self.kind {
            ResolvableKind::Retrievable(pattern) => pattern.clone(),
            ResolvableKind::Concludable(concludable) => concludable.shape().pattern(),
            ResolvableKind::Negated(negation) => Conjunction::new(Vec::new()).with_negations(vec![negation.clone()]),
        }
    }
}

impl Schedulable for Resolvable {
    fn variables(&self) -> &BTreeSet<Variable> {
        &self.variables
    }

    fn generating(&self) -> Option<&Variable> {
        self.generating.as_ref()
    }

    fn required(&self) -> &BTreeSet<Variable> {
        &self.required
    }

    fn is_negated(&self) -> bool {
        Resolvable::is_negated(self)
    }
}

impl fmt::Display for Resolvable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ResolvableKind::Retrievable(pattern) => write!(f, "retrievable {pattern}"),
            ResolvableKind::Concludable(c) => write!(f, "concludable {{ {}; }}", c.shape()),
            ResolvableKind::Negated(negation) => write!(f, "not {{ {negation} }}"),
        }
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Split the conjunction's own constraints into resolvables, followed by
/// one negated resolvable per `not` block. Nested disjunctions are not
/// covered; the caller resolves them separately.
///
/// Every constraint lands in exactly one resolvable. The result is ordered
/// by the first constraint each resolvable covers, so classification is
/// deterministic. A negated resolvable uses the variables its block shares
/// with the conjunction's own constraints; the rest are local to the block.
pub fn classify(conjunction: &Conjunction, logic: &LogicManager) -> Vec<Resolvable> {
    let constraints = conjunction.constraints();
    let mut used = vec![false; constraints.len()];
    let mut concludables: Vec<(usize, Vec<usize>, ConcludableShape)> = Vec::new();

    // Has and relation constraints first; they absorb isa/value constraints
    // on the variable they generate.
    for (i, constraint) in constraints.iter().enumerate() {
        match constraint {
            Constraint::Has { owner, attribute } => {
                let isa = constraints.iter().enumerate().position(|(j, c)| {
                    !used[j] && matches!(c, Constraint::Isa { thing, .. } if thing == attribute)
                });
                let value = constraints.iter().enumerate().position(|(j, c)| {
                    !used[j] && matches!(c, Constraint::Value { attribute: a, .. } if a == attribute)
                });
                let shape = ConcludableShape::Has {
                    owner: owner.clone(),
                    attribute: attribute.clone(),
                    attribute_type: isa.and_then(|j| match &constraints[j] {
                        Constraint::Isa { type_label, .. } => Some(type_label.clone()),
                        _ => None,
                    }),
                    value: value.and_then(|j| match &constraints[j] {
                        Constraint::Value { value, .. } => Some(value.clone()),
                        _ => None,
                    }),
                };
                if logic.is_concludable(&shape) {
                    let mut covered = vec![i];
                    covered.extend(isa);
                    covered.extend(value);
                    for &j in &covered {
                        used[j] = true;
                    }
                    concludables.push((i, covered, shape));
                }
            }
            Constraint::Relation {
                relation,
                type_label,
                players,
            } => {
                let shape = ConcludableShape::Relation {
                    relation: relation.clone(),
                    type_label: type_label.clone(),
                    players: players.clone(),
                };
                if logic.is_concludable(&shape) {
                    used[i] = true;
                    concludables.push((i, vec![i], shape));
                }
            }
            Constraint::Isa { .. } | Constraint::Value { .. } => {}
        }
    }

    // A bare isa is concludable only when nothing else already concludes
    // its variable.
    for (i, constraint) in constraints.iter().enumerate() {
        if used[i] {
            continue;
        }
        if let Constraint::Isa { thing, type_label } = constraint {
            if concludables.iter().any(|(_, _, s)| s.generating() == thing) {
                continue;
            }
            let shape = ConcludableShape::Isa {
                thing: thing.clone(),
                type_label: type_label.clone(),
            };
            if logic.is_concludable(&shape) {
                used[i] = true;
                concludables.push((i, vec![i], shape));
            }
        }
    }

    let generated: Vec<Variable> = concludables.iter().map(|(_, _, s)| s.generating().clone()).collect();

    let mut resolvables: Vec<(usize, Resolvable)> = concludables
        .into_iter()
        .map(|(first, covered, shape)| {
            let generating = shape.generating().clone();
            let variables: BTreeSet<Variable> = shape.variables().into_iter().collect();
            (
                first,
                Resolvable {
                    kind: ResolvableKind::Concludable(Concludable::new(shape)),
                    constraints: covered,
                    variables,
                    generating: Some(generating),
                    required: BTreeSet::new(),
                },
            )
        })
        .collect();

    for component in connected_components(constraints, &used) {
        let pattern = Conjunction::new(component.iter().map(|&i| constraints[i].clone()).collect());
        let variables = pattern.variables();
        resolvables.push((
            component[0],
            Resolvable {
                kind: ResolvableKind::Retrievable(pattern),
                constraints: component,
                variables,
                generating: None,
                required: BTreeSet::new(),
            },
        ));
    }

    resolvables.sort_by_key(|(first, _)| *first);
    let mut resolvables: Vec<Resolvable> = resolvables.into_iter().map(|(_, r)| r).collect();

    // A resolvable requires every variable it uses that a concludable other
    // than itself generates.
    for resolvable in &mut resolvables {
        let required = resolvable
            .variables
            .iter()
            .filter(|v| generated.contains(v) && resolvable.generating.as_ref() != Some(*v))
            .cloned()
            .collect();
        resolvable.required = required;
    }

    let own = conjunction.variables();
    for negation in conjunction.negations() {
        resolvables.push(Resolvable {
            kind: ResolvableKind::Negated(negation.clone()),
            constraints: Vec::new(),
            variables: negation.variables().intersection(&own).cloned().collect(),
            generating: None,
            required: BTreeSet::new(),
        });
    }
    resolvables
}

/// Group unused constraints into components connected by shared variables.
/// Each component lists constraint indices in ascending order.
fn connected_components(constraints: &[Constraint], used: &[bool]) -> Vec<Vec<usize>> {
    let free: Vec<usize> = (0..constraints.len()).filter(|&i| !used[i]).collect();
    let mut parent: Vec<usize> = (0..free.len()).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    let mut owner_of: BTreeMap<Variable, usize> = BTreeMap::new();
    for (slot, &i) in free.iter().enumerate() {
        for v in constraints[i].variables() {
            match owner_of.get(&v) {
                Some(&other) => {
                    let a = find(&mut parent, slot);
                    let b = find(&mut parent, other);
                    if a != b {
                        parent[a.max(b)] = a.min(b);
                    }
                }
                None => {
                    owner_of.insert(v, slot);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (slot, &i) in free.iter().enumerate() {
        let root = find(&mut parent, slot);
        groups.entry(root).or_default().push(i);
    }
    let mut components: Vec<Vec<usize>> = groups.into_values().collect();
    components.sort_by_key(|c| c[0]);
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_pattern::{Conclusion, Rule};

    fn logic(rules: Vec<Rule>) -> LogicManager {
        LogicManager::new(rules)
    }

    fn age_rule() -> Rule {
        Rule::new(
            "bobs-are-42",
            Conjunction::builder()
                .isa("p", "person")
                .has_value("p", "name", "Bob")
                .build(),
            Conclusion::has_value("p", "age", 42),
        )
        .unwrap()
    }

    #[test]
    fn test_no_rules_gives_one_retrievable_per_component() {
        let conjunction = Conjunction::builder()
            .isa("p", "person")
            .has_value("p", "name", "Bob")
            .isa("c", "company")
            .build();
        let resolvables = classify(&conjunction, &logic(vec![]));

        assert_eq!(resolvables.len(), 2);
        assert!(resolvables.iter().all(|r| !r.is_concludable()));
        assert_eq!(resolvables[0].constraint_indices(), &[0, 1, 2, 3]);
        assert_eq!(resolvables[1].constraint_indices(), &[4]);
    }

    #[test]
    fn test_has_absorbs_attribute_type_and_value() {
        let conjunction = Conjunction::builder()
            .isa("p", "person")
            .has_value("p", "age", 42)
            .build();
        let resolvables = classify(&conjunction, &logic(vec![age_rule()]));

        assert_eq!(resolvables.len(), 2);
        assert!(!resolvables[0].is_concludable());
        assert_eq!(resolvables[0].constraint_indices(), &[0]);
        let ResolvableKind::Concludable(c) = resolvables[1].kind() else {
            panic!("expected a concludable");
        };
        assert_eq!(
            c.shape(),
            &ConcludableShape::Has {
                owner: Variable::named("p"),
                attribute: Variable::anonymous(0),
                attribute_type: Some("age".into()),
                value: Some(Value::Long(42)),
            }
        );
        assert_eq!(resolvables[1].constraint_indices(), &[1, 2, 3]);
        assert_eq!(resolvables[1].pattern().constraints(), &conjunction.constraints()[1..4]);
    }

    #[test]
    fn test_every_constraint_is_covered_once() {
        let conjunction = Conjunction::builder()
            .isa("p", "person")
            .has_value("p", "age", 42)
            .has_value("p", "name", "Bob")
            .relation("employment", [("employee", "p"), ("employer", "c")])
            .isa("c", "company")
            .build();
        let resolvables = classify(&conjunction, &logic(vec![age_rule()]));

        let mut covered: Vec<usize> = resolvables
            .iter()
            .flat_map(|r| r.constraint_indices().iter().copied())
            .collect();
        covered.sort_unstable();
        assert_eq!(covered, (0..conjunction.constraints().len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_canonical_shapes_ignore_variable_names() {
        let a = ConcludableShape::Relation {
            relation: Variable::named("r"),
            type_label: "friendship".into(),
            players: vec![RolePlayer::new("friend", "x"), RolePlayer::new("friend", "y")],
        };
        let b = ConcludableShape::Relation {
            relation: Variable::named("f"),
            type_label: "friendship".into(),
            players: vec![RolePlayer::new("friend", "b"), RolePlayer::new("friend", "a")],
        };
        assert_eq!(a.canonical().0, b.canonical().0);

        let repeated = ConcludableShape::Relation {
            relation: Variable::named("r"),
            type_label: "friendship".into(),
            players: vec![RolePlayer::new("friend", "x"), RolePlayer::new("friend", "x")],
        };
        assert_ne!(a.canonical().0, repeated.canonical().0);
    }

    #[test]
    fn test_generated_variables_are_required_by_their_users() {
        let nickname_rule = Rule::new(
            "nicknames",
            Conjunction::builder()
                .isa("p", "person")
                .isa("n", "nickname")
                .build(),
            Conclusion::has("p", "n"),
        )
        .unwrap();
        let conjunction = Conjunction::builder().has("a", "b").has("b", "a").build();
        let resolvables = classify(&conjunction, &logic(vec![nickname_rule]));

        assert_eq!(resolvables.len(), 2);
        assert!(resolvables.iter().all(|r| r.is_concludable()));
        assert_eq!(resolvables[0].generating(), Some(&Variable::named("b")));
        assert_eq!(resolvables[0].required(), &BTreeSet::from([Variable::named("a")]));
        assert_eq!(resolvables[1].generating(), Some(&Variable::named("a")));
        assert_eq!(resolvables[1].required(), &BTreeSet::from([Variable::named("b")]));
    }

    #[test]
    fn test_negations_follow_constraints_and_share_outer_variables() {
        let unemployed = Disjunction::new(vec![Conjunction::builder()
            .relation("employment", [("employee", "p"), ("employer", "c")])
            .build()]);
        let conjunction = Conjunction::builder()
            .isa("p", "person")
            .not(vec![Conjunction::builder()
                .relation("employment", [("employee", "p"), ("employer", "c")])
                .build()])
            .build();
        let resolvables = classify(&conjunction, &logic(vec![]));

        assert_eq!(resolvables.len(), 2);
        assert!(!resolvables[0].is_negated());
        assert!(resolvables[1].is_negated());
        assert_eq!(resolvables[1].kind(), &ResolvableKind::Negated(unemployed));
        assert!(resolvables[1].constraint_indices().is_empty());
        assert_eq!(resolvables[1].variables(), &BTreeSet::from([Variable::named("p")]));
        assert_eq!(resolvables[1].generating(), None);
    }
}
