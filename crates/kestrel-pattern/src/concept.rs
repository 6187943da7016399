//! Concepts and concept maps.

use crate::variable::Variable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Values and Concepts
// ============================================================================

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Long(i64),
    String(String),
    Boolean(bool),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Long(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// A database value bound to a variable.
///
/// Entities and relations are identified by iid. Attributes are identified
/// by type and value, so an inferred attribute equals the stored one with
/// the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Concept {
    Entity {
        iid: u64,
        type_label: String,
    },
    Relation {
        iid: u64,
        type_label: String,
        inferred: bool,
    },
    Attribute {
        type_label: String,
        value: Value,
    },
}

impl Concept {
    pub fn entity(iid: u64, type_label: impl Into<String>) -> Self {
        Concept::Entity {
            iid,
            type_label: type_label.into(),
        }
    }

    pub fn attribute(type_label: impl Into<String>, value: impl Into<Value>) -> Self {
        Concept::Attribute {
            type_label: type_label.into(),
            value: value.into(),
        }
    }

    pub fn type_label(&self) -> &str {
        match self {
            Concept::Entity { type_label, .. }
            | Concept::Relation { type_label, .. }
            | Concept::Attribute { type_label, .. } => type_label,
        }
    }

    pub fn iid(&self) -> Option<u64> {
        match self {
            Concept::Entity { iid, .. } | Concept::Relation { iid, .. } => Some(*iid),
            Concept::Attribute { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Concept::Attribute { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self, Concept::Attribute { .. })
    }

    /// True for relations that only exist as a rule conclusion.
    pub fn is_inferred(&self) -> bool {
        matches!(self, Concept::Relation { inferred: true, .. })
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concept::Entity { iid, type_label } => write!(f, "{type_label}#{iid}"),
            Concept::Relation {
                iid,
                type_label,
                inferred,
            } => {
                if *inferred {
                    write!(f, "{type_label}#{iid:016x}*")
                } else {
                    write!(f, "{type_label}#{iid}")
                }
            }
            Concept::Attribute { type_label, value } => write!(f, "{type_label}:{value}"),
        }
    }
}

// ============================================================================
// ConceptMap
// ============================================================================

/// An immutable binding of variables to concepts.
///
/// Cloning is cheap: the underlying map is shared and only copied when a
/// new map is derived from it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConceptMap {
    concepts: Arc<BTreeMap<Variable, Concept>>,
}

impl ConceptMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: &Variable) -> Option<&Concept> {
        self.concepts.get(variable)
    }

    pub fn contains(&self, variable: &Variable) -> bool {
        self.concepts.contains_key(variable)
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Concept)> {
        self.concepts.iter()
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.concepts.keys().cloned().collect()
    }

    /// A new map with one more binding. An existing binding is replaced.
    pub fn extend(&self, variable: Variable, concept: Concept) -> ConceptMap {
        let mut concepts = (*self.concepts).clone();
        concepts.insert(variable, concept);
        ConceptMap {
            concepts: Arc::new(concepts),
        }
    }

    /// True when both maps agree on every variable they share.
    pub fn is_compatible(&self, other: &ConceptMap) -> bool {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .iter()
            .all(|(var, concept)| large.get(var).map_or(true, |c| c == concept))
    }

    /// Union of two maps, or `None` when they disagree on a shared variable.
    pub fn merge(&self, other: &ConceptMap) -> Option<ConceptMap> {
        if other.is_empty() {
            return Some(self.clone());
        }
        if self.is_empty() {
            return Some(other.clone());
        }
        if !self.is_compatible(other) {
            return None;
        }
        let mut concepts = (*self.concepts).clone();
        for (var, concept) in other.iter() {
            concepts
                .entry(var.clone())
                .or_insert_with(|| concept.clone());
        }
        Some(ConceptMap {
            concepts: Arc::new(concepts),
        })
    }

    /// Keep only the bindings whose variable satisfies `keep`.
    pub fn filter(&self, keep: impl Fn(&Variable) -> bool) -> ConceptMap {
        if self.concepts.keys().all(&keep) {
            return self.clone();
        }
        self.iter()
            .filter(|&(var, _)| keep(var))
            .map(|(var, concept)| (var.clone(), concept.clone()))
            .collect()
    }

    /// Restrict the map to `variables`.
    pub fn project(&self, variables: &BTreeSet<Variable>) -> ConceptMap {
        self.filter(|var| variables.contains(var))
    }

    /// Rename variables through `mapping`; unmapped bindings are dropped.
    pub fn rename(&self, mapping: &BTreeMap<Variable, Variable>) -> ConceptMap {
        self.iter()
            .filter_map(|(var, concept)| mapping.get(var).map(|to| (to.clone(), concept.clone())))
            .collect()
    }
}

impl FromIterator<(Variable, Concept)> for ConceptMap {
    fn from_iter<T: IntoIterator<Item = (Variable, Concept)>>(iter: T) -> Self {
        ConceptMap {
            concepts: Arc::new(iter.into_iter().collect()),
        }
    }
}

impl fmt::Display for ConceptMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, concept)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{var}={concept}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Concept)]) -> ConceptMap {
        pairs
            .iter()
            .map(|(name, concept)| (Variable::named(*name), concept.clone()))
            .collect()
    }

    #[test]
    fn test_extend_leaves_original_untouched() {
        let base = map(&[("x", Concept::entity(1, "person"))]);
        let extended = base.extend(Variable::named("y"), Concept::entity(2, "person"));

        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
        assert!(!base.contains(&Variable::named("y")));
    }

    #[test]
    fn test_merge_join_miss_yields_none() {
        let left = map(&[("x", Concept::entity(1, "person"))]);
        let right = map(&[("x", Concept::entity(2, "person"))]);
        assert!(left.merge(&right).is_none());
    }

    #[test]
    fn test_merge_unions_compatible_maps() {
        let left = map(&[
            ("x", Concept::entity(1, "person")),
            ("a", Concept::attribute("age", 42)),
        ]);
        let right = map(&[
            ("x", Concept::entity(1, "person")),
            ("y", Concept::entity(3, "person")),
        ]);
        let merged = left.merge(&right).expect("compatible");
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get(&Variable::named("y")), Some(&Concept::entity(3, "person")));
    }

    #[test]
    fn test_attributes_compare_by_value() {
        assert_eq!(Concept::attribute("age", 42), Concept::attribute("age", 42));
        assert_ne!(Concept::attribute("age", 42), Concept::attribute("age", 24));
        assert_ne!(Concept::attribute("age", 42), Concept::attribute("height", 42));
    }

    #[test]
    fn test_rename_drops_unmapped() {
        let m = map(&[
            ("x", Concept::entity(1, "person")),
            ("y", Concept::entity(2, "person")),
        ]);
        let mapping = BTreeMap::from([(Variable::named("x"), Variable::anonymous(0))]);
        let renamed = m.rename(&mapping);
        assert_eq!(renamed.len(), 1);
        assert!(renamed.contains(&Variable::anonymous(0)));
    }
}
