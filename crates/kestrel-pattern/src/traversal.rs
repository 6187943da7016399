//! The seam to stored facts.

use crate::concept::ConceptMap;
use crate::conjunction::Conjunction;

/// A lazy stream of answers from one traversal call.
pub type ConceptMapIter = Box<dyn Iterator<Item = anyhow::Result<ConceptMap>> + Send>;

/// Read-only access to stored facts.
///
/// `traverse` answers a conjunction of constraints (no nested disjunctions)
/// under the given bindings. Every call returns a fresh iterator; answers
/// bind every variable of the pattern and agree with `bounds`. Bound
/// concepts that are not stored (e.g. inferred relations) can still satisfy
/// constraints checkable from the concept itself (`isa`, value equality).
pub trait Traversal: Send + Sync {
    fn traverse(&self, pattern: &Conjunction, bounds: &ConceptMap) -> anyhow::Result<ConceptMapIter>;
}
