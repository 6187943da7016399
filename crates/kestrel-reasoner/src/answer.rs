//! Answer states flowing between resolvers.
//!
//! ```text
//!   Partial   bindings accumulated while a conjunction walks its plan;
//!             also carries the call frames used for re-entry detection
//!   Compound  a Partial that satisfied a whole resolvable, handed upward
//!   Match     a finished answer delivered to the caller of a root
//! ```
//!
//! All three share their `ConceptMap` and explanation trees structurally,
//! so copying a state is cheap. Explainability is monotonic: once any
//! contributing answer was inferred, everything built from it is
//! explainable.

use crate::message::Scope;
use kestrel_pattern::ConceptMap;
use std::fmt;
use std::sync::Arc;

/// Identity of a resolver actor within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverId(pub(crate) u64);

impl fmt::Display for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// One rule application behind an inferred answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Explanation {
    /// Label of the applied rule.
    pub rule: String,
    /// Bindings of the rule's conclusion variables.
    pub conclusion: ConceptMap,
    /// The answer to the rule's `when` pattern that fired it.
    pub condition: ConceptMap,
    /// Explanations of inferred facts the condition relied on.
    pub premises: Vec<Arc<Explanation>>,
}

impl Explanation {
    /// Number of rule applications in this tree.
    pub fn size(&self) -> usize {
        1 + self.premises.iter().map(|p| p.size()).sum::<usize>()
    }
}

/// Common view over every answer state.
pub trait AnswerState {
    fn concepts(&self) -> &ConceptMap;

    /// True when any contributing fact was inferred by a rule.
    fn is_explainable(&self) -> bool;

    fn explanations(&self) -> &[Arc<Explanation>];

    /// The resolver that produced this state.
    fn origin(&self) -> ResolverId;
}

fn merge_explanations(into: &mut Vec<Arc<Explanation>>, from: &[Arc<Explanation>]) {
    for explanation in from {
        if !into.iter().any(|e| Arc::ptr_eq(e, explanation) || e == explanation) {
            into.push(explanation.clone());
        }
    }
}

// ============================================================================
// Call frames
// ============================================================================

/// A concludable call on the causal chain of a request.
#[derive(Debug)]
struct Frame {
    resolver: ResolverId,
    bounds: ConceptMap,
    parent: Option<Arc<Frame>>,
}

// ============================================================================
// Partial
// ============================================================================

#[derive(Debug, Clone)]
pub struct Partial {
    concepts: ConceptMap,
    explainable: bool,
    explanations: Vec<Arc<Explanation>>,
    origin: ResolverId,
    scope: Scope,
    frames: Option<Arc<Frame>>,
}

impl Partial {
    /// The empty state a scope starts every pull from: no bindings and no
    /// call frames.
    pub(crate) fn root(origin: ResolverId, scope: Scope) -> Self {
        Self {
            concepts: ConceptMap::new(),
            explainable: false,
            explanations: Vec::new(),
            origin,
            scope,
            frames: None,
        }
    }

    /// A state to send downstream: only `concepts` as bounds, same scope
    /// and frames.
    pub(crate) fn request(&self, origin: ResolverId, concepts: ConceptMap) -> Self {
        Self {
            concepts,
            explainable: false,
            explanations: Vec::new(),
            origin,
            scope: self.scope,
            frames: self.frames.clone(),
        }
    }

    pub(crate) fn scope(&self) -> Scope {
        self.scope
    }

    /// Record a concludable call on the causal chain.
    pub(crate) fn enter(&self, resolver: ResolverId, bounds: ConceptMap) -> Self {
        Self {
            frames: Some(Arc::new(Frame {
                resolver,
                bounds,
                parent: self.frames.clone(),
            })),
            ..self.clone()
        }
    }

    /// True when `resolver` is already being called with exactly `bounds`
    /// further up this chain.
    pub(crate) fn is_reentrant(&self, resolver: ResolverId, bounds: &ConceptMap) -> bool {
        let mut frame = self.frames.as_deref();
        while let Some(f) = frame {
            if f.resolver == resolver && &f.bounds == bounds {
                return true;
            }
            frame = f.parent.as_deref();
        }
        false
    }

    pub(crate) fn depth(&self) -> usize {
        let mut depth = 0;
        let mut frame = self.frames.as_deref();
        while let Some(f) = frame {
            depth += 1;
            frame = f.parent.as_deref();
        }
        depth
    }

    /// Join an answer into this state. `None` is a join miss.
    pub(crate) fn merge(&self, origin: ResolverId, answer: &Compound) -> Option<Partial> {
        let concepts = self.concepts.merge(&answer.concepts)?;
        let mut explanations = self.explanations.clone();
        merge_explanations(&mut explanations, &answer.explanations);
        Some(Partial {
            concepts,
            explainable: self.explainable || answer.explainable,
            explanations,
            origin,
            scope: self.scope,
            frames: self.frames.clone(),
        })
    }

    pub(crate) fn to_compound(&self, origin: ResolverId) -> Compound {
        Compound {
            concepts: self.concepts.clone(),
            explainable: self.explainable,
            explanations: self.explanations.clone(),
            origin,
        }
    }
}

impl AnswerState for Partial {
    fn concepts(&self) -> &ConceptMap {
        &self.concepts
    }

    fn is_explainable(&self) -> bool {
        self.explainable
    }

    fn explanations(&self) -> &[Arc<Explanation>] {
        &self.explanations
    }

    fn origin(&self) -> ResolverId {
        self.origin
    }
}

// ============================================================================
// Compound
// ============================================================================

#[derive(Debug, Clone)]
pub struct Compound {
    concepts: ConceptMap,
    explainable: bool,
    explanations: Vec<Arc<Explanation>>,
    origin: ResolverId,
}

impl Compound {
    /// An answer read from stored facts.
    pub(crate) fn stored(concepts: ConceptMap, origin: ResolverId) -> Self {
        Self {
            concepts,
            explainable: false,
            explanations: Vec::new(),
            origin,
        }
    }

    /// An answer derived through a rule.
    pub(crate) fn inferred(concepts: ConceptMap, origin: ResolverId, explanations: Vec<Arc<Explanation>>) -> Self {
        Self {
            concepts,
            explainable: true,
            explanations,
            origin,
        }
    }

    /// Same provenance, different bindings.
    pub(crate) fn with_concepts(&self, concepts: ConceptMap, origin: ResolverId) -> Self {
        Self {
            concepts,
            explainable: self.explainable,
            explanations: self.explanations.clone(),
            origin,
        }
    }
}

impl AnswerState for Compound {
    fn concepts(&self) -> &ConceptMap {
        &self.concepts
    }

    fn is_explainable(&self) -> bool {
        self.explainable
    }

    fn explanations(&self) -> &[Arc<Explanation>] {
        &self.explanations
    }

    fn origin(&self) -> ResolverId {
        self.origin
    }
}

// ============================================================================
// Match
// ============================================================================

/// A top-level answer, filtered to the root's variables.
#[derive(Debug, Clone)]
pub struct Match {
    concepts: ConceptMap,
    explainable: bool,
    explanations: Vec<Arc<Explanation>>,
    origin: ResolverId,
    iteration: u32,
}

impl Match {
    pub(crate) fn new(concepts: ConceptMap, answer: &Compound, origin: ResolverId, iteration: u32) -> Self {
        Self {
            concepts,
            explainable: answer.explainable,
            explanations: answer.explanations.clone(),
            origin,
            iteration,
        }
    }

    /// Iteration during which the answer was first delivered.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }
}

impl AnswerState for Match {
    fn concepts(&self) -> &ConceptMap {
        &self.concepts
    }

    fn is_explainable(&self) -> bool {
        self.explainable
    }

    fn explanations(&self) -> &[Arc<Explanation>] {
        &self.explanations
    }

    fn origin(&self) -> ResolverId {
        self.origin
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.concepts)?;
        if self.explainable {
            write!(f, " (inferred)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ScopeId;
    use kestrel_pattern::{Concept, Variable};

    fn scope() -> Scope {
        Scope {
            id: ScopeId(0),
            iteration: 0,
        }
    }

    fn map(pairs: &[(&str, u64)]) -> ConceptMap {
        pairs
            .iter()
            .map(|(name, iid)| (Variable::named(*name), Concept::entity(*iid, "person")))
            .collect()
    }

    #[test]
    fn test_merge_is_explainable_when_any_side_is() {
        let origin = ResolverId(1);
        let partial = Partial::root(origin, scope()).request(origin, map(&[("x", 1)]));
        let inferred = Compound::inferred(map(&[("x", 1), ("y", 2)]), origin, Vec::new());

        let merged = partial.merge(origin, &inferred).expect("compatible");
        assert!(merged.is_explainable());
        assert_eq!(merged.concepts().len(), 2);

        let stored = Compound::stored(map(&[("y", 3)]), origin);
        let merged = merged.merge(origin, &stored);
        assert!(merged.is_none(), "y disagrees");
    }

    #[test]
    fn test_reentry_matches_resolver_and_bounds() {
        let a = ResolverId(1);
        let b = ResolverId(2);
        let partial = Partial::root(ResolverId(0), scope())
            .enter(a, map(&[("x", 1)]))
            .enter(b, map(&[]));

        assert!(partial.is_reentrant(a, &map(&[("x", 1)])));
        assert!(partial.is_reentrant(b, &map(&[])));
        assert!(!partial.is_reentrant(a, &map(&[("x", 2)])));
        assert!(!partial.is_reentrant(ResolverId(3), &map(&[])));
        assert_eq!(partial.depth(), 2);

        // Request states keep the chain and the scope.
        let request = partial.request(ResolverId(4), map(&[("y", 5)]));
        assert!(request.is_reentrant(a, &map(&[("x", 1)])));
        assert_eq!(request.scope(), scope());
    }

    #[test]
    fn test_explanations_are_not_duplicated() {
        let origin = ResolverId(1);
        let explanation = Arc::new(Explanation {
            rule: "r".into(),
            conclusion: map(&[("x", 1)]),
            condition: map(&[("x", 1)]),
            premises: Vec::new(),
        });
        let answer = Compound::inferred(map(&[("x", 1)]), origin, vec![explanation.clone()]);
        let once = Partial::root(origin, scope()).merge(origin, &answer).unwrap();
        let twice = once.merge(origin, &answer).unwrap();
        assert_eq!(twice.explanations().len(), 1);
        assert_eq!(explanation.size(), 1);
    }
}
