//! The rule set a registry reasons with.
//!
//! Rules may negate patterns other rules conclude, as long as no rule
//! depends on itself through a negation. A negated block is then resolved
//! to its own fixpoint, independently of the rules that use it.

use crate::error::{ReasonerError, Result};
use crate::resolvable::{classify, ConcludableShape, ResolvableKind};
use crate::unifier::{unifiers, Unifier};
use kestrel_pattern::{Conjunction, Rule};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct LogicManager {
    rules: Vec<Arc<Rule>>,
}

impl LogicManager {
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            rules: rules.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn rule(&self, label: &str) -> Option<&Arc<Rule>> {
        self.rules.iter().find(|r| r.label() == label)
    }

    /// Rules whose conclusion unifies with `shape`, each with every unifier
    /// found, in rule definition order.
    pub fn rules_concluding(&self, shape: &ConcludableShape) -> Vec<(Arc<Rule>, Vec<Unifier>)> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let found = unifiers(shape, rule.then());
                (!found.is_empty()).then(|| (rule.clone(), found))
            })
            .collect()
    }

    pub fn is_concludable(&self, shape: &ConcludableShape) -> bool {
        self.rules.iter().any(|rule| !unifiers(shape, rule.then()).is_empty())
    }

    /// Reject rule sets in which a rule reaches itself through a negation.
    pub fn validate(&self) -> Result<()> {
        let edges: Vec<Vec<(usize, bool)>> = self
            .rules
            .iter()
            .map(|rule| {
                let mut edges = Vec::new();
                self.collect_dependencies(rule.when(), false, &mut edges);
                edges
            })
            .collect();

        for (from, rule_edges) in edges.iter().enumerate() {
            for &(to, negated) in rule_edges {
                if negated && reaches(&edges, to, from) {
                    return Err(ReasonerError::Unstratified {
                        rule: self.rules[from].label().to_string(),
                        negated: self.rules[to].label().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rules concluding a concludable of `conjunction`, flagged when the
    /// concludable sits under a negation.
    fn collect_dependencies(&self, conjunction: &Conjunction, negated: bool, edges: &mut Vec<(usize, bool)>) {
        for resolvable in classify(conjunction, self) {
            let ResolvableKind::Concludable(concludable) = resolvable.kind() else {
                continue;
            };
            for (i, rule) in self.rules.iter().enumerate() {
                if !unifiers(concludable.shape(), rule.then()).is_empty() {
                    edges.push((i, negated));
                }
            }
        }
        for branch in conjunction.disjunctions().iter().flat_map(|d| d.branches()) {
            self.collect_dependencies(branch, negated, edges);
        }
        for branch in conjunction.negations().iter().flat_map(|d| d.branches()) {
            self.collect_dependencies(branch, true, edges);
        }
    }
}

/// True when `to` is reachable from `from` over any dependency edge.
fn reaches(edges: &[Vec<(usize, bool)>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; edges.len()];
    let mut stack = vec![from];
    while let Some(rule) = stack.pop() {
        if rule == to {
            return true;
        }
        if std::mem::replace(&mut seen[rule], true) {
            continue;
        }
        stack.extend(edges[rule].iter().map(|&(next, _)| next));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_pattern::{Conclusion, Conjunction, RolePlayer, Variable};

    #[test]
    fn test_rules_concluding_filters_by_type() {
        let when = Conjunction::builder()
            .relation("containment", [("container", "x"), ("contained", "y")])
            .relation("containment", [("container", "y"), ("contained", "z")])
            .build();
        let transitive = Rule::new(
            "transitive-containment",
            when,
            Conclusion::relation("containment", [("container", "x"), ("contained", "z")]),
        )
        .unwrap();
        let logic = LogicManager::new([transitive]);

        let containment = ConcludableShape::Relation {
            relation: Variable::named("r"),
            type_label: "containment".into(),
            players: vec![RolePlayer::new("container", "a")],
        };
        let marriage = ConcludableShape::Relation {
            relation: Variable::named("r"),
            type_label: "marriage".into(),
            players: vec![],
        };
        assert_eq!(logic.rules_concluding(&containment).len(), 1);
        assert!(logic.is_concludable(&containment));
        assert!(!logic.is_concludable(&marriage));
        assert!(logic.rule("transitive-containment").is_some());
    }

    fn friendship(label: &str, when: Conjunction) -> Rule {
        Rule::new(label, when, Conclusion::relation("friendship", [("friend", "x"), ("friend", "y")])).unwrap()
    }

    #[test]
    fn test_negation_over_a_lower_rule_is_accepted() {
        let colleagues = Rule::new(
            "colleagues",
            Conjunction::builder()
                .relation("employment", [("employee", "x"), ("employer", "c")])
                .relation("employment", [("employee", "y"), ("employer", "c")])
                .build(),
            Conclusion::relation("colleagueship", [("colleague", "x"), ("colleague", "y")]),
        )
        .unwrap();
        let strangers = Rule::new(
            "strangers",
            Conjunction::builder()
                .isa("x", "person")
                .isa("y", "person")
                .not(vec![Conjunction::builder()
                    .relation("colleagueship", [("colleague", "x"), ("colleague", "y")])
                    .build()])
                .build(),
            Conclusion::relation("strangership", [("stranger", "x"), ("stranger", "y")]),
        )
        .unwrap();
        assert_eq!(LogicManager::new([colleagues, strangers]).validate(), Ok(()));
    }

    #[test]
    fn test_negation_through_a_cycle_is_rejected() {
        let unfriended = friendship(
            "unfriended",
            Conjunction::builder()
                .isa("x", "person")
                .isa("y", "person")
                .not(vec![Conjunction::builder()
                    .relation("friendship", [("friend", "x"), ("friend", "y")])
                    .build()])
                .build(),
        );
        let err = LogicManager::new([unfriended]).validate().unwrap_err();
        assert_eq!(
            err,
            ReasonerError::Unstratified {
                rule: "unfriended".into(),
                negated: "unfriended".into(),
            }
        );
    }
}
