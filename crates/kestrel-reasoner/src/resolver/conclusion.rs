//! Fires one rule: resolves its `when` pattern and materialises the
//! conclusion for every body answer.

use super::Context;
use crate::answer::{AnswerState, Compound, Explanation, Partial};
use crate::error::{ReasonerError, Result};
use crate::message::{Request, ResolverRef, Response, Scope, ScopeId, StreamId, StreamKey};
use ahash::{AHashMap, AHashSet};
use kestrel_pattern::{Concept, ConceptMap, Conclusion, Conjunction, Constraint, Rule, Traversal, Variable};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) struct ConclusionResolver {
    rule: Arc<Rule>,
    when_variables: BTreeSet<Variable>,
    body: Option<ResolverRef>,
    streams: AHashMap<StreamKey, Stream>,
    pending: AHashMap<StreamId, StreamKey>,
}

struct Stream {
    asker: ResolverRef,
    stream: StreamId,
    scope: Scope,
    bounds: ConceptMap,
    sub: StreamId,
    body_request: Partial,
    emitted: AHashSet<ConceptMap>,
    awaiting: bool,
}

impl ConclusionResolver {
    pub(crate) fn new(rule: Arc<Rule>) -> Self {
        let when_variables = rule.when().all_variables();
        Self {
            rule,
            when_variables,
            body: None,
            streams: AHashMap::new(),
            pending: AHashMap::new(),
        }
    }

    pub(crate) fn receive_request(&mut self, ctx: &mut Context, request: Request) {
        let key = request.key();
        if self.body.is_none() {
            match ctx.shared.conjunction(self.rule.when()) {
                Ok(body) => self.body = Some(body),
                Err(_) => return,
            }
        }
        let Some(body) = self.body.as_ref() else {
            return;
        };

        if let Some(stream) = self.streams.get_mut(&key) {
            stream.awaiting = true;
            ctx.request(body, stream.sub, stream.body_request.clone());
            return;
        }

        let bounds = request.partial.concepts().clone();
        let body_request = request
            .partial
            .request(ctx.id(), bounds.project(&self.when_variables));
        let sub = ctx.new_stream();
        self.pending.insert(sub, key);
        ctx.request(body, sub, body_request.clone());
        self.streams.insert(
            key,
            Stream {
                scope: request.scope(),
                asker: request.asker,
                stream: request.stream,
                bounds,
                sub,
                body_request,
                emitted: AHashSet::new(),
                awaiting: true,
            },
        );
    }

    pub(crate) fn receive_response(&mut self, ctx: &mut Context, response: Response) {
        let Some(&key) = self.pending.get(&response.stream()) else {
            tracing::trace!(resolver = %ctx.name(), "response for a closed stream");
            return;
        };
        match response {
            Response::Answer { answer, .. } => self.receive_answer(ctx, key, answer),
            Response::Done { stream: sub, novel, .. } => {
                self.pending.remove(&sub);
                if let Some(stream) = self.streams.remove(&key) {
                    ctx.done(&stream.asker, stream.stream, stream.scope.iteration, novel);
                }
            }
            Response::Fail { stream: sub, .. } => {
                self.pending.remove(&sub);
                if let Some(stream) = self.streams.remove(&key) {
                    ctx.fail(&stream.asker, stream.stream, stream.scope.iteration);
                }
            }
        }
    }

    fn receive_answer(&mut self, ctx: &mut Context, key: StreamKey, answer: Compound) {
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let Some(body) = self.body.as_ref() else {
            return;
        };

        let conclusion = match materialise(ctx.shared.traversal(), &self.rule, answer.concepts()) {
            Ok(conclusion) => conclusion,
            Err(err) => {
                ctx.fatal(err);
                return;
            }
        };
        if !conclusion.is_compatible(&stream.bounds) || !stream.emitted.insert(conclusion.clone()) {
            ctx.request(body, stream.sub, stream.body_request.clone());
            return;
        }

        let explanations = if ctx.shared.config().explain {
            vec![Arc::new(Explanation {
                rule: self.rule.label().to_string(),
                conclusion: conclusion.clone(),
                condition: answer.concepts().clone(),
                premises: answer.explanations().to_vec(),
            })]
        } else {
            Vec::new()
        };
        stream.awaiting = false;
        ctx.answer(&stream.asker, stream.stream, Compound::inferred(conclusion, ctx.id(), explanations));
    }

    pub(crate) fn enter_iteration(&mut self, ctx: &Context, scope: ScopeId) {
        self.streams.retain(|_, stream| {
            if stream.scope.id != scope {
                return true;
            }
            if stream.awaiting {
                ctx.fail(&stream.asker, stream.stream, stream.scope.iteration);
            }
            false
        });
        let streams = &self.streams;
        self.pending.retain(|_, key| streams.contains_key(key));
    }
}

// ============================================================================
// Materialisation
// ============================================================================

/// Bind the conclusion's variables for one answer of the rule body.
///
/// A produced attribute is identified by its type and value. An inferred
/// relation reuses a stored relation with the same type and role players
/// when one exists; otherwise its identity is derived from them, so the
/// same conclusion always yields the same concept.
pub(crate) fn materialise(traversal: &dyn Traversal, rule: &Rule, body: &ConceptMap) -> Result<ConceptMap> {
    let bound = |variable: &Variable| -> Result<Concept> {
        body.get(variable).cloned().ok_or_else(|| ReasonerError::Conclusion {
            rule: rule.label().to_string(),
            message: format!("{variable} is unbound in the body answer"),
        })
    };

    match rule.then() {
        Conclusion::Has {
            owner,
            attribute,
            produced,
        } => {
            let owner_concept = bound(owner)?;
            let attribute_concept = match produced {
                Some(produced) => Concept::attribute(produced.type_label.clone(), produced.value.clone()),
                None => bound(attribute)?,
            };
            if !attribute_concept.is_attribute() {
                return Err(ReasonerError::Conclusion {
                    rule: rule.label().to_string(),
                    message: format!("{attribute} is bound to non-attribute {attribute_concept}"),
                });
            }
            Ok([(owner.clone(), owner_concept), (attribute.clone(), attribute_concept)]
                .into_iter()
                .collect())
        }
        Conclusion::Relation {
            relation,
            type_label,
            players,
        } => {
            let mut concepts: Vec<(Variable, Concept)> = Vec::with_capacity(players.len() + 1);
            let mut role_players: Vec<(String, Concept)> = Vec::with_capacity(players.len());
            for rp in players {
                let concept = bound(&rp.player)?;
                role_players.push((rp.role.clone(), concept.clone()));
                if !concepts.iter().any(|(v, _)| v == &rp.player) {
                    concepts.push((rp.player.clone(), concept));
                }
            }

            let lookup = Conjunction::new(vec![Constraint::Relation {
                relation: relation.clone(),
                type_label: type_label.clone(),
                players: players.clone(),
            }]);
            let player_bounds: ConceptMap = concepts.iter().cloned().collect();
            let stored = traversal
                .traverse(&lookup, &player_bounds)
                .and_then(|mut answers| answers.next().transpose())
                .map_err(|err| ReasonerError::traversal(&lookup, &err))?
                .and_then(|answer| answer.get(relation).cloned());

            let relation_concept = stored.unwrap_or_else(|| Concept::Relation {
                iid: inferred_iid(type_label, &role_players),
                type_label: type_label.clone(),
                inferred: true,
            });
            concepts.push((relation.clone(), relation_concept));
            Ok(concepts.into_iter().collect())
        }
    }
}

/// First 8 bytes of a SHA-256 over the type and the sorted role players.
fn inferred_iid(type_label: &str, role_players: &[(String, Concept)]) -> u64 {
    let mut entries: Vec<String> = role_players
        .iter()
        .map(|(role, concept)| format!("{role}={concept}"))
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    hasher.update(type_label.as_bytes());
    for entry in &entries {
        hasher.update([0u8]);
        hasher.update(entry.as_bytes());
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_pattern::{ConceptMapIter, RolePlayer};

    struct NoFacts;

    impl Traversal for NoFacts {
        fn traverse(&self, _: &Conjunction, _: &ConceptMap) -> anyhow::Result<ConceptMapIter> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    fn var(name: &str) -> Variable {
        Variable::named(name)
    }

    #[test]
    fn test_inferred_relations_are_identified_by_players() {
        let rule = Rule::new(
            "friends",
            Conjunction::builder()
                .isa("x", "person")
                .isa("y", "person")
                .build(),
            Conclusion::relation("friendship", [("friend", "x"), ("friend", "y")]),
        )
        .unwrap();
        let alice = Concept::entity(1, "person");
        let bob = Concept::entity(2, "person");
        let forward: ConceptMap = [(var("x"), alice.clone()), (var("y"), bob.clone())].into_iter().collect();
        let backward: ConceptMap = [(var("x"), bob), (var("y"), alice)].into_iter().collect();

        let a = materialise(&NoFacts, &rule, &forward).unwrap();
        let b = materialise(&NoFacts, &rule, &backward).unwrap();
        let relation = a.get(&Variable::conclusion()).unwrap();
        assert!(relation.is_inferred());
        assert_eq!(Some(relation), b.get(&Variable::conclusion()));
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_produced_attribute_is_materialised() {
        let rule = Rule::new(
            "bobs-are-42",
            Conjunction::builder().isa("p", "person").build(),
            Conclusion::has_value("p", "age", 42),
        )
        .unwrap();
        let body: ConceptMap = [(var("p"), Concept::entity(7, "person"))].into_iter().collect();
        let conclusion = materialise(&NoFacts, &rule, &body).unwrap();
        assert_eq!(conclusion.get(&Variable::conclusion()), Some(&Concept::attribute("age", 42)));
        assert_eq!(conclusion.get(&var("p")), Some(&Concept::entity(7, "person")));
    }

    #[test]
    fn test_unbound_conclusion_variable_is_an_error() {
        let rule = Rule::new(
            "friends",
            Conjunction::builder().isa("x", "person").isa("y", "person").build(),
            Conclusion::Relation {
                relation: Variable::conclusion(),
                type_label: "friendship".into(),
                players: vec![RolePlayer::new("friend", "x"), RolePlayer::new("friend", "y")],
            },
        )
        .unwrap();
        let body: ConceptMap = [(var("x"), Concept::entity(1, "person"))].into_iter().collect();
        let err = materialise(&NoFacts, &rule, &body).unwrap_err();
        assert!(matches!(err, ReasonerError::Conclusion { .. }));
    }
}
