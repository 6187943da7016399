//! Backtracking pattern matching over stored facts.
//!
//! The search repeatedly picks the unevaluated constraint with the most
//! bound variables (fully bound constraints are pure checks and go first),
//! enumerates the bindings it allows, and recurses. Candidate sets come
//! from the bitmap indexes, so enumeration order is ascending by id and
//! results are deterministic.

use crate::{FactStore, Graph, Thing, ThingId};
use ahash::AHashSet;
use anyhow::{bail, Result};
use kestrel_pattern::{Concept, ConceptMap, ConceptMapIter, Conjunction, Constraint, RolePlayer, Traversal, Variable};
use roaring::RoaringBitmap;
use std::collections::BTreeMap;

type Assignment = BTreeMap<Variable, Concept>;
type Extension = Vec<(Variable, Concept)>;

/// Traversal is eager: every answer is found under one read lock before
/// the iterator is returned, and the iterator only replays them. Facts
/// written afterwards are not seen, and a pattern with many answers is
/// held in memory whole.
impl Traversal for FactStore {
    fn traverse(&self, pattern: &Conjunction, bounds: &ConceptMap) -> Result<ConceptMapIter> {
        if !pattern.disjunctions().is_empty() || !pattern.negations().is_empty() {
            bail!("traversal cannot evaluate nested disjunctions or negations in {pattern}");
        }
        let graph = self.graph();
        let variables = pattern.variables();
        let mut assignment: Assignment = bounds
            .project(&variables)
            .iter()
            .map(|(var, concept)| (var.clone(), concept.clone()))
            .collect();

        let mut search = Search {
            store: self,
            graph: &graph,
            constraints: pattern.constraints(),
            evaluated: vec![false; pattern.constraints().len()],
            seen: AHashSet::new(),
            answers: Vec::new(),
        };
        search.run(&mut assignment);
        tracing::trace!(pattern = %pattern, answers = search.answers.len(), "traversed stored facts");

        let answers = search.answers;
        Ok(Box::new(answers.into_iter().map(Ok)))
    }
}

struct Search<'a> {
    store: &'a FactStore,
    graph: &'a Graph,
    constraints: &'a [Constraint],
    evaluated: Vec<bool>,
    seen: AHashSet<ConceptMap>,
    answers: Vec<ConceptMap>,
}

impl<'a> Search<'a> {
    fn run(&mut self, assignment: &mut Assignment) {
        let Some(next) = self.pick(assignment) else {
            let answer: ConceptMap = assignment
                .iter()
                .map(|(var, concept)| (var.clone(), concept.clone()))
                .collect();
            if self.seen.insert(answer.clone()) {
                self.answers.push(answer);
            }
            return;
        };

        let constraints = self.constraints;
        self.evaluated[next] = true;
        for extension in self.extensions(&constraints[next], assignment) {
            for (var, concept) in &extension {
                assignment.insert(var.clone(), concept.clone());
            }
            self.run(assignment);
            for (var, _) in &extension {
                assignment.remove(var);
            }
        }
        self.evaluated[next] = false;
    }

    fn pick(&self, assignment: &Assignment) -> Option<usize> {
        self.constraints
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.evaluated[*i])
            .map(|(i, c)| {
                let vars = c.variables();
                let bound = vars.iter().filter(|v| assignment.contains_key(*v)).count();
                (bound == vars.len(), bound, std::cmp::Reverse(i))
            })
            .max()
            .map(|(_, _, std::cmp::Reverse(i))| i)
    }

    fn concept(&self, id: ThingId) -> Option<Concept> {
        self.store.concept_in(self.graph, id)
    }

    fn concepts(&self, ids: Option<&RoaringBitmap>) -> Vec<Concept> {
        ids.map(|ids| ids.iter().filter_map(|id| self.concept(id)).collect())
            .unwrap_or_default()
    }

    /// Bindings that satisfy `constraint` under `assignment`. An empty
    /// extension means the constraint holds without binding anything new.
    fn extensions(&self, constraint: &Constraint, assignment: &Assignment) -> Vec<Extension> {
        match constraint {
            Constraint::Isa { thing, type_label } => match assignment.get(thing) {
                Some(concept) if concept.type_label() == type_label => vec![Vec::new()],
                Some(_) => Vec::new(),
                None => {
                    let ids = self.store.labels().id_of(type_label).and_then(|t| self.graph.of_type(t));
                    self.concepts(ids)
                        .into_iter()
                        .map(|c| vec![(thing.clone(), c)])
                        .collect()
                }
            },

            Constraint::Value { attribute, value } => match assignment.get(attribute) {
                Some(concept) if concept.value() == Some(value) => vec![Vec::new()],
                Some(_) => Vec::new(),
                None => self
                    .concepts(self.graph.value_index.get(value))
                    .into_iter()
                    .map(|c| vec![(attribute.clone(), c)])
                    .collect(),
            },

            Constraint::Has { owner, attribute } => self.has_extensions(owner, attribute, assignment),

            Constraint::Relation {
                relation,
                type_label,
                players,
            } => self.relation_extensions(relation, type_label, players, assignment),
        }
    }

    fn has_extensions(&self, owner: &Variable, attribute: &Variable, assignment: &Assignment) -> Vec<Extension> {
        if owner == attribute {
            return Vec::new();
        }
        let resolve = |var: &Variable| assignment.get(var).map(|c| self.store.thing_of(self.graph, c));
        match (resolve(owner), resolve(attribute)) {
            (Some(None), _) | (_, Some(None)) => Vec::new(),
            (Some(Some(o)), Some(Some(a))) => {
                let owns = self.graph.owned.get(&o).is_some_and(|attrs| attrs.contains(a));
                if owns {
                    vec![Vec::new()]
                } else {
                    Vec::new()
                }
            }
            (Some(Some(o)), None) => self
                .concepts(self.graph.owned.get(&o))
                .into_iter()
                .map(|c| vec![(attribute.clone(), c)])
                .collect(),
            (None, Some(Some(a))) => self
                .concepts(self.graph.owners.get(&a))
                .into_iter()
                .map(|c| vec![(owner.clone(), c)])
                .collect(),
            (None, None) => {
                let mut owners: Vec<ThingId> = self.graph.owned.keys().copied().collect();
                owners.sort_unstable();
                let mut out = Vec::new();
                for o in owners {
                    let Some(owner_concept) = self.concept(o) else { continue };
                    for a in self.graph.owned[&o].iter() {
                        if let Some(attr_concept) = self.concept(a) {
                            out.push(vec![(owner.clone(), owner_concept.clone()), (attribute.clone(), attr_concept)]);
                        }
                    }
                }
                out
            }
        }
    }

    fn relation_extensions(
        &self,
        relation: &Variable,
        type_label: &str,
        players: &[RolePlayer],
        assignment: &Assignment,
    ) -> Vec<Extension> {
        let Some(type_id) = self.store.labels().id_of(type_label) else {
            return Vec::new();
        };
        let Some(of_type) = self.graph.of_type(type_id) else {
            return Vec::new();
        };

        let candidates: RoaringBitmap = if let Some(bound) = assignment.get(relation) {
            match self.store.thing_of(self.graph, bound) {
                Some(id) if of_type.contains(id) => std::iter::once(id).collect(),
                _ => return Vec::new(),
            }
        } else {
            let mut candidates = of_type.clone();
            for rp in players {
                if let Some(bound) = assignment.get(&rp.player) {
                    let Some(player) = self.store.thing_of(self.graph, bound) else {
                        return Vec::new();
                    };
                    match self.graph.roles_played.get(&player) {
                        Some(played) => candidates &= played,
                        None => return Vec::new(),
                    }
                }
            }
            candidates
        };

        let mut out = Vec::new();
        for id in candidates.iter() {
            let Some(Thing::Relation { players: stored, .. }) = self.graph.thing(id) else {
                continue;
            };
            let Some(relation_concept) = self.concept(id) else { continue };
            let mut base = Extension::new();
            if !assignment.contains_key(relation) {
                base.push((relation.clone(), relation_concept));
            }
            let mut used = vec![false; stored.len()];
            self.match_players(players, stored, 0, &mut used, &mut base, assignment, &mut out);
        }
        out
    }

    /// Injectively assign query role-players to stored role-players.
    #[allow(clippy::too_many_arguments)]
    fn match_players(
        &self,
        players: &[RolePlayer],
        stored: &[(crate::LabelId, ThingId)],
        index: usize,
        used: &mut [bool],
        extension: &mut Extension,
        assignment: &Assignment,
        out: &mut Vec<Extension>,
    ) {
        let Some(rp) = players.get(index) else {
            out.push(extension.clone());
            return;
        };
        let Some(role) = self.store.labels().id_of(&rp.role) else {
            return;
        };
        for (slot, (stored_role, stored_player)) in stored.iter().enumerate() {
            if used[slot] || *stored_role != role {
                continue;
            }
            let Some(concept) = self.concept(*stored_player) else { continue };
            let existing = assignment
                .get(&rp.player)
                .or_else(|| extension.iter().find(|(v, _)| v == &rp.player).map(|(_, c)| c))
                .cloned();
            let pushed = match existing {
                Some(bound) if bound == concept => false,
                Some(_) => continue,
                None => {
                    extension.push((rp.player.clone(), concept));
                    true
                }
            };
            used[slot] = true;
            self.match_players(players, stored, index + 1, used, extension, assignment, out);
            used[slot] = false;
            if pushed {
                extension.pop();
            }
        }
    }
}
