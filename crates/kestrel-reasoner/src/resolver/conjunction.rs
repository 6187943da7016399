//! Joins the resolvables of a conjunction depth-first along a plan.
//!
//! ```text
//!   plan   [ R0 , C1 , D2 ]
//!   level 0: pull R0 with entry bounds          ── answer a0
//!   level 1: pull C1 with bounds from a0        ── answer a1
//!   level 2: pull D2 with bounds from a0 ⋈ a1   ── answer a2 → emit a0 ⋈ a1 ⋈ a2
//!   Done at level k pops back to level k-1 and pulls it again.
//! ```
//!
//! Nested disjunctions are resolved after every resolvable so that their
//! branches see all bindings the conjunction can offer. Negations are
//! placed by the planner once their variables are bound.

use super::Context;
use crate::answer::{AnswerState, Compound, Partial, ResolverId};
use crate::message::{Request, ResolverRef, Response, Scope, ScopeId, StreamId, StreamKey};
use crate::planner::{self, Schedulable};
use crate::resolvable::{classify, Resolvable, ResolvableKind};
use ahash::{AHashMap, AHashSet};
use kestrel_pattern::{ConceptMap, Conjunction, Variable};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub(crate) struct ConjunctionResolver {
    conjunction: Conjunction,
    variables: BTreeSet<Variable>,
    compiled: Option<Compiled>,
    plans: AHashMap<BTreeSet<Variable>, Arc<[usize]>>,
    streams: AHashMap<StreamKey, Stream>,
    pending: AHashMap<StreamId, StreamKey>,
    novel: AHashSet<ScopeId>,
}

struct Compiled {
    resolvables: Vec<Resolvable>,
    /// One step per resolvable, in classification order, then one per
    /// nested disjunction.
    steps: Vec<Step>,
}

struct Step {
    resolver: ResolverRef,
    variables: BTreeSet<Variable>,
    /// Local → canonical and back, for concludables.
    renaming: Option<(BTreeMap<Variable, Variable>, BTreeMap<Variable, Variable>)>,
}

impl Step {
    fn bounds(&self, concepts: &ConceptMap) -> ConceptMap {
        let local = concepts.project(&self.variables);
        match &self.renaming {
            Some((to_canonical, _)) => local.rename(to_canonical),
            None => local,
        }
    }

    fn localise(&self, answer: &Compound, origin: ResolverId) -> Compound {
        match &self.renaming {
            Some((_, from_canonical)) => answer.with_concepts(answer.concepts().rename(from_canonical), origin),
            None => answer.clone(),
        }
    }
}

struct Stream {
    asker: ResolverRef,
    stream: StreamId,
    scope: Scope,
    plan: Arc<[usize]>,
    levels: Vec<Level>,
    emitted: AHashSet<ConceptMap>,
    awaiting: bool,
}

struct Level {
    step: usize,
    sub: StreamId,
    base: Partial,
    request: Partial,
}

impl ConjunctionResolver {
    pub(crate) fn new(conjunction: Conjunction) -> Self {
        let variables = conjunction.all_variables();
        Self {
            conjunction,
            variables,
            compiled: None,
            plans: AHashMap::new(),
            streams: AHashMap::new(),
            pending: AHashMap::new(),
            novel: AHashSet::new(),
        }
    }

    fn compile(&mut self, ctx: &Context) -> bool {
        if self.compiled.is_some() {
            return true;
        }
        let resolvables = classify(&self.conjunction, ctx.shared.logic());
        let mut steps = Vec::with_capacity(resolvables.len() + self.conjunction.disjunctions().len());
        for resolvable in &resolvables {
            let step = match resolvable.kind() {
                ResolvableKind::Retrievable(pattern) => ctx.shared.retrievable(pattern).map(|resolver| Step {
                    resolver,
                    variables: pattern.variables(),
                    renaming: None,
                }),
                ResolvableKind::Concludable(concludable) => ctx.shared.concludable(concludable).map(|resolver| Step {
                    resolver,
                    variables: concludable.to_canonical().keys().cloned().collect(),
                    renaming: Some((concludable.to_canonical().clone(), concludable.from_canonical().clone())),
                }),
                ResolvableKind::Negated(disjunction) => ctx.shared.negation(disjunction).map(|resolver| Step {
                    resolver,
                    variables: resolvable.variables().clone(),
                    renaming: None,
                }),
            };
            let Ok(step) = step else {
                return false;
            };
            steps.push(step);
        }
        for disjunction in self.conjunction.disjunctions() {
            let Ok(resolver) = ctx.shared.disjunction(disjunction) else {
                return false;
            };
            steps.push(Step {
                resolver,
                variables: disjunction.variables(),
                renaming: None,
            });
        }
        tracing::debug!(
            resolver = %ctx.name(),
            resolvables = resolvables.len(),
            concludables = resolvables.iter().filter(|r| r.is_concludable()).count(),
            negations = self.conjunction.negations().len(),
            disjunctions = self.conjunction.disjunctions().len(),
            "compiled conjunction"
        );
        self.compiled = Some(Compiled { resolvables, steps });
        true
    }

    fn plan_for(&mut self, bound: BTreeSet<Variable>) -> Option<Arc<[usize]>> {
        let compiled = self.compiled.as_ref()?;
        if let Some(plan) = self.plans.get(&bound) {
            return Some(plan.clone());
        }
        let mut order = planner::plan(&compiled.resolvables, &bound).order().to_vec();
        order.extend(compiled.resolvables.len()..compiled.steps.len());
        let plan: Arc<[usize]> = order.into();
        self.plans.insert(bound, plan.clone());
        Some(plan)
    }

    pub(crate) fn receive_request(&mut self, ctx: &mut Context, request: Request) {
        let key = request.key();
        if self.streams.contains_key(&key) {
            self.pull_deepest(ctx, key);
            return;
        }
        if !self.compile(ctx) {
            return;
        }
        let entry = request.partial.concepts().project(&self.variables);
        let Some(plan) = self.plan_for(entry.variables()) else {
            return;
        };
        let base = request.partial.request(ctx.id(), entry);
        self.streams.insert(
            key,
            Stream {
                scope: request.scope(),
                asker: request.asker,
                stream: request.stream,
                plan,
                levels: Vec::new(),
                emitted: AHashSet::new(),
                awaiting: true,
            },
        );
        self.descend(ctx, key, base);
    }

    /// `base` satisfies every step above the stream's current depth.
    fn descend(&mut self, ctx: &mut Context, key: StreamKey, base: Partial) {
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let Some(compiled) = self.compiled.as_ref() else {
            return;
        };
        let depth = stream.levels.len();
        let Some(&step_index) = stream.plan.get(depth) else {
            if stream.emitted.insert(base.concepts().clone()) {
                stream.awaiting = false;
                ctx.answer(&stream.asker, stream.stream, base.to_compound(ctx.id()));
            } else {
                self.pull_deepest(ctx, key);
            }
            return;
        };
        let step = &compiled.steps[step_index];
        let sub = ctx.new_stream();
        let request = base.request(ctx.id(), step.bounds(base.concepts()));
        self.pending.insert(sub, key);
        ctx.request(&step.resolver, sub, request.clone());
        stream.levels.push(Level {
            step: step_index,
            sub,
            base,
            request,
        });
    }

    /// Pull the deepest open level again, or finish the stream.
    fn pull_deepest(&mut self, ctx: &mut Context, key: StreamKey) {
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let Some(compiled) = self.compiled.as_ref() else {
            return;
        };
        stream.awaiting = true;
        match stream.levels.last() {
            Some(level) => ctx.request(&compiled.steps[level.step].resolver, level.sub, level.request.clone()),
            None => {
                let novel = self.novel.contains(&stream.scope.id);
                ctx.done(&stream.asker, stream.stream, stream.scope.iteration, novel);
                self.streams.remove(&key);
            }
        }
    }

    pub(crate) fn receive_response(&mut self, ctx: &mut Context, response: Response) {
        let Some(&key) = self.pending.get(&response.stream()) else {
            tracing::trace!(resolver = %ctx.name(), "response for a closed stream");
            return;
        };
        match response {
            Response::Answer { stream: sub, answer } => {
                let Some(stream) = self.streams.get(&key) else {
                    return;
                };
                let Some(level) = stream.levels.last().filter(|level| level.sub == sub) else {
                    tracing::warn!(resolver = %ctx.name(), "answer for a level that is not open");
                    return;
                };
                let Some(compiled) = self.compiled.as_ref() else {
                    return;
                };
                let answer = compiled.steps[level.step].localise(&answer, ctx.id());
                match level.base.merge(ctx.id(), &answer) {
                    Some(next) => self.descend(ctx, key, next),
                    None => self.pull_deepest(ctx, key),
                }
            }
            Response::Done { stream: sub, novel, .. } => {
                self.pending.remove(&sub);
                if let Some(stream) = self.streams.get_mut(&key) {
                    if novel {
                        self.novel.insert(stream.scope.id);
                    }
                    stream.levels.pop();
                }
                self.pull_deepest(ctx, key);
            }
            Response::Fail { stream: sub, .. } => {
                self.pending.remove(&sub);
                if let Some(stream) = self.streams.remove(&key) {
                    for level in &stream.levels {
                        self.pending.remove(&level.sub);
                    }
                    ctx.fail(&stream.asker, stream.stream, stream.scope.iteration);
                }
            }
        }
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
        self.novel.remove(&scope);
    }
}
