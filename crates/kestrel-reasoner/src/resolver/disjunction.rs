//! Answers a disjunction by exhausting its branches in order.

use super::Context;
use crate::answer::{AnswerState, Partial};
use crate::message::{Request, ResolverRef, Response, ScopeId, StreamId, StreamKey};
use ahash::{AHashMap, AHashSet};
use kestrel_pattern::{ConceptMap, Disjunction, Variable};
use std::collections::BTreeSet;

pub(crate) struct DisjunctionResolver {
    disjunction: Disjunction,
    variables: BTreeSet<Variable>,
    branches: Option<Vec<Branch>>,
    streams: AHashMap<StreamKey, Stream>,
    pending: AHashMap<StreamId, StreamKey>,
    /// Scopes in which a branch reported novel answers this iteration.
    novel: AHashSet<ScopeId>,
}

struct Branch {
    resolver: ResolverRef,
    variables: BTreeSet<Variable>,
}

struct Stream {
    asker: ResolverRef,
    stream: StreamId,
    partial: Partial,
    /// Answers keep named variables and whatever was bound on entry.
    keep: BTreeSet<Variable>,
    branch: usize,
    sub: Option<(StreamId, Partial)>,
    emitted: AHashSet<ConceptMap>,
    awaiting: bool,
}

impl DisjunctionResolver {
    pub(crate) fn new(disjunction: Disjunction) -> Self {
        let variables = disjunction.variables();
        Self {
            disjunction,
            variables,
            branches: None,
            streams: AHashMap::new(),
            pending: AHashMap::new(),
            novel: AHashSet::new(),
        }
    }

    fn ensure_branches(&mut self, ctx: &Context) -> bool {
        if self.branches.is_some() {
            return true;
        }
        let mut branches = Vec::with_capacity(self.disjunction.branches().len());
        for conjunction in self.disjunction.branches() {
            let Ok(resolver) = ctx.shared.conjunction(conjunction) else {
                return false;
            };
            branches.push(Branch {
                resolver,
                variables: conjunction.all_variables(),
            });
        }
        self.branches = Some(branches);
        true
    }

    pub(crate) fn receive_request(&mut self, ctx: &mut Context, request: Request) {
        let key = request.key();
        if !self.streams.contains_key(&key) {
            if !self.ensure_branches(ctx) {
                return;
            }
            let entry = request.partial.concepts().project(&self.variables);
            let keep = self
                .variables
                .iter()
                .filter(|v| v.is_retrievable() || entry.contains(v))
                .cloned()
                .collect();
            self.streams.insert(
                key,
                Stream {
                    asker: request.asker,
                    stream: request.stream,
                    partial: request.partial.request(ctx.id(), entry),
                    keep,
                    branch: 0,
                    sub: None,
                    emitted: AHashSet::new(),
                    awaiting: true,
                },
            );
        }
        self.advance(ctx, key);
    }

    fn advance(&mut self, ctx: &mut Context, key: StreamKey) {
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let Some(branches) = self.branches.as_ref() else {
            return;
        };
        let Some(branch) = branches.get(stream.branch) else {
            let scope = stream.partial.scope();
            ctx.done(&stream.asker, stream.stream, scope.iteration, self.novel.contains(&scope.id));
            self.streams.remove(&key);
            return;
        };
        stream.awaiting = true;
        if let Some((sub, partial)) = &stream.sub {
            ctx.request(&branch.resolver, *sub, partial.clone());
            return;
        }
        let sub = ctx.new_stream();
        let partial = stream
            .partial
            .request(ctx.id(), stream.partial.concepts().project(&branch.variables));
        self.pending.insert(sub, key);
        ctx.request(&branch.resolver, sub, partial.clone());
        stream.sub = Some((sub, partial));
    }

    pub(crate) fn receive_response(&mut self, ctx: &mut Context, response: Response) {
        let Some(&key) = self.pending.get(&response.stream()) else {
            tracing::trace!(resolver = %ctx.name(), "response for a closed stream");
            return;
        };
        match response {
            Response::Answer { answer, .. } => {
                let Some(stream) = self.streams.get_mut(&key) else {
                    return;
                };
                let concepts = answer.concepts().project(&stream.keep);
                if stream.emitted.insert(concepts.clone()) {
                    stream.awaiting = false;
                    ctx.answer(&stream.asker, stream.stream, answer.with_concepts(concepts, ctx.id()));
                } else {
                    self.advance(ctx, key);
                }
            }
            Response::Done { stream: sub, novel, .. } => {
                self.pending.remove(&sub);
                if let Some(stream) = self.streams.get_mut(&key) {
                    if novel {
                        self.novel.insert(stream.partial.scope().id);
                    }
                    stream.branch += 1;
                    stream.sub = None;
                }
                self.advance(ctx, key);
            }
            Response::Fail { stream: sub, .. } => {
                self.pending.remove(&sub);
                if let Some(stream) = self.streams.remove(&key) {
                    ctx.fail(&stream.asker, stream.stream, stream.partial.scope().iteration);
                }
            }
        }
    }

    pub(crate) fn enter_iteration(&mut self, ctx: &Context, scope: ScopeId) {
        self.streams.retain(|_, stream| {
            let current = stream.partial.scope();
            if current.id != scope {
                return true;
            }
            if stream.awaiting {
                ctx.fail(&stream.asker, stream.stream, current.iteration);
            }
            false
        });
        let streams = &self.streams;
        self.pending.retain(|_, key| streams.contains_key(key));
        self.novel.remove(&scope);
    }
}
