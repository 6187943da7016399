//! Answers a concludable from stored facts and from every rule that can
//! conclude it.
//!
//! Per stream the resolver first drains stored facts, then walks its rule
//! sources one at a time. A request that re-enters this resolver with the
//! same bounds further down its own call chain is not explored again; it
//! is served from answers recorded before the current iteration of its
//! scope began, which is what makes recursive rules terminate. The root
//! repeats iterations until no concludable derives anything its scope had
//! not seen at the start of the iteration.
//!
//! The record is shared by every scope. Each scope keeps a horizon: the
//! length of the record when the scope last entered an iteration.

use super::Context;
use crate::answer::{AnswerState, Compound, Partial};
use crate::error::ReasonerError;
use crate::message::{Request, ResolverRef, Response, ScopeId, StreamId, StreamKey};
use crate::resolvable::ConcludableShape;
use crate::unifier::Unifier;
use ahash::{AHashMap, AHashSet};
use kestrel_pattern::{ConceptMap, ConceptMapIter, Conjunction, Rule, Variable};
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) struct ConcludableResolver {
    shape: ConcludableShape,
    pattern: Conjunction,
    variables: BTreeSet<Variable>,
    sources: Option<Vec<RuleSource>>,
    record: Vec<Compound>,
    /// Position of every recorded answer in `record`.
    recorded: AHashMap<ConceptMap, usize>,
    horizons: AHashMap<ScopeId, usize>,
    novel: AHashSet<ScopeId>,
    streams: AHashMap<StreamKey, Stream>,
    pending: AHashMap<StreamId, StreamKey>,
}

struct RuleSource {
    rule: Arc<Rule>,
    unifier: Unifier,
    resolver: ResolverRef,
}

struct Stream {
    asker: ResolverRef,
    stream: StreamId,
    partial: Partial,
    bounds: ConceptMap,
    stage: Stage,
    emitted: AHashSet<ConceptMap>,
    awaiting: bool,
}

enum Stage {
    Stored(ConceptMapIter),
    Rules { source: usize, sub: Option<(StreamId, Partial)> },
    Recorded { cursor: usize },
}

impl ConcludableResolver {
    /// `shape` must be canonical.
    pub(crate) fn new(shape: ConcludableShape) -> Self {
        let pattern = shape.pattern();
        let variables = pattern.variables();
        Self {
            shape,
            pattern,
            variables,
            sources: None,
            record: Vec::new(),
            recorded: AHashMap::new(),
            horizons: AHashMap::new(),
            novel: AHashSet::new(),
            streams: AHashMap::new(),
            pending: AHashMap::new(),
        }
    }

    fn ensure_sources(&mut self, ctx: &Context) -> bool {
        if self.sources.is_some() {
            return true;
        }
        let mut sources = Vec::new();
        for (rule, unifiers) in ctx.shared.logic().rules_concluding(&self.shape) {
            let Ok(resolver) = ctx.shared.conclusion(&rule) else {
                return false;
            };
            for unifier in unifiers {
                sources.push(RuleSource {
                    rule: rule.clone(),
                    unifier,
                    resolver: resolver.clone(),
                });
            }
        }
        tracing::debug!(
            resolver = %ctx.name(),
            sources = sources.len(),
            "collected rule sources"
        );
        self.sources = Some(sources);
        true
    }

    pub(crate) fn receive_request(&mut self, ctx: &mut Context, request: Request) {
        let key = request.key();
        if !self.streams.contains_key(&key) {
            if !self.ensure_sources(ctx) {
                return;
            }
            let bounds = request.partial.concepts().project(&self.variables);
            let stored = match ctx.shared.traversal().traverse(&self.pattern, &bounds) {
                Ok(stored) => stored,
                Err(err) => {
                    ctx.fatal(ReasonerError::traversal(&self.pattern, &err));
                    return;
                }
            };
            self.streams.insert(
                key,
                Stream {
                    asker: request.asker,
                    stream: request.stream,
                    partial: request.partial,
                    bounds,
                    stage: Stage::Stored(stored),
                    emitted: AHashSet::new(),
                    awaiting: false,
                },
            );
        }
        self.advance(ctx, key);
    }

    /// Produce the next answer of a stream, or pull a rule for one.
    fn advance(&mut self, ctx: &mut Context, key: StreamKey) {
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let Some(sources) = self.sources.as_ref() else {
            return;
        };
        let scope = stream.partial.scope();
        let horizon = self.horizons.get(&scope.id).copied().unwrap_or(0);
        let novel = self.novel.contains(&scope.id);
        loop {
            match &mut stream.stage {
                Stage::Stored(answers) => match answers.next() {
                    Some(Ok(answer)) => {
                        if stream.emitted.insert(answer.clone()) {
                            stream.awaiting = false;
                            ctx.answer(&stream.asker, stream.stream, Compound::stored(answer, ctx.id()));
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        ctx.fatal(ReasonerError::traversal(&self.pattern, &err));
                        return;
                    }
                    None => {
                        stream.stage = if stream.partial.is_reentrant(ctx.id(), &stream.bounds) {
                            tracing::trace!(
                                resolver = %ctx.name(),
                                bounds = %stream.bounds,
                                depth = stream.partial.depth(),
                                "re-entered, serving recorded answers"
                            );
                            Stage::Recorded { cursor: 0 }
                        } else {
                            Stage::Rules { source: 0, sub: None }
                        };
                    }
                },
                Stage::Recorded { cursor } => {
                    while *cursor < horizon {
                        let recorded = &self.record[*cursor];
                        *cursor += 1;
                        if recorded.concepts().is_compatible(&stream.bounds)
                            && stream.emitted.insert(recorded.concepts().clone())
                        {
                            stream.awaiting = false;
                            let answer = recorded.with_concepts(recorded.concepts().clone(), ctx.id());
                            ctx.answer(&stream.asker, stream.stream, answer);
                            return;
                        }
                    }
                    ctx.done(&stream.asker, stream.stream, scope.iteration, novel);
                    self.streams.remove(&key);
                    return;
                }
                Stage::Rules { source, sub } => {
                    let Some(rule_source) = sources.get(*source) else {
                        ctx.done(&stream.asker, stream.stream, scope.iteration, novel);
                        self.streams.remove(&key);
                        return;
                    };
                    if let Some((sub, partial)) = sub {
                        stream.awaiting = true;
                        ctx.request(&rule_source.resolver, *sub, partial.clone());
                        return;
                    }
                    match rule_source.unifier.unify(&stream.bounds) {
                        Some(rule_bounds) => {
                            let id = ctx.new_stream();
                            let partial = stream
                                .partial
                                .enter(ctx.id(), stream.bounds.clone())
                                .request(ctx.id(), rule_bounds);
                            self.pending.insert(id, key);
                            *sub = Some((id, partial.clone()));
                            stream.awaiting = true;
                            ctx.request(&rule_source.resolver, id, partial);
                            return;
                        }
                        None => *source += 1,
                    }
                }
            }
        }
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
                if let Some(stream) = self.streams.get_mut(&key) {
                    if novel {
                        self.novel.insert(stream.partial.scope().id);
                    }
                    if let Stage::Rules { source, sub } = &mut stream.stage {
                        *source += 1;
                        *sub = None;
                    }
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

    fn receive_answer(&mut self, ctx: &mut Context, key: StreamKey, answer: Compound) {
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let Stage::Rules { source, sub: Some((sub, partial)) } = &stream.stage else {
            return;
        };
        let Some(rule_source) = self.sources.as_ref().and_then(|s| s.get(*source)) else {
            return;
        };

        let concepts = rule_source
            .unifier
            .unify_back(answer.concepts())
            .and_then(|back| back.merge(&stream.bounds));
        let Some(concepts) = concepts.filter(|c| !stream.emitted.contains(c)) else {
            ctx.request(&rule_source.resolver, *sub, partial.clone());
            return;
        };

        stream.emitted.insert(concepts.clone());
        let inferred = Compound::inferred(concepts.clone(), ctx.id(), answer.explanations().to_vec());
        let scope = stream.partial.scope();
        let index = match self.recorded.get(&concepts) {
            Some(&index) => index,
            None => {
                tracing::debug!(
                    resolver = %ctx.name(),
                    rule = %rule_source.rule.label(),
                    answer = %concepts,
                    scope = %scope.id,
                    iteration = scope.iteration,
                    "recorded inferred answer"
                );
                self.recorded.insert(concepts, self.record.len());
                self.record.push(inferred.clone());
                self.record.len() - 1
            }
        };
        if index >= self.horizons.get(&scope.id).copied().unwrap_or(0) {
            self.novel.insert(scope.id);
        }
        stream.awaiting = false;
        ctx.answer(&stream.asker, stream.stream, inferred);
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
        self.horizons.insert(scope, self.record.len());
    }
}
