//! Answers a negated block: the incoming bounds when the block has no
//! answer under them, nothing otherwise.
//!
//! ```text
//!   Request(bounds) ─► new scope s ─► disjunction(bounds) @ s, iteration 1
//!        Answer            ─► Done, no answer
//!        Done(novel)       ─► disjunction @ s, next iteration
//!        Done(fixpoint)    ─► Answer(bounds), then Done on the next pull
//! ```
//!
//! The block is resolved to its own fixpoint before deciding, so an answer
//! that only a later iteration would derive is never missed. Rule sets are
//! stratified, so nothing the block depends on can depend on this negation.

use super::Context;
use crate::answer::{AnswerState, Partial};
use crate::error::ReasonerError;
use crate::message::{Request, ResolverRef, Response, Scope, ScopeId, StreamId, StreamKey};
use ahash::AHashMap;
use kestrel_pattern::{Disjunction, Variable};
use std::collections::BTreeSet;

pub(crate) struct NegationResolver {
    disjunction: Disjunction,
    variables: BTreeSet<Variable>,
    body: Option<ResolverRef>,
    streams: AHashMap<StreamKey, Stream>,
    pending: AHashMap<StreamId, StreamKey>,
}

struct Stream {
    asker: ResolverRef,
    stream: StreamId,
    partial: Partial,
    /// Scope of the block's own fixpoint.
    inner: ScopeId,
    iterations: u32,
    /// The block's current sub-stream.
    sub: Option<StreamId>,
    answered: bool,
    awaiting: bool,
}

impl NegationResolver {
    pub(crate) fn new(disjunction: Disjunction) -> Self {
        let variables = disjunction.variables();
        Self {
            disjunction,
            variables,
            body: None,
            streams: AHashMap::new(),
            pending: AHashMap::new(),
        }
    }

    pub(crate) fn receive_request(&mut self, ctx: &mut Context, request: Request) {
        let key = request.key();
        if let Some(stream) = self.streams.get(&key) {
            if stream.answered {
                ctx.done(&stream.asker, stream.stream, stream.partial.scope().iteration, false);
                self.streams.remove(&key);
            } else {
                tracing::trace!(resolver = %ctx.name(), "negation still undecided");
            }
            return;
        }
        if self.body.is_none() {
            match ctx.shared.disjunction(&self.disjunction) {
                Ok(body) => self.body = Some(body),
                Err(_) => return,
            }
        }
        let inner = ctx.shared.next_scope();
        tracing::trace!(resolver = %ctx.name(), scope = %inner, bounds = %request.partial.concepts(), "deciding negation");
        self.streams.insert(
            key,
            Stream {
                asker: request.asker,
                stream: request.stream,
                partial: request.partial,
                inner,
                iterations: 0,
                sub: None,
                answered: false,
                awaiting: true,
            },
        );
        self.next_iteration(ctx, key);
    }

    /// Resolve the block again under a fresh iteration of its scope.
    fn next_iteration(&mut self, ctx: &mut Context, key: StreamKey) {
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let Some(body) = self.body.as_ref() else {
            return;
        };
        if let Some(limit) = ctx.shared.config().iteration_limit {
            if stream.iterations >= limit {
                ctx.fatal(ReasonerError::IterationLimit { limit });
                return;
            }
        }
        stream.iterations += 1;
        let scope = Scope {
            id: stream.inner,
            iteration: ctx.shared.next_iteration(),
        };
        let bounds = stream.partial.concepts().project(&self.variables);
        let partial = Partial::root(ctx.id(), scope).request(ctx.id(), bounds);
        let sub = ctx.new_stream();
        if let Some(previous) = stream.sub.replace(sub) {
            self.pending.remove(&previous);
        }
        self.pending.insert(sub, key);
        ctx.request(body, sub, partial);
    }

    pub(crate) fn receive_response(&mut self, ctx: &mut Context, response: Response) {
        let Some(&key) = self.pending.get(&response.stream()) else {
            tracing::trace!(resolver = %ctx.name(), "response for a closed stream");
            return;
        };
        match response {
            Response::Answer { stream: sub, .. } => {
                self.pending.remove(&sub);
                if let Some(stream) = self.streams.remove(&key) {
                    tracing::trace!(resolver = %ctx.name(), bounds = %stream.partial.concepts(), "negated block holds");
                    ctx.done(&stream.asker, stream.stream, stream.partial.scope().iteration, false);
                }
            }
            Response::Done { novel: true, .. } | Response::Fail { .. } => self.next_iteration(ctx, key),
            Response::Done { stream: sub, novel: false, .. } => {
                self.pending.remove(&sub);
                let Some(stream) = self.streams.get_mut(&key) else {
                    return;
                };
                stream.sub = None;
                stream.answered = true;
                stream.awaiting = false;
                ctx.answer(&stream.asker, stream.stream, stream.partial.to_compound(ctx.id()));
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
    }
}
