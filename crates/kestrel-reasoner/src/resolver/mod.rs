//! Resolver actors.
//!
//! ```text
//!                 Root
//!                  │ Request / Answer·Fail·Done
//!             Conjunction ─────────────── Disjunction ── Conjunction ...
//!              │        │
//!       Retrievable   Concludable ── Conclusion (one per rule)
//!                                        │
//!                                    Conjunction (rule body) ...
//! ```
//!
//! Each resolver is a task on the registry's runtime draining an unbounded
//! mailbox, so it handles one message at a time and owns its state without
//! locks. Resolvers only talk by message; the graph may be cyclic.
//!
//! Every request carries its scope: the root or negated block it serves
//! and that scope's iteration. Per scope, a resolver fails requests from
//! older iterations and drops the scope's streams when it first sees a
//! newer one. Streams of other scopes are untouched.

mod concludable;
mod conclusion;
mod conjunction;
mod disjunction;
mod negation;
mod retrievable;
pub(crate) mod root;

pub(crate) use concludable::ConcludableResolver;
pub(crate) use conclusion::ConclusionResolver;
pub(crate) use conjunction::ConjunctionResolver;
pub(crate) use disjunction::DisjunctionResolver;
pub(crate) use negation::NegationResolver;
pub(crate) use retrievable::RetrievableResolver;
pub(crate) use root::RootResolver;

use crate::answer::{Compound, Partial, ResolverId};
use crate::error::ReasonerError;
use crate::message::{Message, Request, ResolverRef, Response, ScopeId, StreamId};
use crate::registry::RegistryShared;
use ahash::AHashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// Context
// ============================================================================

/// What every resolver knows about itself and its registry.
pub(crate) struct Context {
    pub(crate) this: ResolverRef,
    pub(crate) shared: Arc<RegistryShared>,
    next_stream: u64,
}

impl Context {
    fn new(this: ResolverRef, shared: Arc<RegistryShared>) -> Self {
        Self {
            this,
            shared,
            next_stream: 0,
        }
    }

    pub(crate) fn id(&self) -> ResolverId {
        self.this.id()
    }

    pub(crate) fn name(&self) -> &str {
        self.this.name()
    }

    pub(crate) fn new_stream(&mut self) -> StreamId {
        let stream = StreamId(self.next_stream);
        self.next_stream += 1;
        stream
    }

    pub(crate) fn request(&self, to: &ResolverRef, stream: StreamId, partial: Partial) {
        let scope = partial.scope();
        tracing::trace!(
            from = %self.name(),
            to = %to.name(),
            stream = stream.0,
            scope = %scope.id,
            iteration = scope.iteration,
            "request"
        );
        to.send(Message::Request(Request {
            asker: self.this.clone(),
            stream,
            partial,
        }));
    }

    pub(crate) fn answer(&self, to: &ResolverRef, stream: StreamId, answer: Compound) {
        tracing::trace!(from = %self.name(), to = %to.name(), stream = stream.0, "answer");
        to.send(Message::Response(Response::Answer { stream, answer }));
    }

    pub(crate) fn fail(&self, to: &ResolverRef, stream: StreamId, iteration: u32) {
        tracing::trace!(from = %self.name(), to = %to.name(), stream = stream.0, iteration, "fail");
        to.send(Message::Response(Response::Fail { stream, iteration }));
    }

    pub(crate) fn done(&self, to: &ResolverRef, stream: StreamId, iteration: u32, novel: bool) {
        tracing::trace!(from = %self.name(), to = %to.name(), stream = stream.0, novel, "done");
        to.send(Message::Response(Response::Done {
            stream,
            iteration,
            novel,
        }));
    }

    /// Abort the whole registry.
    pub(crate) fn fatal(&self, cause: ReasonerError) {
        tracing::error!(resolver = %self.name(), error = %cause, "resolver failed");
        self.shared.terminate(cause);
    }
}

// ============================================================================
// Resolver kinds
// ============================================================================

pub(crate) enum ResolverKind {
    Root(RootResolver),
    Conjunction(ConjunctionResolver),
    Disjunction(DisjunctionResolver),
    Concludable(ConcludableResolver),
    Retrievable(RetrievableResolver),
    Conclusion(ConclusionResolver),
    Negation(NegationResolver),
}

impl ResolverKind {
    fn receive_request(&mut self, ctx: &mut Context, request: Request) {
        match self {
            ResolverKind::Root(_) => {
                tracing::warn!(resolver = %ctx.name(), asker = %request.asker.name(), "root resolvers do not answer requests");
            }
            ResolverKind::Conjunction(r) => r.receive_request(ctx, request),
            ResolverKind::Disjunction(r) => r.receive_request(ctx, request),
            ResolverKind::Concludable(r) => r.receive_request(ctx, request),
            ResolverKind::Retrievable(r) => r.receive_request(ctx, request),
            ResolverKind::Conclusion(r) => r.receive_request(ctx, request),
            ResolverKind::Negation(r) => r.receive_request(ctx, request),
        }
    }

    fn receive_response(&mut self, ctx: &mut Context, response: Response) {
        match self {
            ResolverKind::Root(r) => r.receive_response(ctx, response),
            ResolverKind::Conjunction(r) => r.receive_response(ctx, response),
            ResolverKind::Disjunction(r) => r.receive_response(ctx, response),
            ResolverKind::Concludable(r) => r.receive_response(ctx, response),
            ResolverKind::Conclusion(r) => r.receive_response(ctx, response),
            ResolverKind::Negation(r) => r.receive_response(ctx, response),
            ResolverKind::Retrievable(_) => {
                tracing::warn!(resolver = %ctx.name(), "retrievable resolvers never send requests");
            }
        }
    }

    /// Start a new iteration of `scope`: drop its streams, failing those
    /// still waiting downstream, and its per-iteration state.
    fn enter_iteration(&mut self, ctx: &Context, scope: ScopeId) {
        match self {
            ResolverKind::Root(_) => {}
            ResolverKind::Conjunction(r) => r.enter_iteration(ctx, scope),
            ResolverKind::Disjunction(r) => r.enter_iteration(ctx, scope),
            ResolverKind::Concludable(r) => r.enter_iteration(ctx, scope),
            ResolverKind::Retrievable(r) => r.enter_iteration(scope),
            ResolverKind::Conclusion(r) => r.enter_iteration(ctx, scope),
            ResolverKind::Negation(r) => r.enter_iteration(ctx, scope),
        }
    }
}

// ============================================================================
// Actor loop
// ============================================================================

struct Resolver {
    ctx: Context,
    kind: ResolverKind,
    /// Current iteration of every scope this resolver has served.
    iterations: AHashMap<ScopeId, u32>,
}

impl Resolver {
    fn handle(&mut self, message: Message) -> ControlFlow<()> {
        match message {
            Message::Request(request) => {
                let scope = request.scope();
                match self.iterations.get(&scope.id).copied() {
                    Some(current) if scope.iteration < current => {
                        self.ctx.fail(&request.asker, request.stream, scope.iteration);
                        return ControlFlow::Continue(());
                    }
                    Some(current) if scope.iteration == current => {}
                    previous => {
                        tracing::debug!(
                            resolver = %self.ctx.name(),
                            scope = %scope.id,
                            from = ?previous,
                            to = scope.iteration,
                            "entering iteration"
                        );
                        self.kind.enter_iteration(&self.ctx, scope.id);
                        self.iterations.insert(scope.id, scope.iteration);
                    }
                }
                self.kind.receive_request(&mut self.ctx, request);
            }
            Message::Response(response) => self.kind.receive_response(&mut self.ctx, response),
            Message::Execute => match &mut self.kind {
                ResolverKind::Root(root) => root.execute(&mut self.ctx),
                _ => tracing::warn!(resolver = %self.ctx.name(), "only roots can be executed"),
            },
            Message::Release => {
                tracing::debug!(resolver = %self.ctx.name(), "released");
                return ControlFlow::Break(());
            }
            Message::Terminate(cause) => {
                if let ResolverKind::Root(root) = &mut self.kind {
                    root.terminate(&self.ctx, cause);
                }
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}

/// Start a resolver task and return its address.
pub(crate) fn spawn(shared: &Arc<RegistryShared>, id: ResolverId, name: String, kind: ResolverKind) -> ResolverRef {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let this = ResolverRef::new(id, name, tx);
    let mut resolver = Resolver {
        ctx: Context::new(this.clone(), shared.clone()),
        kind,
        iterations: AHashMap::new(),
    };
    shared.runtime().spawn(async move {
        while let Some(message) = rx.recv().await {
            if resolver.handle(message).is_break() {
                break;
            }
        }
        tracing::trace!(resolver = %resolver.ctx.name(), "resolver stopped");
    });
    this
}
