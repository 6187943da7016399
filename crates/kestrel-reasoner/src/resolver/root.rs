//! The root driver: the caller's entry point and the reiteration loop.
//!
//! ```text
//!   execute() ─► pull ─► body ─► Answer ─► on_answer(Match)
//!                         │
//!                         └─► Done(novel) ─► next iteration, pull again
//!                         └─► Done(fixpoint) ─► on_iteration_done(i)
//! ```
//!
//! Each `execute` asks for one more distinct answer. Pulls are serialised:
//! at most one request is in flight. A pass ends at the first iteration in
//! which no concludable derived anything new to this root; executing again
//! afterwards starts a fresh pass.
//!
//! Every root owns a scope, so roots sharing resolvers iterate
//! independently and never preempt one another.

use super::Context;
use crate::answer::{AnswerState, Match, Partial};
use crate::error::ReasonerError;
use crate::message::{ResolverRef, Response, Scope, ScopeId, StreamId};
use ahash::AHashSet;
use kestrel_pattern::{ConceptMap, Conjunction, Disjunction, Variable};
use std::collections::BTreeSet;
use std::fmt;

/// What a root resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Conjunction(Conjunction),
    Disjunction(Disjunction),
}

impl Pattern {
    /// Named variables, the default answer filter.
    pub fn retrieved(&self) -> BTreeSet<Variable> {
        match self {
            Pattern::Conjunction(c) => c.retrieved(),
            Pattern::Disjunction(d) => d.retrieved(),
        }
    }
}

impl From<Conjunction> for Pattern {
    fn from(conjunction: Conjunction) -> Self {
        Pattern::Conjunction(conjunction)
    }
}

impl From<Disjunction> for Pattern {
    fn from(disjunction: Disjunction) -> Self {
        Pattern::Disjunction(disjunction)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Conjunction(c) => write!(f, "{c}"),
            Pattern::Disjunction(d) => write!(f, "{d}"),
        }
    }
}

type AnswerFn = Box<dyn FnMut(Match) + Send>;
type IterationFn = Box<dyn FnMut(u32) + Send>;
type ErrorFn = Box<dyn FnMut(ReasonerError) + Send>;

/// Callbacks a root reports to. They run on the resolver runtime and
/// should hand work off rather than block.
pub struct RootCallbacks {
    on_answer: AnswerFn,
    on_iteration_done: IterationFn,
    on_error: ErrorFn,
}

impl RootCallbacks {
    pub fn new(
        on_answer: impl FnMut(Match) + Send + 'static,
        on_iteration_done: impl FnMut(u32) + Send + 'static,
        on_error: impl FnMut(ReasonerError) + Send + 'static,
    ) -> Self {
        Self {
            on_answer: Box::new(on_answer),
            on_iteration_done: Box::new(on_iteration_done),
            on_error: Box::new(on_error),
        }
    }
}

impl fmt::Debug for RootCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootCallbacks").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Running,
    Completed,
}

pub(crate) struct RootResolver {
    body: ResolverRef,
    filter: BTreeSet<Variable>,
    callbacks: RootCallbacks,
    phase: Phase,
    /// `execute` calls not yet answered.
    requested: usize,
    in_flight: Option<StreamId>,
    stream: Option<StreamId>,
    emitted: AHashSet<ConceptMap>,
    scope: ScopeId,
    /// Registry-wide number of the current iteration.
    iteration: u32,
    /// Iterations started in the current pass.
    iterations: u32,
}

impl RootResolver {
    pub(crate) fn new(
        body: ResolverRef,
        filter: BTreeSet<Variable>,
        callbacks: RootCallbacks,
        scope: ScopeId,
    ) -> Self {
        Self {
            scope,
            iteration: 0,
            body,
            filter,
            callbacks,
            phase: Phase::Fresh,
            requested: 0,
            in_flight: None,
            stream: None,
            emitted: AHashSet::new(),
            iterations: 0,
        }
    }

    pub(crate) fn execute(&mut self, ctx: &mut Context) {
        self.requested += 1;
        if self.in_flight.is_none() {
            self.pull(ctx);
        }
    }

    fn pull(&mut self, ctx: &mut Context) {
        if self.phase != Phase::Running {
            self.phase = Phase::Running;
            self.emitted.clear();
            self.iterations = 0;
            if !self.next_iteration(ctx) {
                return;
            }
        }
        let stream = match self.stream {
            Some(stream) => stream,
            None => {
                let stream = ctx.new_stream();
                self.stream = Some(stream);
                stream
            }
        };
        self.in_flight = Some(stream);
        let scope = Scope {
            id: self.scope,
            iteration: self.iteration,
        };
        ctx.request(&self.body, stream, Partial::root(ctx.id(), scope));
    }

    /// Move to a fresh iteration number. False when the iteration limit is
    /// exhausted and the registry is being terminated.
    fn next_iteration(&mut self, ctx: &mut Context) -> bool {
        if let Some(limit) = ctx.shared.config().iteration_limit {
            if self.iterations >= limit {
                ctx.fatal(ReasonerError::IterationLimit { limit });
                return false;
            }
        }
        self.iterations += 1;
        self.iteration = ctx.shared.next_iteration();
        self.stream = None;
        tracing::debug!(
            resolver = %ctx.name(),
            scope = %self.scope,
            iteration = self.iteration,
            pass_iteration = self.iterations,
            "starting iteration"
        );
        true
    }

    pub(crate) fn receive_response(&mut self, ctx: &mut Context, response: Response) {
        if self.in_flight != Some(response.stream()) {
            tracing::trace!(resolver = %ctx.name(), "stale response");
            return;
        }
        self.in_flight = None;
        match response {
            Response::Answer { answer, .. } => {
                let concepts = answer.concepts().project(&self.filter);
                if self.emitted.insert(concepts.clone()) {
                    self.requested = self.requested.saturating_sub(1);
                    (self.callbacks.on_answer)(Match::new(concepts, &answer, ctx.id(), self.iteration));
                    if self.requested > 0 {
                        self.pull(ctx);
                    }
                } else {
                    self.pull(ctx);
                }
            }
            Response::Done { novel: true, iteration, .. } => {
                tracing::debug!(resolver = %ctx.name(), iteration, "new facts recorded, reiterating");
                if self.next_iteration(ctx) {
                    self.pull(ctx);
                }
            }
            Response::Done { novel: false, iteration, .. } => {
                tracing::debug!(
                    resolver = %ctx.name(),
                    iteration,
                    iterations = self.iterations,
                    answers = self.emitted.len(),
                    "fixpoint reached"
                );
                self.phase = Phase::Completed;
                self.requested = self.requested.saturating_sub(1);
                (self.callbacks.on_iteration_done)(self.iteration);
                if self.requested > 0 {
                    self.pull(ctx);
                }
            }
            Response::Fail { iteration, .. } => {
                tracing::debug!(resolver = %ctx.name(), iteration, "iteration preempted, restarting");
                if self.next_iteration(ctx) {
                    self.pull(ctx);
                }
            }
        }
    }

    pub(crate) fn terminate(&mut self, ctx: &Context, cause: ReasonerError) {
        if self.phase == Phase::Completed && self.requested == 0 {
            tracing::trace!(resolver = %ctx.name(), "terminated after completion");
            return;
        }
        tracing::warn!(resolver = %ctx.name(), error = %cause, "root terminated");
        self.phase = Phase::Completed;
        self.requested = 0;
        (self.callbacks.on_error)(cause);
    }
}
