//! Resolver mailboxes and the request/response protocol.
//!
//! A request opens or continues a *stream* identified by (asker, stream id)
//! and asks for one more answer. Every request is answered by exactly one
//! of `Answer`, `Fail` or `Done`. After `Done` the asker never pulls that
//! stream again.
//!
//! Every request belongs to a [`Scope`]: the root (or negated block) whose
//! fixpoint it serves, and that scope's current iteration. Resolvers keep
//! iteration state per scope, so independent roots never preempt each
//! other.

use crate::answer::{Compound, Partial, ResolverId};
use crate::error::ReasonerError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Stream identifier, unique per asking resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct StreamId(pub(crate) u64);

/// Key of a stream at the answering resolver.
pub(crate) type StreamKey = (ResolverId, StreamId);

/// Identity of a reiteration driver: a root, or one evaluation of a
/// negated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ScopeId(pub(crate) u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// The fixpoint computation a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Scope {
    pub(crate) id: ScopeId,
    pub(crate) iteration: u32,
}

/// Address of a resolver actor.
#[derive(Clone)]
pub(crate) struct ResolverRef {
    id: ResolverId,
    name: Arc<str>,
    mailbox: UnboundedSender<Message>,
}

impl ResolverRef {
    pub(crate) fn new(id: ResolverId, name: impl Into<Arc<str>>, mailbox: UnboundedSender<Message>) -> Self {
        Self {
            id,
            name: name.into(),
            mailbox,
        }
    }

    pub(crate) fn id(&self) -> ResolverId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a message. A stopped resolver silently drops it.
    pub(crate) fn send(&self, message: Message) {
        if self.mailbox.send(message).is_err() {
            tracing::trace!(resolver = %self.name, "mailbox closed, message dropped");
        }
    }
}

impl fmt::Debug for ResolverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.id)
    }
}

#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) asker: ResolverRef,
    pub(crate) stream: StreamId,
    pub(crate) partial: Partial,
}

impl Request {
    pub(crate) fn key(&self) -> StreamKey {
        (self.asker.id(), self.stream)
    }

    pub(crate) fn scope(&self) -> Scope {
        self.partial.scope()
    }
}

#[derive(Debug)]
pub(crate) enum Response {
    Answer { stream: StreamId, answer: Compound },
    /// The request belonged to an iteration its scope has moved past.
    Fail { stream: StreamId, iteration: u32 },
    /// No more answers. `novel` is set when any resolver below recorded an
    /// inferred answer not seen in earlier iterations.
    Done { stream: StreamId, iteration: u32, novel: bool },
}

impl Response {
    pub(crate) fn stream(&self) -> StreamId {
        match self {
            Response::Answer { stream, .. } | Response::Fail { stream, .. } | Response::Done { stream, .. } => *stream,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Message {
    Request(Request),
    Response(Response),
    /// Pull one more top-level answer (roots only).
    Execute,
    /// The last handle on a root was dropped (roots only).
    Release,
    Terminate(ReasonerError),
}
