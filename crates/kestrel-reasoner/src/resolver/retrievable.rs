//! Answers a connected group of constraints from stored facts.

use super::Context;
use crate::answer::{AnswerState, Compound};
use crate::error::ReasonerError;
use crate::message::{Request, ScopeId, StreamKey};
use ahash::{AHashMap, AHashSet};
use kestrel_pattern::{ConceptMap, ConceptMapIter, Conjunction, Variable};
use std::collections::BTreeSet;

pub(crate) struct RetrievableResolver {
    pattern: Conjunction,
    variables: BTreeSet<Variable>,
    streams: AHashMap<StreamKey, Stream>,
}

struct Stream {
    scope: ScopeId,
    answers: ConceptMapIter,
    emitted: AHashSet<ConceptMap>,
}

impl RetrievableResolver {
    pub(crate) fn new(pattern: Conjunction) -> Self {
        let variables = pattern.variables();
        Self {
            pattern,
            variables,
            streams: AHashMap::new(),
        }
    }

    pub(crate) fn receive_request(&mut self, ctx: &mut Context, request: Request) {
        let key = request.key();
        if !self.streams.contains_key(&key) {
            let bounds = request.partial.concepts().project(&self.variables);
            match ctx.shared.traversal().traverse(&self.pattern, &bounds) {
                Ok(answers) => {
                    self.streams.insert(
                        key,
                        Stream {
                            scope: request.scope().id,
                            answers,
                            emitted: AHashSet::new(),
                        },
                    );
                }
                Err(err) => {
                    ctx.fatal(ReasonerError::traversal(&self.pattern, &err));
                    return;
                }
            }
        }

        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        loop {
            match stream.answers.next() {
                Some(Ok(answer)) => {
                    if stream.emitted.insert(answer.clone()) {
                        ctx.answer(&request.asker, request.stream, Compound::stored(answer, ctx.id()));
                        return;
                    }
                }
                Some(Err(err)) => {
                    self.streams.remove(&key);
                    ctx.fatal(ReasonerError::traversal(&self.pattern, &err));
                    return;
                }
                None => {
                    self.streams.remove(&key);
                    ctx.done(&request.asker, request.stream, request.scope().iteration, false);
                    return;
                }
            }
        }
    }

    pub(crate) fn enter_iteration(&mut self, scope: ScopeId) {
        self.streams.retain(|_, stream| stream.scope != scope);
    }
}
