//! The resolver registry: runtime, collaborators and resolver caches.
//!
//! ```text
//!   ResolverRegistry ─owns─► tokio runtime ─runs─► resolver tasks
//!          │
//!          └─► RegistryShared (Arc, seen by every resolver)
//!                 traversal · logic · config
//!                 caches: conjunction / disjunction / concludable /
//!                         retrievable / conclusion / negation
//!                         (at most one per key)
//!                 termination flag + cause
//! ```
//!
//! Resolvers are created lazily by their parents through the shared half,
//! so sub-resolvers for a rule body only exist once some concludable
//! actually asks for that rule. Roots are never cached: each one lives
//! until the last clone of its handle is dropped.

use crate::answer::ResolverId;
use crate::config::ReasonerConfig;
use crate::error::{ReasonerError, Result};
use crate::logic::LogicManager;
use crate::message::{Message, ResolverRef, ScopeId};
use crate::resolvable::{Concludable, ConcludableShape};
use crate::resolver::root::{Pattern, RootCallbacks};
use crate::resolver::{
    self, ConcludableResolver, ConclusionResolver, ConjunctionResolver, DisjunctionResolver, NegationResolver,
    ResolverKind, RetrievableResolver, RootResolver,
};
use dashmap::DashMap;
use kestrel_pattern::{Conjunction, Disjunction, Rule, Traversal, Variable};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

// ============================================================================
// Shared state
// ============================================================================

pub(crate) struct RegistryShared {
    traversal: Arc<dyn Traversal>,
    logic: Arc<LogicManager>,
    config: ReasonerConfig,
    runtime: Handle,
    next_resolver: AtomicU64,
    next_iteration: AtomicU32,
    next_scope: AtomicU64,
    conjunctions: DashMap<Conjunction, ResolverRef>,
    disjunctions: DashMap<Disjunction, ResolverRef>,
    concludables: DashMap<ConcludableShape, ResolverRef>,
    retrievables: DashMap<Conjunction, ResolverRef>,
    conclusions: DashMap<String, ResolverRef>,
    negations: DashMap<Disjunction, ResolverRef>,
    resolvers: DashMap<ResolverId, ResolverRef>,
    terminated: AtomicBool,
    cause: Mutex<Option<ReasonerError>>,
}

impl RegistryShared {
    pub(crate) fn traversal(&self) -> &dyn Traversal {
        self.traversal.as_ref()
    }

    pub(crate) fn logic(&self) -> &LogicManager {
        &self.logic
    }

    pub(crate) fn config(&self) -> &ReasonerConfig {
        &self.config
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn next_iteration(&self) -> u32 {
        self.next_iteration.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn next_scope(&self) -> ScopeId {
        ScopeId(self.next_scope.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.is_terminated() {
            return Ok(());
        }
        Err(self
            .cause
            .lock()
            .clone()
            .unwrap_or_else(|| ReasonerError::terminated("registry terminated")))
    }

    pub(crate) fn conjunction(self: &Arc<Self>, conjunction: &Conjunction) -> Result<ResolverRef> {
        self.cached(&self.conjunctions, conjunction.clone(), || {
            (
                format!("conjunction {conjunction}"),
                ResolverKind::Conjunction(ConjunctionResolver::new(conjunction.clone())),
            )
        })
    }

    pub(crate) fn disjunction(self: &Arc<Self>, disjunction: &Disjunction) -> Result<ResolverRef> {
        self.cached(&self.disjunctions, disjunction.clone(), || {
            (
                format!("disjunction {disjunction}"),
                ResolverKind::Disjunction(DisjunctionResolver::new(disjunction.clone())),
            )
        })
    }

    pub(crate) fn concludable(self: &Arc<Self>, concludable: &Concludable) -> Result<ResolverRef> {
        let shape = concludable.canonical().clone();
        self.cached(&self.concludables, shape.clone(), || {
            (
                format!("concludable {{ {shape}; }}"),
                ResolverKind::Concludable(ConcludableResolver::new(shape.clone())),
            )
        })
    }

    pub(crate) fn retrievable(self: &Arc<Self>, pattern: &Conjunction) -> Result<ResolverRef> {
        self.cached(&self.retrievables, pattern.clone(), || {
            (
                format!("retrievable {pattern}"),
                ResolverKind::Retrievable(RetrievableResolver::new(pattern.clone())),
            )
        })
    }

    pub(crate) fn conclusion(self: &Arc<Self>, rule: &Arc<Rule>) -> Result<ResolverRef> {
        self.cached(&self.conclusions, rule.label().to_string(), || {
            (
                format!("rule {}", rule.label()),
                ResolverKind::Conclusion(ConclusionResolver::new(rule.clone())),
            )
        })
    }

    pub(crate) fn negation(self: &Arc<Self>, negation: &Disjunction) -> Result<ResolverRef> {
        self.cached(&self.negations, negation.clone(), || {
            (
                format!("not {{ {negation} }}"),
                ResolverKind::Negation(NegationResolver::new(negation.clone())),
            )
        })
    }

    fn cached<K: Hash + Eq>(
        self: &Arc<Self>,
        cache: &DashMap<K, ResolverRef>,
        key: K,
        make: impl FnOnce() -> (String, ResolverKind),
    ) -> Result<ResolverRef> {
        self.ensure_active()?;
        let resolver = cache
            .entry(key)
            .or_insert_with(|| {
                let (name, kind) = make();
                self.register(name, kind)
            })
            .clone();
        Ok(resolver)
    }

    fn register(self: &Arc<Self>, name: String, kind: ResolverKind) -> ResolverRef {
        let id = ResolverId(self.next_resolver.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(resolver = %name, id = %id, "creating resolver");
        let resolver = resolver::spawn(self, id, name, kind);
        self.resolvers.insert(id, resolver.clone());
        if let Some(cause) = self.cause.lock().clone() {
            resolver.send(Message::Terminate(cause));
        }
        resolver
    }

    /// Idempotent: only the first cause is kept and broadcast.
    pub(crate) fn terminate(&self, cause: ReasonerError) {
        {
            let mut slot = self.cause.lock();
            if slot.is_some() {
                return;
            }
            *slot = Some(cause.clone());
            self.terminated.store(true, Ordering::SeqCst);
        }
        tracing::error!(error = %cause, resolvers = self.resolvers.len(), "terminating resolvers");
        for resolver in self.resolvers.iter() {
            resolver.value().send(Message::Terminate(cause.clone()));
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Resolves patterns against stored facts and a rule set.
///
/// One registry corresponds to one transaction: it owns a worker pool and
/// caches resolvers across every root it creates, so inferred facts found
/// for one query are reused by the next.
pub struct ResolverRegistry {
    shared: Arc<RegistryShared>,
    runtime: Option<Runtime>,
}

impl ResolverRegistry {
    pub fn new(traversal: Arc<dyn Traversal>, logic: LogicManager, config: ReasonerConfig) -> Result<Self> {
        config.validate()?;
        logic.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("kestrel-resolver")
            .enable_all()
            .build()
            .map_err(|e| ReasonerError::Runtime(e.to_string()))?;
        tracing::debug!(
            worker_threads = config.worker_threads,
            rules = logic.rules().len(),
            "starting resolver registry"
        );
        let shared = Arc::new(RegistryShared {
            traversal,
            logic: Arc::new(logic),
            config,
            runtime: runtime.handle().clone(),
            next_resolver: AtomicU64::new(0),
            next_iteration: AtomicU32::new(0),
            next_scope: AtomicU64::new(0),
            conjunctions: DashMap::new(),
            disjunctions: DashMap::new(),
            concludables: DashMap::new(),
            retrievables: DashMap::new(),
            conclusions: DashMap::new(),
            negations: DashMap::new(),
            resolvers: DashMap::new(),
            terminated: AtomicBool::new(false),
            cause: Mutex::new(None),
        });
        Ok(Self {
            shared,
            runtime: Some(runtime),
        })
    }

    /// A root answering `pattern` with its named variables.
    pub fn root(&self, pattern: impl Into<Pattern>, callbacks: RootCallbacks) -> Result<RootHandle> {
        let pattern = pattern.into();
        let filter = pattern.retrieved();
        self.root_filtered(pattern, filter, callbacks)
    }

    /// A root answering `pattern`, projecting answers onto `filter`.
    pub fn root_filtered(
        &self,
        pattern: impl Into<Pattern>,
        filter: BTreeSet<Variable>,
        callbacks: RootCallbacks,
    ) -> Result<RootHandle> {
        let pattern = pattern.into();
        let body = match &pattern {
            Pattern::Conjunction(conjunction) => self.shared.conjunction(conjunction)?,
            Pattern::Disjunction(disjunction) => self.shared.disjunction(disjunction)?,
        };
        self.shared.ensure_active()?;
        let scope = self.shared.next_scope();
        let root = self.shared.register(
            format!("root {pattern}"),
            ResolverKind::Root(RootResolver::new(body, filter, callbacks, scope)),
        );
        Ok(RootHandle {
            link: Arc::new(RootLink {
                root,
                shared: self.shared.clone(),
            }),
        })
    }

    /// Tear down every resolver. Roots still waiting report `cause`.
    pub fn terminate(&self, cause: ReasonerError) {
        self.shared.terminate(cause);
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Live resolvers, roots included. Released roots are not counted.
    pub fn resolver_count(&self) -> usize {
        self.shared.resolvers.len()
    }

    pub fn config(&self) -> &ReasonerConfig {
        &self.shared.config
    }

    pub fn logic(&self) -> &LogicManager {
        &self.shared.logic
    }
}

impl Drop for ResolverRegistry {
    fn drop(&mut self) {
        self.shared.terminate(ReasonerError::terminated("registry closed"));
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Caller-side handle on a root resolver.
///
/// Clones share the root. Dropping the last clone stops the root and
/// removes it from the registry.
#[derive(Clone)]
pub struct RootHandle {
    link: Arc<RootLink>,
}

struct RootLink {
    root: ResolverRef,
    shared: Arc<RegistryShared>,
}

impl Drop for RootLink {
    fn drop(&mut self) {
        tracing::debug!(resolver = %self.root.name(), "releasing root");
        self.shared.resolvers.remove(&self.root.id());
        self.root.send(Message::Release);
    }
}

impl RootHandle {
    /// Ask for one more answer. The root replies through `on_answer`, or
    /// through `on_iteration_done` once the pass is exhausted.
    pub fn execute(&self) {
        self.link.root.send(Message::Execute);
    }

    /// Terminate the registry this root belongs to.
    pub fn terminate(&self, cause: ReasonerError) {
        self.link.shared.terminate(cause);
    }

    pub fn id(&self) -> ResolverId {
        self.link.root.id()
    }
}

impl std::fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootHandle").field("root", &self.link.root).finish()
    }
}
