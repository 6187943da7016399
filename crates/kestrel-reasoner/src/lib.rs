//! # Kestrel Reasoner
//!
//! Rule-based query resolution over a network of resolver actors.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Conjunction / Disjunction                                       │
//! │        │ classify (resolvable)        rules (logic + unifier)    │
//! │        ▼                                                         │
//! │  Retrievables + Concludables + Negations ──plan──► ordered steps │
//! │        │                                                         │
//! │        ▼ registry spawns / reuses                                │
//! │  Root ─► Conjunction ─► Retrievable        (stored facts)        │
//! │              ├────────► Concludable ─► Conclusion ─► rule body   │
//! │              └────────► Negation ─► Disjunction  (own fixpoint)  │
//! │                                                                  │
//! │  Root repeats iterations until no new inferred fact is recorded  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use kestrel_pattern::{Conclusion, Conjunction, Rule, Traversal};
//! use kestrel_reasoner::{LogicManager, ReasonerConfig, ResolverRegistry, RootCallbacks};
//! use std::sync::Arc;
//!
//! # fn run(store: Arc<dyn Traversal>) -> anyhow::Result<()> {
//! let rule = Rule::new(
//!     "bobs-are-42",
//!     Conjunction::builder().has_value("p", "name", "Bob").build(),
//!     Conclusion::has_value("p", "age", 42),
//! )?;
//! let registry = ResolverRegistry::new(store, LogicManager::new([rule]), ReasonerConfig::default())?;
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! let root = registry.root(
//!     Conjunction::builder().has_value("p", "age", 42).build(),
//!     RootCallbacks::new(
//!         move |answer| { let _ = tx.send(answer); },
//!         |iteration| println!("done after iteration {iteration}"),
//!         |error| eprintln!("{error}"),
//!     ),
//! )?;
//! root.execute();
//! let first = rx.recv()?;
//! # let _ = first;
//! # Ok(())
//! # }
//! ```

pub mod answer;
pub mod config;
pub mod error;
pub mod logic;
mod message;
pub mod planner;
pub mod registry;
pub mod resolvable;
mod resolver;
pub mod unifier;

pub use answer::{AnswerState, Compound, Explanation, Match, Partial, ResolverId};
pub use config::ReasonerConfig;
pub use error::{ReasonerError, Result};
pub use logic::LogicManager;
pub use planner::{plan, Plan, Schedulable};
pub use registry::{ResolverRegistry, RootHandle};
pub use resolvable::{classify, Concludable, ConcludableShape, Resolvable, ResolvableKind};
pub use resolver::root::{Pattern, RootCallbacks};
pub use unifier::Unifier;
