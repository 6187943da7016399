//! Kestrel Patterns: the data model shared by the store and the reasoner
//!
//! A query reaches the reasoner already type-resolved, as a tree of
//! constraints over variables:
//!
//! ```text
//!   Conjunction { $p isa person; $p has $_0; $_0 isa age; $_0 = 42; }
//!        │
//!        ├── Constraint::Isa      ($p, person)
//!        ├── Constraint::Has      ($p, $_0)
//!        ├── Constraint::Isa      ($_0, age)
//!        ├── Constraint::Value    ($_0, 42)
//!        └── Disjunction { {..} or {..} }   (optional, nested)
//! ```
//!
//! Answers bind variables to [`Concept`]s inside an immutable
//! [`ConceptMap`]. Rules pair a `when` conjunction with a single
//! [`Conclusion`]. The [`Traversal`] trait is the seam to whatever holds
//! the stored facts.

pub mod concept;
pub mod conjunction;
pub mod constraint;
pub mod rule;
pub mod traversal;
pub mod variable;

pub use concept::{Concept, ConceptMap, Value};
pub use conjunction::{Conjunction, ConjunctionBuilder, Disjunction};
pub use constraint::{Constraint, RolePlayer};
pub use rule::{Conclusion, ProducedAttribute, Rule, RuleError};
pub use traversal::{ConceptMapIter, Traversal};
pub use variable::Variable;
