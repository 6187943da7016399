//! Label interning.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Interned type or role label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// Label interner: every type and role label is stored once.
#[derive(Debug, Default)]
pub struct LabelInterner {
    label_to_id: DashMap<String, LabelId>,
    id_to_label: DashMap<LabelId, String>,
    next_id: AtomicU32,
}

impl LabelInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a label, returning its id.
    pub fn intern(&self, label: &str) -> LabelId {
        if let Some(id) = self.label_to_id.get(label) {
            return *id;
        }
        // Racing interns of a new label must agree on one id.
        *self
            .label_to_id
            .entry(label.to_string())
            .or_insert_with(|| {
                let id = LabelId(self.next_id.fetch_add(1, Ordering::SeqCst));
                self.id_to_label.insert(id, label.to_string());
                id
            })
    }

    /// Look up an existing id without inserting.
    pub fn id_of(&self, label: &str) -> Option<LabelId> {
        self.label_to_id.get(label).map(|id| *id)
    }

    pub fn lookup(&self, id: LabelId) -> Option<String> {
        self.id_to_label.get(&id).map(|label| label.clone())
    }

    pub fn len(&self) -> usize {
        self.next_id.load(Ordering::SeqCst) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let interner = LabelInterner::new();
        let person = interner.intern("person");
        let age = interner.intern("age");
        assert_ne!(person, age);
        assert_eq!(interner.intern("person"), person);
        assert_eq!(interner.lookup(age).as_deref(), Some("age"));
        assert_eq!(interner.id_of("name"), None);
        assert_eq!(interner.len(), 2);
    }
}
