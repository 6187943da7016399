//! Kestrel Store: in-memory stored facts for the reasoner
//!
//! ```text
//!   things:  Vec<Thing>              id -> entity | relation | attribute
//!   type_index:      label -> RoaringBitmap<id>
//!   value_index:     value -> RoaringBitmap<attribute id>
//!   owned / owners:  id    -> RoaringBitmap<id>     (has edges, both ways)
//!   roles_played:    id    -> RoaringBitmap<relation id>
//! ```
//!
//! Labels are interned once and referenced by [`LabelId`]. Attributes are
//! deduplicated by (type, value). The store implements
//! [`kestrel_pattern::Traversal`] by backtracking over the pattern's
//! constraints (see [`traversal`]).

mod interner;
pub mod traversal;

pub use interner::{LabelId, LabelInterner};

use ahash::AHashMap;
use anyhow::{bail, Result};
use kestrel_pattern::{Concept, Value};
use parking_lot::RwLock;
use roaring::RoaringBitmap;

/// Identifier of a stored thing. Entity and relation concepts use it as iid.
pub type ThingId = u32;

// ============================================================================
// Stored things
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) enum Thing {
    Entity {
        type_id: LabelId,
    },
    Relation {
        type_id: LabelId,
        players: Vec<(LabelId, ThingId)>,
    },
    Attribute {
        type_id: LabelId,
        value: Value,
    },
}

impl Thing {
    fn type_id(&self) -> LabelId {
        match self {
            Thing::Entity { type_id } | Thing::Relation { type_id, .. } | Thing::Attribute { type_id, .. } => {
                *type_id
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Graph {
    pub(crate) things: Vec<Thing>,
    pub(crate) type_index: AHashMap<LabelId, RoaringBitmap>,
    pub(crate) attribute_index: AHashMap<(LabelId, Value), ThingId>,
    pub(crate) value_index: AHashMap<Value, RoaringBitmap>,
    pub(crate) owned: AHashMap<ThingId, RoaringBitmap>,
    pub(crate) owners: AHashMap<ThingId, RoaringBitmap>,
    pub(crate) roles_played: AHashMap<ThingId, RoaringBitmap>,
}

impl Graph {
    fn push(&mut self, thing: Thing) -> ThingId {
        let id = self.things.len() as ThingId;
        self.type_index
            .entry(thing.type_id())
            .or_insert_with(RoaringBitmap::new)
            .insert(id);
        self.things.push(thing);
        id
    }

    pub(crate) fn thing(&self, id: ThingId) -> Option<&Thing> {
        self.things.get(id as usize)
    }

    pub(crate) fn of_type(&self, type_id: LabelId) -> Option<&RoaringBitmap> {
        self.type_index.get(&type_id)
    }
}

// ============================================================================
// FactStore
// ============================================================================

/// Thread-safe in-memory fact store.
#[derive(Debug, Default)]
pub struct FactStore {
    labels: LabelInterner,
    graph: RwLock<Graph>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.graph.read().things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn put_entity(&self, type_label: &str) -> ThingId {
        let type_id = self.labels.intern(type_label);
        self.graph.write().push(Thing::Entity { type_id })
    }

    /// Insert an attribute, or return the existing one with the same type
    /// and value.
    pub fn put_attribute(&self, type_label: &str, value: impl Into<Value>) -> ThingId {
        let type_id = self.labels.intern(type_label);
        let value = value.into();
        let mut graph = self.graph.write();
        if let Some(id) = graph.attribute_index.get(&(type_id, value.clone())) {
            return *id;
        }
        let id = graph.push(Thing::Attribute {
            type_id,
            value: value.clone(),
        });
        graph
            .value_index
            .entry(value.clone())
            .or_insert_with(RoaringBitmap::new)
            .insert(id);
        graph.attribute_index.insert((type_id, value), id);
        id
    }

    pub fn put_has(&self, owner: ThingId, attribute: ThingId) -> Result<()> {
        let mut graph = self.graph.write();
        match graph.thing(owner) {
            Some(Thing::Attribute { .. }) | None => bail!("thing {owner} cannot own attributes"),
            Some(_) => {}
        }
        if !matches!(graph.thing(attribute), Some(Thing::Attribute { .. })) {
            bail!("thing {attribute} is not an attribute");
        }
        graph
            .owned
            .entry(owner)
            .or_insert_with(RoaringBitmap::new)
            .insert(attribute);
        graph
            .owners
            .entry(attribute)
            .or_insert_with(RoaringBitmap::new)
            .insert(owner);
        Ok(())
    }

    /// `owner has type_label value`, creating the attribute if needed.
    pub fn put_has_value(&self, owner: ThingId, type_label: &str, value: impl Into<Value>) -> Result<ThingId> {
        let attribute = self.put_attribute(type_label, value);
        self.put_has(owner, attribute)?;
        Ok(attribute)
    }

    pub fn put_relation(&self, type_label: &str, players: &[(&str, ThingId)]) -> Result<ThingId> {
        if players.is_empty() {
            bail!("relation of type `{type_label}` needs at least one role player");
        }
        let type_id = self.labels.intern(type_label);
        let players: Vec<(LabelId, ThingId)> = players
            .iter()
            .map(|(role, player)| (self.labels.intern(role), *player))
            .collect();

        let mut graph = self.graph.write();
        for (_, player) in &players {
            if graph.thing(*player).is_none() {
                bail!("role player {player} does not exist");
            }
        }
        let id = graph.push(Thing::Relation {
            type_id,
            players: players.clone(),
        });
        for (_, player) in players {
            graph
                .roles_played
                .entry(player)
                .or_insert_with(RoaringBitmap::new)
                .insert(id);
        }
        tracing::trace!(relation = id, type_label, "stored relation");
        Ok(id)
    }

    /// The concept view of a stored thing.
    pub fn concept(&self, id: ThingId) -> Option<Concept> {
        let graph = self.graph.read();
        self.concept_in(&graph, id)
    }

    pub(crate) fn concept_in(&self, graph: &Graph, id: ThingId) -> Option<Concept> {
        let thing = graph.thing(id)?;
        let type_label = self.labels.lookup(thing.type_id())?;
        Some(match thing {
            Thing::Entity { .. } => Concept::Entity {
                iid: u64::from(id),
                type_label,
            },
            Thing::Relation { .. } => Concept::Relation {
                iid: u64::from(id),
                type_label,
                inferred: false,
            },
            Thing::Attribute { value, .. } => Concept::Attribute {
                type_label,
                value: value.clone(),
            },
        })
    }

    /// The stored thing a concept refers to. Inferred concepts that were
    /// never stored resolve to `None`.
    pub(crate) fn thing_of(&self, graph: &Graph, concept: &Concept) -> Option<ThingId> {
        match concept {
            Concept::Entity { iid, type_label }
            | Concept::Relation {
                iid,
                type_label,
                inferred: false,
            } => {
                let id = ThingId::try_from(*iid).ok()?;
                let thing = graph.thing(id)?;
                let stored_kind_matches = matches!(
                    (concept, thing),
                    (Concept::Entity { .. }, Thing::Entity { .. })
                        | (Concept::Relation { .. }, Thing::Relation { .. })
                );
                (stored_kind_matches && Some(thing.type_id()) == self.labels.id_of(type_label)).then_some(id)
            }
            Concept::Relation { inferred: true, .. } => None,
            Concept::Attribute { type_label, value } => {
                let type_id = self.labels.id_of(type_label)?;
                graph.attribute_index.get(&(type_id, value.clone())).copied()
            }
        }
    }

    pub(crate) fn labels(&self) -> &LabelInterner {
        &self.labels
    }

    pub(crate) fn graph(&self) -> parking_lot::RwLockReadGuard<'_, Graph> {
        self.graph.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_are_deduplicated() {
        let store = FactStore::new();
        let a = store.put_attribute("age", 42);
        let b = store.put_attribute("age", 42);
        let c = store.put_attribute("name", "Bob");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_concept_round_trip() {
        let store = FactStore::new();
        let p = store.put_entity("person");
        let age = store.put_has_value(p, "age", 42).unwrap();
        assert_eq!(store.concept(p), Some(Concept::entity(u64::from(p), "person")));
        assert_eq!(store.concept(age), Some(Concept::attribute("age", 42)));

        let graph = store.graph();
        assert_eq!(store.thing_of(&graph, &Concept::attribute("age", 42)), Some(age));
        assert_eq!(store.thing_of(&graph, &Concept::attribute("age", 43)), None);
        assert_eq!(store.thing_of(&graph, &Concept::entity(u64::from(p), "company")), None);
    }

    #[test]
    fn test_attribute_cannot_own() {
        let store = FactStore::new();
        let a = store.put_attribute("age", 1);
        let b = store.put_attribute("age", 2);
        assert!(store.put_has(a, b).is_err());
    }

    #[test]
    fn test_relation_requires_existing_players() {
        let store = FactStore::new();
        assert!(store.put_relation("containment", &[("container", 7)]).is_err());
        assert!(store.put_relation("containment", &[]).is_err());
    }
}
