//! Traversal tests for the in-memory fact store.

use anyhow::Result;
use kestrel_pattern::{Concept, ConceptMap, Conjunction, Traversal, Variable};
use kestrel_store::FactStore;
use proptest::prelude::*;

fn collect(store: &FactStore, pattern: &Conjunction, bounds: &ConceptMap) -> Result<Vec<ConceptMap>> {
    store.traverse(pattern, bounds)?.collect()
}

fn var(name: &str) -> Variable {
    Variable::named(name)
}

#[test]
fn test_isa_and_has_value() -> Result<()> {
    let store = FactStore::new();
    for _ in 0..3 {
        let p = store.put_entity("person");
        store.put_has_value(p, "name", "Bob")?;
    }
    let alice = store.put_entity("person");
    store.put_has_value(alice, "name", "Alice")?;
    store.put_entity("company");

    let people = Conjunction::builder().isa("p", "person").build();
    assert_eq!(collect(&store, &people, &ConceptMap::new())?.len(), 4);

    let bobs = Conjunction::builder()
        .isa("p", "person")
        .has_value("p", "name", "Bob")
        .build();
    let answers = collect(&store, &bobs, &ConceptMap::new())?;
    assert_eq!(answers.len(), 3);
    for answer in &answers {
        assert_eq!(answer.get(&Variable::anonymous(0)), Some(&Concept::attribute("name", "Bob")));
    }
    Ok(())
}

#[test]
fn test_bounds_restrict_answers() -> Result<()> {
    let store = FactStore::new();
    let l1 = store.put_entity("location");
    let l2 = store.put_entity("location");
    let l3 = store.put_entity("location");
    store.put_relation("containment", &[("container", l1), ("contained", l2)])?;
    store.put_relation("containment", &[("container", l2), ("contained", l3)])?;

    let pattern = Conjunction::builder()
        .relation("containment", [("container", "x"), ("contained", "y")])
        .build();
    assert_eq!(collect(&store, &pattern, &ConceptMap::new())?.len(), 2);

    let bounds: ConceptMap = [(var("x"), store.concept(l2).unwrap())].into_iter().collect();
    let answers = collect(&store, &pattern, &bounds)?;
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].get(&var("y")), store.concept(l3).as_ref());
    Ok(())
}

#[test]
fn test_repeated_roles_match_both_ways() -> Result<()> {
    let store = FactStore::new();
    let a = store.put_entity("person");
    let b = store.put_entity("person");
    store.put_relation("friendship", &[("friend", a), ("friend", b)])?;

    let pattern = Conjunction::builder()
        .relation("friendship", [("friend", "x"), ("friend", "y")])
        .build();
    let answers = collect(&store, &pattern, &ConceptMap::new())?;
    assert_eq!(answers.len(), 2);
    Ok(())
}

#[test]
fn test_inferred_concepts_pass_local_checks_only() -> Result<()> {
    let store = FactStore::new();
    let inferred = Concept::Relation {
        iid: 0xdead_beef,
        type_label: "containment".into(),
        inferred: true,
    };
    let bounds: ConceptMap = [(var("r"), inferred)].into_iter().collect();

    let isa = Conjunction::builder().isa("r", "containment").build();
    assert_eq!(collect(&store, &isa, &bounds)?.len(), 1);

    let wrong_type = Conjunction::builder().isa("r", "marriage").build();
    assert!(collect(&store, &wrong_type, &bounds)?.is_empty());

    let l = store.put_entity("location");
    let related = Conjunction::builder()
        .relation_as("r", "containment", [("container", "x")])
        .build();
    assert!(collect(&store, &related, &bounds)?.is_empty());
    assert!(store.concept(l).is_some());
    Ok(())
}

#[test]
fn test_self_ownership_never_matches() -> Result<()> {
    let store = FactStore::new();
    let p = store.put_entity("person");
    store.put_has_value(p, "nickname", "Bo")?;
    let pattern = Conjunction::builder().has("a", "a").build();
    assert!(collect(&store, &pattern, &ConceptMap::new())?.is_empty());
    Ok(())
}

#[test]
fn test_nested_disjunction_is_rejected() {
    let store = FactStore::new();
    let pattern = Conjunction::builder()
        .isa("p", "person")
        .or([
            Conjunction::builder().has_value("p", "age", 1).build(),
            Conjunction::builder().has_value("p", "age", 2).build(),
        ])
        .build();
    assert!(store.traverse(&pattern, &ConceptMap::new()).is_err());
}

#[test]
fn test_nested_negation_is_rejected() {
    let store = FactStore::new();
    let pattern = Conjunction::builder()
        .isa("p", "person")
        .not([Conjunction::builder().has_value("p", "age", 1).build()])
        .build();
    assert!(store.traverse(&pattern, &ConceptMap::new()).is_err());
}

#[test]
fn test_answers_are_a_snapshot_taken_at_traversal() -> Result<()> {
    let store = FactStore::new();
    store.put_entity("person");
    let pattern = Conjunction::builder().isa("p", "person").build();

    let answers = store.traverse(&pattern, &ConceptMap::new())?;
    store.put_entity("person");
    assert_eq!(answers.count(), 1);
    assert_eq!(collect(&store, &pattern, &ConceptMap::new())?.len(), 2);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    /// Every answer agrees with the bounds and binds every pattern variable.
    #[test]
    fn answers_respect_bounds(
        edges in prop::collection::vec((0u32..5, 0u32..5), 0..12),
        bound_container in prop::option::of(0u32..5),
    ) {
        let store = FactStore::new();
        let nodes: Vec<u32> = (0..5).map(|_| store.put_entity("location")).collect();
        for (from, to) in &edges {
            store
                .put_relation("containment", &[("container", nodes[*from as usize]), ("contained", nodes[*to as usize])])
                .unwrap();
        }
        let pattern = Conjunction::builder()
            .relation("containment", [("container", "x"), ("contained", "y")])
            .build();
        let bounds: ConceptMap = bound_container
            .map(|n| (var("x"), store.concept(nodes[n as usize]).unwrap()))
            .into_iter()
            .collect();

        let answers = collect(&store, &pattern, &bounds).unwrap();
        let expected = edges
            .iter()
            .filter(|(from, _)| bound_container.map_or(true, |b| b == *from))
            .count();
        prop_assert_eq!(answers.len(), expected);
        for answer in answers {
            prop_assert!(answer.is_compatible(&bounds));
            prop_assert_eq!(answer.variables(), pattern.variables());
        }
    }
}
