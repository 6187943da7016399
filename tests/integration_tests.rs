//! Integration tests for the complete Kestrel pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Facts → FactStore → Traversal
//! - Rules (JSON) → LogicManager → ResolverRegistry
//! - Root query → reiteration → answers with explanations
//!
//! Run with: cargo test --test integration_tests

use anyhow::{anyhow, bail, Result};
use kestrel_pattern::{Concept, Conclusion, Conjunction, Rule, Variable};
use kestrel_reasoner::{
    AnswerState, Explanation, LogicManager, Match, ReasonerConfig, ReasonerError, ResolverRegistry, RootCallbacks,
};
use kestrel_store::{FactStore, ThingId};
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Family fixture
// ============================================================================

struct Family {
    store: Arc<FactStore>,
    people: BTreeMap<&'static str, ThingId>,
}

impl Family {
    /// ```text
    ///   ada ─► bea ─► cal ─► dora
    ///   eve ─┘
    /// ```
    fn new() -> Result<Self> {
        let store = FactStore::new();
        let mut people = BTreeMap::new();
        for name in ["ada", "bea", "cal", "dora", "eve"] {
            let person = store.put_entity("person");
            store.put_has_value(person, "name", name)?;
            people.insert(name, person);
        }
        for (parent, child) in [("ada", "bea"), ("eve", "bea"), ("bea", "cal"), ("cal", "dora")] {
            store.put_relation("parentship", &[("parent", people[parent]), ("child", people[child])])?;
        }
        Ok(Self {
            store: Arc::new(store),
            people,
        })
    }

    fn person(&self, name: &str) -> Result<Concept> {
        let id = self.people.get(name).ok_or_else(|| anyhow!("no person {name}"))?;
        self.store.concept(*id).ok_or_else(|| anyhow!("no thing {id}"))
    }

    fn name_of(&self, concept: &Concept) -> Option<&'static str> {
        self.people
            .iter()
            .find(|(_, id)| self.store.concept(**id).as_ref() == Some(concept))
            .map(|(name, _)| *name)
    }
}

fn ancestry_rules() -> Result<Vec<Rule>> {
    let base = Rule::new(
        "ancestry-base",
        Conjunction::builder()
            .relation("parentship", [("parent", "x"), ("child", "y")])
            .build(),
        Conclusion::relation("ancestry", [("ancestor", "x"), ("descendant", "y")]),
    )?;
    let step = Rule::new(
        "ancestry-step",
        Conjunction::builder()
            .relation("parentship", [("parent", "x"), ("child", "y")])
            .relation("ancestry", [("ancestor", "y"), ("descendant", "z")])
            .build(),
        Conclusion::relation("ancestry", [("ancestor", "x"), ("descendant", "z")]),
    )?;
    Ok(vec![base, step])
}

fn ancestors_of(name: &str) -> Conjunction {
    Conjunction::builder()
        .has_value("d", "name", name)
        .relation("ancestry", [("ancestor", "a"), ("descendant", "d")])
        .build()
}

/// Run one full pass: execute, wait, repeat until the root reports the
/// end of the pass.
fn resolve(registry: &ResolverRegistry, pattern: Conjunction) -> Result<(Vec<Match>, u32)> {
    let (tx, rx) = mpsc::channel();
    let (answers, done, errors) = (tx.clone(), tx.clone(), tx);
    let root = registry.root(
        pattern,
        RootCallbacks::new(
            move |answer| {
                let _ = answers.send(Ok(answer));
            },
            move |iteration| {
                let _ = done.send(Err(Ok::<u32, ReasonerError>(iteration)));
            },
            move |error| {
                let _ = errors.send(Err(Err(error)));
            },
        ),
    )?;

    let mut matches = Vec::new();
    loop {
        root.execute();
        match rx.recv_timeout(Duration::from_secs(20))? {
            Ok(answer) => matches.push(answer),
            Err(Ok(iteration)) => return Ok((matches, iteration)),
            Err(Err(error)) => bail!(error),
        }
    }
}

// ============================================================================
// Recursive rules end to end
// ============================================================================

#[test]
fn test_recursive_ancestry() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let family = Family::new()?;
    let registry = ResolverRegistry::new(
        family.store.clone(),
        LogicManager::new(ancestry_rules()?),
        ReasonerConfig::from_json(r#"{ "worker_threads": 2, "explain": true }"#)?,
    )?;

    let (answers, _) = resolve(&registry, ancestors_of("dora"))?;
    let mut ancestors: Vec<&str> = answers
        .iter()
        .filter_map(|m| m.concepts().get(&Variable::named("a")))
        .filter_map(|c| family.name_of(c))
        .collect();
    ancestors.sort_unstable();
    assert_eq!(ancestors, vec!["ada", "bea", "cal", "eve"]);
    assert!(answers.iter().all(|m| m.is_explainable()));

    // Each generation is found one iteration after the one below it.
    let iteration_of = |name: &str| -> Result<u32> {
        let person = family.person(name)?;
        answers
            .iter()
            .find(|m| m.concepts().get(&Variable::named("a")) == Some(&person))
            .map(Match::iteration)
            .ok_or_else(|| anyhow!("{name} is not an ancestor"))
    };
    assert!(iteration_of("cal")? < iteration_of("bea")?);
    assert!(iteration_of("bea")? < iteration_of("ada")?);
    assert_eq!(iteration_of("ada")?, iteration_of("eve")?);
    Ok(())
}

#[test]
fn test_explanation_tree_follows_the_rule_chain() -> Result<()> {
    let family = Family::new()?;
    let registry = ResolverRegistry::new(
        family.store.clone(),
        LogicManager::new(ancestry_rules()?),
        ReasonerConfig::default().with_worker_threads(2),
    )?;

    let (answers, _) = resolve(&registry, ancestors_of("dora"))?;
    let ada = family.person("ada")?;
    let answer = answers
        .iter()
        .find(|m| m.concepts().get(&Variable::named("a")) == Some(&ada))
        .ok_or_else(|| anyhow!("ada is not an ancestor of dora"))?;

    // ada → bea → cal → dora: two steps over one base case.
    let explanation = &answer.explanations()[0];
    assert_eq!(explanation.rule, "ancestry-step");
    assert_eq!(explanation.size(), 3);
    let mut node: &Explanation = explanation;
    while let Some(premise) = node.premises.first() {
        node = &**premise;
    }
    assert_eq!(node.rule, "ancestry-base");
    assert_eq!(node.condition.get(&Variable::named("y")), Some(&family.person("dora")?));
    Ok(())
}

#[test]
fn test_rules_loaded_from_json_resolve_the_same() -> Result<()> {
    let family = Family::new()?;
    let json = serde_json::to_string(&ancestry_rules()?)?;
    let loaded: Vec<Rule> = serde_json::from_str(&json)?;

    let registry = ResolverRegistry::new(
        family.store.clone(),
        LogicManager::new(loaded),
        ReasonerConfig::default().with_worker_threads(2),
    )?;
    let (answers, _) = resolve(&registry, ancestors_of("cal"))?;
    assert_eq!(answers.len(), 3);
    Ok(())
}

#[test]
fn test_descendants_are_found_through_the_same_rules() -> Result<()> {
    let family = Family::new()?;
    let registry = ResolverRegistry::new(
        family.store.clone(),
        LogicManager::new(ancestry_rules()?),
        ReasonerConfig::default().with_worker_threads(2),
    )?;
    let descendants = Conjunction::builder()
        .has_value("a", "name", "eve")
        .relation("ancestry", [("ancestor", "a"), ("descendant", "d")])
        .build();

    let (answers, _) = resolve(&registry, descendants)?;
    let mut names: Vec<&str> = answers
        .iter()
        .filter_map(|m| m.concepts().get(&Variable::named("d")))
        .filter_map(|c| family.name_of(c))
        .collect();
    names.sort_unstable();
    assert_eq!(names, vec!["bea", "cal", "dora"]);

    // The first query's inferred facts are reused by a second one.
    let (ancestors, _) = resolve(&registry, ancestors_of("dora"))?;
    assert_eq!(ancestors.len(), 4);
    Ok(())
}

#[test]
fn test_invalid_configuration_is_rejected() -> Result<()> {
    let family = Family::new()?;
    let config = ReasonerConfig::default().with_worker_threads(0);
    match ResolverRegistry::new(family.store.clone(), LogicManager::new(ancestry_rules()?), config) {
        Err(ReasonerError::Config(_)) => Ok(()),
        Err(other) => bail!("unexpected error {other}"),
        Ok(_) => bail!("zero worker threads accepted"),
    }
}
