use kestrel_pattern::{Concept, ConceptMap, Variable};
use proptest::prelude::*;

fn small_map() -> impl Strategy<Value = ConceptMap> {
    prop::collection::btree_map(0u32..6, 0u64..4, 0..6).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(var, iid)| (Variable::anonymous(var), Concept::entity(iid, "thing")))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn merge_is_defined_exactly_when_compatible(left in small_map(), right in small_map()) {
        let merged = left.merge(&right);
        prop_assert_eq!(merged.is_some(), left.is_compatible(&right));
        if let Some(merged) = merged {
            for (var, concept) in left.iter().chain(right.iter()) {
                prop_assert_eq!(merged.get(var), Some(concept));
            }
            prop_assert_eq!(merged.len(), left.variables().union(&right.variables()).count());
        }
    }

    #[test]
    fn merge_is_symmetric(left in small_map(), right in small_map()) {
        prop_assert_eq!(left.merge(&right), right.merge(&left));
    }

    #[test]
    fn project_keeps_subset(map in small_map(), keep in prop::collection::btree_set(0u32..6, 0..6)) {
        let keep: std::collections::BTreeSet<Variable> = keep.into_iter().map(Variable::anonymous).collect();
        let projected = map.project(&keep);
        prop_assert!(projected.variables().is_subset(&keep));
        prop_assert!(projected.is_compatible(&map));
    }
}
