//! Property tests over randomly generated acyclic flows

use std::collections::{BTreeMap, HashSet};

use etl_flow::identity::entity_id;
use etl_flow::{ConflictPolicy, FlowConfig, FlowGraph, FlowPlanner, RawDocument, VertexRef};
use petgraph::Direction;
use proptest::prelude::*;
use serde_json::json;

/// (sources, target) by entity index. Sources are kept only when smaller than
/// the target, so every generated flow is acyclic.
type FlowSpec = Vec<(Vec<usize>, usize)>;

fn flow() -> impl Strategy<Value = FlowSpec> {
    proptest::collection::vec((proptest::collection::vec(0usize..8, 0..4), 1usize..9), 1..14)
}

fn policy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![Just(ConflictPolicy::Source), Just(ConflictPolicy::Target)]
}

fn entity_ref(index: usize) -> serde_json::Value {
    json!({"Code": format!("E{}", index), "CodeModel": "DWH", "NameModel": "Warehouse"})
}

fn document(spec: &FlowSpec) -> RawDocument {
    let mappings: Vec<serde_json::Value> = spec
        .iter()
        .enumerate()
        .map(|(i, (sources, target))| {
            let composition: Vec<serde_json::Value> = sources
                .iter()
                .filter(|&&s| s < *target)
                .map(|&s| json!({"Entity": entity_ref(s)}))
                .collect();
            json!({
                "Code": format!("M{}", i),
                "Name": format!("Load {}", i),
                "EntityTarget": entity_ref(*target),
                "SourceComposition": composition,
                "AttributeMapping": []
            })
        })
        .collect();

    RawDocument::new(
        "generated.json",
        json!({
            "Models": [{"Code": "DWH", "Name": "Warehouse", "IsDocumentModel": true, "Entities": []}],
            "Mappings": mappings
        }),
    )
}

fn plan(spec: &FlowSpec, policy: ConflictPolicy) -> FlowPlanner {
    let mut config = FlowConfig::default();
    config.scheduling.conflict_policy = policy.to_string();
    let mut planner = FlowPlanner::new(config).unwrap();
    planner.build(&[document(spec)]).unwrap();
    planner
}

fn conflict_entities(graph: &FlowGraph, mapping: etl_flow::VertexId, policy: ConflictPolicy) -> HashSet<etl_flow::VertexId> {
    match policy {
        ConflictPolicy::Source => graph.sources_of(mapping).into_iter().collect(),
        ConflictPolicy::Target => graph.target_of(mapping).into_iter().collect(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn run_levels_are_monotonic(spec in flow()) {
        let planner = plan(&spec, ConflictPolicy::Target);
        let graph = planner.graph().unwrap();

        for consumer in graph.mappings() {
            for source in graph.sources_of(consumer.id) {
                for producer in graph.mappings_targeting(source) {
                    if producer == consumer.id {
                        continue;
                    }
                    let producer_level = graph.get_mapping(producer).and_then(|m| m.run_level).unwrap();
                    prop_assert!(producer_level < consumer.run_level.unwrap());
                }
            }
        }
    }

    #[test]
    fn stages_are_conflict_free(spec in flow(), policy in policy()) {
        let planner = plan(&spec, policy);
        let graph = planner.graph().unwrap();

        let mut groups: BTreeMap<(u32, u32), Vec<etl_flow::VertexId>> = BTreeMap::new();
        for mapping in graph.mappings() {
            let key = (mapping.run_level.unwrap(), mapping.run_level_stage.unwrap());
            groups.entry(key).or_default().push(mapping.id);
        }

        for members in groups.values() {
            for (i, a) in members.iter().enumerate() {
                let touched = conflict_entities(graph, *a, policy);
                for b in &members[i + 1..] {
                    prop_assert!(touched.is_disjoint(&conflict_entities(graph, *b, policy)));
                }
            }
        }
    }

    #[test]
    fn planning_is_deterministic(spec in flow(), policy in policy()) {
        let first = plan(&spec, policy);
        let second = plan(&spec, policy);

        prop_assert_eq!(
            serde_json::to_string(&first.graph().unwrap().to_view()).unwrap(),
            serde_json::to_string(&second.graph().unwrap().to_view()).unwrap()
        );
        prop_assert_eq!(first.mapping_order().unwrap(), second.mapping_order().unwrap());
    }

    #[test]
    fn blast_radius_is_forward_closure(spec in flow(), failed in 0usize..9) {
        let mut planner = plan(&spec, ConflictPolicy::Target);
        let id = entity_id("DWH", &format!("E{}", failed));
        let expected: HashSet<_> = planner
            .views()
            .unwrap()
            .mappings_entities_graph()
            .reachable(id, Direction::Outgoing);
        let known = planner.graph().unwrap().contains(id);

        let added = planner.mark_failed(&[VertexRef::from(id)]).unwrap();
        prop_assert_eq!(added, usize::from(known));

        if known {
            let record = &planner.failures().unwrap()[0];
            prop_assert!(!record.affected.contains(&id));
            let affected: HashSet<_> = record.affected.iter().copied().collect();
            prop_assert_eq!(affected, expected);

            // Every reader of the failed entity is affected
            for consumer in planner.graph().unwrap().consumers_of(id) {
                prop_assert!(record.affected.contains(&consumer));
            }
        }
    }
}
