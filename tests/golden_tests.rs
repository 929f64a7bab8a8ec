//! Golden Tests for Flow Planning
//!
//! Builds the staging -> warehouse -> mart fixture set and checks levels,
//! stages, views and fallout against hand-computed expectations.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use etl_flow::graph::{DiagnosticCode, EdgeKind, EntityType};
use etl_flow::identity::{entity_id, file_id, mapping_id};
use etl_flow::{ConflictPolicy, FlowConfig, FlowError, FlowGraph, FlowPlanner, RawDocument, VertexId, VertexRef};

fn fixtures_path() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").leak()
}

fn planner_with(policy: ConflictPolicy) -> FlowPlanner {
    let mut config = FlowConfig::default();
    config.scheduling.conflict_policy = policy.to_string();
    let mut planner = FlowPlanner::new(config).unwrap();
    planner.build_from_directory(&fixtures_path().join("flow")).unwrap();
    planner
}

fn built() -> FlowPlanner {
    planner_with(ConflictPolicy::Target)
}

fn fixture_documents() -> Vec<RawDocument> {
    ["staging.json", "dwh.json", "mart.json"]
        .iter()
        .map(|name| RawDocument::read(&fixtures_path().join("flow").join(name)).unwrap())
        .collect()
}

fn run_level(graph: &FlowGraph, model: &str, code: &str) -> Option<u32> {
    graph.get_mapping(mapping_id(model, code)).and_then(|m| m.run_level)
}

fn stage(graph: &FlowGraph, model: &str, code: &str) -> Option<u32> {
    graph.get_mapping(mapping_id(model, code)).and_then(|m| m.run_level_stage)
}

// =============================================================================
// Graph Construction
// =============================================================================

#[test]
fn test_fixture_graph_shape() {
    let planner = built();
    let graph = planner.graph().unwrap();

    assert_eq!(graph.files().len(), 3, "templates/ must be skipped");
    assert_eq!(graph.entities().len(), 8);
    assert_eq!(graph.mapping_count(), 7);
    assert!(graph.edges().iter().all(|e| !e.kind.is_derived()));

    // Filter business rule sources never become vertices
    assert!(!graph.contains(entity_id("DWH", "ONLY_ACTIVE")));
    // Mapping without a target is skipped
    assert!(!graph.contains(mapping_id("DWH", "M_BROKEN")));
}

#[test]
fn test_files_follow_directory_order() {
    let planner = built();
    let names: Vec<&str> = planner
        .graph()
        .unwrap()
        .files()
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(names, vec!["dwh.json", "mart.json", "staging.json"]);
}

#[test]
fn test_file_metadata_passthrough() {
    let planner = built();
    let staging = planner.graph().unwrap().get_file(file_id(Path::new("staging.json"))).unwrap();
    assert!(staging.created.is_some());
    assert!(staging.modified.is_some());
    assert_eq!(staging.extra.get("Author").and_then(|v| v.as_str()), Some("data-platform"));
}

#[test]
fn test_entities_are_merged_across_documents() {
    let planner = built();
    let graph = planner.graph().unwrap();

    // Defined in staging.json, referenced from dwh.json
    let raw = graph.get_entity(entity_id("STG", "CUSTOMER_RAW")).unwrap();
    assert!(raw.is_created);
    assert_eq!(raw.name.as_deref(), Some("Customer Raw"));
    assert_eq!(graph.defining_files(raw.id), vec![file_id(Path::new("staging.json"))]);
    assert_eq!(graph.consumers_of(raw.id).len(), 2);
}

#[test]
fn test_mapping_attributes() {
    let planner = built();
    let graph = planner.graph().unwrap();

    let mapping = graph.get_mapping(mapping_id("DWH", "M_DIM_CUSTOMER")).unwrap();
    assert_eq!(mapping.model_name.as_deref(), Some("Data Warehouse"));
    assert_eq!(mapping.datasource_code.as_deref(), Some("ERP"));
    assert_eq!(mapping.target_code, "DIM_CUSTOMER");
    assert_eq!(mapping.attribute_mapping.as_array().map(Vec::len), Some(2));

    let crm = graph.get_mapping(mapping_id("DWH", "M_DIM_CUSTOMER_CRM")).unwrap();
    assert_eq!(crm.datasource_code.as_deref(), Some("CRM"));

    let fact = graph.get_mapping(mapping_id("DWH", "M_FACT_ORDER")).unwrap();
    assert_eq!(graph.sources_of(fact.id).len(), 3);
    // The opaque payload keeps the filter entry
    assert_eq!(fact.source_composition.as_array().map(Vec::len), Some(4));
}

#[test]
fn test_diagnostics() {
    let planner = built();
    let diagnostics = planner.diagnostics();

    assert_eq!(diagnostics.error_count(), 1);
    assert_eq!(diagnostics.warning_count(), 1);
    let broken: Vec<_> = diagnostics.with_code(DiagnosticCode::MissingTargetEntity).collect();
    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].file, "dwh.json");
    assert_eq!(diagnostics.with_code(DiagnosticCode::MissingMappingList).count(), 1);
}

#[test]
fn test_strict_build_rejects_malformed_mapping() {
    let mut config = FlowConfig::default();
    config.input.strict = true;
    let mut planner = FlowPlanner::new(config).unwrap();

    let err = planner.build_from_directory(&fixtures_path().join("flow")).unwrap_err();
    match err {
        FlowError::MalformedDocument { path, reason } => {
            assert_eq!(path, Path::new("dwh.json"));
            assert!(reason.contains("M_BROKEN"));
        }
        other => panic!("Expected MalformedDocument, got {:?}", other),
    }
    assert!(matches!(planner.graph(), Err(FlowError::GraphNotBuilt)));
}

#[test]
fn test_invalid_document_is_fatal() {
    let mut planner = FlowPlanner::new(FlowConfig::default()).unwrap();
    let bad = RawDocument::read(&fixtures_path().join("flow/templates/ignored.json")).unwrap();
    assert!(matches!(planner.build(&[bad]), Err(FlowError::InvalidInput { .. })));
}

// =============================================================================
// Derivation
// =============================================================================

#[test]
fn test_run_levels() {
    let planner = built();
    let graph = planner.graph().unwrap();

    assert_eq!(run_level(graph, "DWH", "M_DIM_CUSTOMER"), Some(0));
    assert_eq!(run_level(graph, "DWH", "M_DIM_CUSTOMER_CRM"), Some(0));
    assert_eq!(run_level(graph, "DWH", "M_DIM_PRODUCT"), Some(0));
    assert_eq!(run_level(graph, "DWH", "M_FACT_ORDER_LATE"), Some(0));
    assert_eq!(run_level(graph, "DWH", "M_FACT_ORDER"), Some(1));
    assert_eq!(run_level(graph, "MART", "M_CUSTOMER_REPORT"), Some(1));
    assert_eq!(run_level(graph, "MART", "M_SALES_SUMMARY"), Some(2));

    let summary = planner.summary().unwrap();
    assert_eq!(summary.max_run_level, Some(2));
    assert_eq!(summary.mappings_per_level, BTreeMap::from([(0, 4), (1, 2), (2, 1)]));
}

#[test]
fn test_entity_levels_and_types() {
    let planner = built();
    let graph = planner.graph().unwrap();
    let entity = |model: &str, code: &str| graph.get_entity(entity_id(model, code)).unwrap();

    assert_eq!(entity("STG", "ORDER_RAW").etl_level, Some(0));
    assert_eq!(entity("DWH", "DIM_CUSTOMER").etl_level, Some(1));
    assert_eq!(entity("DWH", "FACT_ORDER").etl_level, Some(2));
    assert_eq!(entity("MART", "CUSTOMER_REPORT").etl_level, Some(2));
    assert_eq!(entity("MART", "SALES_SUMMARY").etl_level, Some(3));

    assert_eq!(entity("MART", "SALES_SUMMARY").type_entity, EntityType::Aggregate);
    assert_eq!(entity("DWH", "FACT_ORDER").type_entity, EntityType::Regular);
    assert_eq!(planner.summary().unwrap().aggregate_entities, 1);
}

#[test]
fn test_multi_mapping_flags() {
    let planner = built();
    let graph = planner.graph().unwrap();
    let multi: HashSet<&str> = graph
        .mappings()
        .into_iter()
        .filter(|m| m.multi_mapping)
        .map(|m| m.code.as_str())
        .collect();
    assert_eq!(
        multi,
        HashSet::from(["M_DIM_CUSTOMER", "M_DIM_CUSTOMER_CRM", "M_FACT_ORDER", "M_FACT_ORDER_LATE"])
    );
}

#[test]
fn test_cycle_is_rejected() {
    let mut planner = FlowPlanner::new(FlowConfig::default()).unwrap();
    let err = planner.build_from_directory(&fixtures_path().join("cyclic")).unwrap_err();
    match err {
        FlowError::CyclicFlow { mappings } => {
            assert_eq!(mappings, vec!["DWH/M_A_TO_B", "DWH/M_B_TO_A"]);
        }
        other => panic!("Expected CyclicFlow, got {:?}", other),
    }
}

// =============================================================================
// Stages
// =============================================================================

#[test]
fn test_target_policy_stages() {
    let planner = built();
    let graph = planner.graph().unwrap();

    let customer = stage(graph, "DWH", "M_DIM_CUSTOMER").unwrap();
    let crm = stage(graph, "DWH", "M_DIM_CUSTOMER_CRM").unwrap();
    assert_ne!(customer, crm);
    assert_eq!(HashSet::from([customer, crm]), HashSet::from([0, 1]));

    assert_eq!(stage(graph, "DWH", "M_DIM_PRODUCT"), Some(0));
    assert_eq!(stage(graph, "DWH", "M_FACT_ORDER_LATE"), Some(0));
    assert_eq!(stage(graph, "DWH", "M_FACT_ORDER"), Some(0));
    assert_eq!(stage(graph, "MART", "M_CUSTOMER_REPORT"), Some(0));

    let plan = planner.stage_plan().unwrap();
    assert_eq!(plan.policy, ConflictPolicy::Target);
    assert_eq!(plan.stages_per_level(), &BTreeMap::from([(0, 2), (1, 1), (2, 1)]));
}

#[test]
fn test_source_policy_stages() {
    let planner = planner_with(ConflictPolicy::Source);
    let graph = planner.graph().unwrap();

    // Both read STG/CUSTOMER_RAW
    assert_ne!(
        stage(graph, "DWH", "M_DIM_CUSTOMER"),
        stage(graph, "DWH", "M_DIM_CUSTOMER_CRM")
    );
    // Both read DWH/DIM_CUSTOMER at level 1
    assert_ne!(stage(graph, "DWH", "M_FACT_ORDER"), stage(graph, "MART", "M_CUSTOMER_REPORT"));
}

// =============================================================================
// Ordered Mapping List
// =============================================================================

#[test]
fn test_mapping_order() {
    let planner = built();
    let order = planner.mapping_order().unwrap();

    assert_eq!(order.len(), 7);
    let levels: Vec<u32> = order.iter().map(|r| r.run_level).collect();
    assert_eq!(levels, vec![0, 0, 0, 0, 1, 1, 2]);
    assert!(order
        .windows(2)
        .all(|w| (w[0].run_level, w[0].run_level_stage) <= (w[1].run_level, w[1].run_level_stage)));

    let last = order.last().unwrap();
    assert_eq!(last.name, "Build Sales Summary");
    assert_eq!(last.source_view_name, "vw_src_Build_Sales_Summary");
    assert_eq!(last.code_model, "MART");
    assert_eq!(last.name_model.as_deref(), Some("Sales Mart"));
    assert_eq!(last.entity_target_code, "SALES_SUMMARY");

    let json = serde_json::to_value(last).unwrap();
    assert_eq!(json["RunLevel"], 2);
    assert_eq!(json["SourceViewName"], "vw_src_Build_Sales_Summary");
}

#[test]
fn test_no_flow_yields_empty_schedule() {
    let mut planner = FlowPlanner::new(FlowConfig::default()).unwrap();
    let staging = RawDocument::read(&fixtures_path().join("flow/staging.json")).unwrap();
    planner.build(&[staging]).unwrap();

    let order = match planner.mapping_order() {
        Ok(order) => order,
        Err(FlowError::NoFlow) => Vec::new(),
        Err(e) => panic!("unexpected error: {}", e),
    };
    assert!(order.is_empty());
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_build_is_deterministic() {
    let a = built();
    let b = built();
    let (ga, gb) = (a.graph().unwrap(), b.graph().unwrap());

    assert_eq!(ga.edges(), gb.edges());
    assert_eq!(
        serde_json::to_string(&ga.to_view()).unwrap(),
        serde_json::to_string(&gb.to_view()).unwrap()
    );
    assert_eq!(a.mapping_order().unwrap(), b.mapping_order().unwrap());
}

#[test]
fn test_document_order_does_not_change_identity_or_plan() {
    let documents = fixture_documents();
    let mut reversed = documents.clone();
    reversed.reverse();

    let mut forward = FlowPlanner::new(FlowConfig::default()).unwrap();
    forward.build(&documents).unwrap();
    let mut backward = FlowPlanner::new(FlowConfig::default()).unwrap();
    backward.build(&reversed).unwrap();

    let ids = |p: &FlowPlanner| -> Vec<VertexId> { p.graph().unwrap().vertices().iter().map(|v| v.id()).collect() };
    assert_eq!(ids(&forward), ids(&backward));
    assert_eq!(forward.graph().unwrap().edges(), backward.graph().unwrap().edges());
    assert_eq!(forward.mapping_order().unwrap(), backward.mapping_order().unwrap());
}

// =============================================================================
// Views
// =============================================================================

#[test]
fn test_file_view() {
    let planner = built();
    let views = planner.views().unwrap();
    let view = views.file_view(&VertexRef::parse("file:mart.json")).unwrap();

    // mart.json, its 2 entities and 2 mappings
    assert_eq!(view.vertex_count(), 5);
    assert!(!view.contains(entity_id("DWH", "FACT_ORDER")));
    assert_eq!(planner.graph().unwrap().vertex_count(), 18);
}

#[test]
fn test_entity_journey() {
    let planner = built();
    let view = planner
        .views()
        .unwrap()
        .entity_journey(&VertexRef::parse("entity:DWH/DIM_PRODUCT"))
        .unwrap();

    assert!(view.contains(entity_id("STG", "PRODUCT_RAW")));
    assert!(view.contains(mapping_id("MART", "M_SALES_SUMMARY")));
    assert!(view.contains(file_id(Path::new("staging.json"))));
    assert!(!view.contains(mapping_id("DWH", "M_DIM_CUSTOMER")));
    assert!(!view.contains(mapping_id("MART", "M_CUSTOMER_REPORT")));
}

#[test]
fn test_mappings_graph_is_monotonic() {
    let planner = built();
    let graph = planner.graph().unwrap();
    let view = planner.views().unwrap().mappings_graph();

    assert_eq!(view.vertex_count(), 7);
    assert!(view.edge_count() > 0);
    for edge in view.edges() {
        assert_eq!(edge.kind, EdgeKind::MappingFeedsMapping);
        let from = graph.get_mapping(edge.source).and_then(|m| m.run_level).unwrap();
        let to = graph.get_mapping(edge.target).and_then(|m| m.run_level).unwrap();
        assert!(from < to, "{} -> {}", edge.source, edge.target);
    }
}

#[test]
fn test_cross_file_graph() {
    let planner = built();
    let views = planner.views().unwrap();
    let file = |name: &str| file_id(Path::new(name));

    let direct = views.cross_file_graph(false);
    let pairs: HashSet<(VertexId, VertexId)> = direct.edges().iter().map(|e| (e.source, e.target)).collect();
    assert_eq!(
        pairs,
        HashSet::from([
            (file("staging.json"), file("dwh.json")),
            (file("dwh.json"), file("mart.json")),
        ])
    );

    let routed = views.cross_file_graph(true);
    assert_eq!(routed.vertex_count(), 9);
    assert_eq!(routed.edge_count(), 12);
}

// =============================================================================
// Failure Impact
// =============================================================================

#[test]
fn test_fallout_for_failed_mapping() {
    let mut planner = built();
    assert_eq!(planner.mark_failed(&[VertexRef::parse("M_DIM_CUSTOMER")]).unwrap(), 1);

    let report = planner.fallout_report().unwrap();
    assert_eq!(
        report.affected_mapping_labels(),
        vec!["DWH/M_FACT_ORDER", "MART/M_CUSTOMER_REPORT", "MART/M_SALES_SUMMARY"]
    );
    let entities: HashSet<VertexId> = report.entries[0].affected.entities.iter().map(|v| v.id()).collect();
    assert_eq!(
        entities,
        HashSet::from([
            entity_id("DWH", "DIM_CUSTOMER"),
            entity_id("DWH", "FACT_ORDER"),
            entity_id("MART", "CUSTOMER_REPORT"),
            entity_id("MART", "SALES_SUMMARY"),
        ])
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json[0]["failed"]["kind"], "Mapping");
    assert_eq!(json[0]["failed"]["run_level"], 0);
}

#[test]
fn test_fallout_for_failed_entity_and_unknown_reference() {
    let mut planner = built();
    let resolved = planner
        .mark_failed(&[VertexRef::parse("entity:STG/PRODUCT_RAW"), VertexRef::parse("M_DIM_CUSTOMR")])
        .unwrap();
    assert_eq!(resolved, 1);

    let report = planner.fallout_report().unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(
        report.affected_mapping_labels(),
        vec!["DWH/M_DIM_PRODUCT", "DWH/M_FACT_ORDER", "MART/M_SALES_SUMMARY"]
    );
    assert_eq!(report.entries[0].affected.entities.len(), 3);
}
