//! Flow Planner
//!
//! Owns the master graph for one run. `build` ingests documents, derives run
//! levels and applies the stage plan; every query before a successful build
//! fails with [`FlowError::GraphNotBuilt`].

use std::path::Path;
use tracing::info;

use crate::config::FlowConfig;
use crate::document::RawDocument;
use crate::error::{FlowError, Result};
use crate::graph::{
    assign_stages, derive, load_from_directory, BuildOutput, ConflictPolicy, DerivationSummary, Diagnostics,
    FailureAnalyzer, FailureRecord, FlowGraph, GraphBuilder, StagePlan, VertexRef, ViewProvider,
};
use crate::report::{self, FalloutReport, MappingOrderRecord};

/// Everything produced by a successful build
#[derive(Debug, Clone)]
struct Built {
    graph: FlowGraph,
    summary: DerivationSummary,
    /// `None` when the graph has no mappings
    plan: Option<StagePlan>,
    analyzer: FailureAnalyzer,
}

#[derive(Debug, Clone)]
pub struct FlowPlanner {
    config: FlowConfig,
    policy: ConflictPolicy,
    diagnostics: Diagnostics,
    built: Option<Built>,
}

impl FlowPlanner {
    /// Create a planner; fails on an unknown conflict policy
    pub fn new(config: FlowConfig) -> Result<Self> {
        let policy = config.conflict_policy()?;
        Ok(Self {
            config,
            policy,
            diagnostics: Diagnostics::new(),
            built: None,
        })
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Build the master graph from documents, replacing any previous build
    /// (and its recorded failures)
    pub fn build(&mut self, documents: &[RawDocument]) -> Result<&FlowGraph> {
        self.reset();
        let output = self.builder().build(documents)?;
        self.finish(output)
    }

    /// Build from every document under `dir`, honoring the configured prefixes
    pub fn build_from_directory(&mut self, dir: &Path) -> Result<&FlowGraph> {
        self.reset();
        let output = load_from_directory(dir, &self.config.load_config(), &self.builder())?;
        self.finish(output)
    }

    fn reset(&mut self) {
        self.built = None;
        self.diagnostics = Diagnostics::new();
    }

    fn builder(&self) -> GraphBuilder {
        GraphBuilder::new(self.config.stereotypes.filter_business_rule.as_str())
    }

    /// Strict check, derivation and scheduling over a freshly built graph
    fn finish(&mut self, output: BuildOutput) -> Result<&FlowGraph> {
        self.diagnostics = output.diagnostics;

        if self.config.input.strict {
            if let Some(err) = self.diagnostics.first_error() {
                return Err(err);
            }
        }

        let mut graph = output.graph;
        let summary = derive(&mut graph, &self.config.stereotypes.aggregate)?;

        let plan = match assign_stages(&graph, self.policy) {
            Ok(plan) => {
                graph.apply_stages(&plan);
                Some(plan)
            }
            Err(FlowError::NoFlow) => {
                info!("no mappings found; nothing to schedule");
                None
            }
            Err(e) => return Err(e),
        };

        info!(
            vertices = graph.vertex_count(),
            edges = graph.edge_count(),
            mappings = summary.mapping_count,
            errors = self.diagnostics.error_count(),
            warnings = self.diagnostics.warning_count(),
            "flow planned"
        );

        let analyzer = FailureAnalyzer::new(&graph);
        let built = self.built.insert(Built {
            graph,
            summary,
            plan,
            analyzer,
        });
        Ok(&built.graph)
    }

    fn built(&self) -> Result<&Built> {
        self.built.as_ref().ok_or(FlowError::GraphNotBuilt)
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn graph(&self) -> Result<&FlowGraph> {
        Ok(&self.built()?.graph)
    }

    /// Diagnostics of the latest build attempt
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn summary(&self) -> Result<&DerivationSummary> {
        Ok(&self.built()?.summary)
    }

    /// The applied stage plan; `NoFlow` when there was nothing to schedule
    pub fn stage_plan(&self) -> Result<&StagePlan> {
        self.built()?.plan.as_ref().ok_or(FlowError::NoFlow)
    }

    pub fn mapping_order(&self) -> Result<Vec<MappingOrderRecord>> {
        report::mapping_order(self.graph()?)
    }

    pub fn views(&self) -> Result<ViewProvider<'_>> {
        Ok(ViewProvider::new(self.graph()?))
    }

    /// Record failures; returns how many references resolved
    pub fn mark_failed(&mut self, refs: &[VertexRef]) -> Result<usize> {
        let built = self.built.as_mut().ok_or(FlowError::GraphNotBuilt)?;
        Ok(built.analyzer.mark_failed(refs))
    }

    pub fn failures(&self) -> Result<&[FailureRecord]> {
        Ok(self.built()?.analyzer.records())
    }

    pub fn fallout_report(&self) -> Result<FalloutReport> {
        Ok(self.built()?.analyzer.report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::document;
    use crate::identity::mapping_id;

    fn planner() -> FlowPlanner {
        FlowPlanner::new(FlowConfig::default()).unwrap()
    }

    #[test]
    fn test_queries_before_build() {
        let mut planner = planner();
        assert!(!planner.is_built());
        assert!(matches!(planner.graph(), Err(FlowError::GraphNotBuilt)));
        assert!(matches!(planner.mapping_order(), Err(FlowError::GraphNotBuilt)));
        assert!(matches!(planner.views(), Err(FlowError::GraphNotBuilt)));
        assert!(matches!(planner.fallout_report(), Err(FlowError::GraphNotBuilt)));
        assert!(matches!(
            planner.mark_failed(&[VertexRef::parse("M1")]),
            Err(FlowError::GraphNotBuilt)
        ));
    }

    #[test]
    fn test_invalid_policy_rejected_up_front() {
        let mut config = FlowConfig::default();
        config.scheduling.conflict_policy = "sideways".into();
        assert!(matches!(
            FlowPlanner::new(config),
            Err(FlowError::InvalidDeadlockPrevention(_))
        ));
    }

    #[test]
    fn test_build_applies_levels_and_stages() {
        let mut planner = planner();
        let doc = document(
            "dwh.json",
            &["A"],
            &[("M1", &["A"], "X"), ("M2", &["B"], "Y"), ("M3", &["C"], "X"), ("M5", &["X"], "Z")],
        );
        let graph = planner.build(&[doc]).unwrap();

        let m5 = graph.get_mapping(mapping_id("DWH", "M5")).unwrap();
        assert_eq!(m5.run_level, Some(1));
        assert_eq!(m5.run_level_stage, Some(0));
        let m1 = graph.get_mapping(mapping_id("DWH", "M1")).unwrap();
        let m3 = graph.get_mapping(mapping_id("DWH", "M3")).unwrap();
        assert_ne!(m1.run_level_stage, m3.run_level_stage);

        assert_eq!(planner.summary().unwrap().max_run_level, Some(1));
        assert_eq!(planner.stage_plan().unwrap().len(), 4);
        assert_eq!(planner.mapping_order().unwrap().len(), 4);
    }

    #[test]
    fn test_no_flow_is_not_a_build_failure() {
        let mut planner = planner();
        planner.build(&[document("staging.json", &["A", "B"], &[])]).unwrap();
        assert_eq!(planner.graph().unwrap().entities().len(), 2);
        assert!(planner.mapping_order().unwrap_err().is_no_flow());
        assert!(planner.stage_plan().unwrap_err().is_no_flow());
    }

    #[test]
    fn test_fallout_and_rebuild() {
        let mut planner = planner();
        let doc = document("dwh.json", &[], &[("M1", &["A"], "X"), ("M2", &["X"], "Y")]);
        planner.build(&[doc.clone()]).unwrap();

        assert_eq!(planner.mark_failed(&[VertexRef::parse("M1"), VertexRef::parse("M9")]).unwrap(), 1);
        let report = planner.fallout_report().unwrap();
        assert_eq!(report.affected_mapping_labels(), vec!["DWH/M2".to_string()]);

        planner.build(&[doc]).unwrap();
        assert!(planner.failures().unwrap().is_empty());
    }

    #[test]
    fn test_build_from_directory_skips_filtered_documents() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document("dwh.json", &[], &[("M1", &["A"], "X")]);
        let template = document("skip.json", &[], &[("M9", &["X"], "Y")]);
        std::fs::create_dir_all(dir.path().join("templates")).unwrap();
        std::fs::write(dir.path().join("dwh.json"), doc.value.to_string()).unwrap();
        std::fs::write(dir.path().join("templates/skip.json"), template.value.to_string()).unwrap();

        let mut planner = planner();
        let graph = planner.build_from_directory(dir.path()).unwrap();
        assert_eq!(graph.mapping_count(), 1);
        assert!(planner.graph().unwrap().contains(mapping_id("DWH", "M1")));
    }

    #[test]
    fn test_strict_mode_fails_on_error_diagnostics() {
        let broken = RawDocument::new(
            "broken.json",
            serde_json::json!({"Models": [{"Code": "DWH", "IsDocumentModel": false}]}),
        );

        let mut lenient = planner();
        lenient.build(std::slice::from_ref(&broken)).unwrap();
        assert_eq!(lenient.diagnostics().error_count(), 1);

        let mut config = FlowConfig::default();
        config.input.strict = true;
        let mut strict = FlowPlanner::new(config).unwrap();
        assert!(matches!(
            strict.build(&[broken]),
            Err(FlowError::MalformedDocument { .. })
        ));
        assert!(!strict.is_built());
    }
}
