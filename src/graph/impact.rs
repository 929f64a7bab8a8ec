//! Failure Impact Analysis
//!
//! Marks mappings or entities as failed and computes their blast radius: every
//! vertex downstream-reachable in the mappings/entities graph.

use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::views::ViewProvider;
use super::{FlowGraph, VertexRef};
use crate::identity::VertexId;
use crate::report::{AffectedSet, FalloutEntry, FalloutReport};

/// One failed vertex and everything downstream of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failed: VertexId,
    /// Sorted by id, excludes `failed`
    pub affected: Vec<VertexId>,
}

/// Accumulates failure records against a detached copy of the graph
#[derive(Debug, Clone)]
pub struct FailureAnalyzer {
    graph: FlowGraph,
    records: Vec<FailureRecord>,
}

impl FailureAnalyzer {
    pub fn new(graph: &FlowGraph) -> Self {
        Self {
            graph: ViewProvider::new(graph).mappings_entities_graph(),
            records: Vec::new(),
        }
    }

    /// The mappings/entities graph the analysis runs on
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Downstream vertices of `id`, sorted; `None` if `id` is not in the graph
    pub fn blast_radius(&self, id: VertexId) -> Option<Vec<VertexId>> {
        if !self.graph.contains(id) {
            return None;
        }
        let mut affected: Vec<VertexId> = self.graph.reachable(id, Direction::Outgoing).into_iter().collect();
        affected.sort();
        Some(affected)
    }

    /// Record a failure for each resolvable reference. Unresolvable ones are
    /// logged and skipped. Returns the number of records added.
    pub fn mark_failed(&mut self, refs: &[VertexRef]) -> usize {
        let mut added = 0;

        for reference in refs {
            let Some(failed) = self.graph.resolve(reference) else {
                let suggestions = self.graph.suggest(&reference.to_string(), 3);
                if suggestions.is_empty() {
                    warn!(reference = %reference, "failed vertex not found; skipped");
                } else {
                    warn!(
                        reference = %reference,
                        "failed vertex not found; skipped (did you mean: {})",
                        suggestions.join(", ")
                    );
                }
                continue;
            };
            let affected = self.blast_radius(failed).unwrap_or_default();

            info!(
                failed = %self.graph.get(failed).map(|v| v.label()).unwrap_or_default(),
                affected = affected.len(),
                "failure recorded"
            );
            self.records.push(FailureRecord { failed, affected });
            added += 1;
        }

        added
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records expanded with full vertex attributes, affected vertices split by kind
    pub fn report(&self) -> FalloutReport {
        let entries = self
            .records
            .iter()
            .filter_map(|record| {
                let failed = self.graph.get(record.failed)?.clone();
                let mut affected = AffectedSet::default();
                for vertex in record.affected.iter().filter_map(|id| self.graph.get(*id)) {
                    if vertex.as_mapping().is_some() {
                        affected.mappings.push(vertex.clone());
                    } else {
                        affected.entities.push(vertex.clone());
                    }
                }
                Some(FalloutEntry { failed, affected })
            })
            .collect();

        FalloutReport { entries }
    }
}
