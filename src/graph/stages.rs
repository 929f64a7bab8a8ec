//! Stage Scheduling
//!
//! Splits every run level into stages so that no two mappings in the same
//! level and stage touch a common entity under the active conflict policy.
//! Within a level, mappings are vertices of an undirected conflict graph which
//! is colored greedily in ascending id order; the color is the stage.

use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use super::FlowGraph;
use crate::error::{FlowError, Result};
use crate::identity::VertexId;

/// Which shared entities make two mappings conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Mappings reading a common source entity conflict
    Source,
    /// Mappings writing a common target entity conflict
    #[default]
    Target,
}

impl FromStr for ConflictPolicy {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" => Ok(ConflictPolicy::Source),
            "target" => Ok(ConflictPolicy::Target),
            _ => Err(FlowError::InvalidDeadlockPrevention(s.to_string())),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}

/// Stage assignment for every mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    pub policy: ConflictPolicy,
    stages: BTreeMap<VertexId, u32>,
    /// Run level -> number of stages used
    stages_per_level: BTreeMap<u32, u32>,
}

impl StagePlan {
    pub fn stage_of(&self, mapping: VertexId) -> Option<u32> {
        self.stages.get(&mapping).copied()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VertexId, u32)> + '_ {
        self.stages.iter().map(|(id, stage)| (*id, *stage))
    }

    pub fn stages_per_level(&self) -> &BTreeMap<u32, u32> {
        &self.stages_per_level
    }
}

/// Entities a mapping "touches" under the given policy
fn conflict_entities(graph: &FlowGraph, mapping: VertexId, policy: ConflictPolicy) -> Vec<VertexId> {
    match policy {
        ConflictPolicy::Source => graph.sources_of(mapping),
        ConflictPolicy::Target => graph.target_of(mapping).into_iter().collect(),
    }
}

/// Conflict graph over `mappings` (expected sorted); node i holds `mappings[i]`
pub(crate) fn conflict_graph(graph: &FlowGraph, mappings: &[VertexId], policy: ConflictPolicy) -> UnGraph<VertexId, ()> {
    let mut conflicts = UnGraph::with_capacity(mappings.len(), mappings.len());
    let mut touching: HashMap<VertexId, Vec<NodeIndex>> = HashMap::new();

    for &mapping in mappings {
        let node = conflicts.add_node(mapping);
        for entity in conflict_entities(graph, mapping, policy) {
            touching.entry(entity).or_default().push(node);
        }
    }

    for nodes in touching.values() {
        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                conflicts.update_edge(a, b, ());
            }
        }
    }

    conflicts
}

/// Greedy coloring in node-index order: each node takes the lowest color no
/// already-colored neighbor uses
pub(crate) fn greedy_coloring(conflicts: &UnGraph<VertexId, ()>) -> Vec<u32> {
    let mut colors: Vec<Option<u32>> = vec![None; conflicts.node_count()];

    for node in conflicts.node_indices() {
        let used: HashSet<u32> = conflicts
            .neighbors(node)
            .filter_map(|n| colors[n.index()])
            .collect();
        let color = (0..).find(|c| !used.contains(c)).unwrap_or(0);
        colors[node.index()] = Some(color);
    }

    colors.into_iter().map(|c| c.unwrap_or(0)).collect()
}

/// Compute stages for every run level. Reads the graph only; apply the plan
/// with [`FlowGraph::apply_stages`].
pub fn assign_stages(graph: &FlowGraph, policy: ConflictPolicy) -> Result<StagePlan> {
    let mappings = graph.mappings();
    if mappings.is_empty() {
        return Err(FlowError::NoFlow);
    }

    let mut by_level: BTreeMap<u32, Vec<VertexId>> = BTreeMap::new();
    for mapping in &mappings {
        if mapping.run_level.is_none() {
            debug!(mapping = %mapping.code, "mapping has no run level, scheduling at level 0");
        }
        by_level.entry(mapping.run_level.unwrap_or(0)).or_default().push(mapping.id);
    }

    let mut plan = StagePlan {
        policy,
        ..Default::default()
    };

    for (level, mut ids) in by_level {
        ids.sort();
        let conflicts = conflict_graph(graph, &ids, policy);
        let colors = greedy_coloring(&conflicts);
        let stage_count = colors.iter().max().map(|c| c + 1).unwrap_or(0);

        debug!(
            level,
            mappings = ids.len(),
            conflicts = conflicts.edge_count(),
            stages = stage_count,
            "run level staged"
        );

        for (id, color) in ids.into_iter().zip(colors) {
            plan.stages.insert(id, color);
        }
        plan.stages_per_level.insert(level, stage_count);
    }

    info!(policy = %policy, mappings = plan.len(), "stages assigned");
    Ok(plan)
}

impl FlowGraph {
    /// Write `run_level_stage` from a plan onto the mapping vertices; returns
    /// the number of mappings updated
    pub fn apply_stages(&mut self, plan: &StagePlan) -> usize {
        let mut updated = 0;
        for (id, stage) in plan.iter() {
            let Some(mapping) = self
                .index_of(id)
                .and_then(|idx| self.vertex_at_mut(idx))
                .and_then(|v| v.as_mapping_mut())
            else {
                continue;
            };
            mapping.run_level_stage = Some(stage);
            updated += 1;
        }
        updated
    }
}
