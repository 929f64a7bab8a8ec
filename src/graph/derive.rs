//! Derived Attributes
//!
//! Computes per-mapping run levels, per-entity hierarchy levels, the
//! multi-mapping flag and entity types, and writes them onto the master graph.
//!
//! Run levels are longest-path depths over the mapping-to-mapping dependency
//! graph: mapping A precedes B when an entity A targets is a source of B.
//! Cycles are rejected before leveling; a mapping that reads its own target
//! does not depend on another mapping and is not treated as a cycle.

use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::{EntityType, FlowGraph};
use crate::error::{FlowError, Result};
use crate::identity::VertexId;

/// Default stereotype marking aggregate entities
pub const DEFAULT_AGGREGATE_STEREOTYPE: &str = "mdde_AggregateBusinessRule";

/// Overview of a derivation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationSummary {
    pub mapping_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_run_level: Option<u32>,
    /// Run level -> number of mappings
    pub mappings_per_level: BTreeMap<u32, usize>,
    /// Mappings flagged `multi_mapping`
    pub multi_mappings: usize,
    pub aggregate_entities: usize,
}

/// Mapping-to-mapping dependency graph; node weights are mapping ids.
/// Nodes are added in ascending id order, self-loops are omitted.
pub(crate) fn mapping_dependencies(graph: &FlowGraph) -> DiGraph<VertexId, ()> {
    let mappings = graph.mappings();
    let mut deps = DiGraph::with_capacity(mappings.len(), mappings.len() * 2);
    let mut index: HashMap<VertexId, NodeIndex> = HashMap::with_capacity(mappings.len());

    for mapping in &mappings {
        index.insert(mapping.id, deps.add_node(mapping.id));
    }

    for mapping in &mappings {
        let Some(target) = graph.target_of(mapping.id) else {
            continue;
        };
        for consumer in graph.consumers_of(target) {
            if consumer == mapping.id {
                continue;
            }
            if let (Some(&from), Some(&to)) = (index.get(&mapping.id), index.get(&consumer)) {
                deps.update_edge(from, to, ());
            }
        }
    }

    deps
}

/// Longest-path run level per mapping; errors on a dependency cycle
pub(crate) fn run_levels(graph: &FlowGraph, deps: &DiGraph<VertexId, ()>) -> Result<HashMap<VertexId, u32>> {
    let cycles: Vec<Vec<NodeIndex>> = kosaraju_scc(deps).into_iter().filter(|scc| scc.len() > 1).collect();
    if let Some(scc) = cycles.first() {
        let mut members: Vec<String> = scc
            .iter()
            .filter_map(|&idx| graph.get(deps[idx]).map(|v| v.label()))
            .collect();
        members.sort();
        return Err(FlowError::CyclicFlow { mappings: members });
    }

    let order = toposort(deps, None).map_err(|cycle| FlowError::CyclicFlow {
        mappings: graph
            .get(deps[cycle.node_id()])
            .map(|v| vec![v.label()])
            .unwrap_or_default(),
    })?;

    let mut levels: HashMap<NodeIndex, u32> = HashMap::with_capacity(order.len());
    for node in order {
        let level = deps
            .neighbors_directed(node, Direction::Incoming)
            .filter_map(|pred| levels.get(&pred))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        levels.insert(node, level);
    }

    Ok(levels.into_iter().map(|(idx, level)| (deps[idx], level)).collect())
}

/// Compute and write all derived attributes onto the master graph
pub fn derive(graph: &mut FlowGraph, aggregate_stereotype: &str) -> Result<DerivationSummary> {
    let deps = mapping_dependencies(graph);
    let levels = run_levels(graph, &deps)?;

    let mapping_updates: Vec<(VertexId, u32, bool)> = graph
        .mappings()
        .into_iter()
        .map(|m| {
            let multi = graph
                .target_of(m.id)
                .map(|t| graph.mappings_targeting(t).len() > 1)
                .unwrap_or(false);
            (m.id, levels.get(&m.id).copied().unwrap_or(0), multi)
        })
        .collect();

    let entity_updates: Vec<(VertexId, u32, EntityType)> = graph
        .entities()
        .into_iter()
        .map(|e| {
            let etl_level = graph
                .mappings_targeting(e.id)
                .iter()
                .filter_map(|m| levels.get(m))
                .max()
                .map(|l| l + 1)
                .unwrap_or(0);
            let type_entity = if e.stereotype.as_deref() == Some(aggregate_stereotype) {
                EntityType::Aggregate
            } else {
                EntityType::Regular
            };
            (e.id, etl_level, type_entity)
        })
        .collect();

    let mut summary = DerivationSummary {
        mapping_count: mapping_updates.len(),
        ..Default::default()
    };

    for (id, level, multi) in mapping_updates {
        let Some(mapping) = graph
            .index_of(id)
            .and_then(|idx| graph.vertex_at_mut(idx))
            .and_then(|v| v.as_mapping_mut())
        else {
            continue;
        };
        mapping.run_level = Some(level);
        mapping.multi_mapping = multi;
        *summary.mappings_per_level.entry(level).or_default() += 1;
        summary.max_run_level = summary.max_run_level.max(Some(level));
        if multi {
            summary.multi_mappings += 1;
        }
    }

    for (id, etl_level, type_entity) in entity_updates {
        let Some(entity) = graph
            .index_of(id)
            .and_then(|idx| graph.vertex_at_mut(idx))
            .and_then(|v| v.as_entity_mut())
        else {
            continue;
        };
        entity.etl_level = Some(etl_level);
        entity.type_entity = type_entity;
        if type_entity == EntityType::Aggregate {
            summary.aggregate_entities += 1;
        }
    }

    debug!(levels = ?summary.mappings_per_level, "run levels assigned");
    info!(
        mappings = summary.mapping_count,
        max_run_level = ?summary.max_run_level,
        "derivation complete"
    );

    Ok(summary)
}
