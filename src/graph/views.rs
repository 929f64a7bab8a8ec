//! Graph Views
//!
//! Read-only projections of the master graph. Every view is a new
//! [`FlowGraph`]; the master graph is borrowed immutably and never changed.

use petgraph::graph::NodeIndex;
use petgraph::Direction;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use super::derive::mapping_dependencies;
use super::{EdgeKind, FlowGraph, Vertex, VertexKind, VertexRef};
use crate::error::{FlowError, Result};
use crate::identity::VertexId;

/// Builds views over a borrowed master graph
#[derive(Debug, Clone, Copy)]
pub struct ViewProvider<'a> {
    graph: &'a FlowGraph,
}

impl<'a> ViewProvider<'a> {
    pub fn new(graph: &'a FlowGraph) -> Self {
        Self { graph }
    }

    /// Resolve a reference that must name a vertex of `kind`
    fn require(&self, reference: &VertexRef, kind: VertexKind) -> Result<VertexId> {
        self.graph
            .resolve(reference)
            .filter(|id| self.graph.get(*id).map(Vertex::kind) == Some(kind))
            .ok_or_else(|| FlowError::UnresolvedReference(reference.to_string()))
    }

    fn indices<I: IntoIterator<Item = VertexId>>(&self, ids: I) -> HashSet<NodeIndex> {
        ids.into_iter().filter_map(|id| self.graph.index_of(id)).collect()
    }

    /// A file plus everything reachable from it along outgoing edges
    pub fn file_view(&self, file: &VertexRef) -> Result<FlowGraph> {
        let id = self.require(file, VertexKind::File)?;
        let mut keep = self.graph.reachable(id, Direction::Outgoing);
        keep.insert(id);

        debug!(file = %file, vertices = keep.len(), "file view");
        Ok(self.graph.induced(&self.indices(keep)))
    }

    /// An entity plus its full upstream and downstream closure
    pub fn entity_journey(&self, entity: &VertexRef) -> Result<FlowGraph> {
        let id = self.require(entity, VertexKind::Entity)?;
        let mut keep = self.graph.reachable(id, Direction::Outgoing);
        keep.extend(self.graph.reachable(id, Direction::Incoming));
        keep.insert(id);

        debug!(entity = %entity, vertices = keep.len(), "entity journey");
        Ok(self.graph.induced(&self.indices(keep)))
    }

    /// Master graph without File vertices
    pub fn mappings_entities_graph(&self) -> FlowGraph {
        let keep: HashSet<NodeIndex> = self
            .graph
            .graph
            .node_indices()
            .filter(|&idx| self.graph.graph[idx].kind() != VertexKind::File)
            .collect();
        self.graph.induced(&keep)
    }

    /// Mapping vertices only, with `MAPPING_FEEDS_MAPPING` edges where one
    /// mapping's target is a source of another
    pub fn mappings_graph(&self) -> FlowGraph {
        let deps = mapping_dependencies(self.graph);
        let mut view = FlowGraph::with_capacity(deps.node_count(), deps.edge_count());

        for mapping in self.graph.mappings() {
            view.insert_vertex(Vertex::Mapping(mapping.clone()));
        }
        for edge in deps.raw_edges() {
            let (from, to) = (deps[edge.source()], deps[edge.target()]);
            if let (Some(a), Some(b)) = (view.index_of(from), view.index_of(to)) {
                view.add_edge(a, b, EdgeKind::MappingFeedsMapping);
            }
        }
        view
    }

    /// File-to-file dependencies: file D feeds file C when a mapping defined in
    /// C reads an entity defined in D. With `route_through_entities`, the edge
    /// is drawn as D -> entity -> C instead.
    pub fn cross_file_graph(&self, route_through_entities: bool) -> FlowGraph {
        // (defining file, entity, consuming file)
        let mut links: BTreeSet<(VertexId, VertexId, VertexId)> = BTreeSet::new();

        for entity in self.graph.entities() {
            let definers = self
                .graph
                .neighbors(entity.id, EdgeKind::FileDefinesEntity, Direction::Incoming);
            if definers.is_empty() {
                continue;
            }
            let consumers: BTreeSet<VertexId> = self
                .graph
                .consumers_of(entity.id)
                .into_iter()
                .flat_map(|m| self.graph.neighbors(m, EdgeKind::FileDefinesMapping, Direction::Incoming))
                .collect();

            for &definer in &definers {
                for &consumer in consumers.iter().filter(|&&c| c != definer) {
                    links.insert((definer, entity.id, consumer));
                }
            }
        }

        let mut view = FlowGraph::new();
        for file in self.graph.files() {
            view.insert_vertex(Vertex::File(file.clone()));
        }

        for (definer, entity, consumer) in links {
            let (Some(from), Some(to)) = (view.index_of(definer), view.index_of(consumer)) else {
                continue;
            };
            if !route_through_entities {
                view.add_edge(from, to, EdgeKind::FileFeedsFile);
                continue;
            }
            let Some(vertex) = self.graph.get(entity) else {
                continue;
            };
            let (via, _) = view.insert_vertex(vertex.clone());
            view.add_edge(from, via, EdgeKind::FileDefinesEntity);
            view.add_edge(via, to, EdgeKind::EntityFeedsFile);
        }

        debug!(
            files = view.files().len(),
            edges = view.edge_count(),
            routed = route_through_entities,
            "cross-file graph"
        );
        view
    }
}
