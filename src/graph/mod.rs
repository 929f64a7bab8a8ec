//! Flow Dependency Graph
//!
//! Primary data structure: a petgraph `DiGraph` with three vertex kinds
//! (File, Entity, Mapping) and typed edges, plus an id index for O(1) lookup.
//!
//! The master graph is built once per run by [`loader`], enriched in place by
//! [`derive`], and then only read: [`stages`] computes a plan from it, while
//! [`views`] and [`impact`] work on detached clones.

pub mod derive;
pub mod diagnostics;
pub mod impact;
pub mod loader;
pub mod stages;
pub mod views;

pub use derive::{derive, DerivationSummary};
pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics, Severity};
pub use impact::{FailureAnalyzer, FailureRecord};
pub use loader::{load_from_directory, BuildOutput, GraphBuilder, LoadConfig};
pub use stages::{assign_stages, ConflictPolicy, StagePlan};
pub use views::ViewProvider;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::identity::{self, VertexId};

/// Kind of a graph vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VertexKind {
    File,
    Entity,
    Mapping,
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "File"),
            Self::Entity => write!(f, "Entity"),
            Self::Mapping => write!(f, "Mapping"),
        }
    }
}

/// Types of edges in the flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// File defines an entity in its document model
    FileDefinesEntity,
    /// File defines a mapping
    FileDefinesMapping,
    /// Entity is read by a mapping
    EntityIsSourceOf,
    /// Mapping writes its target entity
    MappingTargetsEntity,
    /// Derived (views only): mapping's target is a source of another mapping
    MappingFeedsMapping,
    /// Derived (views only): a mapping in one file consumes an entity defined in another
    FileFeedsFile,
    /// Derived (views only): entity defined elsewhere is consumed by a file's mapping
    EntityFeedsFile,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileDefinesEntity => "FILE_DEFINES_ENTITY",
            Self::FileDefinesMapping => "FILE_DEFINES_MAPPING",
            Self::EntityIsSourceOf => "ENTITY_IS_SOURCE_OF",
            Self::MappingTargetsEntity => "MAPPING_TARGETS_ENTITY",
            Self::MappingFeedsMapping => "MAPPING_FEEDS_MAPPING",
            Self::FileFeedsFile => "FILE_FEEDS_FILE",
            Self::EntityFeedsFile => "ENTITY_FEEDS_FILE",
        }
    }

    /// Edges that only exist in derived views, never in the master graph
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Self::MappingFeedsMapping | Self::FileFeedsFile | Self::EntityFeedsFile
        )
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity classification derived from its stereotype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EntityType {
    #[default]
    Regular,
    Aggregate,
}

/// A source metadata document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVertex {
    pub id: VertexId,
    pub path: PathBuf,
    /// Basename of `path`
    pub name: String,
    /// 0-based order in which the file was added
    pub order: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// Document-level metadata (author, version, ...) passed through verbatim
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl FileVertex {
    /// Fill absent timestamps and metadata from a same-named document
    pub(crate) fn absorb(&mut self, other: FileVertex) {
        if self.created.is_none() {
            self.created = other.created;
        }
        if self.modified.is_none() {
            self.modified = other.modified;
        }
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
    }
}

/// A named dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityVertex {
    pub id: VertexId,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub model_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stereotype: Option<String>,
    /// Defined by a loaded document (vs. only referenced by a mapping)
    #[serde(default)]
    pub is_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etl_level: Option<u32>,
    #[serde(default)]
    pub type_entity: EntityType,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl EntityVertex {
    /// Fill fields the existing vertex lacks; populated fields keep the first writer's value
    pub(crate) fn absorb(&mut self, other: EntityVertex) {
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.model_name.is_none() {
            self.model_name = other.model_name;
        }
        if self.stereotype.is_none() {
            self.stereotype = other.stereotype;
        }
        self.is_created |= other.is_created;
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
    }
}

/// One transformation: zero-or-more sources, exactly one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingVertex {
    pub id: VertexId,
    pub code: String,
    pub name: String,
    /// Owning model: the target entity's model
    pub model_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource_code: Option<String>,
    pub target_code: String,
    /// Opaque pass-through payloads
    #[serde(default)]
    pub source_composition: Value,
    #[serde(default)]
    pub attribute_mapping: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_level_stage: Option<u32>,
    #[serde(default)]
    pub multi_mapping: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl MappingVertex {
    pub(crate) fn absorb(&mut self, other: MappingVertex) {
        if self.model_name.is_none() {
            self.model_name = other.model_name;
        }
        if self.datasource_code.is_none() {
            self.datasource_code = other.datasource_code;
        }
        if self.source_composition.is_null() {
            self.source_composition = other.source_composition;
        }
        if self.attribute_mapping.is_null() {
            self.attribute_mapping = other.attribute_mapping;
        }
        for (key, value) in other.extra {
            self.extra.entry(key).or_insert(value);
        }
    }
}

/// A graph vertex: tagged union over the three kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Vertex {
    File(FileVertex),
    Entity(EntityVertex),
    Mapping(MappingVertex),
}

impl Vertex {
    pub fn id(&self) -> VertexId {
        match self {
            Vertex::File(v) => v.id,
            Vertex::Entity(v) => v.id,
            Vertex::Mapping(v) => v.id,
        }
    }

    pub fn kind(&self) -> VertexKind {
        match self {
            Vertex::File(_) => VertexKind::File,
            Vertex::Entity(_) => VertexKind::Entity,
            Vertex::Mapping(_) => VertexKind::Mapping,
        }
    }

    /// Human-readable label: file name, or `MODEL/CODE`
    pub fn label(&self) -> String {
        match self {
            Vertex::File(v) => v.name.clone(),
            Vertex::Entity(v) => format!("{}/{}", v.model_code, v.code),
            Vertex::Mapping(v) => format!("{}/{}", v.model_code, v.code),
        }
    }

    pub fn as_file(&self) -> Option<&FileVertex> {
        match self {
            Vertex::File(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityVertex> {
        match self {
            Vertex::Entity(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&MappingVertex> {
        match self {
            Vertex::Mapping(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn as_file_mut(&mut self) -> Option<&mut FileVertex> {
        match self {
            Vertex::File(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn as_entity_mut(&mut self) -> Option<&mut EntityVertex> {
        match self {
            Vertex::Entity(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn as_mapping_mut(&mut self) -> Option<&mut MappingVertex> {
        match self {
            Vertex::Mapping(v) => Some(v),
            _ => None,
        }
    }
}

/// A directed edge, by vertex id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: VertexId,
    pub target: VertexId,
    pub kind: EdgeKind,
}

/// Serializable vertex + edge sets, handed to the visualization collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphView {
    pub vertices: Vec<Vertex>,
    pub edges: Vec<EdgeRecord>,
}

/// Node in a closure result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureNode {
    pub id: VertexId,
    pub depth: usize,
}

/// A reference to a vertex as a caller would write it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexRef {
    Id(VertexId),
    Mapping { model_code: String, code: String },
    Entity { model_code: String, code: String },
    File(String),
    /// Bare `CODE` or `MODEL/CODE`; mappings are tried before entities
    Code(String),
}

impl VertexRef {
    /// Parse `id:<hex>`, `mapping:MODEL/CODE`, `entity:MODEL/CODE`, `file:NAME`,
    /// a bare 32-digit hex id, or a bare code
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let split = |rest: &str| -> Option<(String, String)> {
            let (model, code) = rest.split_once('/')?;
            Some((model.to_string(), code.to_string()))
        };

        if let Some(rest) = text.strip_prefix("id:") {
            if let Ok(id) = rest.parse() {
                return VertexRef::Id(id);
            }
        }
        if let Some(rest) = text.strip_prefix("mapping:") {
            if let Some((model_code, code)) = split(rest) {
                return VertexRef::Mapping { model_code, code };
            }
        }
        if let Some(rest) = text.strip_prefix("entity:") {
            if let Some((model_code, code)) = split(rest) {
                return VertexRef::Entity { model_code, code };
            }
        }
        if let Some(rest) = text.strip_prefix("file:") {
            return VertexRef::File(rest.to_string());
        }
        if text.len() == 32 && text.chars().all(|c| c.is_ascii_hexdigit()) {
            if let Ok(id) = text.parse() {
                return VertexRef::Id(id);
            }
        }
        VertexRef::Code(text.to_string())
    }
}

impl From<VertexId> for VertexRef {
    fn from(id: VertexId) -> Self {
        VertexRef::Id(id)
    }
}

impl fmt::Display for VertexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexRef::Id(id) => write!(f, "id:{}", id),
            VertexRef::Mapping { model_code, code } => write!(f, "mapping:{}/{}", model_code, code),
            VertexRef::Entity { model_code, code } => write!(f, "entity:{}/{}", model_code, code),
            VertexRef::File(name) => write!(f, "file:{}", name),
            VertexRef::Code(code) => f.write_str(code),
        }
    }
}

/// The flow dependency graph
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    pub(crate) graph: DiGraph<Vertex, EdgeKind>,
    /// Node index lookup: id -> NodeIndex
    pub(crate) node_indices: HashMap<VertexId, NodeIndex>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            graph: DiGraph::with_capacity(nodes, edges),
            node_indices: HashMap::with_capacity(nodes),
        }
    }

    // ========== Construction ==========

    /// Insert a vertex, or return the index of the existing one with the same id.
    /// The boolean is true when the vertex was newly inserted.
    pub(crate) fn insert_vertex(&mut self, vertex: Vertex) -> (NodeIndex, bool) {
        let id = vertex.id();
        if let Some(&idx) = self.node_indices.get(&id) {
            return (idx, false);
        }
        let idx = self.graph.add_node(vertex);
        self.node_indices.insert(id, idx);
        (idx, true)
    }

    /// Add an edge unless one of the same kind already connects the pair
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) -> bool {
        let exists = self
            .graph
            .edges_directed(from, Direction::Outgoing)
            .any(|e| e.target() == to && *e.weight() == kind);
        if exists {
            return false;
        }
        self.graph.add_edge(from, to, kind);
        true
    }

    pub(crate) fn index_of(&self, id: VertexId) -> Option<NodeIndex> {
        self.node_indices.get(&id).copied()
    }

    pub(crate) fn vertex_at_mut(&mut self, idx: NodeIndex) -> Option<&mut Vertex> {
        self.graph.node_weight_mut(idx)
    }

    /// Clone the subgraph induced by `keep`; edges with a dropped endpoint are dropped
    pub(crate) fn induced(&self, keep: &HashSet<NodeIndex>) -> FlowGraph {
        let graph = self.graph.filter_map(
            |idx, vertex| keep.contains(&idx).then(|| vertex.clone()),
            |_, kind| Some(*kind),
        );
        let node_indices = graph
            .node_indices()
            .map(|idx| (graph[idx].id(), idx))
            .collect();
        FlowGraph {
            graph,
            node_indices,
        }
    }

    // ========== Public API ==========

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.node_indices.contains_key(&id)
    }

    /// Get a vertex by id
    pub fn get(&self, id: VertexId) -> Option<&Vertex> {
        let idx = self.node_indices.get(&id)?;
        self.graph.node_weight(*idx)
    }

    pub fn get_mapping(&self, id: VertexId) -> Option<&MappingVertex> {
        self.get(id)?.as_mapping()
    }

    pub fn get_entity(&self, id: VertexId) -> Option<&EntityVertex> {
        self.get(id)?.as_entity()
    }

    pub fn get_file(&self, id: VertexId) -> Option<&FileVertex> {
        self.get(id)?.as_file()
    }

    /// All vertices, ordered by id
    pub fn vertices(&self) -> Vec<&Vertex> {
        let mut vertices: Vec<&Vertex> = self.graph.node_weights().collect();
        vertices.sort_by_key(|v| v.id());
        vertices
    }

    /// File vertices in insertion order
    pub fn files(&self) -> Vec<&FileVertex> {
        let mut files: Vec<&FileVertex> = self.graph.node_weights().filter_map(Vertex::as_file).collect();
        files.sort_by_key(|f| f.order);
        files
    }

    /// Entity vertices, ordered by id
    pub fn entities(&self) -> Vec<&EntityVertex> {
        let mut entities: Vec<&EntityVertex> = self.graph.node_weights().filter_map(Vertex::as_entity).collect();
        entities.sort_by_key(|e| e.id);
        entities
    }

    /// Mapping vertices, ordered by id
    pub fn mappings(&self) -> Vec<&MappingVertex> {
        let mut mappings: Vec<&MappingVertex> = self.graph.node_weights().filter_map(Vertex::as_mapping).collect();
        mappings.sort_by_key(|m| m.id);
        mappings
    }

    pub fn mapping_count(&self) -> usize {
        self.graph.node_weights().filter(|v| v.kind() == VertexKind::Mapping).count()
    }

    /// All edges, sorted
    pub fn edges(&self) -> Vec<EdgeRecord> {
        let mut edges: Vec<EdgeRecord> = self
            .graph
            .edge_references()
            .map(|e| EdgeRecord {
                source: self.graph[e.source()].id(),
                target: self.graph[e.target()].id(),
                kind: *e.weight(),
            })
            .collect();
        edges.sort();
        edges
    }

    /// Neighbors of `id` over edges of `kind` in `direction`, ordered by id
    pub fn neighbors(&self, id: VertexId, kind: EdgeKind, direction: Direction) -> Vec<VertexId> {
        let Some(idx) = self.index_of(id) else {
            return Vec::new();
        };
        let mut ids: Vec<VertexId> = self
            .graph
            .edges_directed(idx, direction)
            .filter(|e| *e.weight() == kind)
            .map(|e| match direction {
                Direction::Outgoing => self.graph[e.target()].id(),
                Direction::Incoming => self.graph[e.source()].id(),
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Source entities read by a mapping
    pub fn sources_of(&self, mapping: VertexId) -> Vec<VertexId> {
        self.neighbors(mapping, EdgeKind::EntityIsSourceOf, Direction::Incoming)
    }

    /// Target entity written by a mapping
    pub fn target_of(&self, mapping: VertexId) -> Option<VertexId> {
        self.neighbors(mapping, EdgeKind::MappingTargetsEntity, Direction::Outgoing)
            .into_iter()
            .next()
    }

    /// Mappings that write an entity
    pub fn mappings_targeting(&self, entity: VertexId) -> Vec<VertexId> {
        self.neighbors(entity, EdgeKind::MappingTargetsEntity, Direction::Incoming)
    }

    /// Mappings that read an entity
    pub fn consumers_of(&self, entity: VertexId) -> Vec<VertexId> {
        self.neighbors(entity, EdgeKind::EntityIsSourceOf, Direction::Outgoing)
    }

    /// Files that define an entity or mapping
    pub fn defining_files(&self, id: VertexId) -> Vec<VertexId> {
        let mut files = self.neighbors(id, EdgeKind::FileDefinesEntity, Direction::Incoming);
        files.extend(self.neighbors(id, EdgeKind::FileDefinesMapping, Direction::Incoming));
        files.sort();
        files.dedup();
        files
    }

    /// Transitive closure from `id` (excluding itself), breadth-first with minimal depth
    pub fn closure(&self, id: VertexId, direction: Direction, max_depth: Option<usize>) -> Vec<ClosureNode> {
        let Some(start_idx) = self.index_of(id) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut visited = HashSet::from([start_idx]);
        let mut queue = VecDeque::from([(start_idx, 0usize)]);

        while let Some((node_idx, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for next in self.graph.neighbors_directed(node_idx, direction) {
                if visited.insert(next) {
                    result.push(ClosureNode {
                        id: self.graph[next].id(),
                        depth: depth + 1,
                    });
                    queue.push_back((next, depth + 1));
                }
            }
        }

        result.sort_by_key(|n| (n.depth, n.id));
        result
    }

    /// Ids reachable from `id` in `direction`, excluding `id`
    pub fn reachable(&self, id: VertexId, direction: Direction) -> HashSet<VertexId> {
        self.closure(id, direction, None).into_iter().map(|n| n.id).collect()
    }

    /// Resolve a caller reference to a vertex id present in this graph
    pub fn resolve(&self, reference: &VertexRef) -> Option<VertexId> {
        let candidate = match reference {
            VertexRef::Id(id) => *id,
            VertexRef::Mapping { model_code, code } => identity::mapping_id(model_code, code),
            VertexRef::Entity { model_code, code } => identity::entity_id(model_code, code),
            VertexRef::File(name) => identity::file_id(Path::new(name)),
            VertexRef::Code(code) => return self.resolve_code(code),
        };
        self.contains(candidate).then_some(candidate)
    }

    fn resolve_code(&self, code: &str) -> Option<VertexId> {
        if let Some((model, code)) = code.split_once('/') {
            let mapping = identity::mapping_id(model, code);
            if self.contains(mapping) {
                return Some(mapping);
            }
            let entity = identity::entity_id(model, code);
            return self.contains(entity).then_some(entity);
        }

        self.mappings()
            .into_iter()
            .find(|m| m.code == code)
            .map(|m| m.id)
            .or_else(|| self.entities().into_iter().find(|e| e.code == code).map(|e| e.id))
    }

    /// Fuzzy suggestions for an unresolved reference
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<String> {
        use fuzzy_matcher::skim::SkimMatcherV2;
        use fuzzy_matcher::FuzzyMatcher;

        let matcher = SkimMatcherV2::default();
        let mut results: Vec<(i64, String)> = self
            .graph
            .node_weights()
            .filter(|v| v.kind() != VertexKind::File)
            .filter_map(|v| {
                let label = v.label();
                matcher.fuzzy_match(&label, query).map(|score| (score, label))
            })
            .collect();

        // Sort by score descending, then label for stable output
        results.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        results.into_iter().take(limit).map(|(_, label)| label).collect()
    }

    /// Serializable snapshot of vertices and edges
    pub fn to_view(&self) -> GraphView {
        GraphView {
            vertices: self.vertices().into_iter().cloned().collect(),
            edges: self.edges(),
        }
    }
}
