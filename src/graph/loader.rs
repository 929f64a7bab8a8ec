//! Graph Building
//!
//! Reads metadata documents (from memory or a directory), validates them
//! against the document schema and assembles the master flow graph.

use petgraph::graph::NodeIndex;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{
    Diagnostics, EdgeKind, EntityType, EntityVertex, FileVertex, FlowGraph, MappingVertex, Vertex,
};
use crate::document::{EntityRefDef, MappingDef, MetadataDocument, RawDocument};
use crate::error::Result;
use crate::identity;

/// Default stereotype marking filter business rules in a source composition
pub const DEFAULT_FILTER_STEREOTYPE: &str = "mdde_FilterBusinessRule";

/// Configuration for document discovery
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Skip documents matching these path prefixes
    pub skip_prefixes: Vec<String>,
    /// Only load documents matching these path prefixes
    pub include_prefixes: Vec<String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            skip_prefixes: vec![
                "target/".to_string(),
                ".git/".to_string(),
                "templates/".to_string(),
            ],
            include_prefixes: Vec::new(),
        }
    }
}

impl LoadConfig {
    fn accepts(&self, relative: &str) -> bool {
        if !self.include_prefixes.is_empty()
            && !self.include_prefixes.iter().any(|p| relative.starts_with(p))
        {
            return false;
        }
        !self.skip_prefixes.iter().any(|p| relative.starts_with(p))
    }
}

/// Read all `*.json` documents below `dir`, in file-name order
pub fn read_directory(dir: &Path, config: &LoadConfig) -> Result<Vec<RawDocument>> {
    let mut documents = Vec::new();

    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().map(|e| e != "json").unwrap_or(true) {
            continue;
        }

        let relative = path.strip_prefix(dir).unwrap_or(path).to_string_lossy().replace('\\', "/");
        if !config.accepts(&relative) {
            debug!(path = %relative, "skipping filtered document");
            continue;
        }

        documents.push(RawDocument::read(path)?);
    }

    Ok(documents)
}

/// Read a directory of documents and build the graph from them
pub fn load_from_directory(dir: &Path, config: &LoadConfig, builder: &GraphBuilder) -> Result<BuildOutput> {
    let documents = read_directory(dir, config)?;
    info!(count = documents.len(), dir = %dir.display(), "loaded metadata documents");
    builder.build(&documents)
}

/// Result of a build: the master graph plus per-item diagnostics
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub graph: FlowGraph,
    pub diagnostics: Diagnostics,
}

/// Assembles the master graph from metadata documents; holds no state across builds
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    filter_stereotype: String,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_STEREOTYPE)
    }
}

impl GraphBuilder {
    pub fn new(filter_stereotype: impl Into<String>) -> Self {
        Self {
            filter_stereotype: filter_stereotype.into(),
        }
    }

    /// Build the graph. Fails only if a document does not match the schema;
    /// malformed items inside valid documents are skipped and diagnosed.
    pub fn build(&self, documents: &[RawDocument]) -> Result<BuildOutput> {
        let parsed = documents
            .iter()
            .map(|raw| raw.parse().map(|doc| (raw, doc)))
            .collect::<Result<Vec<_>>>()?;

        let mut graph = FlowGraph::with_capacity(documents.len() * 32, documents.len() * 64);
        let mut diagnostics = Diagnostics::new();
        let mut next_order = 0usize;

        for (raw, doc) in parsed {
            self.ingest(&mut graph, &mut diagnostics, &mut next_order, &raw.path, doc)?;
        }

        info!(
            vertices = graph.vertex_count(),
            edges = graph.edge_count(),
            mappings = graph.mapping_count(),
            "flow graph built"
        );

        Ok(BuildOutput { graph, diagnostics })
    }

    fn ingest(
        &self,
        graph: &mut FlowGraph,
        diagnostics: &mut Diagnostics,
        next_order: &mut usize,
        path: &Path,
        doc: MetadataDocument,
    ) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let (model, model_count) = doc.document_model();
        let Some(model) = model else {
            diagnostics.missing_document_model(&file_name);
            return Ok(());
        };
        if model_count > 1 {
            diagnostics.multiple_document_models(&file_name, &model.code, model_count);
        }

        // 1. File vertex
        let file_vertex = FileVertex {
            id: identity::file_id(path),
            path: path.to_path_buf(),
            name: file_name.clone(),
            order: *next_order,
            created: doc.info.created,
            modified: doc.info.modified,
            extra: doc.info.extra.clone(),
        };
        let file_idx = match graph.index_of(file_vertex.id) {
            Some(idx) => {
                diagnostics.duplicate_file(&file_name);
                if let Some(existing) = graph.vertex_at_mut(idx).and_then(Vertex::as_file_mut) {
                    existing.absorb(file_vertex);
                }
                idx
            }
            None => {
                *next_order += 1;
                graph.insert_vertex(Vertex::File(file_vertex)).0
            }
        };

        // 2. Entities of the document model
        for entity in &model.entities {
            let vertex = EntityVertex {
                id: identity::entity_id(&model.code, &entity.code),
                code: entity.code.clone(),
                name: entity.name.clone(),
                model_code: model.code.clone(),
                model_name: model.name.clone(),
                stereotype: entity.stereotype.clone(),
                is_created: true,
                etl_level: None,
                type_entity: EntityType::Regular,
                extra: entity.extra.clone(),
            };
            let entity_idx = merge_entity(graph, vertex);
            graph.add_edge(file_idx, entity_idx, EdgeKind::FileDefinesEntity);
        }

        // 3. Mappings
        let Some(mappings) = doc.mappings else {
            diagnostics.missing_mapping_list(&file_name);
            return Ok(());
        };
        for mapping in mappings {
            self.ingest_mapping(graph, diagnostics, file_idx, &file_name, mapping)?;
        }

        Ok(())
    }

    fn ingest_mapping(
        &self,
        graph: &mut FlowGraph,
        diagnostics: &mut Diagnostics,
        file_idx: NodeIndex,
        file_name: &str,
        mapping: MappingDef,
    ) -> Result<()> {
        let Some(target) = mapping.entity_target.clone() else {
            diagnostics.missing_target(file_name, &mapping.code);
            return Ok(());
        };
        let Some((target_model, target_code)) = target.identity() else {
            diagnostics.missing_target(file_name, &mapping.code);
            return Ok(());
        };
        let (target_model, target_code) = (target_model.to_string(), target_code.to_string());

        let vertex = MappingVertex {
            id: identity::mapping_id(&target_model, &mapping.code),
            code: mapping.code.clone(),
            name: mapping.display_name().to_string(),
            model_code: target_model.clone(),
            model_name: target.name_model.clone(),
            datasource_code: mapping.datasource_code(),
            target_code: target_code.clone(),
            source_composition: serde_json::to_value(&mapping.source_composition)?,
            attribute_mapping: mapping.attribute_mapping.clone(),
            run_level: None,
            run_level_stage: None,
            multi_mapping: false,
            extra: mapping.extra.clone(),
        };

        // A redefinition only fills gaps; sources and target stay with the first
        if let Some(existing) = graph.index_of(vertex.id) {
            diagnostics.duplicate_mapping(file_name, &format!("{}/{}", target_model, mapping.code));
            if let Some(first) = graph.vertex_at_mut(existing).and_then(Vertex::as_mapping_mut) {
                first.absorb(vertex);
            }
            graph.add_edge(file_idx, existing, EdgeKind::FileDefinesMapping);
            return Ok(());
        }

        let (mapping_idx, _) = graph.insert_vertex(Vertex::Mapping(vertex));
        graph.add_edge(file_idx, mapping_idx, EdgeKind::FileDefinesMapping);

        for item in &mapping.source_composition {
            let Some(source) = item.entity.as_ref() else {
                diagnostics.unresolved_source(file_name, &mapping.code, "<missing Entity>");
                continue;
            };
            if source.stereotype.as_deref() == Some(self.filter_stereotype.as_str()) {
                debug!(mapping = %mapping.code, source = %source.label(), "skipping filter business rule source");
                continue;
            }
            let Some((model, code)) = source.identity() else {
                diagnostics.unresolved_source(file_name, &mapping.code, &source.label());
                continue;
            };
            let source_idx = merge_entity(graph, referenced_entity(source, model, code));
            graph.add_edge(source_idx, mapping_idx, EdgeKind::EntityIsSourceOf);
        }

        let target_idx = merge_entity(graph, referenced_entity(&target, &target_model, &target_code));
        graph.add_edge(mapping_idx, target_idx, EdgeKind::MappingTargetsEntity);

        Ok(())
    }
}

/// Entity vertex for an entity a mapping refers to (not defined here)
fn referenced_entity(reference: &EntityRefDef, model_code: &str, code: &str) -> EntityVertex {
    EntityVertex {
        id: identity::entity_id(model_code, code),
        code: code.to_string(),
        name: reference.name.clone(),
        model_code: model_code.to_string(),
        model_name: reference.name_model.clone(),
        stereotype: reference.stereotype.clone(),
        is_created: false,
        etl_level: None,
        type_entity: EntityType::Regular,
        extra: reference.extra.clone(),
    }
}

fn merge_entity(graph: &mut FlowGraph, entity: EntityVertex) -> NodeIndex {
    if let Some(idx) = graph.index_of(entity.id) {
        if let Some(existing) = graph.vertex_at_mut(idx).and_then(Vertex::as_entity_mut) {
            existing.absorb(entity);
        }
        return idx;
    }
    graph.insert_vertex(Vertex::Entity(entity)).0
}
