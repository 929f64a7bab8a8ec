//! Output records handed to downstream collaborators: the ordered mapping list
//! and the fallout report.

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::graph::{FlowGraph, Vertex};

/// Prefix of the per-mapping source view
pub const SOURCE_VIEW_PREFIX: &str = "vw_src_";

/// Source view name for a mapping: prefix plus name with spaces as underscores
pub fn source_view_name(mapping_name: &str) -> String {
    format!("{}{}", SOURCE_VIEW_PREFIX, mapping_name.replace(' ', "_"))
}

/// One row of the execution plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappingOrderRecord {
    pub run_level: u32,
    pub run_level_stage: u32,
    pub code_model: String,
    pub name_model: Option<String>,
    pub name: String,
    pub source_view_name: String,
    pub entity_target_code: String,
}

/// Mappings ordered by run level, stage, then name.
///
/// Errors with [`FlowError::NoFlow`] when the graph has no mappings; callers
/// treat that as an empty schedule.
pub fn mapping_order(graph: &FlowGraph) -> Result<Vec<MappingOrderRecord>> {
    let mappings = graph.mappings();
    if mappings.is_empty() {
        return Err(FlowError::NoFlow);
    }

    let mut records: Vec<MappingOrderRecord> = mappings
        .into_iter()
        .map(|m| MappingOrderRecord {
            run_level: m.run_level.unwrap_or(0),
            run_level_stage: m.run_level_stage.unwrap_or(0),
            code_model: m.model_code.clone(),
            name_model: m.model_name.clone(),
            name: m.name.clone(),
            source_view_name: source_view_name(&m.name),
            entity_target_code: m.target_code.clone(),
        })
        .collect();

    records.sort_by(|a, b| {
        (a.run_level, a.run_level_stage, &a.name, &a.code_model).cmp(&(
            b.run_level,
            b.run_level_stage,
            &b.name,
            &b.code_model,
        ))
    });
    Ok(records)
}

/// Affected vertices of one failure, split by kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffectedSet {
    pub mappings: Vec<Vertex>,
    pub entities: Vec<Vertex>,
}

impl AffectedSet {
    pub fn len(&self) -> usize {
        self.mappings.len() + self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty() && self.entities.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FalloutEntry {
    pub failed: Vertex,
    pub affected: AffectedSet,
}

/// Serializes as a plain list of entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FalloutReport {
    pub entries: Vec<FalloutEntry>,
}

impl FalloutReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels of every affected mapping across all entries, sorted and deduplicated
    pub fn affected_mapping_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .entries
            .iter()
            .flat_map(|e| e.affected.mappings.iter().map(Vertex::label))
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }
}
