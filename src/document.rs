//! Normalized metadata document types
//!
//! One document per source file, produced by the upstream extraction step.
//! Only the fields the graph needs are typed; everything else rides along in
//! the `extra` maps and is passed through untouched.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FlowError, Result};

/// A metadata document as read from disk, not yet validated against the schema
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Path of the source file (its basename is the File identity)
    pub path: PathBuf,
    /// Parsed JSON content
    pub value: Value,
}

impl RawDocument {
    pub fn new(path: impl Into<PathBuf>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    /// Read and parse a JSON document from disk
    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let value = serde_json::from_str(&content).map_err(|source| FlowError::InvalidInput {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(path, value))
    }

    /// Deserialize into the typed document schema
    pub fn parse(&self) -> Result<MetadataDocument> {
        MetadataDocument::deserialize(&self.value).map_err(|source| FlowError::InvalidInput {
            path: self.path.clone(),
            source,
        })
    }
}

/// Top-level metadata document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataDocument {
    /// File/document metadata
    #[serde(default)]
    pub info: DocumentInfo,
    /// Models; exactly one should be flagged as the document model
    #[serde(default)]
    pub models: Vec<ModelDef>,
    /// Mappings defined in this document (absent for entity-only documents)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Vec<MappingDef>>,
}

impl MetadataDocument {
    /// The model flagged `IsDocumentModel`, plus how many models carried the flag
    pub fn document_model(&self) -> (Option<&ModelDef>, usize) {
        let mut flagged = self.models.iter().filter(|m| m.is_document_model);
        let first = flagged.next();
        let count = first.map(|_| 1 + flagged.count()).unwrap_or(0);
        (first, count)
    }
}

/// Document-level metadata, passed through verbatim onto the File vertex
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentInfo {
    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    /// Author, version and anything else the extractor emitted
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A model (e.g. a database) with the entities it defines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModelDef {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_document_model: bool,
    #[serde(default)]
    pub entities: Vec<EntityDef>,
}

/// An entity defined by a model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityDef {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub stereotype: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An entity referenced by a mapping (as source or target)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityRefDef {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub code_model: Option<String>,
    #[serde(default)]
    pub name_model: Option<String>,
    #[serde(default)]
    pub stereotype: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityRefDef {
    /// `(model_code, entity_code)` when both identifying fields are present
    pub fn identity(&self) -> Option<(&str, &str)> {
        match (self.code_model.as_deref(), self.code.as_deref()) {
            (Some(model), Some(code)) if !model.is_empty() && !code.is_empty() => {
                Some((model, code))
            }
            _ => None,
        }
    }

    /// `MODEL/CODE` for log messages
    pub fn label(&self) -> String {
        format!(
            "{}/{}",
            self.code_model.as_deref().unwrap_or("?"),
            self.code.as_deref().unwrap_or("?")
        )
    }
}

/// One entry of a mapping's source composition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceCompositionItem {
    #[serde(default)]
    pub entity: Option<EntityRefDef>,
    /// Join type, alias, conditions: opaque here
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A mapping definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MappingDef {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Datasource the mapping reads from: either a code string or an object with `Code`
    #[serde(default)]
    pub data_source: Option<Value>,
    #[serde(default)]
    pub entity_target: Option<EntityRefDef>,
    #[serde(default)]
    pub source_composition: Vec<SourceCompositionItem>,
    #[serde(default)]
    pub attribute_mapping: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MappingDef {
    /// Mapping name, falling back to its code
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.code)
    }

    /// Datasource code, if one was given
    pub fn datasource_code(&self) -> Option<String> {
        match self.data_source.as_ref()? {
            Value::String(code) => Some(code.clone()),
            Value::Object(obj) => obj.get("Code").and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        }
    }
}

/// Accept RFC 3339 or `YYYY-MM-DD HH:MM:SS`; anything else becomes `None`
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    let Some(Value::String(text)) = raw else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(&text) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    Ok(NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc()))
}
