//! Diagnostics
//!
//! Collects per-item problems found while ingesting metadata documents.
//! Malformed items are skipped and recorded here so one bad mapping does not
//! abort the whole build.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FlowError;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// Document has no model flagged `IsDocumentModel`
    MissingDocumentModel,
    /// Mapping has no usable `EntityTarget`
    MissingTargetEntity,
    /// Source composition entry lacks model or entity code
    UnresolvedSourceEntity,
    /// Document carries no `Mappings` list
    MissingMappingList,
    /// More than one model flagged `IsDocumentModel`
    MultipleDocumentModels,
    /// Same mapping defined again (first definition wins)
    DuplicateMapping,
    /// Same file loaded twice
    DuplicateFile,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingDocumentModel => "E001",
            Self::MissingTargetEntity => "E002",
            Self::UnresolvedSourceEntity => "W001",
            Self::MissingMappingList => "W002",
            Self::MultipleDocumentModels => "W003",
            Self::DuplicateMapping => "W004",
            Self::DuplicateFile => "W005",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingDocumentModel | Self::MissingTargetEntity => Severity::Error,

            Self::UnresolvedSourceEntity
            | Self::MissingMappingList
            | Self::MultipleDocumentModels
            | Self::DuplicateMapping
            | Self::DuplicateFile => Severity::Warning,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Document the item came from
    pub file: String,
    pub code: DiagnosticCode,
    pub message: String,
    /// Additional context (mapping code, entity reference)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(file: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// The item as a `MalformedDocument` error, for strict builds
    pub fn to_error(&self) -> FlowError {
        FlowError::MalformedDocument {
            path: self.file.clone().into(),
            reason: format!("[{}] {}", self.code, self.message),
        }
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.code,
            self.code.severity(),
            self.message,
            self.file
        )?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from a build
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic item and log it at its severity
    pub fn push(&mut self, item: DiagnosticItem) {
        match item.severity() {
            Severity::Error => tracing::error!(code = %item.code, file = %item.file, "{}", item.message),
            Severity::Warning => tracing::warn!(code = %item.code, file = %item.file, "{}", item.message),
        }
        self.items.push(item);
    }

    /// Document skipped: no document model
    pub fn missing_document_model(&mut self, file: &str) {
        self.push(DiagnosticItem::new(
            file,
            DiagnosticCode::MissingDocumentModel,
            "no model flagged IsDocumentModel; document skipped",
        ));
    }

    /// Mapping skipped: no usable target entity
    pub fn missing_target(&mut self, file: &str, mapping_code: &str) {
        self.push(
            DiagnosticItem::new(
                file,
                DiagnosticCode::MissingTargetEntity,
                format!("mapping '{}' has no target entity; mapping skipped", mapping_code),
            )
            .with_context(format!("mapping: {}", mapping_code)),
        );
    }

    /// Source entry skipped: cannot identify the entity
    pub fn unresolved_source(&mut self, file: &str, mapping_code: &str, entity_label: &str) {
        self.push(
            DiagnosticItem::new(
                file,
                DiagnosticCode::UnresolvedSourceEntity,
                format!("source '{}' of mapping '{}' cannot be identified", entity_label, mapping_code),
            )
            .with_context(format!("mapping: {}", mapping_code)),
        );
    }

    pub fn missing_mapping_list(&mut self, file: &str) {
        self.push(DiagnosticItem::new(
            file,
            DiagnosticCode::MissingMappingList,
            "document has no Mappings list; only its entities are loaded",
        ));
    }

    pub fn multiple_document_models(&mut self, file: &str, used: &str, count: usize) {
        self.push(DiagnosticItem::new(
            file,
            DiagnosticCode::MultipleDocumentModels,
            format!("{} models flagged IsDocumentModel; using '{}'", count, used),
        ));
    }

    pub fn duplicate_mapping(&mut self, file: &str, label: &str) {
        self.push(DiagnosticItem::new(
            file,
            DiagnosticCode::DuplicateMapping,
            format!("mapping '{}' already defined; keeping the first definition", label),
        ));
    }

    pub fn duplicate_file(&mut self, file: &str) {
        self.push(DiagnosticItem::new(
            file,
            DiagnosticCode::DuplicateFile,
            "a file with the same name was already loaded",
        ));
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity() == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Error)
    }

    /// First error as a `MalformedDocument`, if any
    pub fn first_error(&self) -> Option<FlowError> {
        self.errors().next().map(DiagnosticItem::to_error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    /// Items carrying a specific code
    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if self.has_errors() {
            output.push_str(&format!(
                "\n{} error(s), {} warning(s)\n",
                self.error_count(),
                self.warning_count()
            ));
        } else if !self.is_empty() {
            output.push_str(&format!("\n{} warning(s)\n", self.warning_count()));
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
