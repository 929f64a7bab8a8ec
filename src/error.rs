//! Error types for graph construction, scheduling and impact analysis

use std::path::PathBuf;

use thiserror::Error;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Flow graph errors
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Graph not built: call build() before querying the flow")]
    GraphNotBuilt,

    #[error("No flow: the graph contains no mappings")]
    NoFlow,

    #[error("Invalid deadlock prevention policy '{0}' (expected 'source' or 'target')")]
    InvalidDeadlockPrevention(String),

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Malformed document {path}: {reason}")]
    MalformedDocument { path: PathBuf, reason: String },

    #[error("Invalid input in {path}: {source}")]
    InvalidInput {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cyclic flow between mappings: {}", mappings.join(", "))]
    CyclicFlow { mappings: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// True for errors that mean "nothing to schedule" rather than a failure
    pub fn is_no_flow(&self) -> bool {
        matches!(self, FlowError::NoFlow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_flow_message_lists_mappings() {
        let err = FlowError::CyclicFlow {
            mappings: vec!["DWH/M_A".to_string(), "DWH/M_B".to_string()],
        };
        assert_eq!(err.to_string(), "Cyclic flow between mappings: DWH/M_A, DWH/M_B");
    }

    #[test]
    fn test_is_no_flow() {
        assert!(FlowError::NoFlow.is_no_flow());
        assert!(!FlowError::GraphNotBuilt.is_no_flow());
    }
}
