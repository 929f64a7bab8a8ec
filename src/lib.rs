//! ETL Flow Planner
//!
//! Builds a typed dependency graph of files, entities and ETL mappings from
//! normalized metadata documents, and derives an execution plan from it.
//!
//! ## Features
//!
//! - **Stable Identity**: Vertex ids are content hashes of their semantic keys
//! - **Run Levels**: Mappings are leveled by their longest upstream chain
//! - **Stages**: Same-level mappings sharing an entity never share a stage
//! - **Failure Impact**: Blast radius of failed mappings or entities
//! - **Views**: File, entity journey, mapping-only and cross-file projections
//!
//! ## Pipeline
//!
//! ```text
//! documents ──▶ GraphBuilder ──▶ FlowGraph ──▶ derive ──▶ assign_stages
//!                                    │
//!                                    ├──▶ ViewProvider
//!                                    └──▶ FailureAnalyzer ──▶ FalloutReport
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod graph;
pub mod identity;
pub mod planner;
pub mod report;

pub use config::FlowConfig;
pub use document::{MetadataDocument, RawDocument};
pub use error::{FlowError, Result};
pub use graph::{
    ConflictPolicy, Diagnostics, EdgeKind, FailureAnalyzer, FlowGraph, GraphBuilder, GraphView, Vertex,
    VertexKind, VertexRef, ViewProvider,
};
pub use identity::VertexId;
pub use planner::FlowPlanner;
pub use report::{FalloutReport, MappingOrderRecord};
