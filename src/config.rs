//! Configuration management for flow planning
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (flow.toml)
//! - Environment variables (FLOW__*)
//!
//! ## Example config file (flow.toml):
//! ```toml
//! [input]
//! dir = "./metadata"
//! skip_prefixes = ["templates/"]
//! strict = false
//!
//! [scheduling]
//! conflict_policy = "target"
//!
//! [stereotypes]
//! filter_business_rule = "mdde_FilterBusinessRule"
//! aggregate = "mdde_AggregateBusinessRule"
//!
//! [output]
//! format = "pretty"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::graph::derive::DEFAULT_AGGREGATE_STEREOTYPE;
use crate::graph::loader::DEFAULT_FILTER_STEREOTYPE;
use crate::graph::{ConflictPolicy, LoadConfig};

/// Main configuration for the flow planner
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Document discovery
    #[serde(default)]
    pub input: InputConfig,

    /// Stage scheduling
    #[serde(default)]
    pub scheduling: SchedulingConfig,

    /// Stereotype markers
    #[serde(default)]
    pub stereotypes: StereotypeConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Input configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory holding the metadata documents
    #[serde(default = "default_input_dir")]
    pub dir: PathBuf,

    /// Only load documents under these relative prefixes
    #[serde(default)]
    pub include_prefixes: Vec<String>,

    /// Skip documents under these relative prefixes
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,

    /// Fail the build on the first error diagnostic
    #[serde(default)]
    pub strict: bool,
}

/// Scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Deadlock prevention: "source" or "target"
    #[serde(default = "default_conflict_policy")]
    pub conflict_policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StereotypeConfig {
    /// Sources with this stereotype are left out of the graph
    #[serde(default = "default_filter_stereotype")]
    pub filter_business_rule: String,

    /// Entities with this stereotype are typed as aggregates
    #[serde(default = "default_aggregate_stereotype")]
    pub aggregate: String,
}

/// Output configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Output format for JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Pretty,
    Compact,
}

// Default value functions
fn default_input_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_skip_prefixes() -> Vec<String> {
    LoadConfig::default().skip_prefixes
}

fn default_conflict_policy() -> String {
    ConflictPolicy::default().to_string()
}

fn default_filter_stereotype() -> String {
    DEFAULT_FILTER_STEREOTYPE.to_string()
}

fn default_aggregate_stereotype() -> String {
    DEFAULT_AGGREGATE_STEREOTYPE.to_string()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: default_input_dir(),
            include_prefixes: Vec::new(),
            skip_prefixes: default_skip_prefixes(),
            strict: false,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            conflict_policy: default_conflict_policy(),
        }
    }
}

impl Default for StereotypeConfig {
    fn default() -> Self {
        Self {
            filter_business_rule: default_filter_stereotype(),
            aggregate: default_aggregate_stereotype(),
        }
    }
}

impl FlowConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["flow.toml", ".flow.toml", "config/flow.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "etl-flow", "etl-flow") {
            let xdg_config = config_dir.config_dir().join("flow.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (FLOW__SCHEDULING__CONFLICT_POLICY=source)
        builder = builder.add_source(
            Environment::with_prefix("FLOW")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Parsed conflict policy; errors on an unknown value
    pub fn conflict_policy(&self) -> Result<ConflictPolicy> {
        self.scheduling.conflict_policy.parse()
    }

    /// Document discovery settings for the loader
    pub fn load_config(&self) -> LoadConfig {
        LoadConfig {
            skip_prefixes: self.input.skip_prefixes.clone(),
            include_prefixes: self.input.include_prefixes.clone(),
        }
    }

    /// Get the input directory (resolves relative paths)
    pub fn input_dir(&self) -> PathBuf {
        if self.input.dir.is_absolute() {
            self.input.dir.clone()
        } else {
            std::env::current_dir().unwrap_or_default().join(&self.input.dir)
        }
    }
}
