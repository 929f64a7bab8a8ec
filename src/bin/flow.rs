//! ETL Flow CLI
//!
//! Builds the flow graph from a directory of metadata documents and prints the
//! execution order, failure fallout, graph views or build diagnostics as JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use etl_flow::config::OutputFormat;
use etl_flow::{FlowConfig, FlowError, FlowGraph, FlowPlanner, VertexRef};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "etl-flow")]
#[command(about = "Plan ETL mapping execution and analyze failure impact")]
struct Cli {
    /// Config file (defaults to flow.toml lookup)
    #[arg(short, long)]
    config: Option<String>,

    /// Directory of metadata documents (overrides config)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Conflict policy: source or target (overrides config)
    #[arg(short, long)]
    policy: Option<String>,

    /// Fail on the first error diagnostic
    #[arg(long)]
    strict: bool,

    /// Single-line JSON output
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print mappings ordered by run level and stage
    Order,

    /// Mark mappings or entities failed and print the fallout report
    Fallout {
        /// References: CODE, MODEL/CODE, mapping:MODEL/CODE, entity:MODEL/CODE or an id
        #[arg(required = true)]
        failed: Vec<String>,
    },

    /// Print a graph view
    View {
        #[command(subcommand)]
        view: ViewCommand,
    },

    /// Print run-level and stage counts
    Summary,

    /// Print build diagnostics
    Diagnostics,

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to this path
        #[arg(long)]
        save: Option<String>,
    },
}

#[derive(Subcommand)]
enum ViewCommand {
    /// A file and everything downstream of it
    File { reference: String },
    /// An entity with its upstream and downstream closure
    Entity { reference: String },
    /// Mapping-to-mapping dependencies
    Mappings,
    /// File-to-file dependencies
    CrossFile {
        /// Route edges through the shared entity
        #[arg(long)]
        route: bool,
    },
    /// The whole master graph
    All,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    let text = match format {
        OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
        OutputFormat::Compact => serde_json::to_string(value)?,
    };
    println!("{}", text);
    Ok(())
}

fn print_view(graph: &FlowGraph, format: OutputFormat) -> anyhow::Result<()> {
    print_json(&graph.to_view(), format)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = FlowConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.dir {
        config.input.dir = dir;
    }
    if let Some(policy) = cli.policy {
        config.scheduling.conflict_policy = policy;
    }
    if cli.strict {
        config.input.strict = true;
    }
    if cli.compact {
        config.output.format = OutputFormat::Compact;
    }
    let format = config.output.format;

    if let Commands::Config { save } = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        if let Some(path) = save {
            config.save(path).with_context(|| format!("writing {}", path))?;
            eprintln!("✅ Saved configuration to {}", path);
        }
        return Ok(());
    }

    let dir = config.input_dir();
    let mut planner = FlowPlanner::new(config)?;
    planner
        .build_from_directory(&dir)
        .with_context(|| format!("building flow graph from {}", dir.display()))?;

    match cli.command {
        Commands::Order => match planner.mapping_order() {
            Ok(records) => print_json(&records, format),
            Err(FlowError::NoFlow) => {
                eprintln!("No mappings found; nothing to schedule");
                print_json(&Vec::<etl_flow::MappingOrderRecord>::new(), format)
            }
            Err(e) => Err(e.into()),
        },

        Commands::Fallout { failed } => {
            let refs: Vec<VertexRef> = failed.iter().map(|r| VertexRef::parse(r)).collect();
            let resolved = planner.mark_failed(&refs)?;
            if resolved < refs.len() {
                eprintln!("⚠️  {} of {} reference(s) not found", refs.len() - resolved, refs.len());
            }
            print_json(&planner.fallout_report()?, format)
        }

        Commands::View { view } => {
            let views = planner.views()?;
            match view {
                ViewCommand::File { reference } => print_view(&views.file_view(&VertexRef::parse(&reference))?, format),
                ViewCommand::Entity { reference } => {
                    print_view(&views.entity_journey(&VertexRef::parse(&reference))?, format)
                }
                ViewCommand::Mappings => print_view(&views.mappings_graph(), format),
                ViewCommand::CrossFile { route } => print_view(&views.cross_file_graph(route), format),
                ViewCommand::All => print_view(planner.graph()?, format),
            }
        }

        Commands::Summary => {
            let summary = planner.summary()?;
            let stages = match planner.stage_plan() {
                Ok(plan) => Some(plan.stages_per_level().clone()),
                Err(FlowError::NoFlow) => None,
                Err(e) => return Err(e.into()),
            };
            print_json(
                &serde_json::json!({
                    "policy": planner.policy(),
                    "derivation": summary,
                    "stages_per_level": stages,
                }),
                format,
            )
        }

        Commands::Diagnostics => {
            let diagnostics = planner.diagnostics();
            if diagnostics.is_empty() {
                println!("✅ No diagnostics");
            } else {
                print!("{}", diagnostics.format_all());
            }
            if diagnostics.has_errors() {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Config { .. } => Ok(()),
    }
}
