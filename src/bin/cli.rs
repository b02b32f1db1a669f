//! Worldgraph CLI
//!
//! Inspect and drive a persisted world graph from the shell. Output is JSON
//! on stdout; logs go to stderr (`RUST_LOG=worldgraph=debug`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use worldgraph::config::expand_path;
use worldgraph::types::{attributes, AttrValue, AttributeMap};
use worldgraph::{
    ActionRecord, EntitySource, EntityType, GraphConfig, GraphView, Plan, RecallOptions,
    SemanticRecall, WorldGraph,
};

#[derive(Parser)]
#[command(name = "worldgraph")]
#[command(about = "World graph memory CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "WORLDGRAPH_CONFIG")]
    config: Option<String>,

    /// Snapshot path (overrides the config file)
    #[arg(long, env = "WORLDGRAPH_PATH")]
    path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show statistics
    Stats,
    /// List entities
    Entities {
        /// Filter by type
        #[arg(short, long)]
        r#type: Option<String>,
    },
    /// List recent actions
    Actions {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Resolve a vague reference ("play that again")
    Resolve { text: String },
    /// Print planner or responder context
    Context {
        /// Planner context for this query; responder context when omitted
        #[arg(short, long)]
        query: Option<String>,
    },
    /// Record a tool call
    Record {
        tool: String,
        /// Arguments as key=value (values may be JSON)
        #[arg(short, long = "arg")]
        args: Vec<String>,
        #[arg(short, long)]
        result: Option<String>,
        #[arg(long)]
        failed: bool,
    },
    /// Create or touch an entity
    Remember {
        r#type: String,
        name: String,
        #[arg(short, long = "attr")]
        attrs: Vec<String>,
        #[arg(short, long, default_value = "user_stated")]
        source: String,
    },
    /// Update an entity's attributes
    Update {
        id: String,
        #[arg(short, long = "attr")]
        attrs: Vec<String>,
        #[arg(short, long, default_value = "user_stated")]
        source: String,
    },
    /// Complete a turn and run maintenance
    Advance {
        #[arg(short, long, default_value = "1")]
        turns: u32,
    },
    /// Check a plan file (`{"plan": [...]}`)
    Validate { plan: PathBuf },
    /// Rank remembered entities against a query
    Recall {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Delete the snapshot and start over
    Reset,
}

fn parse_pairs(pairs: &[String]) -> anyhow::Result<AttributeMap> {
    let mut parsed = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Expected key=value, got '{}'", pair);
        };
        let value = serde_json::from_str::<AttrValue>(raw)
            .unwrap_or_else(|_| AttrValue::from(raw));
        parsed.push((key.trim().to_string(), value));
    }
    Ok(attributes(parsed))
}

fn load_config(cli: &Cli) -> anyhow::Result<GraphConfig> {
    let mut config = match &cli.config {
        Some(path) => GraphConfig::from_toml_file(expand_path(path))?,
        None => GraphConfig::default(),
    };
    config.snapshot_path = Some(match &cli.path {
        Some(path) => expand_path(path),
        None => config
            .snapshot_path
            .take()
            .unwrap_or_else(worldgraph::config::default_snapshot_path),
    });
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let recall_config = config.recall.clone();
    let mut graph = WorldGraph::open(config);

    let mutated = match cli.command {
        Commands::Stats => {
            print_json(&graph.stats())?;
            false
        }

        Commands::Entities { r#type } => {
            let filter: Option<EntityType> = r#type
                .map(|t| t.parse::<EntityType>())
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let entities: Vec<_> = graph
                .entities()
                .filter(|e| filter.map(|t| e.entity_type == t).unwrap_or(true))
                .cloned()
                .collect();
            print_json(&entities)?;
            false
        }

        Commands::Actions { limit } => {
            print_json(&graph.recent_actions(limit))?;
            false
        }

        Commands::Resolve { text } => {
            print_json(&graph.resolve_reference(&text))?;
            false
        }

        Commands::Context { query } => {
            let context = match query {
                Some(query) => graph.get_context_for_planner(&query),
                None => graph.get_context_for_responder(),
            };
            println!("{}", context);
            false
        }

        Commands::Record {
            tool,
            args,
            result,
            failed,
        } => {
            let mut record = ActionRecord::tool(tool, parse_pairs(&args)?).with_success(!failed);
            if let Some(result) = result {
                record = record.with_result(result);
            }
            print_json(&graph.record_with(record))?;
            true
        }

        Commands::Remember {
            r#type,
            name,
            attrs,
            source,
        } => {
            let entity_type: EntityType = r#type.parse().map_err(anyhow::Error::msg)?;
            let source: EntitySource = source.parse().map_err(anyhow::Error::msg)?;
            let entity =
                graph.get_or_create_entity(entity_type, &name, source, parse_pairs(&attrs)?);
            print_json(&entity)?;
            true
        }

        Commands::Update { id, attrs, source } => {
            let source: EntitySource = source.parse().map_err(anyhow::Error::msg)?;
            let entity = graph
                .try_update_entity(&id, parse_pairs(&attrs)?, source)
                .with_context(|| format!("Cannot update {}", id))?;
            print_json(&entity)?;
            true
        }

        Commands::Advance { turns } => {
            let mut reports = Vec::with_capacity(turns as usize);
            for _ in 0..turns {
                reports.push(graph.advance_turn());
            }
            print_json(&reports)?;
            true
        }

        Commands::Validate { plan } => {
            let raw = std::fs::read_to_string(&plan)
                .with_context(|| format!("Cannot read {}", plan.display()))?;
            let plan: Plan = serde_json::from_str(&raw).context("Invalid plan document")?;
            print_json(&graph.validate_plan(&plan))?;
            false
        }

        Commands::Recall { query, k } => {
            let recall = SemanticRecall::from_config(&recall_config);
            let mut opts = RecallOptions::from_config(&recall_config);
            if let Some(k) = k {
                opts = opts.with_k(k);
            }
            let hits = recall
                .recall(Arc::new(graph.snapshot()), &query, opts)
                .await;
            print_json(&hits)?;
            false
        }

        Commands::Reset => {
            graph.reset()?;
            println!("World graph reset");
            false
        }
    };

    if mutated {
        graph.save().context("Failed to save world graph")?;
    }

    Ok(())
}
