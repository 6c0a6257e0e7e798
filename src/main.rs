//! # flowrag CLI
//!
//! ```bash
//! flowrag --config ./config/flowrag.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `flowrag init` | Create the database schema and the configured collections |
//! | `flowrag ingest <dir>` | Chunk, embed and store catalog and text files |
//! | `flowrag context "<query>"` | Print the assembled generation context |
//! | `flowrag feedback "<query>" --artifact <file>` | Shape-check an artifact and record the outcome |
//! | `flowrag stats` | Collection sizes and feedback analytics |
//! | `flowrag suggest <intent>` | History-based advice for one intent |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `flowrag=info`).

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use flowrag::config;
use flowrag::ingest;
use flowrag::migrate;
use flowrag::pipeline::Pipeline;
use flowrag::stats;
use flowrag_core::models::{Intent, Outcome};
use flowrag_core::shape::check_workflow;

/// flowrag: retrieval-augmented context for workflow generation.
#[derive(Parser)]
#[command(
    name = "flowrag",
    about = "Query analysis, multi-collection retrieval and feedback learning for workflow generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/flowrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and create the configured collections.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Ingest a directory of catalog JSON, exported workflows and text notes.
    Ingest {
        dir: PathBuf,

        /// Show file and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Analyze a request and print the assembled context.
    Context {
        query: String,

        /// Print analysis, retrieval and context as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Record the outcome of a generation attempt.
    #[command(group(ArgGroup::new("result").required(true).args(["artifact", "success", "failure"])))]
    Feedback {
        query: String,

        /// Generated workflow JSON; success means it passed the shape check.
        #[arg(long)]
        artifact: Option<PathBuf>,

        #[arg(long)]
        success: bool,

        #[arg(long)]
        failure: bool,

        /// Validation error message (repeatable).
        #[arg(long = "error")]
        errors: Vec<String>,
    },

    /// Show collection sizes and feedback analytics.
    Stats,

    /// Suggest improvements for an intent (e.g. `notification`).
    Suggest { intent: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowrag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            let pipeline = Pipeline::from_config(&cfg).await?;
            let created = pipeline.init_collections().await?;
            pipeline.close().await;
            println!("Database initialized successfully.");
            println!("  collections: {}", created.join(", "));
        }
        Commands::Ingest { dir, dry_run } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let report = pipeline.ingest(&dir, dry_run).await?;
            pipeline.close().await;
            ingest::print_report(&dir, &report, dry_run);
        }
        Commands::Context { query, json } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let built = pipeline.build(&query).await;
            pipeline.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&built)?);
            } else {
                println!("{}", built.context.instruction_text);
            }
        }
        Commands::Feedback {
            query,
            artifact,
            success,
            failure: _,
            errors,
        } => {
            let outcome = match artifact {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read artifact: {}", path.display()))?;
                    let mut validation_errors = match serde_json::from_str(&raw) {
                        Ok(value) => check_workflow(&value),
                        Err(e) => vec![format!("Artifact is not valid JSON: {}", e)],
                    };
                    validation_errors.extend(errors);
                    Outcome {
                        success: validation_errors.is_empty(),
                        validation_errors,
                    }
                }
                None => Outcome {
                    success,
                    validation_errors: errors,
                },
            };
            let pipeline = Pipeline::from_config(&cfg).await?;
            let id = pipeline.record_outcome(&query, &outcome).await?;
            pipeline.close().await;
            println!(
                "recorded #{} ({})",
                id,
                if outcome.success { "success" } else { "failure" }
            );
            for e in &outcome.validation_errors {
                println!("  - {}", e);
            }
        }
        Commands::Stats => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            stats::run_stats(&cfg, &pipeline).await?;
            pipeline.close().await;
        }
        Commands::Suggest { intent } => {
            let Some(intent) = Intent::parse(&intent) else {
                bail!(
                    "Unknown intent: '{}'. Expected one of: webhook_trigger, api_integration, \
                     data_transformation, database_operation, ai_automation, notification, \
                     file_processing, scheduling, error_handling, multi_step_workflow",
                    intent
                );
            };
            let pipeline = Pipeline::from_config(&cfg).await?;
            let suggestions = pipeline.feedback().suggest_improvements(intent).await?;
            pipeline.close().await;
            println!("{}", serde_json::to_string_pretty(&suggestions)?);
        }
    }

    Ok(())
}
