//! `stepflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: build a step definition and print the resulting tree.
//! - `pollers`: list the pollers configured in the engine config.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use engine::{EngineConfig, FileDefinitionSource, StepBuilder};

#[derive(Parser)]
#[command(name = "stepflow", about = "Workflow execution engine", version)]
struct Cli {
    /// Engine configuration file (TOML). Defaults apply when it is missing.
    #[arg(long, env = "STEPFLOW_CONFIG", default_value = "stepflow.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a step definition and print it as JSON.
    Validate {
        /// Dotted definition path, e.g. `ingest.receive`.
        path: String,
        /// Definition root; overrides `[definitions] root`.
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// List configured pollers.
    Pollers,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Command::Validate { path, root } => {
            let root = root.unwrap_or_else(|| config.definitions.root.clone());
            let source = FileDefinitionSource::new(root);
            let step = StepBuilder::load(&source, &path)
                .with_context(|| format!("invalid definition '{path}'"))?;

            info!(
                "definition '{}' is valid: {} task(s), {} child step(s)",
                path,
                step.flatten().len(),
                step.child_steps.len()
            );
            println!("{}", serde_json::to_string_pretty(&step)?);
        }
        Command::Pollers => {
            if config.pollers.is_empty() {
                println!("no pollers configured");
            }
            for (name, poller) in &config.pollers {
                println!(
                    "{name}\tclass={}\tinterval={:?}\toptions={}",
                    poller.class,
                    poller.interval,
                    serde_json::Value::Object(poller.options.clone())
                );
            }
        }
    }

    Ok(())
}
