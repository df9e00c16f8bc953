//! CLI entry point for the graphmap object-graph mapper.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use graphmap_context::MappingContext;
use graphmap_core::config::OgmConfig;
use graphmap_session::{BoltDriver, EntityGraphMapper, Session};

use graphmap_cli::changeset::ChangeSet;

#[derive(Parser)]
#[command(name = "graphmap")]
#[command(about = "Compile and apply object-graph change sets against Neo4j")]
struct Cli {
    /// Config file prefix (default: graphmap).
    #[arg(short, long, default_value = "graphmap")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the statement a change set compiles to, without connecting.
    Compile {
        /// Path to the change-set JSON file.
        file: PathBuf,
    },
    /// Save a change set through a session and print the assigned ids.
    Apply {
        /// Path to the change-set JSON file.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = OgmConfig::load(&cli.config)?;

    match cli.command {
        Command::Compile { file } => {
            let loaded = ChangeSet::from_path(&file)?.load()?;
            let context = MappingContext::new(loaded.schema);
            let compiled = EntityGraphMapper::new(&context, config.session.version_initial_value)
                .map(&loaded.graph)?;
            match compiled.statement() {
                Some(statement) => println!("{}", serde_json::to_string_pretty(statement)?),
                None => tracing::info!("Change set compiles to no statement"),
            }
        }
        Command::Apply { file } => {
            let loaded = ChangeSet::from_path(&file)?.load()?;
            let driver = BoltDriver::connect(&config.neo4j).await?;
            let session = Session::new(Arc::new(driver), loaded.schema, config.session);
            session.save(&loaded.graph).await?;

            let ids: serde_json::Map<String, serde_json::Value> = loaded
                .entities
                .iter()
                .map(|(key, h)| (key.clone(), serde_json::json!(h.read().id)))
                .collect();
            tracing::info!(entities = ids.len(), "Change set applied");
            println!("{}", serde_json::to_string_pretty(&ids)?);
        }
    }

    Ok(())
}
