use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use vault_ingest::Result;
use vault_ingest::commands::{
    Pipeline, index_vault, reindex_note, remove_note, show_status, vault_relative, verify_graph,
};
use vault_ingest::config::{Config, show_config};

#[derive(Parser)]
#[command(name = "vault-ingest")]
#[command(about = "Index a markdown vault into a vector store and a tag/link graph")]
#[command(version)]
struct Cli {
    /// Root directory of the vault
    #[arg(long, global = true)]
    vault: Option<PathBuf>,
    /// Directory holding config.toml and the vector store
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index new and modified notes
    Index {
        /// Rebuild the whole index from scratch
        #[arg(long)]
        overwrite: bool,
    },
    /// Re-embed a single note
    Reindex {
        /// Note path, relative to the vault or absolute inside it
        path: PathBuf,
    },
    /// Remove a note from the vector store and the graph
    Remove {
        /// Note path, relative to the vault or absolute inside it
        path: PathBuf,
    },
    /// Graph database utilities
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Write the configuration file with current values
        #[arg(long)]
        init: bool,
    },
    /// Show the state of the index and its services
    Status,
}

#[derive(Subcommand)]
enum GraphCommands {
    /// Test connectivity and credentials of the configured graph database
    Verify,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let dir = match &self.config_dir {
            Some(dir) => dir.clone(),
            None => Config::config_dir()?,
        };
        Ok(Config::load(dir)?)
    }

    fn vault_root(&self) -> Result<PathBuf> {
        Ok(self
            .vault
            .clone()
            .context("--vault is required for this command")?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    match &cli.command {
        Commands::Index { overwrite } => {
            let pipeline = Pipeline::open(&cli.vault_root()?, config).await?;
            let result = index_vault(&pipeline, *overwrite).await;
            pipeline.close().await?;
            result?;
        }
        Commands::Reindex { path } => {
            let root = cli.vault_root()?;
            let pipeline = Pipeline::open(&root, config).await?;
            let result = reindex_note(&pipeline, &vault_relative(&root, path)).await;
            pipeline.close().await?;
            result?;
        }
        Commands::Remove { path } => {
            let root = cli.vault_root()?;
            let pipeline = Pipeline::open(&root, config).await?;
            let result = remove_note(&pipeline, &vault_relative(&root, path)).await;
            pipeline.close().await?;
            result?;
        }
        Commands::Graph {
            command: GraphCommands::Verify,
        } => {
            verify_graph(&config).await?;
        }
        Commands::Config { show, init } => {
            if *init {
                config.save()?;
                println!("Wrote {}", config.config_file_path().display());
            }
            if *show || !*init {
                show_config(&config)?;
            }
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
