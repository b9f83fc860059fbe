use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tracing::{info, warn};

use crate::config::{Config, Settings};
use crate::database::{DenseStore, JsonVectorStore};
use crate::embeddings::{OllamaClient, OllamaProviderSource};
use crate::graph::{GraphStore, GraphStoreConnectionConfig, driver_factory_for};
use crate::indexer::{ConsoleReporter, IndexOperations, IndexRunReport, RunOutcome};
use crate::ingest::{DenseIndexWriter, IngestionOrchestrator};
use crate::vault::FsVault;

/// Everything a CLI command needs to work on one vault
pub struct Pipeline {
    pub settings: Settings,
    pub store: Arc<JsonVectorStore>,
    pub operations: IndexOperations,
}

impl Pipeline {
    /// Wire the filesystem vault, the JSON store and the configured graph backend
    #[inline]
    pub async fn open(vault_root: &Path, config: Config) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;

        let vault = FsVault::new(vault_root)
            .with_context(|| format!("Cannot open vault at {}", vault_root.display()))?;
        let store = Arc::new(
            JsonVectorStore::new(&config)
                .await
                .context("Failed to open vector store")?,
        );
        let graph = GraphStore::new(driver_factory_for(&config.graph)?);

        let settings = Settings::new(config);
        let dense: Arc<dyn DenseStore> = store.clone();
        let orchestrator = IngestionOrchestrator::from_settings(
            Arc::new(DenseIndexWriter::new(Arc::clone(&dense))),
            Arc::new(graph),
            &settings,
        );
        let operations = IndexOperations::new(
            settings.clone(),
            Arc::new(vault),
            dense,
            Arc::new(OllamaProviderSource::new(settings.clone())),
            orchestrator,
            Arc::new(ConsoleReporter::new()),
        );

        Ok(Self {
            settings,
            store,
            operations,
        })
    }

    /// Wait for background work, persist pending changes and disconnect
    #[inline]
    pub async fn close(self) -> Result<()> {
        self.operations.shutdown().await;
        if self.store.save_if_dirty().await? {
            info!("Saved pending index changes");
        }
        Ok(())
    }
}

/// Convert a user-supplied note path into a vault-relative one
#[inline]
pub fn vault_relative(vault_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(vault_root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Run a full indexing pass; Ctrl-C cancels between batches
#[inline]
pub async fn index_vault(pipeline: &Pipeline, overwrite: bool) -> Result<IndexRunReport> {
    let control = pipeline.operations.control();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling after the current batch");
            control.cancel();
        }
    });

    let result = pipeline.operations.index_vault_to_vector_store(overwrite).await;
    interrupt.abort();
    let report = result?;

    let outcome = match report.outcome {
        RunOutcome::UpToDate => style("up to date").green(),
        RunOutcome::Completed => style("completed").green(),
        RunOutcome::CompletedWithErrors => style("completed with errors").yellow(),
        RunOutcome::Cancelled => style("cancelled").yellow(),
        RunOutcome::Aborted => style("aborted").red(),
    };
    println!(
        "Indexing {}: {}/{} files indexed",
        outcome, report.indexed_count, report.total_files
    );
    for path in &report.errors {
        println!("  {} {}", style("failed:").red(), path);
    }

    Ok(report)
}

#[inline]
pub async fn reindex_note(pipeline: &Pipeline, path: &str) -> Result<()> {
    pipeline
        .operations
        .reindex_file(path)
        .await
        .with_context(|| format!("Failed to reindex {}", path))?;
    println!("Reindexed {}", style(path).cyan());
    Ok(())
}

#[inline]
pub async fn remove_note(pipeline: &Pipeline, path: &str) -> Result<()> {
    pipeline
        .operations
        .remove_note(path)
        .await
        .with_context(|| format!("Failed to remove {}", path))?;
    println!("Removed {} from the index", style(path).cyan());
    Ok(())
}

/// Check that the configured graph database is reachable with the configured credentials
#[inline]
pub async fn verify_graph(config: &Config) -> Result<()> {
    let store = GraphStore::new(driver_factory_for(&config.graph)?);
    let connection = GraphStoreConnectionConfig::from_config(&config.graph);

    store
        .verify_connection(&connection)
        .await
        .with_context(|| format!("Graph connection to {} failed", connection.uri))?;
    println!(
        "{} Graph connection to {} verified",
        style("✓").green(),
        connection.uri
    );
    Ok(())
}

/// Show the state of the index and its collaborators
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("{}", style("Vault Ingest Status").bold().cyan());
    println!("{}", "=".repeat(40));

    println!("{}", style("Embedding provider:").bold().yellow());
    let health = match OllamaClient::new(&config.embedding) {
        Ok(client) => tokio::task::spawn_blocking(move || client.health_check())
            .await
            .context("Health check task failed")?,
        Err(e) => Err(e),
    };
    match health {
        Ok(()) => println!(
            "  {} {} ({})",
            style("✓").green(),
            config.embedding.model,
            config.embedding.host
        ),
        Err(e) => println!("  {} {}", style("✗").red(), e),
    }

    println!("{}", style("Vector store:").bold().yellow());
    match JsonVectorStore::new(config).await {
        Ok(store) => {
            let stats = store.stats().await;
            println!("  Records: {}", stats.records);
            println!("  Files: {}", stats.files);
            println!(
                "  Files missing embeddings: {}",
                stats.files_missing_embeddings
            );
            println!(
                "  Embedding model: {}",
                stats.embedding_model.as_deref().unwrap_or("(none)")
            );
        }
        Err(e) => println!("  {} {}", style("✗").red(), e),
    }
    println!("  Location: {}", config.vector_database_path().display());

    println!("{}", style("Graph:").bold().yellow());
    if config.graph.enabled {
        println!("  Backend: {:?} at {}", config.graph.backend, config.graph.uri);
    } else {
        println!("  Disabled");
    }

    Ok(())
}
