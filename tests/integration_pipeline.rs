#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! End-to-end indexing of a vault on disk into the JSON vector store and the
//! in-memory graph, using a deterministic embedder.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tempfile::TempDir;

use vault_ingest::commands::vault_relative;
use vault_ingest::config::{Config, Settings};
use vault_ingest::database::{DenseStore, JsonVectorStore};
use vault_ingest::embeddings::{Embedding, EmbeddingError, EmbeddingProvider, content_hash};
use vault_ingest::graph::memory::Relationship;
use vault_ingest::graph::{GraphStore, MemoryGraph};
use vault_ingest::indexer::{IndexOperations, RunOutcome, TracingReporter};
use vault_ingest::ingest::{DenseIndexWriter, IngestionOrchestrator};
use vault_ingest::vault::FsVault;

struct LengthEmbedder;

#[async_trait]
impl EmbeddingProvider for LengthEmbedder {
    fn model_name(&self) -> &str {
        "length-embedder"
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let words = text.split_whitespace().count() as f32;
                vec![text.len() as f32, words, 1.0]
            })
            .collect())
    }
}

struct Harness {
    vault_dir: TempDir,
    _config_dir: TempDir,
    config: Config,
    store: Arc<JsonVectorStore>,
    graph: MemoryGraph,
    operations: IndexOperations,
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(full, content).expect("write note");
}

fn touch_future(root: &Path, path: &str) {
    let file = fs::File::options()
        .write(true)
        .open(root.join(path))
        .expect("open note");
    file.set_modified(SystemTime::now() + Duration::from_secs(3600))
        .expect("set mtime");
}

async fn harness() -> Harness {
    let vault_dir = TempDir::new().expect("vault dir");
    let root = vault_dir.path();
    write(
        root,
        "projects/alpha.md",
        "---\ntags: [project/alpha]\nstatus: active\n---\n# Alpha\n\n\
         Work on [[beta]] today.\n\n![[diagram.png]]\n",
    );
    write(root, "projects/beta.md", "# Beta\n\nFollow-up notes #review\n");
    write(root, "archive/old.md", "Archived note #project/legacy\n");
    write(root, ".obsidian/workspace.md", "internal state\n");
    write(root, "projects/diagram.png", "not really a png");

    let config_dir = TempDir::new().expect("config dir");
    let mut config = Config {
        base_dir: config_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.indexing.exclusions = vec!["archive/**".to_string()];
    config.embedding.requests_per_minute = 1000;
    config.graph.enabled = true;

    let store = Arc::new(JsonVectorStore::new(&config).await.expect("open store"));
    let graph = MemoryGraph::new();
    let settings = Settings::new(config.clone());
    let dense: Arc<dyn DenseStore> = store.clone();
    let orchestrator = IngestionOrchestrator::from_settings(
        Arc::new(DenseIndexWriter::new(Arc::clone(&dense))),
        Arc::new(GraphStore::new(Arc::new(graph.clone()))),
        &settings,
    );
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(LengthEmbedder);
    let operations = IndexOperations::new(
        settings,
        Arc::new(FsVault::new(root).expect("vault")),
        dense,
        Arc::new(provider),
        orchestrator,
        Arc::new(TracingReporter),
    );

    Harness {
        vault_dir,
        _config_dir: config_dir,
        config,
        store,
        graph,
        operations,
    }
}

#[tokio::test]
async fn full_run_populates_both_stores() {
    let harness = harness().await;

    let report = harness
        .operations
        .index_vault_to_vector_store(false)
        .await
        .expect("index run");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.indexed_count, 2);
    assert_eq!(report.total_files, 2);

    let files = harness.store.get_indexed_files().await.expect("files");
    assert!(files.contains("projects/alpha.md"));
    assert!(files.contains("projects/beta.md"));
    assert!(!files.contains("archive/old.md"));
    assert!(!files.contains(".obsidian/workspace.md"));

    for record in harness.store.records_for("projects/alpha.md").await {
        assert_eq!(record.id, content_hash(&record.content));
        assert!(record.content.contains("NOTE TITLE: [[alpha]]"));
        assert!(record.content.contains("\"status\":\"active\""));
        assert_eq!(record.embedding_model, "length-embedder");
    }

    assert_eq!(
        harness
            .graph
            .targets(Relationship::LinksTo, "projects/alpha.md"),
        vec!["projects/beta.md"]
    );
    assert_eq!(
        harness.graph.targets(Relationship::Embeds, "projects/alpha.md"),
        vec!["projects/diagram.png"]
    );
    assert_eq!(
        harness.graph.targets(Relationship::HasTag, "projects/alpha.md"),
        vec!["#project/alpha"]
    );
    assert_eq!(
        harness.graph.targets(Relationship::ParentOf, "#project"),
        vec!["#project/alpha"]
    );
    assert!(harness.graph.note("archive/old.md").is_none());

    harness.operations.shutdown().await;
}

#[tokio::test]
async fn saved_index_survives_reopen() {
    let harness = harness().await;
    harness
        .operations
        .index_vault_to_vector_store(false)
        .await
        .expect("index run");
    harness.operations.wait_for_background_tasks().await;

    let reopened = JsonVectorStore::new(&harness.config)
        .await
        .expect("reopen store");

    assert_eq!(reopened.len().await, harness.store.len().await);
    let stats = reopened.stats().await;
    assert_eq!(stats.files, 2);
    assert_eq!(stats.embedding_model.as_deref(), Some("length-embedder"));
}

#[tokio::test]
async fn incremental_runs_follow_vault_changes() {
    let harness = harness().await;
    let root = harness.vault_dir.path();
    harness
        .operations
        .index_vault_to_vector_store(false)
        .await
        .expect("first run");
    harness.operations.wait_for_background_tasks().await;

    let unchanged = harness
        .operations
        .index_vault_to_vector_store(false)
        .await
        .expect("second run");
    assert_eq!(unchanged.outcome, RunOutcome::UpToDate);

    write(root, "projects/beta.md", "# Beta\n\nRewritten entirely #done\n");
    touch_future(root, "projects/beta.md");
    let changed = harness
        .operations
        .index_vault_to_vector_store(false)
        .await
        .expect("third run");
    assert_eq!(changed.total_files, 1);
    let beta = harness.store.records_for("projects/beta.md").await;
    assert!(beta.iter().any(|record| record.content.contains("Rewritten")));
    harness.operations.wait_for_background_tasks().await;

    fs::remove_file(root.join("projects/alpha.md")).expect("delete note");
    harness
        .operations
        .index_vault_to_vector_store(false)
        .await
        .expect("fourth run");
    assert!(harness.store.records_for("projects/alpha.md").await.is_empty());

    harness.operations.shutdown().await;
}

#[tokio::test]
async fn single_note_updates_are_saved_on_demand() {
    let harness = harness().await;
    let root = harness.vault_dir.path();
    harness
        .operations
        .index_vault_to_vector_store(false)
        .await
        .expect("index run");
    harness.operations.wait_for_background_tasks().await;

    write(root, "projects/gamma.md", "New note linking [[alpha]] #project/gamma\n");
    harness
        .operations
        .reindex_file("projects/gamma.md")
        .await
        .expect("reindex");

    assert_eq!(harness.store.records_for("projects/gamma.md").await.len(), 1);
    assert_eq!(
        harness.graph.targets(Relationship::LinksTo, "projects/gamma.md"),
        vec!["projects/alpha.md"]
    );
    assert!(harness.store.save_if_dirty().await.expect("save"));
    assert!(!harness.store.save_if_dirty().await.expect("second save"));

    harness
        .operations
        .remove_note("projects/gamma.md")
        .await
        .expect("remove");
    assert!(harness.store.records_for("projects/gamma.md").await.is_empty());
    assert!(harness.graph.note("projects/gamma.md").is_none());
}

#[test]
fn note_paths_are_made_vault_relative() {
    let root = Path::new("/vault");

    assert_eq!(
        vault_relative(root, Path::new("/vault/daily/today.md")),
        "daily/today.md"
    );
    assert_eq!(vault_relative(root, Path::new("inbox/idea.md")), "inbox/idea.md");
}
