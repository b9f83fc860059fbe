use super::*;
use crate::graph::memory::{MemoryGraph, Relationship};
use crate::graph::GraphCredentials;
use crate::tags::normalize_tag_paths;

fn connection() -> GraphStoreConnectionConfig {
    GraphStoreConnectionConfig {
        uri: "bolt://localhost:7687".to_string(),
        credentials: Some(GraphCredentials::Basic {
            username: "neo4j".to_string(),
            password: "password".to_string(),
        }),
        database: None,
        encrypted: false,
        transaction_timeout: Duration::from_secs(30),
    }
}

fn options() -> GraphStoreRuntimeOptions {
    GraphStoreRuntimeOptions {
        enabled: true,
        included_tag_prefixes: Vec::new(),
        index_all_tags: true,
        include_wiki_links: true,
        include_embeds: true,
    }
}

fn note(id: &str, tags: &[&str], links: &[&str], embeds: &[&str]) -> GraphIndexedNote {
    GraphIndexedNote {
        note_id: id.to_string(),
        note_path: id.to_string(),
        tags: normalize_tag_paths(tags),
        wiki_link_targets: links.iter().map(ToString::to_string).collect(),
        embed_targets: embeds.iter().map(ToString::to_string).collect(),
        updated_at: 1_700_000_000_000,
    }
}

async fn connected_store(graph: &MemoryGraph) -> GraphStore {
    let store = GraphStore::new(Arc::new(graph.clone()));
    store.initialize(&connection()).await;
    assert!(store.is_connected().await);
    store
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;

    store.initialize(&connection()).await;

    let stats = graph.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.verifications, 1);
}

#[tokio::test]
async fn failed_verification_closes_driver_and_stays_uninitialized() {
    let graph = MemoryGraph::new();
    graph.fail_verify(true);
    let store = GraphStore::new(Arc::new(graph.clone()));

    store.initialize(&connection()).await;

    assert!(!store.is_connected().await);
    assert_eq!(graph.stats().drivers_closed, 1);

    graph.fail_verify(false);
    store.initialize(&connection()).await;
    assert!(store.is_connected().await);
}

#[tokio::test]
async fn missing_credentials_skip_initialization() {
    let graph = MemoryGraph::new();
    let store = GraphStore::new(Arc::new(graph.clone()));
    let mut without_credentials = connection();
    without_credentials.credentials = None;

    store.initialize(&without_credentials).await;

    assert!(!store.is_connected().await);
    assert_eq!(graph.stats().connects, 0);
}

#[tokio::test]
async fn driver_without_write_api_is_rejected() {
    let graph = MemoryGraph::with_capabilities(WriteCapabilities {
        managed: false,
        explicit: false,
    });
    let store = GraphStore::new(Arc::new(graph.clone()));

    store.initialize(&connection()).await;

    assert!(!store.is_connected().await);
    assert_eq!(graph.stats().drivers_closed, 1);
}

#[tokio::test]
async fn disabled_or_disconnected_upserts_are_noops() {
    let graph = MemoryGraph::new();
    let store = GraphStore::new(Arc::new(graph.clone()));
    let payload = note("a.md", &["#a"], &[], &[]);

    store
        .upsert_note(&payload, &options())
        .await
        .expect("not connected is not an error");

    let store = connected_store(&graph).await;
    let disabled = GraphStoreRuntimeOptions {
        enabled: false,
        ..options()
    };
    store
        .upsert_note(&payload, &disabled)
        .await
        .expect("disabled is not an error");

    assert_eq!(graph.stats().sessions_opened, 0);
    assert_eq!(graph.note_count(), 0);
}

#[tokio::test]
async fn empty_payload_opens_no_transaction() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;

    store
        .upsert_note(&note("empty.md", &[], &[], &[]), &options())
        .await
        .expect("empty payload succeeds");

    let stats = graph.stats();
    assert_eq!(stats.sessions_opened, 0);
    assert_eq!(stats.commits, 0);
}

#[tokio::test]
async fn reindexing_prunes_removed_tags() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;

    store
        .upsert_note(&note("n.md", &["#a", "#b"], &[], &[]), &options())
        .await
        .expect("first upsert");
    assert_eq!(graph.targets(Relationship::HasTag, "n.md"), vec!["#a", "#b"]);

    store
        .upsert_note(&note("n.md", &["#a"], &[], &[]), &options())
        .await
        .expect("second upsert");

    assert_eq!(graph.targets(Relationship::HasTag, "n.md"), vec!["#a"]);
    assert_eq!(graph.edge_count(Relationship::HasTag), 1);
    // Orphaned tag nodes are left in place
    assert!(graph.tag("#b").is_some());
}

#[tokio::test]
async fn tag_hierarchy_is_shared_across_notes() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;

    store
        .upsert_note(&note("one.md", &["#a/b/c"], &[], &[]), &options())
        .await
        .expect("upsert one");
    store
        .upsert_note(&note("two.md", &["#a/b/d"], &[], &[]), &options())
        .await
        .expect("upsert two");

    assert_eq!(graph.targets(Relationship::ParentOf, "#a"), vec!["#a/b"]);
    assert_eq!(
        graph.targets(Relationship::ParentOf, "#a/b"),
        vec!["#a/b/c", "#a/b/d"]
    );
    assert_eq!(graph.tag_count(), 4);
    assert_eq!(
        graph.tag("#a/b/c").map(|t| t.segments),
        Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    );
}

#[tokio::test]
async fn prefix_filter_selects_hierarchy_levels() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;
    let filtered = GraphStoreRuntimeOptions {
        index_all_tags: false,
        included_tag_prefixes: vec!["#a/b".to_string()],
        ..options()
    };

    store
        .upsert_note(&note("n.md", &["#a", "#a/b", "#a/b/c", "#z"], &[], &[]), &filtered)
        .await
        .expect("upsert");

    assert_eq!(
        graph.targets(Relationship::HasTag, "n.md"),
        vec!["#a/b", "#a/b/c"]
    );
}

#[tokio::test]
async fn links_and_embeds_reconcile_separately() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;

    store
        .upsert_note(
            &note("src.md", &[], &["b.md", "c.md", "b.md"], &["img.png"]),
            &options(),
        )
        .await
        .expect("first upsert");
    assert_eq!(
        graph.targets(Relationship::LinksTo, "src.md"),
        vec!["b.md", "c.md"]
    );
    assert_eq!(graph.targets(Relationship::Embeds, "src.md"), vec!["img.png"]);
    assert_eq!(
        graph.note("b.md").and_then(|n| n.path),
        Some("b.md".to_string())
    );

    store
        .upsert_note(&note("src.md", &[], &["c.md"], &["img.png"]), &options())
        .await
        .expect("second upsert");

    assert_eq!(graph.targets(Relationship::LinksTo, "src.md"), vec!["c.md"]);
    assert_eq!(graph.targets(Relationship::Embeds, "src.md"), vec!["img.png"]);
}

#[tokio::test]
async fn excluded_link_kinds_are_not_written() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;
    let no_embeds = GraphStoreRuntimeOptions {
        include_embeds: false,
        ..options()
    };

    store
        .upsert_note(&note("src.md", &[], &["b.md"], &["img.png"]), &no_embeds)
        .await
        .expect("upsert");

    assert_eq!(graph.targets(Relationship::LinksTo, "src.md"), vec!["b.md"]);
    assert!(graph.targets(Relationship::Embeds, "src.md").is_empty());
    assert!(graph.note("img.png").is_none());
}

#[tokio::test]
async fn failed_transaction_leaves_graph_untouched_and_closes_session() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;
    graph.fail_next_writes(1);

    let result = store
        .upsert_note(&note("n.md", &["#a"], &["b.md"], &[]), &options())
        .await;

    assert!(matches!(result, Err(GraphError::Transaction(_))));
    assert_eq!(graph.note_count(), 0);
    let stats = graph.stats();
    assert_eq!(stats.sessions_opened, 1);
    assert_eq!(stats.sessions_closed, 1);
}

#[tokio::test]
async fn explicit_transactions_roll_back_on_error() {
    let graph = MemoryGraph::with_capabilities(WriteCapabilities {
        managed: false,
        explicit: true,
    });
    let store = connected_store(&graph).await;

    store
        .upsert_note(&note("ok.md", &["#a"], &[], &[]), &options())
        .await
        .expect("explicit upsert");
    assert_eq!(graph.targets(Relationship::HasTag, "ok.md"), vec!["#a"]);

    graph.poison_statement(GraphStatement::MergeNote {
        note_id: "bad.md".to_string(),
        path: "bad.md".to_string(),
        updated_at: 1_700_000_000_000,
    });
    let result = store
        .upsert_note(&note("bad.md", &["#b"], &[], &[]), &options())
        .await;

    assert!(result.is_err());
    assert!(graph.note("bad.md").is_none());
    assert!(graph.tag("#b").is_none());
    let stats = graph.stats();
    assert_eq!(stats.sessions_opened, stats.sessions_closed);
}

#[tokio::test(start_paused = true)]
async fn hung_transaction_times_out() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;
    graph.hang_writes(true);

    let result = store
        .upsert_note(&note("n.md", &["#a"], &[], &[]), &options())
        .await;

    assert!(matches!(result, Err(GraphError::Timeout(_))));
    assert_eq!(graph.stats().sessions_closed, 1);
}

#[tokio::test]
async fn remove_note_detaches_relationships() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;
    store
        .upsert_note(&note("a.md", &["#x/y"], &["b.md"], &[]), &options())
        .await
        .expect("upsert a");
    store
        .upsert_note(&note("b.md", &[], &["a.md"], &[]), &options())
        .await
        .expect("upsert b");

    store.remove_note("a.md").await.expect("remove");

    assert!(graph.note("a.md").is_none());
    assert_eq!(graph.edge_count(Relationship::HasTag), 0);
    assert_eq!(graph.edge_count(Relationship::LinksTo), 0);
    assert_eq!(graph.edge_count(Relationship::ParentOf), 1);
}

#[tokio::test]
async fn remove_without_connection_is_noop() {
    let graph = MemoryGraph::new();
    let store = GraphStore::new(Arc::new(graph.clone()));

    store.remove_note("a.md").await.expect("noop");
    assert_eq!(graph.stats().sessions_opened, 0);
}

#[tokio::test]
async fn verify_connection_always_closes_driver() {
    let graph = MemoryGraph::new();
    let store = GraphStore::new(Arc::new(graph.clone()));

    store
        .verify_connection(&connection())
        .await
        .expect("verification succeeds");
    assert_eq!(graph.stats().drivers_closed, 1);

    graph.fail_verify(true);
    let result = store.verify_connection(&connection()).await;
    assert!(matches!(result, Err(GraphError::Connection(_))));
    assert_eq!(graph.stats().drivers_closed, 2);
    assert!(!store.is_connected().await);

    let mut no_uri = connection();
    no_uri.uri = String::new();
    assert!(matches!(
        store.verify_connection(&no_uri).await,
        Err(GraphError::MissingUri)
    ));
}

#[tokio::test]
async fn shutdown_returns_to_uninitialized() {
    let graph = MemoryGraph::new();
    let store = connected_store(&graph).await;

    store.shutdown().await;
    store.shutdown().await;

    assert!(!store.is_connected().await);
    assert_eq!(graph.stats().drivers_closed, 1);
}

#[test]
fn plan_orders_statements() {
    let plan = GraphStore::plan_upsert(&note("n.md", &["#a/b"], &["l.md"], &["e.png"]), &options())
        .expect("plan");

    let kinds: Vec<&str> = plan
        .iter()
        .map(|statement| match statement {
            GraphStatement::MergeNote { .. } => "merge-note",
            GraphStatement::PruneTags { .. } => "prune-tags",
            GraphStatement::MergeTag { .. } => "merge-tag",
            GraphStatement::MergeTagParent { .. } => "merge-parent",
            GraphStatement::PruneLinks { kind: LinkKind::WikiLink, .. } => "prune-links",
            GraphStatement::MergeLinks { kind: LinkKind::WikiLink, .. } => "merge-links",
            GraphStatement::PruneLinks { kind: LinkKind::Embed, .. } => "prune-embeds",
            GraphStatement::MergeLinks { kind: LinkKind::Embed, .. } => "merge-embeds",
            GraphStatement::DeleteNote { .. } => "delete",
        })
        .collect();

    assert_eq!(
        kinds,
        vec![
            "merge-note",
            "prune-tags",
            "merge-tag",
            "merge-parent",
            "prune-links",
            "merge-links",
            "prune-embeds",
            "merge-embeds",
        ]
    );
}

#[test]
fn write_strategy_prefers_managed() {
    let both = WriteCapabilities {
        managed: true,
        explicit: true,
    };
    let explicit = WriteCapabilities {
        managed: false,
        explicit: true,
    };
    assert_eq!(WriteStrategy::from_capabilities(both), Some(WriteStrategy::Managed));
    assert_eq!(
        WriteStrategy::from_capabilities(explicit),
        Some(WriteStrategy::Explicit)
    );
}
