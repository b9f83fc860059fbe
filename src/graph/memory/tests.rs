use super::*;
use crate::tags::normalize_tag_path;

fn merge_note(id: &str) -> GraphStatement {
    GraphStatement::MergeNote {
        note_id: id.to_string(),
        path: id.to_string(),
        updated_at: 42,
    }
}

fn merge_tag(id: &str, tag: &str) -> GraphStatement {
    GraphStatement::MergeTag {
        note_id: id.to_string(),
        tag: normalize_tag_path(tag).expect("valid tag"),
    }
}

fn connection() -> GraphStoreConnectionConfig {
    GraphStoreConnectionConfig {
        uri: "memory://".to_string(),
        credentials: None,
        database: None,
        encrypted: false,
        transaction_timeout: std::time::Duration::from_secs(5),
    }
}

#[test]
fn merge_tag_requires_existing_note() {
    let mut data = GraphData::default();
    data.apply(&merge_tag("ghost.md", "#a"));

    assert!(data.tags.is_empty());
    assert!(data.edges.is_empty());
}

#[test]
fn merge_note_updates_properties_in_place() {
    let mut data = GraphData::default();
    data.apply(&merge_note("n.md"));
    data.apply(&GraphStatement::MergeNote {
        note_id: "n.md".to_string(),
        path: "folder/n.md".to_string(),
        updated_at: 99,
    });

    assert_eq!(data.notes.len(), 1);
    let node = &data.notes["n.md"];
    assert_eq!(node.path.as_deref(), Some("folder/n.md"));
    assert_eq!(node.updated_at, Some(99));
}

#[test]
fn link_targets_become_placeholder_notes() {
    let mut data = GraphData::default();
    data.apply(&merge_note("a.md"));
    data.apply(&GraphStatement::MergeLinks {
        note_id: "a.md".to_string(),
        kind: LinkKind::Embed,
        targets: vec!["pic.png".to_string()],
    });

    assert_eq!(
        data.notes.get("pic.png"),
        Some(&NoteNode {
            path: Some("pic.png".to_string()),
            updated_at: None,
        })
    );
    assert!(data.edges.contains(&(
        Relationship::Embeds,
        "a.md".to_string(),
        "pic.png".to_string()
    )));
}

#[test]
fn delete_note_keeps_tag_hierarchy() {
    let mut data = GraphData::default();
    data.apply(&merge_note("a.md"));
    data.apply(&merge_tag("a.md", "#x/y"));
    data.apply(&GraphStatement::MergeTagParent {
        parent: normalize_tag_path("#x").expect("valid tag"),
        child: normalize_tag_path("#x/y").expect("valid tag"),
    });

    data.apply(&GraphStatement::DeleteNote {
        note_id: "a.md".to_string(),
    });

    assert!(data.notes.is_empty());
    assert_eq!(data.edges.len(), 1);
    assert_eq!(data.tags.len(), 2);
}

#[tokio::test]
async fn managed_write_commits_all_statements() {
    let graph = MemoryGraph::new();
    let driver = graph.connect(&connection()).await.expect("connect");
    let mut session = driver.session(None).await.expect("session");

    session
        .execute_write(&[merge_note("n.md"), merge_tag("n.md", "#a")])
        .await
        .expect("write");
    session.close().await.expect("close");

    assert_eq!(graph.targets(Relationship::HasTag, "n.md"), vec!["#a"]);
    let stats = graph.stats();
    assert_eq!(stats.commits, 1);
    assert_eq!(stats.sessions_opened, 1);
    assert_eq!(stats.sessions_closed, 1);
}

#[tokio::test]
async fn explicit_transaction_is_invisible_until_commit() {
    let graph = MemoryGraph::new();
    let driver = graph.connect(&connection()).await.expect("connect");
    let mut session = driver.session(None).await.expect("session");

    let mut transaction = session.begin_transaction().await.expect("begin");
    transaction.run(&merge_note("n.md")).await.expect("run");
    assert_eq!(graph.note_count(), 0);

    transaction.commit().await.expect("commit");
    assert_eq!(graph.note_count(), 1);
}

#[tokio::test]
async fn rollback_discards_buffered_statements() {
    let graph = MemoryGraph::new();
    let driver = graph.connect(&connection()).await.expect("connect");
    let mut session = driver.session(None).await.expect("session");

    let mut transaction = session.begin_transaction().await.expect("begin");
    transaction.run(&merge_note("n.md")).await.expect("run");
    transaction.rollback().await.expect("rollback");

    assert_eq!(graph.note_count(), 0);
    assert_eq!(graph.stats().rollbacks, 1);

    // The session accepts a new transaction once the previous one is finished
    let transaction = session.begin_transaction().await.expect("begin again");
    transaction.rollback().await.expect("rollback again");
}

#[tokio::test]
async fn one_open_transaction_per_session() {
    let graph = MemoryGraph::new();
    let driver = graph.connect(&connection()).await.expect("connect");
    let mut session = driver.session(None).await.expect("session");

    let first = session.begin_transaction().await.expect("begin");
    let second = session.begin_transaction().await;

    assert!(matches!(second, Err(GraphError::Transaction(_))));
    first.rollback().await.expect("rollback");
}

#[tokio::test]
async fn capabilities_gate_write_entry_points() {
    let graph = MemoryGraph::with_capabilities(WriteCapabilities {
        managed: false,
        explicit: true,
    });
    let driver = graph.connect(&connection()).await.expect("connect");
    let mut session = driver.session(None).await.expect("session");

    let managed = session.execute_write(&[merge_note("n.md")]).await;
    assert!(matches!(managed, Err(GraphError::Unsupported(_))));
    assert!(!driver.write_capabilities().managed);
}

#[tokio::test]
async fn connect_fault_is_reported() {
    let graph = MemoryGraph::new();
    graph.fail_connect(true);

    let result = graph.connect(&connection()).await;

    assert!(matches!(result, Err(GraphError::Connection(_))));
    assert_eq!(graph.stats().connects, 1);
}

#[tokio::test]
async fn poisoned_statement_rejects_whole_transaction() {
    let graph = MemoryGraph::new();
    graph.poison_statement(merge_tag("n.md", "#bad"));
    let driver = graph.connect(&connection()).await.expect("connect");
    let mut session = driver.session(None).await.expect("session");

    let result = session
        .execute_write(&[merge_note("n.md"), merge_tag("n.md", "#bad")])
        .await;

    assert!(result.is_err());
    assert_eq!(graph.note_count(), 0);
    assert_eq!(graph.stats().commits, 0);
}
