#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::driver::{GraphDriver, GraphDriverFactory, GraphSession, WriteCapabilities};
use super::{
    GraphError, GraphIndexedNote, GraphStatement, GraphStoreConnectionConfig,
    GraphStoreRuntimeOptions, LinkKind, NoteGraph,
};
use crate::tags::{filter_tags_by_prefixes, normalize_tag_path};

/// How writes are executed, chosen once from the driver's capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    Managed,
    Explicit,
}

impl WriteStrategy {
    /// Prefer the driver-managed unit of work when both are available
    #[inline]
    pub fn from_capabilities(capabilities: WriteCapabilities) -> Option<Self> {
        if capabilities.managed {
            Some(Self::Managed)
        } else if capabilities.explicit {
            Some(Self::Explicit)
        } else {
            None
        }
    }
}

#[derive(Clone)]
struct Connection {
    driver: Arc<dyn GraphDriver>,
    database: Option<String>,
    strategy: WriteStrategy,
    transaction_timeout: Duration,
}

enum State {
    Uninitialized,
    Connected(Connection),
}

/// Owns the graph connection and turns note snapshots into graph writes
pub struct GraphStore {
    factory: Arc<dyn GraphDriverFactory>,
    state: Mutex<State>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish_non_exhaustive()
    }
}

fn check_connection(connection: &GraphStoreConnectionConfig) -> Result<(), GraphError> {
    if connection.uri.is_empty() {
        return Err(GraphError::MissingUri);
    }
    if connection.credentials.is_none() {
        return Err(GraphError::MissingCredentials(connection.uri.clone()));
    }
    Ok(())
}

async fn close_driver(driver: &dyn GraphDriver) {
    if let Err(e) = driver.close().await {
        warn!("Graph driver close encountered an error: {}", e);
    }
}

/// Deduplicate while keeping first-seen order
fn unique(targets: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    targets
        .iter()
        .filter(|target| !target.is_empty() && seen.insert(target.as_str()))
        .cloned()
        .collect()
}

impl GraphStore {
    #[inline]
    pub fn new(factory: Arc<dyn GraphDriverFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(State::Uninitialized),
        }
    }

    #[inline]
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, State::Connected(_))
    }

    /// Open a throwaway driver to test the endpoint and credentials.
    ///
    /// The driver is closed whatever the outcome.
    #[inline]
    pub async fn verify_connection(
        &self,
        connection: &GraphStoreConnectionConfig,
    ) -> Result<(), GraphError> {
        check_connection(connection)?;
        let driver = self.factory.connect(connection).await?;
        let result = driver.verify_connectivity().await;
        close_driver(driver.as_ref()).await;

        match &result {
            Ok(()) => info!("Graph connection verified for {}", connection.uri),
            Err(e) => warn!("Graph connection check failed for {}: {}", connection.uri, e),
        }
        result
    }

    /// The statements of one note upsert, in execution order.
    ///
    /// Returns `None` when the note has nothing eligible to write.
    #[inline]
    pub fn plan_upsert(
        note: &GraphIndexedNote,
        options: &GraphStoreRuntimeOptions,
    ) -> Option<Vec<GraphStatement>> {
        let tags = filter_tags_by_prefixes(
            &note.tags,
            &options.included_tag_prefixes,
            options.index_all_tags,
        );
        let wiki_links = if options.include_wiki_links {
            unique(&note.wiki_link_targets)
        } else {
            Vec::new()
        };
        let embeds = if options.include_embeds {
            unique(&note.embed_targets)
        } else {
            Vec::new()
        };

        if tags.is_empty() && wiki_links.is_empty() && embeds.is_empty() {
            return None;
        }

        let note_id = note.note_id.clone();
        let mut statements = vec![
            GraphStatement::MergeNote {
                note_id: note_id.clone(),
                path: note.note_path.clone(),
                updated_at: note.updated_at,
            },
            GraphStatement::PruneTags {
                note_id: note_id.clone(),
                keep: tags.iter().map(|tag| tag.canonical.clone()).collect(),
            },
        ];

        for tag in &tags {
            statements.push(GraphStatement::MergeTag {
                note_id: note_id.clone(),
                tag: (*tag).clone(),
            });
            for (parent, child) in tag.hierarchy_edges() {
                if let (Some(parent), Some(child)) =
                    (normalize_tag_path(parent), normalize_tag_path(child))
                {
                    statements.push(GraphStatement::MergeTagParent { parent, child });
                }
            }
        }

        for (kind, targets) in [(LinkKind::WikiLink, wiki_links), (LinkKind::Embed, embeds)] {
            statements.push(GraphStatement::PruneLinks {
                note_id: note_id.clone(),
                kind,
                keep: targets.clone(),
            });
            if !targets.is_empty() {
                statements.push(GraphStatement::MergeLinks {
                    note_id: note_id.clone(),
                    kind,
                    targets,
                });
            }
        }

        Some(statements)
    }

    async fn connection(&self) -> Option<Connection> {
        match &*self.state.lock().await {
            State::Connected(connection) => Some(connection.clone()),
            State::Uninitialized => None,
        }
    }

    /// Run statements in one transaction on a fresh session, closing it on every path
    async fn write(
        connection: &Connection,
        statements: &[GraphStatement],
    ) -> Result<(), GraphError> {
        let mut session = connection
            .driver
            .session(connection.database.as_deref())
            .await?;

        let result = tokio::time::timeout(
            connection.transaction_timeout,
            Self::run_transaction(session.as_mut(), connection.strategy, statements),
        )
        .await
        .unwrap_or(Err(GraphError::Timeout(connection.transaction_timeout)));

        if let Err(e) = session.close().await {
            warn!("Graph session close encountered an error: {}", e);
        }
        result
    }

    async fn run_transaction(
        session: &mut dyn GraphSession,
        strategy: WriteStrategy,
        statements: &[GraphStatement],
    ) -> Result<(), GraphError> {
        match strategy {
            WriteStrategy::Managed => session.execute_write(statements).await,
            WriteStrategy::Explicit => {
                let mut transaction = session.begin_transaction().await?;
                for statement in statements {
                    if let Err(e) = transaction.run(statement).await {
                        if let Err(rollback) = transaction.rollback().await {
                            warn!("Graph rollback failed: {}", rollback);
                        }
                        return Err(e);
                    }
                }
                transaction.commit().await
            }
        }
    }
}

#[async_trait]
impl NoteGraph for GraphStore {
    async fn initialize(&self, connection: &GraphStoreConnectionConfig) {
        let mut state = self.state.lock().await;
        if matches!(*state, State::Connected(_)) {
            return;
        }

        if let Err(e) = check_connection(connection) {
            warn!("Graph store initialization skipped: {}", e);
            return;
        }

        let driver = match self.factory.connect(connection).await {
            Ok(driver) => driver,
            Err(e) => {
                error!("Failed to open graph driver for {}: {}", connection.uri, e);
                return;
            }
        };

        if let Err(e) = driver.verify_connectivity().await {
            error!("Graph connectivity check failed for {}: {}", connection.uri, e);
            close_driver(driver.as_ref()).await;
            return;
        }

        let Some(strategy) = WriteStrategy::from_capabilities(driver.write_capabilities()) else {
            error!("Graph driver exposes no transactional write API");
            close_driver(driver.as_ref()).await;
            return;
        };

        info!(
            "Graph store connected to {} using {:?} writes",
            connection.uri, strategy
        );
        *state = State::Connected(Connection {
            driver,
            database: connection.database.clone(),
            strategy,
            transaction_timeout: connection.transaction_timeout,
        });
    }

    async fn upsert_note(
        &self,
        note: &GraphIndexedNote,
        options: &GraphStoreRuntimeOptions,
    ) -> Result<(), GraphError> {
        if !options.enabled {
            debug!("Graph indexing disabled; skipping note {}", note.note_id);
            return Ok(());
        }

        let Some(connection) = self.connection().await else {
            warn!(
                "Graph indexing skipped because the store is not connected: {}",
                note.note_id
            );
            return Ok(());
        };

        let Some(statements) = Self::plan_upsert(note, options) else {
            info!("No eligible tags or links for graph ingestion: {}", note.note_id);
            return Ok(());
        };

        debug!(
            "Upserting note {} with {} graph statements",
            note.note_id,
            statements.len()
        );
        Self::write(&connection, &statements).await.map_err(|e| {
            error!("Graph upsert failed for {}: {}", note.note_id, e);
            e
        })
    }

    async fn remove_note(&self, note_id: &str) -> Result<(), GraphError> {
        let Some(connection) = self.connection().await else {
            warn!("Graph removal skipped because the store is not connected: {}", note_id);
            return Ok(());
        };

        let statements = [GraphStatement::DeleteNote {
            note_id: note_id.to_string(),
        }];
        Self::write(&connection, &statements).await.map_err(|e| {
            error!("Graph removal failed for {}: {}", note_id, e);
            e
        })
    }

    async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock().await, State::Uninitialized);
        if let State::Connected(connection) = previous {
            close_driver(connection.driver.as_ref()).await;
            info!("Graph store shut down");
        }
    }
}
