#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::driver::{
    GraphDriver, GraphDriverFactory, GraphSession, WriteCapabilities, WriteTransaction,
};
use super::{GraphError, GraphStatement, GraphStoreConnectionConfig, LinkKind};

/// Relationship types of the note graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relationship {
    HasTag,
    ParentOf,
    LinksTo,
    Embeds,
}

impl From<LinkKind> for Relationship {
    #[inline]
    fn from(kind: LinkKind) -> Self {
        match kind {
            LinkKind::WikiLink => Self::LinksTo,
            LinkKind::Embed => Self::Embeds,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteNode {
    pub path: Option<String>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagNode {
    pub segments: Vec<String>,
    pub hierarchical_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct GraphData {
    notes: BTreeMap<String, NoteNode>,
    tags: BTreeMap<String, TagNode>,
    /// `(relationship, from, to)`; note ids for notes, canonical values for tags
    edges: BTreeSet<(Relationship, String, String)>,
}

impl GraphData {
    fn apply(&mut self, statement: &GraphStatement) {
        match statement {
            GraphStatement::MergeNote {
                note_id,
                path,
                updated_at,
            } => {
                let node = self.notes.entry(note_id.clone()).or_default();
                node.path = Some(path.clone());
                node.updated_at = Some(*updated_at);
            }
            GraphStatement::PruneTags { note_id, keep } => {
                self.edges.retain(|(rel, from, to)| {
                    !(*rel == Relationship::HasTag && from == note_id && !keep.contains(to))
                });
            }
            GraphStatement::MergeTag { note_id, tag } => {
                if !self.notes.contains_key(note_id) {
                    return;
                }
                self.tags.insert(
                    tag.canonical.clone(),
                    TagNode {
                        segments: tag.segments.clone(),
                        hierarchical_paths: tag.hierarchical_paths.clone(),
                    },
                );
                self.edges.insert((
                    Relationship::HasTag,
                    note_id.clone(),
                    tag.canonical.clone(),
                ));
            }
            GraphStatement::MergeTagParent { parent, child } => {
                for tag in [parent, child] {
                    self.tags
                        .entry(tag.canonical.clone())
                        .or_insert_with(|| TagNode {
                            segments: tag.segments.clone(),
                            hierarchical_paths: tag.hierarchical_paths.clone(),
                        });
                }
                self.edges.insert((
                    Relationship::ParentOf,
                    parent.canonical.clone(),
                    child.canonical.clone(),
                ));
            }
            GraphStatement::PruneLinks {
                note_id,
                kind,
                keep,
            } => {
                let relationship = Relationship::from(*kind);
                self.edges.retain(|(rel, from, to)| {
                    !(*rel == relationship && from == note_id && !keep.contains(to))
                });
            }
            GraphStatement::MergeLinks {
                note_id,
                kind,
                targets,
            } => {
                if !self.notes.contains_key(note_id) {
                    return;
                }
                for target in targets {
                    self.notes
                        .entry(target.clone())
                        .or_insert_with(|| NoteNode {
                            path: Some(target.clone()),
                            updated_at: None,
                        });
                    self.edges.insert((
                        Relationship::from(*kind),
                        note_id.clone(),
                        target.clone(),
                    ));
                }
            }
            GraphStatement::DeleteNote { note_id } => {
                self.notes.remove(note_id);
                self.edges.retain(|(rel, from, to)| {
                    *rel == Relationship::ParentOf || (from != note_id && to != note_id)
                });
            }
        }
    }
}

/// Activity counters, for status output and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryGraphStats {
    pub connects: usize,
    pub verifications: usize,
    pub drivers_closed: usize,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    verifications: AtomicUsize,
    drivers_closed: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

#[derive(Debug, Default)]
struct Faults {
    connect: bool,
    verify: bool,
    failing_writes: usize,
    /// Commit no transaction whose statements include this one
    poison: Option<GraphStatement>,
    hang: bool,
}

#[derive(Debug)]
struct Inner {
    data: Mutex<GraphData>,
    capabilities: WriteCapabilities,
    counters: Counters,
    faults: Mutex<Faults>,
}

/// In-process property graph that behaves like a transactional graph database.
///
/// Cloning shares the underlying graph, so the same instance can serve as the
/// driver factory and be inspected afterwards.
#[derive(Debug, Clone)]
pub struct MemoryGraph {
    inner: Arc<Inner>,
}

impl Default for MemoryGraph {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MemoryGraph {
    #[inline]
    pub fn new() -> Self {
        Self::with_capabilities(WriteCapabilities {
            managed: true,
            explicit: true,
        })
    }

    #[inline]
    pub fn with_capabilities(capabilities: WriteCapabilities) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(GraphData::default()),
                capabilities,
                counters: Counters::default(),
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    /// Make `connect` fail until cleared
    #[inline]
    pub fn fail_connect(&self, fail: bool) {
        lock(&self.inner.faults).connect = fail;
    }

    /// Make connectivity checks fail until cleared
    #[inline]
    pub fn fail_verify(&self, fail: bool) {
        lock(&self.inner.faults).verify = fail;
    }

    /// Fail the next `count` transactions
    #[inline]
    pub fn fail_next_writes(&self, count: usize) {
        lock(&self.inner.faults).failing_writes = count;
    }

    /// Fail any transaction that contains `statement`
    #[inline]
    pub fn poison_statement(&self, statement: GraphStatement) {
        lock(&self.inner.faults).poison = Some(statement);
    }

    /// Make transactions never complete
    #[inline]
    pub fn hang_writes(&self, hang: bool) {
        lock(&self.inner.faults).hang = hang;
    }

    #[inline]
    pub fn stats(&self) -> MemoryGraphStats {
        let c = &self.inner.counters;
        MemoryGraphStats {
            connects: c.connects.load(Ordering::SeqCst),
            verifications: c.verifications.load(Ordering::SeqCst),
            drivers_closed: c.drivers_closed.load(Ordering::SeqCst),
            sessions_opened: c.sessions_opened.load(Ordering::SeqCst),
            sessions_closed: c.sessions_closed.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
        }
    }

    #[inline]
    pub fn note(&self, note_id: &str) -> Option<NoteNode> {
        lock(&self.inner.data).notes.get(note_id).cloned()
    }

    #[inline]
    pub fn tag(&self, canonical: &str) -> Option<TagNode> {
        lock(&self.inner.data).tags.get(canonical).cloned()
    }

    #[inline]
    pub fn note_count(&self) -> usize {
        lock(&self.inner.data).notes.len()
    }

    #[inline]
    pub fn tag_count(&self) -> usize {
        lock(&self.inner.data).tags.len()
    }

    /// Targets of `relationship` edges leaving `from`, sorted
    #[inline]
    pub fn targets(&self, relationship: Relationship, from: &str) -> Vec<String> {
        lock(&self.inner.data)
            .edges
            .iter()
            .filter(|(rel, source, _)| *rel == relationship && source == from)
            .map(|(_, _, to)| to.clone())
            .collect()
    }

    #[inline]
    pub fn edge_count(&self, relationship: Relationship) -> usize {
        lock(&self.inner.data)
            .edges
            .iter()
            .filter(|(rel, _, _)| *rel == relationship)
            .count()
    }

    fn count(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Apply statements atomically: all of them or none
    async fn commit(&self, statements: &[GraphStatement]) -> Result<(), GraphError> {
        let hang = {
            let mut faults = lock(&self.inner.faults);
            if faults.failing_writes > 0 {
                faults.failing_writes -= 1;
                Self::count(&self.inner.counters.rollbacks);
                return Err(GraphError::Transaction("injected write failure".to_string()));
            }
            if let Some(poison) = faults.poison.as_ref().filter(|p| statements.contains(p)) {
                Self::count(&self.inner.counters.rollbacks);
                return Err(GraphError::Transaction(format!(
                    "statement rejected: {}",
                    poison.to_cypher().text
                )));
            }
            faults.hang
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut data = lock(&self.inner.data);
        let mut staged = data.clone();
        for statement in statements {
            staged.apply(statement);
        }
        *data = staged;
        Self::count(&self.inner.counters.commits);
        debug!("Committed {} statements to memory graph", statements.len());
        Ok(())
    }
}

#[async_trait]
impl GraphDriverFactory for MemoryGraph {
    async fn connect(
        &self,
        connection: &GraphStoreConnectionConfig,
    ) -> Result<Arc<dyn GraphDriver>, GraphError> {
        Self::count(&self.inner.counters.connects);
        if lock(&self.inner.faults).connect {
            return Err(GraphError::Connection(format!(
                "cannot reach {}",
                connection.uri
            )));
        }
        Ok(Arc::new(MemoryDriver {
            graph: self.clone(),
        }))
    }
}

#[derive(Debug)]
struct MemoryDriver {
    graph: MemoryGraph,
}

#[async_trait]
impl GraphDriver for MemoryDriver {
    async fn verify_connectivity(&self) -> Result<(), GraphError> {
        MemoryGraph::count(&self.graph.inner.counters.verifications);
        if lock(&self.graph.inner.faults).verify {
            return Err(GraphError::Connection("authentication failed".to_string()));
        }
        Ok(())
    }

    fn write_capabilities(&self) -> WriteCapabilities {
        self.graph.inner.capabilities
    }

    async fn session(&self, _database: Option<&str>) -> Result<Box<dyn GraphSession>, GraphError> {
        MemoryGraph::count(&self.graph.inner.counters.sessions_opened);
        Ok(Box::new(MemorySession {
            graph: self.graph.clone(),
            in_transaction: Arc::new(AtomicUsize::new(0)),
        }))
    }

    async fn close(&self) -> Result<(), GraphError> {
        MemoryGraph::count(&self.graph.inner.counters.drivers_closed);
        Ok(())
    }
}

#[derive(Debug)]
struct MemorySession {
    graph: MemoryGraph,
    /// Number of open transactions, never more than one
    in_transaction: Arc<AtomicUsize>,
}

#[async_trait]
impl GraphSession for MemorySession {
    async fn execute_write(&mut self, statements: &[GraphStatement]) -> Result<(), GraphError> {
        if !self.graph.inner.capabilities.managed {
            return Err(GraphError::Unsupported("managed transactions".to_string()));
        }
        self.graph.commit(statements).await
    }

    async fn begin_transaction(&mut self) -> Result<Box<dyn WriteTransaction>, GraphError> {
        if !self.graph.inner.capabilities.explicit {
            return Err(GraphError::Unsupported("explicit transactions".to_string()));
        }
        if self.in_transaction.fetch_add(1, Ordering::SeqCst) > 0 {
            self.in_transaction.fetch_sub(1, Ordering::SeqCst);
            return Err(GraphError::Transaction(
                "session already has an open transaction".to_string(),
            ));
        }
        Ok(Box::new(MemoryTransaction {
            graph: self.graph.clone(),
            pending: Vec::new(),
            open: Arc::clone(&self.in_transaction),
        }))
    }

    async fn close(&mut self) -> Result<(), GraphError> {
        MemoryGraph::count(&self.graph.inner.counters.sessions_closed);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryTransaction {
    graph: MemoryGraph,
    pending: Vec<GraphStatement>,
    open: Arc<AtomicUsize>,
}

#[async_trait]
impl WriteTransaction for MemoryTransaction {
    async fn run(&mut self, statement: &GraphStatement) -> Result<(), GraphError> {
        self.pending.push(statement.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), GraphError> {
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.graph.commit(&self.pending).await
    }

    async fn rollback(self: Box<Self>) -> Result<(), GraphError> {
        self.open.fetch_sub(1, Ordering::SeqCst);
        MemoryGraph::count(&self.graph.inner.counters.rollbacks);
        Ok(())
    }
}
