use std::sync::Arc;

use async_trait::async_trait;

use super::{GraphError, GraphStatement, GraphStoreConnectionConfig};

/// Transactional write entry points a driver exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCapabilities {
    /// Driver-managed unit of work (`executeWrite` style)
    pub managed: bool,
    /// Explicit begin / run / commit
    pub explicit: bool,
}

/// Opens drivers for a connection configuration
#[async_trait]
pub trait GraphDriverFactory: Send + Sync {
    async fn connect(
        &self,
        connection: &GraphStoreConnectionConfig,
    ) -> Result<Arc<dyn GraphDriver>, GraphError>;
}

/// An open connection pool to a graph database
#[async_trait]
pub trait GraphDriver: Send + Sync {
    /// Round trip to the server to prove the endpoint and credentials work
    async fn verify_connectivity(&self) -> Result<(), GraphError>;

    fn write_capabilities(&self) -> WriteCapabilities;

    async fn session(&self, database: Option<&str>) -> Result<Box<dyn GraphSession>, GraphError>;

    async fn close(&self) -> Result<(), GraphError>;
}

/// A session holds at most one open write transaction at a time
#[async_trait]
pub trait GraphSession: Send {
    /// Run all statements in one driver-managed transaction
    async fn execute_write(&mut self, statements: &[GraphStatement]) -> Result<(), GraphError>;

    async fn begin_transaction(&mut self) -> Result<Box<dyn WriteTransaction>, GraphError>;

    async fn close(&mut self) -> Result<(), GraphError>;
}

#[async_trait]
pub trait WriteTransaction: Send {
    async fn run(&mut self, statement: &GraphStatement) -> Result<(), GraphError>;

    async fn commit(self: Box<Self>) -> Result<(), GraphError>;

    async fn rollback(self: Box<Self>) -> Result<(), GraphError>;
}
