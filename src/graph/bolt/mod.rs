// Bolt graph backend
// Neo4j-compatible server reached through neo4rs, explicit transactions only

use std::sync::Arc;

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query, Txn, query};
use tracing::debug;

use super::driver::{
    GraphDriver, GraphDriverFactory, GraphSession, WriteCapabilities, WriteTransaction,
};
use super::{GraphCredentials, GraphError, GraphStatement, GraphStoreConnectionConfig, ParamValue};

/// Opens neo4rs connection pools
#[derive(Debug, Clone, Copy, Default)]
pub struct BoltDriverFactory;

/// Use the TLS variant of the URI scheme when encryption is requested
fn effective_uri(uri: &str, encrypted: bool) -> String {
    if !encrypted {
        return uri.to_string();
    }
    match uri.split_once("://") {
        Some((scheme, rest)) if !scheme.contains('+') => format!("{}+s://{}", scheme, rest),
        _ => uri.to_string(),
    }
}

fn to_query(statement: &GraphStatement) -> Query {
    let cypher = statement.to_cypher();
    cypher
        .params
        .into_iter()
        .fold(query(&cypher.text), |q, (name, value)| match value {
            ParamValue::Str(s) => q.param(name, s),
            ParamValue::Int(i) => q.param(name, i),
            ParamValue::List(items) => q.param(name, items),
        })
}

#[async_trait]
impl GraphDriverFactory for BoltDriverFactory {
    async fn connect(
        &self,
        connection: &GraphStoreConnectionConfig,
    ) -> Result<Arc<dyn GraphDriver>, GraphError> {
        let (username, password) = match &connection.credentials {
            Some(GraphCredentials::Basic { username, password }) => (username, password),
            Some(GraphCredentials::Bearer(_)) => {
                return Err(GraphError::Unsupported(
                    "bearer token authentication over bolt".to_string(),
                ));
            }
            None => return Err(GraphError::MissingCredentials(connection.uri.clone())),
        };

        let mut builder = ConfigBuilder::default()
            .uri(effective_uri(&connection.uri, connection.encrypted))
            .user(username.as_str())
            .password(password.as_str());
        if let Some(database) = &connection.database {
            builder = builder.db(database.as_str());
        }
        let config = builder
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;
        debug!("Opened bolt connection pool for {}", connection.uri);

        Ok(Arc::new(BoltDriver { graph }))
    }
}

struct BoltDriver {
    graph: Graph,
}

#[async_trait]
impl GraphDriver for BoltDriver {
    async fn verify_connectivity(&self) -> Result<(), GraphError> {
        self.graph
            .run(query("RETURN 1"))
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))
    }

    fn write_capabilities(&self) -> WriteCapabilities {
        WriteCapabilities {
            managed: false,
            explicit: true,
        }
    }

    async fn session(&self, _database: Option<&str>) -> Result<Box<dyn GraphSession>, GraphError> {
        // The target database is fixed on the pool configuration
        Ok(Box::new(BoltSession {
            graph: self.graph.clone(),
        }))
    }

    async fn close(&self) -> Result<(), GraphError> {
        // Pooled connections are released when the last handle drops
        Ok(())
    }
}

struct BoltSession {
    graph: Graph,
}

#[async_trait]
impl GraphSession for BoltSession {
    async fn execute_write(&mut self, _statements: &[GraphStatement]) -> Result<(), GraphError> {
        Err(GraphError::Unsupported("managed transactions".to_string()))
    }

    async fn begin_transaction(&mut self) -> Result<Box<dyn WriteTransaction>, GraphError> {
        let txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| GraphError::Transaction(e.to_string()))?;
        Ok(Box::new(BoltTransaction { txn }))
    }

    async fn close(&mut self) -> Result<(), GraphError> {
        Ok(())
    }
}

struct BoltTransaction {
    txn: Txn,
}

#[async_trait]
impl WriteTransaction for BoltTransaction {
    async fn run(&mut self, statement: &GraphStatement) -> Result<(), GraphError> {
        self.txn
            .run(to_query(statement))
            .await
            .map_err(|e| GraphError::Transaction(e.to_string()))
    }

    async fn commit(self: Box<Self>) -> Result<(), GraphError> {
        self.txn
            .commit()
            .await
            .map_err(|e| GraphError::Transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), GraphError> {
        self.txn
            .rollback()
            .await
            .map_err(|e| GraphError::Transaction(e.to_string()))
    }
}
