//! Connection traits for rivven-dbsql
//!
//! The warehouse takes statement text only; there are no parameter slots.
//! - Connection: statement execution against one warehouse
//! - ConnectionFactory: creates connections from a [`DatabricksConfig`]

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::DatabricksConfig;
use crate::error::Result;
use crate::types::Row;

/// A connection to a SQL warehouse
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Execute a statement that modifies data, returns affected row count
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Round-trip a trivial query to verify the connection
    async fn ping(&self) -> Result<()> {
        self.query("SELECT 1").await.map(|_| ())
    }

    /// Close the connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &DatabricksConfig) -> Result<Arc<dyn Connection>>;

    /// Name of the dialect the created connections speak
    fn dialect_name(&self) -> &'static str {
        "databricks"
    }
}
