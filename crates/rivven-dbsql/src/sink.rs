//! Databricks SQL sink lifecycle
//!
//! `configure → open → write* → teardown`. The sink owns one connection and
//! one [`SqlClient`] between `open` and `teardown`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{BatchResult, SqlClient};
use crate::config::DatabricksConfig;
use crate::connection::ConnectionFactory;
use crate::dialect::dialect_for;
use crate::error::{Error, Result};
use crate::query::QueryBuilder;
use crate::record::ChangeRecord;

/// Sink applying CDC records to one Databricks SQL table
pub struct DatabricksSink<F: ConnectionFactory> {
    factory: F,
    config: Option<DatabricksConfig>,
    client: Option<SqlClient>,
}

impl<F: ConnectionFactory> std::fmt::Debug for DatabricksSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabricksSink")
            .field("config", &self.config)
            .field("client", &self.client)
            .finish()
    }
}

impl<F: ConnectionFactory> DatabricksSink<F> {
    /// Create an unconfigured sink
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            config: None,
            client: None,
        }
    }

    /// Create a sink from an already typed configuration
    pub fn with_config(factory: F, config: DatabricksConfig) -> Result<Self> {
        config.check()?;
        Ok(Self {
            factory,
            config: Some(config),
            client: None,
        })
    }

    /// Parse and validate connector properties
    pub fn configure(&mut self, properties: &HashMap<String, String>) -> Result<()> {
        let config = DatabricksConfig::from_properties(properties)?;
        info!(
            host = %config.host_name(),
            table = %config.table_name,
            cast_values = config.cast_values,
            "Databricks sink configured"
        );
        self.config = Some(config);
        Ok(())
    }

    /// Connection factory
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Active configuration
    pub fn config(&self) -> Option<&DatabricksConfig> {
        self.config.as_ref()
    }

    /// Open client, available between `open` and `teardown`
    pub fn client(&self) -> Option<&SqlClient> {
        self.client.as_ref()
    }

    /// Connect and describe the target table
    pub async fn open(&mut self) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| Error::config("sink must be configured before open"))?;

        if let Some(mut previous) = self.client.take() {
            previous.close().await?;
        }

        let conn = self.factory.connect(config).await?;
        let builder = QueryBuilder::with_dialect(Arc::from(dialect_for(self.factory.dialect_name())));
        let mut client = SqlClient::with_options(builder, config.client_options());

        if let Err(e) = client.open(conn.clone(), &config.table_name).await {
            if let Err(close_err) = conn.close().await {
                warn!(error = %close_err, "Failed to close connection after open error");
            }
            return Err(e);
        }

        info!(
            table = %config.table_name,
            columns = client.schema().map(|s| s.len()).unwrap_or_default(),
            "Databricks sink opened"
        );
        self.client = Some(client);
        Ok(())
    }

    /// Apply a batch, stopping at the first failed record
    pub async fn write(
        &self,
        records: &[ChangeRecord],
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        let client = self.client.as_ref().ok_or(Error::NotOpen)?;
        Ok(client.write(records, cancel).await)
    }

    /// Close the connection; no-op when never opened
    pub async fn teardown(&mut self) -> Result<()> {
        if let Some(mut client) = self.client.take() {
            client.close().await?;
            info!(table = %client.table(), "Databricks sink torn down");
        }
        Ok(())
    }
}

#[cfg(feature = "statement-api")]
impl DatabricksSink<crate::statement::StatementConnectionFactory> {
    /// Sink over the Statement Execution API
    pub fn statement_api() -> Self {
        Self::new(crate::statement::StatementConnectionFactory)
    }
}
