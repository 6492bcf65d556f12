//! Mutation dispatcher
//!
//! [`SqlClient`] routes each [`ChangeRecord`] by operation to the matching
//! statement, executes it over the open connection and interprets the
//! affected row count:
//!
//! | Operation          | Statement | Row count                    |
//! |--------------------|-----------|------------------------------|
//! | Create / Snapshot  | INSERT    | exactly one row, else error  |
//! | Update             | UPDATE    | not checked (warns on zero)  |
//! | Delete             | DELETE    | not checked (warns on zero)  |

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::query::{ColumnValue, MutationStatement, QueryBuilder};
use crate::record::{normalize, overlay, ChangeRecord, ColumnMap, NormalizedRecord, Operation};
use crate::schema::{SchemaCatalog, TableSchema};

/// Client tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlClientOptions {
    /// Cast inserted values to their declared column types
    pub cast_values: bool,
    /// Upper bound on a single statement
    pub query_timeout: Duration,
}

impl Default for SqlClientOptions {
    fn default() -> Self {
        Self {
            cast_values: true,
            query_timeout: Duration::from_secs(300),
        }
    }
}

/// The first record of a batch that failed
#[derive(Debug)]
pub struct FailedRecord {
    /// Position of the record in the batch
    pub index: usize,
    /// Operation of the failed record
    pub operation: Operation,
    /// Why it failed
    pub error: Error,
}

/// Outcome of [`SqlClient::write`]
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Records applied before the first failure
    pub written: usize,
    /// The failure that stopped the batch, if any
    pub failed: Option<FailedRecord>,
}

impl BatchResult {
    /// Whether every record was applied
    #[inline]
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }

    /// Convert into the written count, or the error that stopped the batch
    pub fn into_result(self) -> Result<usize> {
        match self.failed {
            Some(failed) => Err(failed.error),
            None => Ok(self.written),
        }
    }
}

/// Applies CDC records to one table
pub struct SqlClient {
    builder: QueryBuilder,
    catalog: SchemaCatalog,
    options: SqlClientOptions,
    conn: Option<Arc<dyn Connection>>,
    table: String,
    schema: TableSchema,
}

impl std::fmt::Debug for SqlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlClient")
            .field("dialect", &self.builder.dialect().name())
            .field("options", &self.options)
            .field("table", &self.table)
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl Default for SqlClient {
    fn default() -> Self {
        Self::new(QueryBuilder::default())
    }
}

impl SqlClient {
    /// Create a client with default options
    pub fn new(builder: QueryBuilder) -> Self {
        Self::with_options(builder, SqlClientOptions::default())
    }

    /// Create a client with explicit options
    pub fn with_options(builder: QueryBuilder, options: SqlClientOptions) -> Self {
        Self {
            catalog: SchemaCatalog::new(builder.clone()),
            builder,
            options,
            conn: None,
            table: String::new(),
            schema: TableSchema::default(),
        }
    }

    /// Client options
    pub fn options(&self) -> &SqlClientOptions {
        &self.options
    }

    /// Target table, empty until opened
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether `open` has succeeded
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Cached schema of the target table
    pub fn schema(&self) -> Option<&TableSchema> {
        self.conn.as_ref().map(|_| &self.schema)
    }

    /// Verify the connection and describe `table`.
    ///
    /// Replaces any previously opened connection and schema.
    pub async fn open(&mut self, conn: Arc<dyn Connection>, table: &str) -> Result<&TableSchema> {
        conn.ping().await?;
        let schema = self.catalog.describe(conn.as_ref(), table).await?;

        info!(
            table = %table,
            columns = schema.len(),
            dialect = self.builder.dialect().name(),
            "SQL client opened"
        );

        self.table = table.to_string();
        self.schema = schema;
        self.conn = Some(conn);
        Ok(&self.schema)
    }

    /// Close the connection; no-op when not open
    pub async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
            info!(table = %self.table, "SQL client closed");
        }
        Ok(())
    }

    /// Insert the merged key and payload as one row
    pub async fn insert(&self, record: &ChangeRecord, cancel: &CancellationToken) -> Result<()> {
        let conn = self.connection()?;
        let normalized = normalize(record)?;
        let columns = self.insert_columns(&normalized);
        let stmt = self
            .builder
            .build_insert_columns(&self.table, &columns, self.options.cast_values)?;

        let affected = self.run(conn, record.operation, stmt, cancel).await?;
        if affected != 1 {
            return Err(Error::UnexpectedRowCount { affected });
        }
        Ok(())
    }

    /// Update the row identified by the key with the payload fields.
    ///
    /// An empty payload is a no-op.
    pub async fn update(&self, record: &ChangeRecord, cancel: &CancellationToken) -> Result<()> {
        let conn = self.connection()?;
        let normalized = normalize(record)?;
        if normalized.payload.is_empty() {
            debug!(table = %self.table, position = ?record.position, "Update without payload, skipping");
            return Ok(());
        }
        let stmt = self
            .builder
            .build_update(&self.table, &normalized.key, &normalized.payload)?;

        let affected = self.run(conn, record.operation, stmt, cancel).await?;
        if affected == 0 {
            warn!(table = %self.table, position = ?record.position, "Update matched no rows");
        }
        Ok(())
    }

    /// Delete the row identified by the key; the after-image is never read
    pub async fn delete(&self, record: &ChangeRecord, cancel: &CancellationToken) -> Result<()> {
        let conn = self.connection()?;
        let key = record.key_columns()?;
        let stmt = self.builder.build_delete(&self.table, &key)?;

        let affected = self.run(conn, record.operation, stmt, cancel).await?;
        if affected == 0 {
            warn!(table = %self.table, position = ?record.position, "Delete matched no rows");
        }
        Ok(())
    }

    /// Route a record by its operation
    pub async fn dispatch(&self, record: &ChangeRecord, cancel: &CancellationToken) -> Result<()> {
        match record.operation {
            Operation::Create | Operation::Snapshot => self.insert(record, cancel).await,
            Operation::Update => self.update(record, cancel).await,
            Operation::Delete => self.delete(record, cancel).await,
        }
    }

    /// Apply records in order, stopping at the first failure
    pub async fn write(&self, records: &[ChangeRecord], cancel: &CancellationToken) -> BatchResult {
        debug!(table = %self.table, records = records.len(), "Writing batch");

        let mut result = BatchResult::default();
        for (index, record) in records.iter().enumerate() {
            let operation = record.operation.as_str();
            match self.dispatch(record, cancel).await {
                Ok(()) => {
                    result.written += 1;
                    counter!("dbsql.records.written", "operation" => operation).increment(1);
                }
                Err(error) => {
                    counter!("dbsql.records.failed", "operation" => operation).increment(1);
                    warn!(
                        table = %self.table,
                        index,
                        operation,
                        position = ?record.position,
                        error = %error,
                        "Record failed, stopping batch"
                    );
                    result.failed = Some(FailedRecord {
                        index,
                        operation: record.operation,
                        error,
                    });
                    break;
                }
            }
        }

        debug!(table = %self.table, written = result.written, failed = !result.is_success(), "Batch finished");
        result
    }

    fn connection(&self) -> Result<&Arc<dyn Connection>> {
        self.conn.as_ref().ok_or(Error::NotOpen)
    }

    /// Schema-known columns in table order, then unknown fields by name.
    ///
    /// Field names matching a schema column case-insensitively take the
    /// schema's spelling, so `ID` in the key and `id` in the payload land in
    /// one column; the payload wins.
    fn insert_columns(&self, normalized: &NormalizedRecord) -> Vec<ColumnValue> {
        let fold = |fields: &ColumnMap| -> ColumnMap {
            fields
                .iter()
                .map(|(name, value)| {
                    let name = self
                        .schema
                        .column(name)
                        .map_or_else(|| name.clone(), |c| c.name.clone());
                    (name, value.clone())
                })
                .collect()
        };
        let merged = overlay(&fold(&normalized.key), &fold(&normalized.payload));

        let mut known = Vec::with_capacity(merged.len());
        let mut unknown = Vec::new();
        for (name, value) in merged {
            match self.schema.column(&name) {
                Some(column) => known.push((
                    column.ordinal,
                    ColumnValue::new(name, value, Some(column.type_name.clone())),
                )),
                None => unknown.push(ColumnValue::new(name, value, None)),
            }
        }
        known.sort_by_key(|(ordinal, _)| *ordinal);
        known
            .into_iter()
            .map(|(_, column)| column)
            .chain(unknown)
            .collect()
    }

    async fn run(
        &self,
        conn: &Arc<dyn Connection>,
        operation: Operation,
        stmt: MutationStatement,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let sql = stmt.sql();
        trace!(table = %self.table, operation = operation.as_str(), sql = %sql, "Executing statement");

        let timeout = self.options.query_timeout;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::cancelled(format!("{operation} on {} abandoned", self.table)));
            }
            outcome = tokio::time::timeout(timeout, conn.execute(sql)) => outcome,
        };

        let affected = match outcome {
            Ok(Ok(affected)) => affected,
            Ok(Err(Error::ExecutionFailed { message, sql: None })) => {
                return Err(Error::execution_with_sql(message, sql));
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::timeout(format!(
                    "{operation} on {} exceeded {timeout:?}",
                    self.table
                )));
            }
        };

        counter!("dbsql.statements.executed", "operation" => operation.as_str()).increment(1);
        Ok(affected)
    }
}
