//! Table schema discovery for rivven-dbsql
//!
//! The target table is described once when a client opens; every insert
//! afterwards reads its declared column types from the cached [`TableSchema`].

use std::collections::HashMap;
use tracing::debug;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::query::QueryBuilder;
use crate::types::Row;

/// Column metadata as reported by `DESCRIBE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Column name, in the case the backend reports
    pub name: String,
    /// Declared type, e.g. `int`, `decimal(10,2)`, `array<string>`
    pub type_name: String,
    /// Zero-based position in the table
    pub ordinal: usize,
}

impl ColumnMetadata {
    /// Create column metadata
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ordinal,
        }
    }
}

/// Ordered columns of one table with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    table: String,
    columns: Vec<ColumnMetadata>,
    by_name: HashMap<String, usize>,
}

impl TableSchema {
    /// Build a schema from `(name, type)` pairs in table order.
    ///
    /// Later duplicates of a name are ignored.
    pub fn new<N, T>(table: impl Into<String>, columns: impl IntoIterator<Item = (N, T)>) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        let mut schema = Self {
            table: table.into(),
            ..Self::default()
        };
        for (name, type_name) in columns {
            schema.push(name.into(), type_name.into());
        }
        schema
    }

    /// Parse `DESCRIBE` output.
    ///
    /// Rows are `(col_name, data_type, comment)`. Column rows end at the first
    /// blank name or `#` section header; Databricks repeats partition columns
    /// under `# Partition Information`.
    pub fn from_describe_rows(table: impl Into<String>, rows: &[Row]) -> Result<Self> {
        let mut schema = Self {
            table: table.into(),
            ..Self::default()
        };
        for row in rows {
            let name = row
                .get_by_name("col_name")
                .or_else(|| row.get(0))
                .and_then(|v| v.as_str())
                .map(str::trim)
                .unwrap_or_default();
            if name.is_empty() || name.starts_with('#') {
                break;
            }
            let type_name = row
                .get_by_name("data_type")
                .or_else(|| row.get(1))
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    Error::schema_unavailable(
                        schema.table.clone(),
                        format!("no data type reported for column {name}"),
                    )
                })?;
            schema.push(name.to_string(), type_name.to_string());
        }
        Ok(schema)
    }

    fn push(&mut self, name: String, type_name: String) {
        let lookup = name.to_ascii_lowercase();
        if self.by_name.contains_key(&lookup) {
            return;
        }
        let ordinal = self.columns.len();
        self.by_name.insert(lookup, ordinal);
        self.columns.push(ColumnMetadata {
            name,
            type_name,
            ordinal,
        });
    }

    /// Table name the schema was described for
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns in table order
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Number of columns
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get a column by name (ASCII case-insensitive)
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .map(|&idx| &self.columns[idx])
    }

    /// Declared type of a column
    pub fn type_of(&self, name: &str) -> Option<&str> {
        self.column(name).map(|c| c.type_name.as_str())
    }

    /// Whether the table has a column
    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Introspects table schemas through a connection
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    builder: QueryBuilder,
}

impl SchemaCatalog {
    /// Create a catalog rendering its queries with `builder`
    pub fn new(builder: QueryBuilder) -> Self {
        Self { builder }
    }

    /// Describe `table`, failing with `SchemaUnavailable` when the query
    /// fails or reports no columns
    pub async fn describe(&self, conn: &dyn Connection, table: &str) -> Result<TableSchema> {
        let sql = self.builder.describe_table(table)?;
        debug!(table = %table, sql = %sql, "Describing table");

        let rows = conn
            .query(&sql)
            .await
            .map_err(|e| Error::schema_unavailable(table, e.to_string()))?;

        let schema = TableSchema::from_describe_rows(table, &rows)?;
        if schema.is_empty() {
            return Err(Error::schema_unavailable(table, "no columns found"));
        }

        debug!(table = %table, columns = schema.len(), "Table described");
        Ok(schema)
    }
}
