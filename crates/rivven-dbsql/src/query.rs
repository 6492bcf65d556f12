//! Mutation synthesis
//!
//! Builds INSERT / UPDATE / DELETE text with every value inlined as a literal.
//! sea-query assembles the statement structure and quotes identifiers; each
//! value enters as a custom expression produced by the dialect's literal
//! formatter, which is the only place escaping happens.

use sea_query::{
    Alias, Expr, MysqlQueryBuilder, PostgresQueryBuilder, Query, QueryStatementWriter,
    SimpleExpr,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::dialect::{sea_table_ref, DatabricksDialect, RenderBackend, SqlDialect};
use crate::error::{Error, Result, StatementKind};
use crate::security::{validate_column_name, validate_type_name};
use crate::types::Value;

/// A rendered statement, ready to hand to a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationStatement {
    sql: String,
}

impl MutationStatement {
    /// The SQL text
    #[inline]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Consume into the SQL text
    pub fn into_sql(self) -> String {
        self.sql
    }
}

impl fmt::Display for MutationStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// One column of an insert, with the type the catalog reports for it
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    /// Column name
    pub name: String,
    /// Value to inline
    pub value: Value,
    /// Declared column type (None when the table schema does not know the column)
    pub declared_type: Option<String>,
}

impl ColumnValue {
    /// Create a column value
    pub fn new(name: impl Into<String>, value: Value, declared_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
            declared_type,
        }
    }
}

/// Renders dialect-specific mutation statements
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    dialect: Arc<dyn SqlDialect>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new(DatabricksDialect)
    }
}

impl QueryBuilder {
    /// Create a builder for the given dialect
    pub fn new(dialect: impl SqlDialect + 'static) -> Self {
        Self {
            dialect: Arc::new(dialect),
        }
    }

    /// Create a builder sharing an existing dialect
    pub fn with_dialect(dialect: Arc<dyn SqlDialect>) -> Self {
        Self { dialect }
    }

    /// The active dialect
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Build an insert statement.
    ///
    /// With `types`, every value that has a declared type is wrapped in a
    /// cast to that type; `None` entries are inlined as plain literals.
    pub fn build_insert(
        &self,
        table: &str,
        columns: &[&str],
        values: &[Value],
        types: Option<&[Option<&str>]>,
    ) -> Result<MutationStatement> {
        if table.trim().is_empty() {
            return Err(Error::missing_table(StatementKind::Insert));
        }
        if columns.len() != values.len() {
            return Err(Error::ArityMismatch {
                left: columns.len(),
                left_label: "column",
                right: values.len(),
                right_label: "value",
            });
        }
        if let Some(types) = types {
            if values.len() != types.len() {
                return Err(Error::ArityMismatch {
                    left: values.len(),
                    left_label: "value",
                    right: types.len(),
                    right_label: "type",
                });
            }
        }
        if columns.is_empty() {
            return Err(Error::MissingValues);
        }

        let mut exprs = Vec::with_capacity(values.len());
        for (i, (column, value)) in columns.iter().zip(values).enumerate() {
            validate_column_name(column)?;
            let declared = types.and_then(|t| t[i]);
            let literal = match declared {
                Some(type_name) => {
                    validate_type_name(type_name).map_err(|_| Error::InvalidTypeName {
                        column: column.to_string(),
                        type_name: type_name.to_string(),
                    })?;
                    self.dialect.cast_literal(value, type_name)
                }
                None => self.dialect.format_literal(value),
            };
            exprs.push(Expr::cust(literal));
        }

        let mut stmt = Query::insert();
        stmt.into_table(sea_table_ref(table)?)
            .columns(columns.iter().map(|c| Alias::new(*c)))
            .values_panic(exprs);

        Ok(self.render(&stmt))
    }

    /// Build an insert statement from catalog-reconciled columns
    pub fn build_insert_columns(
        &self,
        table: &str,
        columns: &[ColumnValue],
        cast_values: bool,
    ) -> Result<MutationStatement> {
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let values: Vec<Value> = columns.iter().map(|c| c.value.clone()).collect();
        if cast_values {
            let types: Vec<Option<&str>> =
                columns.iter().map(|c| c.declared_type.as_deref()).collect();
            self.build_insert(table, &names, &values, Some(&types))
        } else {
            self.build_insert(table, &names, &values, None)
        }
    }

    /// Build an update statement: `SET` from `values`, `WHERE` from `keys`
    pub fn build_update(
        &self,
        table: &str,
        keys: &BTreeMap<String, Value>,
        values: &BTreeMap<String, Value>,
    ) -> Result<MutationStatement> {
        if table.trim().is_empty() {
            return Err(Error::missing_table(StatementKind::Update));
        }
        if keys.is_empty() {
            return Err(Error::MissingKeys);
        }
        if values.is_empty() {
            return Err(Error::MissingValues);
        }

        let mut stmt = Query::update();
        stmt.table(sea_table_ref(table)?);
        for (column, value) in values {
            validate_column_name(column)?;
            stmt.value(
                Alias::new(column.as_str()),
                Expr::cust(self.dialect.format_literal(value)),
            );
        }
        stmt.and_where(self.key_predicate(keys)?);

        Ok(self.render(&stmt))
    }

    /// Build a delete statement with a conjunctive key predicate
    pub fn build_delete(
        &self,
        table: &str,
        keys: &BTreeMap<String, Value>,
    ) -> Result<MutationStatement> {
        if table.trim().is_empty() {
            return Err(Error::missing_table(StatementKind::Delete));
        }
        if keys.is_empty() {
            return Err(Error::MissingKeys);
        }

        let mut stmt = Query::delete();
        stmt.from_table(sea_table_ref(table)?);
        stmt.and_where(self.key_predicate(keys)?);

        Ok(self.render(&stmt))
    }

    /// Build the introspection query for a table
    pub fn describe_table(&self, table: &str) -> Result<String> {
        if table.trim().is_empty() {
            return Err(Error::missing_table(StatementKind::Describe));
        }
        self.dialect.describe_table_sql(table)
    }

    /// Conjunction of `col = literal` terms, one per key, as a single custom
    /// expression so sea-query emits it unparenthesized
    fn key_predicate(&self, keys: &BTreeMap<String, Value>) -> Result<SimpleExpr> {
        let terms = keys
            .iter()
            .map(|(column, value)| {
                validate_column_name(column)?;
                let column = self.dialect.quote_identifier(column);
                Ok(match value {
                    // `col = NULL` never matches
                    Value::Null => format!("{column} IS NULL"),
                    other => format!("{column} = {}", self.dialect.format_literal(other)),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Expr::cust(terms.join(" AND ")))
    }

    fn render(&self, stmt: &impl QueryStatementWriter) -> MutationStatement {
        let sql = match self.dialect.render_backend() {
            RenderBackend::Backtick => stmt.to_string(MysqlQueryBuilder),
            RenderBackend::DoubleQuote => stmt.to_string(PostgresQueryBuilder),
        };
        MutationStatement { sql }
    }
}
