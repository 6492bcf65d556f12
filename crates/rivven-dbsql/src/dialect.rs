//! SQL dialect abstraction for rivven-dbsql
//!
//! The dialect owns everything that differs between backends when values are
//! inlined instead of bound:
//! - Identifier quoting (backticks for Databricks, double quotes for ANSI)
//! - String literal escaping
//! - Literal formatting for every [`Value`] variant
//! - Cast expressions for type-aware inserts
//!
//! A dialect is passed to [`QueryBuilder`](crate::query::QueryBuilder) at
//! construction; there is no global registration.

use crate::error::{Error, Result};
use crate::security::{is_complex_type, split_table_name};
use crate::types::Value;
use sea_query::{Alias, IntoIden, TableRef};

/// sea-query backend used to render statements for a dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderBackend {
    /// Backtick-quoted identifiers (`MysqlQueryBuilder`)
    Backtick,
    /// Double-quoted identifiers (`PostgresQueryBuilder`)
    DoubleQuote,
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync + std::fmt::Debug {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Which sea-query backend renders this dialect's statements
    fn render_backend(&self) -> RenderBackend;

    /// Quote an identifier (table segment, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Escape the body of a single-quoted string literal
    fn escape_string(&self, value: &str) -> String;

    /// Get the boolean literal
    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    /// Render a single-quoted string literal
    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", self.escape_string(value))
    }

    /// Render a value as an inline SQL literal
    fn format_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => self.boolean_literal(*b).to_string(),
            Value::Number(n) => n.to_string(),
            Value::Text(s) | Value::Composite(s) => self.string_literal(s),
        }
    }

    /// Render a value converted to `type_name`.
    ///
    /// `type_name` must already be validated.
    fn cast_literal(&self, value: &Value, type_name: &str) -> String {
        format!("CAST({} AS {})", self.format_literal(value), type_name)
    }

    /// Quote a possibly qualified table name segment by segment
    fn quote_table(&self, table: &str) -> Result<String> {
        let segments = split_table_name(table)?;
        Ok(segments
            .iter()
            .map(|s| self.quote_identifier(s))
            .collect::<Vec<_>>()
            .join("."))
    }

    /// Get the SQL that lists a table's columns and declared types
    fn describe_table_sql(&self, table: &str) -> Result<String> {
        Ok(format!("DESCRIBE TABLE {}", self.quote_table(table)?))
    }
}

/// Build a sea-query table reference from a possibly qualified name
pub(crate) fn sea_table_ref(table: &str) -> Result<TableRef> {
    let segments = split_table_name(table)?;
    let iden = |s: &str| Alias::new(s).into_iden();
    Ok(match segments.as_slice() {
        [catalog, schema, name] => {
            TableRef::DatabaseSchemaTable(iden(catalog), iden(schema), iden(name))
        }
        [schema, name] => TableRef::SchemaTable(iden(schema), iden(name)),
        [name] => TableRef::Table(iden(name)),
        _ => {
            return Err(Error::InvalidIdentifier {
                name: table.to_string(),
                reason: "expected at most catalog.schema.table",
            })
        }
    })
}

// ===========================================================================
// Databricks SQL: backtick identifiers, backslash-escaped literals
// ===========================================================================

/// Databricks SQL (Spark SQL) dialect
///
/// Identifiers are enclosed in backticks. Inside string literals Spark treats
/// the backslash as an escape character, and two adjacent quoted strings are
/// concatenated, so a doubled single quote does not escape. Both backslashes
/// and quotes are therefore backslash-escaped.
#[derive(Debug, Clone, Default)]
pub struct DatabricksDialect;

impl SqlDialect for DatabricksDialect {
    fn name(&self) -> &'static str {
        "Databricks"
    }

    fn render_backend(&self) -> RenderBackend {
        RenderBackend::Backtick
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn escape_string(&self, value: &str) -> String {
        // Fast path: no escaping needed (common case)
        if !value.contains(['\\', '\'']) {
            return value.to_string();
        }
        let mut out = String::with_capacity(value.len() + 8);
        for c in value.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\'' => out.push_str("\\'"),
                other => out.push(other),
            }
        }
        out
    }

    fn cast_literal(&self, value: &Value, type_name: &str) -> String {
        match value {
            // CAST from STRING to a nested type is not allowed; parse the JSON instead
            Value::Composite(json) if is_complex_type(type_name) => format!(
                "from_json({}, {})",
                self.string_literal(json),
                self.string_literal(type_name)
            ),
            _ => format!("CAST({} AS {})", self.format_literal(value), type_name),
        }
    }
}

// ===========================================================================
// ANSI: double-quoted identifiers, doubled single quotes
// ===========================================================================

/// ANSI SQL dialect
#[derive(Debug, Clone, Default)]
pub struct AnsiDialect;

impl SqlDialect for AnsiDialect {
    fn name(&self) -> &'static str {
        "ANSI"
    }

    fn render_backend(&self) -> RenderBackend {
        RenderBackend::DoubleQuote
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn escape_string(&self, value: &str) -> String {
        value.replace('\'', "''")
    }
}

/// Get dialect by name
pub fn dialect_for(name: &str) -> Box<dyn SqlDialect> {
    match name.to_lowercase().as_str() {
        "ansi" => Box::new(AnsiDialect),
        _ => Box::new(DatabricksDialect), // Default to Databricks
    }
}
