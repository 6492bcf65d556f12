//! Validation for text that is inlined into SQL.
//!
//! The warehouse accepts no bound parameters, so everything ends up in the
//! statement text. Values go through the dialect's literal formatter;
//! identifiers and declared types are checked here before rendering.

use crate::error::{Error, Result};

/// Maximum identifier / type length accepted for inlining.
const MAX_LEN: usize = 255;

/// Validate a column name supplied to the synthesizer.
///
/// Column names come from the schema or the record, so arbitrary characters
/// are allowed (the dialect quotes and escapes them). They must be non-empty
/// and bounded, and must not contain control characters.
///
/// # Examples
///
/// ```
/// use rivven_dbsql::security::validate_column_name;
///
/// assert!(validate_column_name("updated_at").is_ok());
/// assert!(validate_column_name("order").is_ok());
/// assert!(validate_column_name("").is_err());
/// ```
pub fn validate_column_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier {
            name: name.to_string(),
            reason: "column names must not be empty",
        });
    }
    if name.len() > MAX_LEN {
        return Err(Error::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier too long (max 255)",
        });
    }
    if name.chars().any(char::is_control) {
        return Err(Error::InvalidIdentifier {
            name: name.to_string(),
            reason: "identifier contains control characters",
        });
    }
    Ok(())
}

/// Split a possibly qualified table name (`catalog.schema.table`) into
/// its segments.
///
/// Every segment must be non-blank and at most three segments are allowed.
///
/// # Examples
///
/// ```
/// use rivven_dbsql::security::split_table_name;
///
/// assert_eq!(split_table_name("main.default.users").unwrap(), vec!["main", "default", "users"]);
/// assert_eq!(split_table_name("users").unwrap(), vec!["users"]);
/// assert!(split_table_name("a..b").is_err());
/// ```
pub fn split_table_name(table: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = table.trim().split('.').collect();
    if segments.len() > 3 {
        return Err(Error::InvalidIdentifier {
            name: table.to_string(),
            reason: "expected at most catalog.schema.table",
        });
    }
    for segment in &segments {
        if segment.trim().is_empty() {
            return Err(Error::InvalidIdentifier {
                name: table.to_string(),
                reason: "table name segments must not be blank",
            });
        }
        validate_column_name(segment)?;
    }
    Ok(segments)
}

/// Validate a declared SQL type for use inside a `CAST(... AS <type>)`.
///
/// Allows what `DESCRIBE` reports for Databricks types:
/// - ASCII letters, digits, underscores: `INT`, `BIGINT`, `TIMESTAMP_NTZ`
/// - Parentheses, commas, periods and spaces: `DECIMAL(10,2)`, `INTERVAL DAY TO SECOND`
/// - Angle brackets and colons: `ARRAY<STRING>`, `STRUCT<a:INT,b:STRING>`
///
/// Rejects quotes, backticks, semicolons, comment markers and anything else
/// that could leave the type position.
///
/// # Examples
///
/// ```
/// use rivven_dbsql::security::validate_type_name;
///
/// assert!(validate_type_name("varchar(100)").is_ok());
/// assert!(validate_type_name("map<string,array<int>>").is_ok());
/// assert!(validate_type_name("int); DROP TABLE t; --").is_err());
/// ```
pub fn validate_type_name(type_name: &str) -> std::result::Result<(), &'static str> {
    if type_name.trim().is_empty() {
        return Err("type name is empty");
    }
    if type_name.len() > MAX_LEN {
        return Err("type name too long");
    }
    if type_name.contains("--") || type_name.contains("/*") {
        return Err("type name contains a comment marker");
    }
    let allowed = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | ',' | ' ' | '.' | '<' | '>' | ':')
    };
    if !type_name.chars().all(allowed) {
        return Err("type name contains invalid characters");
    }
    Ok(())
}

/// Whether a declared type is a complex (nested) Databricks type.
pub fn is_complex_type(type_name: &str) -> bool {
    let upper = type_name.trim_start().to_ascii_uppercase();
    ["ARRAY<", "MAP<", "STRUCT<"]
        .iter()
        .any(|prefix| upper.starts_with(prefix))
}
