//! Error types for rivven-dbsql
//!
//! Errors fall into three groups:
//! - Synthesis-time contract violations (missing table/keys/values, arity)
//! - Record and schema problems (malformed record, schema unavailable)
//! - Execution outcomes (backend rejection, unexpected row counts, transport)

use std::fmt;
use thiserror::Error;

/// Result type for rivven-dbsql operations
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of statement being synthesized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// INSERT INTO ...
    Insert,
    /// UPDATE ... SET ...
    Update,
    /// DELETE FROM ...
    Delete,
    /// DESCRIBE ...
    Describe,
}

impl StatementKind {
    fn missing_table_message(self) -> &'static str {
        match self {
            Self::Insert => "error creating sqlString: insert statements must specify a table",
            Self::Update | Self::Delete | Self::Describe => "table name not provided",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Describe => write!(f, "describe"),
        }
    }
}

/// Which part of a change record failed to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordPart {
    /// The identity/key fields
    Key,
    /// The `after` payload
    Payload,
}

impl fmt::Display for RecordPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key => write!(f, "key"),
            Self::Payload => write!(f, "payload"),
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Statement could not be synthesized from the inputs
    Synthesis,
    /// Record key/payload could not be decoded
    Record,
    /// Target table could not be introspected
    Schema,
    /// Backend rejected or failed the statement
    Execution,
    /// Connection/transport failure (retriable)
    Connection,
    /// Authentication failure
    Authentication,
    /// Configuration error
    Configuration,
    /// Statement exceeded its time budget (retriable)
    Timeout,
    /// Caller cancelled the batch
    Cancelled,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthesis => write!(f, "synthesis"),
            Self::Record => write!(f, "record"),
            Self::Schema => write!(f, "schema"),
            Self::Execution => write!(f, "execution"),
            Self::Connection => write!(f, "connection"),
            Self::Authentication => write!(f, "authentication"),
            Self::Configuration => write!(f, "configuration"),
            Self::Timeout => write!(f, "timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Main error type for rivven-dbsql
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Table name is blank
    #[error("{}", .statement.missing_table_message())]
    MissingTable { statement: StatementKind },

    /// Update/delete without key fields
    #[error("no keys provided")]
    MissingKeys,

    /// Update without changed fields, or insert without columns
    #[error("no values provided")]
    MissingValues,

    /// Column/value/type counts disagree
    #[error(
        "expected equal number of columns and values, but got {left} {left_label}(s) and {right} {right_label}(s)"
    )]
    ArityMismatch {
        left: usize,
        left_label: &'static str,
        right: usize,
        right_label: &'static str,
    },

    /// Identifier cannot be rendered (empty column name, blank segment)
    #[error("invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: &'static str },

    /// Declared column type contains characters that cannot be inlined
    #[error("invalid type name '{type_name}' for column '{column}'")]
    InvalidTypeName { column: String, type_name: String },

    /// Key or payload could not be decoded
    #[error("error unmarshalling {part}: {message}")]
    MalformedRecord {
        part: RecordPart,
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Introspection failed at open time
    #[error("unable to get column information for {table}: {message}")]
    SchemaUnavailable { table: String, message: String },

    /// Backend rejected or could not run the statement
    #[error("failed to execute db statement: {message}")]
    ExecutionFailed { message: String, sql: Option<String> },

    /// Insert affected a row count other than one
    #[error("{affected} rows inserted")]
    UnexpectedRowCount { affected: u64 },

    /// Client used before `open`
    #[error("client is not open")]
    NotOpen,

    /// Connection/transport failure
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication failed
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Statement timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Cancelled by the caller
    #[error("cancelled: {message}")]
    Cancelled { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingTable { .. }
            | Self::MissingKeys
            | Self::MissingValues
            | Self::ArityMismatch { .. }
            | Self::InvalidIdentifier { .. }
            | Self::InvalidTypeName { .. } => ErrorCategory::Synthesis,
            Self::MalformedRecord { .. } => ErrorCategory::Record,
            Self::SchemaUnavailable { .. } => ErrorCategory::Schema,
            Self::ExecutionFailed { .. } | Self::UnexpectedRowCount { .. } => {
                ErrorCategory::Execution
            }
            Self::NotOpen | Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a missing-table error for the given statement kind
    pub fn missing_table(statement: StatementKind) -> Self {
        Self::MissingTable { statement }
    }

    /// Create a malformed-record error
    pub fn malformed(part: RecordPart, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            part,
            message: message.into(),
            source: None,
        }
    }

    /// Create a schema-unavailable error
    pub fn schema_unavailable(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaUnavailable {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
            sql: None,
        }
    }

    /// Create an execution error carrying the rejected SQL
    pub fn execution_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            message: message.into(),
            sql: Some(sql.into()),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// The SQL text attached to an execution error, if any
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }
}
