//! # rivven-dbsql
//!
//! CDC sink for Databricks SQL.
//!
//! Databricks SQL warehouses do not accept bound parameters, so every change
//! record is materialized as statement text with its values inlined as
//! literals. This crate discovers the target table's declared column types,
//! reconciles each record's key and `after` image against them, and renders
//! safely quoted, type-cast INSERT / UPDATE / DELETE statements.
//!
//! ## Features
//!
//! - **Schema-aware inserts**: values are cast to the declared column types
//! - **Dialect abstraction**: backtick-quoted Databricks SQL or ANSI, rendered with sea-query
//! - **Ordered batches**: records apply in order and stop at the first failure
//! - **Statement Execution API** backend over HTTPS (`statement-api` feature)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_dbsql::prelude::*;
//!
//! let mut sink = DatabricksSink::statement_api();
//! sink.configure(&properties)?;
//! sink.open().await?;
//!
//! let result = sink.write(&records, &CancellationToken::new()).await?;
//! if let Some(failed) = result.failed {
//!     // resume from failed.index
//! }
//! sink.teardown().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `statement-api` (default) - Databricks SQL Statement Execution API via reqwest

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod query;
pub mod record;
pub mod schema;
pub mod security;
pub mod sink;
pub mod types;

#[cfg(feature = "statement-api")]
pub mod statement;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, RecordPart, Result, StatementKind};

    // Value types
    pub use crate::types::{Row, Value};

    // Records
    pub use crate::record::{
        normalize, overlay, Change, ChangeRecord, ColumnMap, NormalizedRecord, Operation,
        RecordData,
    };

    // Synthesis
    pub use crate::dialect::{dialect_for, AnsiDialect, DatabricksDialect, SqlDialect};
    pub use crate::query::{ColumnValue, MutationStatement, QueryBuilder};

    // Schema
    pub use crate::schema::{ColumnMetadata, SchemaCatalog, TableSchema};

    // Execution
    pub use crate::client::{BatchResult, FailedRecord, SqlClient, SqlClientOptions};
    pub use crate::connection::{Connection, ConnectionFactory};

    // Connector
    pub use crate::config::{DatabricksConfig, SensitiveString};
    pub use crate::sink::DatabricksSink;

    #[cfg(feature = "statement-api")]
    pub use crate::statement::{StatementConnection, StatementConnectionFactory};

    pub use tokio_util::sync::CancellationToken;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;
