//! Databricks SQL Statement Execution API connection
//!
//! Statements are submitted to `POST /api/2.0/sql/statements` and held open
//! for up to `waitTimeoutSecs`. A statement still pending after that is
//! polled until it reaches a terminal state. Abandoning a statement (caller
//! cancellation or timeout drops the future) issues a best-effort cancel.
//!
//! Results are requested as `INLINE` / `JSON_ARRAY`, so every cell arrives as
//! a string or null.
//!
//! The API is sessionless, so no `ansi_mode` parameter is sent. SQL warehouses
//! run with `ANSI_MODE = true` unless an admin overrides it at the warehouse
//! level, which is what the `CAST` wrappers on inserts rely on for strict
//! conversion errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use crate::config::{DatabricksConfig, SensitiveString};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";

/// Slack on top of the server-side wait before the HTTP request itself times out
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    wait_timeout: String,
    on_wait_timeout: &'static str,
    disposition: &'static str,
    format: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
    #[serde(other)]
    Unknown,
}

impl StatementState {
    fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: StatementState,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestColumn {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ManifestColumn>,
}

#[derive(Debug, Default, Deserialize)]
struct Manifest {
    #[serde(default)]
    schema: Option<ManifestSchema>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultChunk {
    #[serde(default)]
    data_array: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    statement_id: Option<String>,
    status: StatementStatus,
    #[serde(default)]
    manifest: Option<Manifest>,
    #[serde(default)]
    result: Option<ResultChunk>,
}

impl StatementResponse {
    fn column_names(&self) -> Vec<String> {
        self.manifest
            .as_ref()
            .and_then(|m| m.schema.as_ref())
            .map(|s| s.columns.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Map a terminal state onto rows or an error
    fn check_state(&self) -> Result<()> {
        let detail = || {
            self.status
                .error
                .as_ref()
                .and_then(|e| e.message.clone().or_else(|| e.error_code.clone()))
        };
        match self.status.state {
            StatementState::Succeeded => Ok(()),
            StatementState::Failed => Err(Error::execution(
                detail().unwrap_or_else(|| "statement failed".to_string()),
            )),
            StatementState::Canceled => Err(Error::execution(
                detail().unwrap_or_else(|| "statement was canceled".to_string()),
            )),
            StatementState::Closed => Err(Error::execution("statement was closed")),
            StatementState::Pending | StatementState::Running | StatementState::Unknown => {
                Err(Error::execution("statement ended in an unexpected state"))
            }
        }
    }
}

fn to_rows(columns: &[String], data: Vec<Vec<serde_json::Value>>) -> Vec<Row> {
    data.into_iter()
        .map(|cells| {
            let names = (0..cells.len())
                .map(|i| columns.get(i).cloned().unwrap_or_else(|| format!("col{i}")))
                .collect();
            let values = cells
                .into_iter()
                .map(|cell| match cell {
                    serde_json::Value::String(s) => Value::Text(s),
                    other => Value::from_json(other),
                })
                .collect();
            Row::new(names, values)
        })
        .collect()
}

/// Cancels a submitted statement unless disarmed before drop
struct CancelGuard {
    http: reqwest::Client,
    url: Option<Url>,
    token: SensitiveString,
}

impl CancelGuard {
    fn disarm(&mut self) {
        self.url = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let Some(url) = self.url.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let http = self.http.clone();
        let token = self.token.clone();
        handle.spawn(async move {
            debug!(url = %url, "Cancelling abandoned statement");
            if let Err(e) = http.post(url).bearer_auth(token.expose_secret()).send().await {
                debug!(error = %e, "Statement cancel request failed");
            }
        });
    }
}

/// Connection backed by the Statement Execution API
pub struct StatementConnection {
    http: reqwest::Client,
    base: Url,
    submit_url: Url,
    token: SensitiveString,
    warehouse_id: String,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for StatementConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementConnection")
            .field("base", &self.base.as_str())
            .field("warehouse_id", &self.warehouse_id)
            .field("token", &self.token)
            .finish()
    }
}

impl StatementConnection {
    /// Create a connection for the configured warehouse
    pub fn new(config: &DatabricksConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url())
            .map_err(|e| Error::config(format!("invalid host '{}': {e}", config.host)))?;
        let submit_url = base
            .join(STATEMENTS_PATH)
            .map_err(|e| Error::config(format!("invalid statements URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.wait_timeout() + REQUEST_TIMEOUT_MARGIN)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| Error::connection_with_source("failed to build HTTP client", e))?;

        Ok(Self {
            http,
            base,
            submit_url,
            token: config.token.clone(),
            warehouse_id: config.warehouse_id()?.to_string(),
            wait_timeout: config.wait_timeout(),
            poll_interval: config.poll_interval(),
        })
    }

    /// Warehouse statements run on
    pub fn warehouse_id(&self) -> &str {
        &self.warehouse_id
    }

    fn statement_url(&self, id: &str, action: Option<&str>) -> Result<Url> {
        let mut url = self.submit_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config("statements URL cannot carry a path"))?
            .push(id)
            .extend(action);
        Ok(url)
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("request to warehouse timed out: {e}"))
                } else {
                    Error::connection_with_source("request to warehouse failed", e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => Error::authentication(format!("{status}: {body}")),
                _ => Error::connection(format!("warehouse returned {status}: {body}")),
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::connection_with_source("failed to decode warehouse response", e))
    }

    async fn run(&self, sql: &str) -> Result<Vec<Row>> {
        let request = SubmitRequest {
            statement: sql,
            warehouse_id: &self.warehouse_id,
            wait_timeout: format!("{}s", self.wait_timeout.as_secs()),
            on_wait_timeout: "CONTINUE",
            disposition: "INLINE",
            format: "JSON_ARRAY",
        };
        let mut response: StatementResponse =
            self.send(self.http.post(self.submit_url.clone()).json(&request)).await?;

        let mut guard = CancelGuard {
            http: self.http.clone(),
            url: None,
            token: self.token.clone(),
        };
        if let Some(id) = &response.statement_id {
            guard.url = Some(self.statement_url(id, Some("cancel"))?);
        }

        while !response.status.state.is_terminal() {
            let id = response
                .statement_id
                .clone()
                .ok_or_else(|| Error::connection("pending statement without statement_id"))?;
            trace!(statement_id = %id, state = ?response.status.state, "Polling statement");
            tokio::time::sleep(self.poll_interval).await;
            response = self.send(self.http.get(self.statement_url(&id, None)?)).await?;
        }
        guard.disarm();

        debug!(
            statement_id = response.statement_id.as_deref().unwrap_or_default(),
            state = ?response.status.state,
            "Statement finished"
        );
        response.check_state()?;

        let columns = response.column_names();
        let mut chunk = response.result.unwrap_or_default();
        let mut rows = to_rows(&columns, chunk.data_array.take().unwrap_or_default());
        while let Some(link) = chunk.next_chunk_internal_link.take() {
            let url = self
                .base
                .join(&link)
                .map_err(|e| Error::connection(format!("invalid chunk link '{link}': {e}")))?;
            chunk = self.send(self.http.get(url)).await?;
            rows.extend(to_rows(&columns, chunk.data_array.take().unwrap_or_default()));
        }
        Ok(rows)
    }
}

#[async_trait]
impl Connection for StatementConnection {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.run(sql).await
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let rows = self.run(sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_by_name("num_affected_rows"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}

/// Creates [`StatementConnection`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementConnectionFactory;

#[async_trait]
impl ConnectionFactory for StatementConnectionFactory {
    async fn connect(&self, config: &DatabricksConfig) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(StatementConnection::new(config)?))
    }
}
