//! Connector configuration
//!
//! The pipeline hands connectors a flat string map; [`DatabricksConfig::from_properties`]
//! turns it into a typed, validated configuration.

use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use crate::client::SqlClientOptions;
use crate::error::{Error, Result};

/// Workspace access token.
///
/// Stored as a [`SecretString`]; formatting and serializing print a mask, so
/// a config dump or a `?config` log field never leaks the token. Only the
/// HTTP layer reads it back, to build the bearer header.
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Wrap a token
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// The raw token
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether no token was supplied
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

const MASK: &str = "dapi-****";

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SensitiveString").field(&MASK).finish()
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(MASK)
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(MASK)
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "DatabricksToken".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
            obj.metadata().description =
                Some("Databricks personal access token (dapi...)".to_string());
        }
        schema
    }
}

/// Configuration for the Databricks SQL sink
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabricksConfig {
    /// Personal access token
    pub token: SensitiveString,

    /// Workspace host name, e.g. `dbc-a1b2c3d4-e5f6.cloud.databricks.com`.
    /// The `https://` scheme is optional.
    #[validate(length(min = 1, max = 512))]
    pub host: String,

    /// HTTPS port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Warehouse HTTP path, e.g. `/sql/1.0/warehouses/<id>`
    #[validate(length(min = 1, max = 512))]
    pub http_path: String,

    /// Target table, optionally qualified as `catalog.schema.table`
    #[validate(length(min = 1, max = 512))]
    pub table_name: String,

    /// Cast inserted values to the declared column types
    #[serde(default = "default_true")]
    pub cast_values: bool,

    /// Seconds the warehouse holds the submit request open before the
    /// statement is polled
    #[serde(default = "default_wait_timeout_secs")]
    #[validate(range(min = 5, max = 50))]
    pub wait_timeout_secs: u64,

    /// Upper bound on one statement, including polling
    #[serde(default = "default_query_timeout_secs")]
    #[validate(range(min = 1, max = 86_400))]
    pub query_timeout_secs: u64,

    /// Delay between status polls of a running statement
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 10, max = 60_000))]
    pub poll_interval_ms: u64,
}

fn default_port() -> u16 {
    443
}

fn default_true() -> bool {
    true
}

fn default_wait_timeout_secs() -> u64 {
    30
}

fn default_query_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

const NUMERIC_KEYS: &[&str] = &["port", "waitTimeoutSecs", "queryTimeoutSecs", "pollIntervalMs"];
const BOOLEAN_KEYS: &[&str] = &["castValues"];

impl DatabricksConfig {
    /// Create a configuration with default tuning
    pub fn new(
        host: impl Into<String>,
        http_path: impl Into<String>,
        token: impl Into<SensitiveString>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            host: host.into(),
            port: default_port(),
            http_path: http_path.into(),
            table_name: table_name.into(),
            cast_values: default_true(),
            wait_timeout_secs: default_wait_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    /// Parse and validate a flat property map.
    ///
    /// Unknown keys are ignored.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let mut object = serde_json::Map::with_capacity(properties.len());
        for (key, raw) in properties {
            let value = if NUMERIC_KEYS.contains(&key.as_str()) {
                let n: u64 = raw.trim().parse().map_err(|_| {
                    Error::config(format!("{key} must be a non-negative integer, got '{raw}'"))
                })?;
                serde_json::Value::from(n)
            } else if BOOLEAN_KEYS.contains(&key.as_str()) {
                let b: bool = raw.trim().to_ascii_lowercase().parse().map_err(|_| {
                    Error::config(format!("{key} must be true or false, got '{raw}'"))
                })?;
                serde_json::Value::Bool(b)
            } else {
                serde_json::Value::String(raw.clone())
            };
            object.insert(key.clone(), value);
        }

        let config: Self = serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| Error::config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Run field validation and the cross-field checks
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid configuration: {e}")))?;
        if self.token.is_empty() {
            return Err(Error::config("token must not be empty"));
        }
        if self.table_name.trim().is_empty() {
            return Err(Error::config("tableName must not be blank"));
        }
        if self.host_name().is_empty() || self.host_name().contains('/') {
            return Err(Error::config(format!("invalid host '{}'", self.host)));
        }
        self.warehouse_id()?;
        Ok(())
    }

    /// Host without scheme or trailing slash
    pub fn host_name(&self) -> &str {
        let host = self.host.trim();
        let host = host
            .strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(host);
        host.trim_end_matches('/')
    }

    /// `https://{host}:{port}`
    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.host_name(), self.port)
    }

    /// Warehouse id, the last segment of the HTTP path
    pub fn warehouse_id(&self) -> Result<&str> {
        self.http_path
            .trim()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::config(format!(
                    "httpPath '{}' does not name a warehouse",
                    self.http_path
                ))
            })
    }

    /// Submit wait timeout
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Per-statement timeout
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Status poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Client options derived from this configuration
    pub fn client_options(&self) -> SqlClientOptions {
        SqlClientOptions {
            cast_values: self.cast_values,
            query_timeout: self.query_timeout(),
        }
    }
}
