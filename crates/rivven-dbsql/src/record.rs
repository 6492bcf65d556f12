//! CDC change records and their normalization
//!
//! A [`ChangeRecord`] carries an operation, the row identity (key) and the
//! before/after images. [`normalize`] decodes key and `after` into flat
//! column maps of [`Value`]s that the query builder can inline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, RecordPart, Result};
use crate::types::Value;

/// Column name to value, ordered by name
pub type ColumnMap = BTreeMap<String, Value>;

/// CDC operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert (new row)
    Create,
    /// Update (row modified)
    Update,
    /// Delete (row removed)
    Delete,
    /// Snapshot read (initial load)
    Snapshot,
}

impl Operation {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Snapshot => "snapshot",
        }
    }

    /// Whether this operation materializes as an insert
    #[inline]
    pub fn is_insert(&self) -> bool {
        matches!(self, Self::Create | Self::Snapshot)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key or row image, either already parsed or as raw JSON bytes
#[derive(Debug, Clone, PartialEq)]
pub enum RecordData {
    /// A JSON object
    Structured(serde_json::Map<String, serde_json::Value>),
    /// Encoded JSON; must decode to an object
    Raw(Bytes),
}

impl RecordData {
    /// Empty structured data
    pub fn empty() -> Self {
        Self::Structured(serde_json::Map::new())
    }

    /// Decode into a column map; a JSON `null` document is an empty map
    fn decode(&self, part: RecordPart) -> Result<ColumnMap> {
        match self {
            Self::Structured(map) => Ok(to_columns(map.clone())),
            Self::Raw(bytes) if bytes.is_empty() => Ok(ColumnMap::new()),
            Self::Raw(bytes) => {
                let parsed: serde_json::Value =
                    serde_json::from_slice(bytes).map_err(|e| Error::MalformedRecord {
                        part,
                        message: e.to_string(),
                        source: Some(e),
                    })?;
                match parsed {
                    serde_json::Value::Object(map) => Ok(to_columns(map)),
                    serde_json::Value::Null => Ok(ColumnMap::new()),
                    other => Err(Error::malformed(
                        part,
                        format!("expected a JSON object, got {}", json_kind(&other)),
                    )),
                }
            }
        }
    }
}

impl Default for RecordData {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for RecordData {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::Structured(map)
    }
}

/// Objects become structured data; any other JSON value is kept as its
/// encoded text and rejected at normalization.
impl From<serde_json::Value> for RecordData {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Object(map) => Self::Structured(map),
            other => Self::Raw(Bytes::from(other.to_string())),
        }
    }
}

impl From<Bytes> for RecordData {
    fn from(bytes: Bytes) -> Self {
        Self::Raw(bytes)
    }
}

impl From<Vec<u8>> for RecordData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(Bytes::from(bytes))
    }
}

impl From<&'static str> for RecordData {
    fn from(text: &'static str) -> Self {
        Self::Raw(Bytes::from_static(text.as_bytes()))
    }
}

/// Before/after images of a row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Change {
    /// Row state before the change
    pub before: Option<RecordData>,
    /// Row state after the change
    pub after: Option<RecordData>,
}

/// A single CDC record
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Operation kind
    pub operation: Operation,
    /// Identity fields
    pub key: RecordData,
    /// Row images
    pub payload: Change,
    /// Source position, for logging
    pub position: Option<Bytes>,
}

impl ChangeRecord {
    /// Create a record
    pub fn new(operation: Operation, key: impl Into<RecordData>, payload: Change) -> Self {
        Self {
            operation,
            key: key.into(),
            payload,
            position: None,
        }
    }

    /// Create an insert record
    pub fn create(key: impl Into<RecordData>, after: impl Into<RecordData>) -> Self {
        Self::new(
            Operation::Create,
            key,
            Change {
                before: None,
                after: Some(after.into()),
            },
        )
    }

    /// Create a snapshot record
    pub fn snapshot(key: impl Into<RecordData>, after: impl Into<RecordData>) -> Self {
        Self {
            operation: Operation::Snapshot,
            ..Self::create(key, after)
        }
    }

    /// Create an update record
    pub fn update(key: impl Into<RecordData>, after: impl Into<RecordData>) -> Self {
        Self::new(
            Operation::Update,
            key,
            Change {
                before: None,
                after: Some(after.into()),
            },
        )
    }

    /// Create a delete record
    pub fn delete(key: impl Into<RecordData>) -> Self {
        Self::new(Operation::Delete, key, Change::default())
    }

    /// Set the before image
    pub fn with_before(mut self, before: impl Into<RecordData>) -> Self {
        self.payload.before = Some(before.into());
        self
    }

    /// Decode only the identity fields
    pub fn key_columns(&self) -> Result<ColumnMap> {
        self.key.decode(RecordPart::Key)
    }

    /// Set the source position
    pub fn with_position(mut self, position: impl Into<Bytes>) -> Self {
        self.position = Some(position.into());
        self
    }
}

/// Decoded key and `after` image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRecord {
    /// Identity fields
    pub key: ColumnMap,
    /// Fields of the `after` image
    pub payload: ColumnMap,
}

/// Decode a record's key and `after` image.
///
/// A missing `after` image decodes as an empty payload.
pub fn normalize(record: &ChangeRecord) -> Result<NormalizedRecord> {
    let key = record.key_columns()?;
    let payload = match &record.payload.after {
        Some(after) => after.decode(RecordPart::Payload)?,
        None => ColumnMap::new(),
    };
    Ok(NormalizedRecord { key, payload })
}

/// Merge two column maps into a new one; entries of `over` win
pub fn overlay(base: &ColumnMap, over: &ColumnMap) -> ColumnMap {
    let mut merged = base.clone();
    merged.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn to_columns(map: serde_json::Map<String, serde_json::Value>) -> ColumnMap {
    map.into_iter()
        .map(|(k, v)| (k, Value::from_json(v)))
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cols(entries: &[(&str, Value)]) -> ColumnMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_operation_labels() {
        assert_eq!(Operation::Create.as_str(), "create");
        assert_eq!(Operation::Snapshot.to_string(), "snapshot");
        assert!(Operation::Snapshot.is_insert());
        assert!(!Operation::Delete.is_insert());

        let op: Operation = serde_json::from_str("\"update\"").unwrap();
        assert_eq!(op, Operation::Update);
    }

    #[test]
    fn test_normalize_structured() {
        let record = ChangeRecord::create(
            json!({"id": 1}),
            json!({"id": 1, "name": "widget", "dims": {"w": 2, "h": 3}, "tags": ["a"]}),
        );
        let normalized = normalize(&record).unwrap();
        assert_eq!(normalized.key, cols(&[("id", 1_i64.into())]));
        assert_eq!(normalized.payload.len(), 4);
        assert_eq!(
            normalized.payload["dims"],
            Value::Composite(r#"{"h":3,"w":2}"#.into())
        );
        assert_eq!(normalized.payload["tags"], Value::Composite(r#"["a"]"#.into()));
    }

    #[test]
    fn test_normalize_raw() {
        let record = ChangeRecord::update(
            Bytes::from_static(br#"{"id":"a1b2"}"#),
            Bytes::from_static(br#"{"name":"x","active":true}"#),
        );
        let normalized = normalize(&record).unwrap();
        assert_eq!(normalized.key, cols(&[("id", "a1b2".into())]));
        assert_eq!(
            normalized.payload,
            cols(&[("active", true.into()), ("name", "x".into())])
        );
    }

    #[test]
    fn test_normalize_empty_raw_is_empty_map() {
        let record = ChangeRecord::update(Bytes::new(), Bytes::new());
        let normalized = normalize(&record).unwrap();
        assert!(normalized.key.is_empty());
        assert!(normalized.payload.is_empty());
    }

    #[test]
    fn test_normalize_missing_after() {
        let record = ChangeRecord::delete(json!({"id": 1}));
        let normalized = normalize(&record).unwrap();
        assert!(normalized.payload.is_empty());
    }

    #[test]
    fn test_malformed_key() {
        let record = ChangeRecord::delete("{not json");
        let err = normalize(&record).unwrap_err();
        match err {
            Error::MalformedRecord { part, source, .. } => {
                assert_eq!(part, RecordPart::Key);
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_payload_not_object() {
        let record = ChangeRecord::create(json!({"id": 1}), json!([1, 2, 3]));
        let err = normalize(&record).unwrap_err();
        assert_eq!(
            err.to_string(),
            "error unmarshalling payload: expected a JSON object, got array"
        );
    }

    #[test]
    fn test_overlay_payload_wins() {
        let base = cols(&[("id", 1_i64.into()), ("name", "old".into())]);
        let over = cols(&[("name", "new".into()), ("price", 10_i64.into())]);
        let merged = overlay(&base, &over);
        assert_eq!(
            merged,
            cols(&[
                ("id", 1_i64.into()),
                ("name", "new".into()),
                ("price", 10_i64.into()),
            ])
        );
        // inputs untouched
        assert_eq!(base["name"], Value::from("old"));
    }

    #[test]
    fn test_overlay_empty_sides() {
        let map = cols(&[("id", 1_i64.into())]);
        assert_eq!(overlay(&ColumnMap::new(), &map), map);
        assert_eq!(overlay(&map, &ColumnMap::new()), map);
    }

    #[test]
    fn test_key_overlaid_with_payload() {
        let record = ChangeRecord::snapshot(json!({"id": 5, "v": 1}), json!({"v": 2}))
            .with_position(Bytes::from_static(b"lsn:42"));
        assert_eq!(record.position.as_deref(), Some(&b"lsn:42"[..]));
        let normalized = normalize(&record).unwrap();
        let merged = overlay(&normalized.key, &normalized.payload);
        assert_eq!(merged, cols(&[("id", 5_i64.into()), ("v", 2_i64.into())]));
    }

    #[test]
    fn test_null_after_image_is_empty() {
        for after in [RecordData::from(json!(null)), RecordData::from(Bytes::from_static(b"null"))] {
            let record = ChangeRecord::new(
                Operation::Delete,
                json!({"id": 1}),
                Change {
                    before: None,
                    after: Some(after),
                },
            );
            let normalized = normalize(&record).unwrap();
            assert!(normalized.payload.is_empty());
            assert_eq!(normalized.key, cols(&[("id", 1_i64.into())]));
        }
    }

    #[test]
    fn test_key_columns_ignores_after_image() {
        let record = ChangeRecord::new(
            Operation::Delete,
            json!({"id": 9}),
            Change {
                before: None,
                after: Some(RecordData::from("{broken")),
            },
        );
        assert!(normalize(&record).is_err());
        assert_eq!(record.key_columns().unwrap(), cols(&[("id", 9_i64.into())]));
    }
}
