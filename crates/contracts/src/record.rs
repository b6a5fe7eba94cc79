//! Record - producer payload plus ingestion timestamp
//!
//! A record is an open JSON object. On ingestion the cache stamps it with a
//! [`RecordKey`] under the reserved [`TIMESTAMP_FIELD`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ContractError;

/// Reserved field holding the ingestion timestamp
pub const TIMESTAMP_FIELD: &str = "ts";

/// Fixed-width, lexically sortable rendering (UTC, microseconds, no offset)
const KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Ingestion timestamp key, microseconds since the Unix epoch.
///
/// Ordering of keys is ordering of ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey(i64);

impl RecordKey {
    /// Key for a wall-clock instant, truncated to microseconds
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_micros())
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// The smallest key strictly greater than this one
    pub fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.0).unwrap_or_default()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().format(KEY_FORMAT))
    }
}

/// String-keyed mapping of arbitrary JSON values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Accept only JSON objects
    ///
    /// # Errors
    /// Returns [`ContractError::InvalidInput`] naming the kind of value received.
    pub fn try_from_value(value: Value) -> Result<Self, ContractError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ContractError::InvalidInput {
                found: value_kind(&other).to_string(),
            }),
        }
    }

    /// Write the ingestion timestamp, replacing any producer-supplied value
    pub fn stamp(&mut self, key: RecordKey) {
        self.0
            .insert(TIMESTAMP_FIELD.to_string(), Value::String(key.to_string()));
    }

    /// Ingestion timestamp, if stamped
    pub fn timestamp(&self) -> Option<&str> {
        self.0.get(TIMESTAMP_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl TryFrom<Value> for Record {
    type Error = ContractError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::try_from_value(value)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
