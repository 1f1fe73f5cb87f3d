use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Header carrying the id of the request that caused a change.
pub const CORRELATION_ID_HEADER: &str = "correlation_id";
/// HTTP header read and echoed by the services' correlation middleware.
pub const CORRELATION_ID_HTTP_HEADER: &str = "x-correlation-id";

/// Identifies one inbound request across services and channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        CorrelationId(Uuid::now_v7().to_string())
    }

    /// Reuse an id received from upstream, minting one when it is empty or unreasonably long.
    pub fn from_upstream(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(id) if !id.is_empty() && id.len() <= 128 => CorrelationId(id.to_owned()),
            _ => Self::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// String-keyed message headers, stored as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Map<String, Value>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_correlation(correlation_id: &CorrelationId) -> Self {
        Self::new().with(CORRELATION_ID_HEADER, correlation_id.as_str())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_owned(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.0.get(CORRELATION_ID_HEADER).and_then(Value::as_str)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }
}
