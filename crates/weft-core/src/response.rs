// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Response chunk envelope delivered by the transport.
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Object body of a response (`data`, or a nested object inside it).
pub type ResponseData = serde_json::Map<String, Value>;

/// One segment of a response path: a field response key or a list index.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// List index.
    Index(usize),
    /// Field response key.
    Key(String),
}

impl PathSegment {
    /// Renders the segment as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Index(i) => Value::from(*i),
            Self::Key(k) => Value::String(k.clone()),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Key(k) => f.write_str(k),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Key(value.to_owned())
    }
}

impl From<usize> for PathSegment {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// Joins a path with `.` for logs and lookup keys.
#[must_use]
pub fn format_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Error entry reported by the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Human-readable message.
    pub message: String,
    /// Response path of the field the error belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    /// Server-specific extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ResponseError {
    /// Error with a message and no path.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }
}

/// One entry of a response batch.
///
/// `label` and `path` are both present on incremental (`@defer`/`@stream`)
/// chunks and both absent on root chunks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
    /// Response body; `None` for metadata-only or failed chunks.
    #[serde(default)]
    pub data: Option<ResponseData>,
    /// Server-reported errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ResponseError>>,
    /// Transport extensions (`isOptimistic`, `is_final`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ResponseData>,
    /// Incremental label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Incremental path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
}

impl ResponseChunk {
    /// Root chunk carrying `data`.
    pub fn data(data: ResponseData) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// Incremental chunk for `label` at `path`.
    pub fn incremental(data: ResponseData, label: impl Into<String>, path: Vec<PathSegment>) -> Self {
        Self {
            data: Some(data),
            label: Some(label.into()),
            path: Some(path),
            ..Self::default()
        }
    }

    /// Marks the chunk optimistic.
    pub fn optimistic(mut self) -> Self {
        self.extensions
            .get_or_insert_with(ResponseData::new)
            .insert("isOptimistic".to_owned(), Value::Bool(true));
        self
    }

    /// Marks the chunk as the last one the server sends.
    pub fn finalized(mut self) -> Self {
        self.extensions
            .get_or_insert_with(ResponseData::new)
            .insert("is_final".to_owned(), Value::Bool(true));
        self
    }

    /// Returns `true` when `extensions.isOptimistic` is set.
    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        self.extension_flag("isOptimistic")
    }

    /// Returns `true` when `extensions.is_final` is set.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.extension_flag("is_final")
    }

    fn extension_flag(&self, key: &str) -> bool {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Failure reported by the transport itself (as opposed to GraphQL errors
/// inside a chunk).
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    /// Description of the failure.
    pub message: String,
}

impl TransportError {
    /// Wraps a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
