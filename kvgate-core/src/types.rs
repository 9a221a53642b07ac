use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{Error, Result};

/// Scope name used when no scope is configured
pub const DEFAULT_SCOPE: &str = "_default";

/// Collection name used when no collection is configured
pub const DEFAULT_COLLECTION: &str = "_default";

/// Opaque document version token used for optimistic concurrency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Cas(pub u64);

impl Cas {
    /// No expectation: the write applies whatever the current version is.
    pub const ZERO: Cas = Cas(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document lifetime in whole seconds, zero meaning the document never expires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Expiry(pub u32);

impl Expiry {
    pub const NONE: Expiry = Expiry(0);

    pub fn from_secs(secs: u32) -> Self {
        Expiry(secs)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.0))
    }
}

/// A document as returned by read-by-key
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: String,
    /// Raw JSON bytes as stored
    pub content: Bytes,
    pub cas: Cas,
}

impl Document {
    /// Parse the stored bytes into the caller's expected shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.content).map_err(|e| Error::decode(&self.key, e))
    }
}

/// Outcome of an atomic increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterResult {
    pub value: u64,
    pub cas: Cas,
}

/// One field-level mutation, addressed by a dot-separated path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutateInSpec {
    /// Create the field; fails if it already exists
    Insert { path: String, value: serde_json::Value },
    /// Create or overwrite the field
    Upsert { path: String, value: serde_json::Value },
    /// Overwrite an existing field; fails if it is missing
    Replace { path: String, value: serde_json::Value },
    /// Delete an existing field
    Remove { path: String },
    /// Append to an array field, creating it when absent
    ArrayAppend { path: String, value: serde_json::Value },
    /// Add `delta` to a numeric field, creating it at `delta` when absent
    Increment { path: String, delta: i64 },
}

impl MutateInSpec {
    pub fn insert(path: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Insert { path: path.into(), value: value.into() }
    }

    pub fn upsert(path: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Upsert { path: path.into(), value: value.into() }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Replace { path: path.into(), value: value.into() }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self::Remove { path: path.into() }
    }

    pub fn array_append(path: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::ArrayAppend { path: path.into(), value: value.into() }
    }

    pub fn increment(path: impl Into<String>, delta: i64) -> Self {
        Self::Increment { path: path.into(), delta }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Insert { path, .. }
            | Self::Upsert { path, .. }
            | Self::Replace { path, .. }
            | Self::Remove { path }
            | Self::ArrayAppend { path, .. }
            | Self::Increment { path, .. } => path,
        }
    }
}

/// Result of a sub-document mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutateInResult {
    pub cas: Cas,
    /// One slot per spec, in order. Only increments produce a value.
    pub values: Vec<Option<serde_json::Value>>,
}

/// Fully qualified address of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionPath {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

impl CollectionPath {
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
        }
    }

    /// The default scope/collection pair of `bucket`
    pub fn default_for(bucket: impl Into<String>) -> Self {
        Self::new(bucket, DEFAULT_SCOPE, DEFAULT_COLLECTION)
    }

    pub fn is_default(&self) -> bool {
        self.scope == DEFAULT_SCOPE && self.collection == DEFAULT_COLLECTION
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.bucket, self.scope, self.collection)
    }
}
