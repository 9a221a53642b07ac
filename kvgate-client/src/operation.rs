/// Deferred single-key operations for bulk execution
///
/// An `Operation` is a plain description of one store call: a key plus a
/// tagged action carrying the call's parameters. Nothing runs until
/// [`Operation::dispatch`] is invoked, which performs exactly one primitive
/// call against a collection.

use bytes::Bytes;
use kvgate_core::{Cas, Collection, CounterResult, Error, Expiry, Result};
use serde::Serialize;
use std::fmt;
use tracing::error;

/// Kind of store call an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Get,
    Insert,
    Upsert,
    Remove,
    Counter,
    Touch,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Insert => "INSERT",
            Self::Upsert => "UPSERT",
            Self::Remove => "REMOVE",
            Self::Counter => "COUNTER",
            Self::Touch => "TOUCH",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a deferred call
#[derive(Debug, Clone, PartialEq)]
pub enum OperationAction {
    Get,
    Insert { content: Bytes, expiry: Expiry },
    Upsert { content: Bytes, expiry: Expiry },
    Remove { cas: Cas },
    Counter { delta: u64, initial: i64, expiry: Expiry },
    Touch { expiry: Expiry },
}

/// A unit of work: one key, one deferred store call
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    key: String,
    action: OperationAction,
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::InvalidArgument(format!("cannot encode value for key {}: {}", key, e)))
}

impl Operation {
    pub fn new(key: impl Into<String>, action: OperationAction) -> Self {
        Self { key: key.into(), action }
    }

    /// Read a document; the content must parse as JSON
    pub fn get(key: impl Into<String>) -> Self {
        Self::new(key, OperationAction::Get)
    }

    /// Create a document from raw JSON bytes
    pub fn insert(key: impl Into<String>, content: impl Into<Bytes>, expiry: Expiry) -> Self {
        Self::new(key, OperationAction::Insert { content: content.into(), expiry })
    }

    /// Create a document from any serializable value
    pub fn insert_json<T: Serialize + ?Sized>(key: impl Into<String>, value: &T, expiry: Expiry) -> Result<Self> {
        let key = key.into();
        let content = encode_json(&key, value)?;
        Ok(Self::insert(key, content, expiry))
    }

    /// Create or replace a document from raw JSON bytes
    pub fn upsert(key: impl Into<String>, content: impl Into<Bytes>, expiry: Expiry) -> Self {
        Self::new(key, OperationAction::Upsert { content: content.into(), expiry })
    }

    /// Create or replace a document from any serializable value
    pub fn upsert_json<T: Serialize + ?Sized>(key: impl Into<String>, value: &T, expiry: Expiry) -> Result<Self> {
        let key = key.into();
        let content = encode_json(&key, value)?;
        Ok(Self::upsert(key, content, expiry))
    }

    /// Delete a document, conditional on `cas` unless it is zero
    pub fn remove(key: impl Into<String>, cas: Cas) -> Self {
        Self::new(key, OperationAction::Remove { cas })
    }

    pub fn counter(key: impl Into<String>, delta: u64, initial: i64, expiry: Expiry) -> Self {
        Self::new(key, OperationAction::Counter { delta, initial, expiry })
    }

    pub fn touch(key: impl Into<String>, expiry: Expiry) -> Self {
        Self::new(key, OperationAction::Touch { expiry })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn action(&self) -> &OperationAction {
        &self.action
    }

    pub fn kind(&self) -> OperationKind {
        match self.action {
            OperationAction::Get => OperationKind::Get,
            OperationAction::Insert { .. } => OperationKind::Insert,
            OperationAction::Upsert { .. } => OperationKind::Upsert,
            OperationAction::Remove { .. } => OperationKind::Remove,
            OperationAction::Counter { .. } => OperationKind::Counter,
            OperationAction::Touch { .. } => OperationKind::Touch,
        }
    }

    /// Perform the store call. Exactly one primitive is invoked.
    pub async fn dispatch<C: Collection + ?Sized>(&self, collection: &C) -> OperationResult {
        let key = self.key.as_str();
        let outcome = match &self.action {
            OperationAction::Get => match collection.get(key).await {
                Ok(doc) => doc
                    .decode::<serde_json::Value>()
                    .map(OperationOutput::Document)
                    .inspect_err(|e| error!(key, error = %e, "Failed to read content")),
                Err(e) => Err(e),
            },
            OperationAction::Insert { content, expiry } => collection
                .insert(key, content.clone(), *expiry)
                .await
                .map(OperationOutput::Cas),
            OperationAction::Upsert { content, expiry } => collection
                .upsert(key, content.clone(), *expiry)
                .await
                .map(OperationOutput::Cas),
            OperationAction::Remove { cas } => collection
                .remove(key, *cas)
                .await
                .map(OperationOutput::Cas),
            OperationAction::Counter { delta, initial, expiry } => collection
                .increment(key, *delta, *initial, *expiry)
                .await
                .map(OperationOutput::Counter),
            OperationAction::Touch { expiry } => collection
                .touch(key, *expiry)
                .await
                .map(OperationOutput::Cas),
        };

        OperationResult::from_outcome(self.key.clone(), self.kind(), outcome)
    }
}

/// Value produced by a successful operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    /// Decoded document body (GET)
    Document(serde_json::Value),
    /// New version token (INSERT, UPSERT, REMOVE, TOUCH)
    Cas(Cas),
    /// Counter value and version (COUNTER)
    Counter(CounterResult),
}

/// Outcome of one dispatched operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub key: String,
    pub kind: OperationKind,
    pub error: Option<Error>,
    pub output: Option<OperationOutput>,
}

impl OperationResult {
    pub fn from_outcome(key: String, kind: OperationKind, outcome: Result<OperationOutput>) -> Self {
        match outcome {
            Ok(output) => Self { key, kind, error: None, output: Some(output) },
            Err(e) => Self::failed(key, kind, e),
        }
    }

    pub fn failed(key: String, kind: OperationKind, error: Error) -> Self {
        Self { key, kind, error: Some(error), output: None }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvgate_core::{ClusterConfig, Cluster, Bucket, Connector, MemoryCollection, MemoryConnector};
    use serde_json::json;

    async fn collection() -> MemoryCollection {
        MemoryConnector::new()
            .connect(&ClusterConfig::default())
            .await
            .unwrap()
            .bucket("default")
            .default_collection()
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Operation::get("k").kind().to_string(), "GET");
        assert_eq!(Operation::remove("k", Cas::ZERO).kind(), OperationKind::Remove);
        assert_eq!(Operation::counter("k", 1, 0, Expiry::NONE).kind().as_str(), "COUNTER");
        assert_eq!(Operation::touch("k", Expiry::from_secs(5)).kind(), OperationKind::Touch);
    }

    #[test]
    fn test_operations_are_inspectable() {
        let op = Operation::upsert_json("user::1", &json!({"age": 30}), Expiry::from_secs(60)).unwrap();
        assert_eq!(op.key(), "user::1");
        assert_eq!(
            op.action(),
            &OperationAction::Upsert {
                content: Bytes::from_static(br#"{"age":30}"#),
                expiry: Expiry::from_secs(60),
            }
        );
    }

    #[tokio::test]
    async fn test_dispatch_outputs() {
        let collection = collection().await;

        let inserted = Operation::insert_json("doc", &json!({"n": 1}), Expiry::NONE)
            .unwrap()
            .dispatch(&collection)
            .await;
        assert!(inserted.is_ok());
        assert!(matches!(inserted.output, Some(OperationOutput::Cas(_))));

        let read = Operation::get("doc").dispatch(&collection).await;
        assert_eq!(read.kind, OperationKind::Get);
        assert_eq!(read.output, Some(OperationOutput::Document(json!({"n": 1}))));

        let counted = Operation::counter("ctr", 2, 10, Expiry::NONE).dispatch(&collection).await;
        assert!(matches!(counted.output, Some(OperationOutput::Counter(CounterResult { value: 10, .. }))));
    }

    #[tokio::test]
    async fn test_get_decode_failure_is_operation_failure() {
        let collection = collection().await;
        Operation::upsert("raw", Bytes::from_static(b"not json"), Expiry::NONE)
            .dispatch(&collection)
            .await;

        let result = Operation::get("raw").dispatch(&collection).await;
        assert!(!result.is_ok());
        assert!(matches!(result.error, Some(Error::Decode { ref key, .. }) if key == "raw"));
        assert_eq!(result.output, None);
    }

    #[tokio::test]
    async fn test_store_error_is_passed_through() {
        let collection = collection().await;
        let result = Operation::touch("missing", Expiry::from_secs(1)).dispatch(&collection).await;
        assert_eq!(result.error, Some(Error::NotFound("missing".to_string())));
    }
}
