/// In-process document store implementing the store primitives
///
/// Every cluster session opened by a `MemoryConnector` shares the connector's
/// data, so several sessions observe each other's writes the way clients of
/// one remote cluster would. Expired documents are dropped lazily on access.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    ClusterConfig, Error, Result,
    store::{Bucket, Cluster, Collection, Connector},
    types::{Cas, CollectionPath, CounterResult, Document, Expiry, MutateInResult, MutateInSpec},
};

/// URI scheme accepted by the memory connector
pub const MEMORY_SCHEME: &str = "memory://";

/// Largest document body accepted, matching common server limits
pub const MAX_VALUE_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
struct StoredDoc {
    content: Bytes,
    cas: Cas,
    expires_at: Option<Instant>,
}

impl StoredDoc {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn expires_at(expiry: Expiry) -> Option<Instant> {
    if expiry.is_none() {
        None
    } else {
        Some(Instant::now() + expiry.as_duration())
    }
}

#[derive(Default)]
struct Shared {
    collections: RwLock<HashMap<CollectionPath, HashMap<String, StoredDoc>>>,
    /// None = every bucket name exists
    buckets: Option<HashSet<String>>,
    next_cas: AtomicU64,
}

impl Shared {
    fn next_cas(&self) -> Cas {
        Cas(self.next_cas.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn bucket_exists(&self, name: &str) -> bool {
        match &self.buckets {
            Some(known) => known.contains(name),
            None => true,
        }
    }
}

/// Connector for the in-process store
#[derive(Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// A store in which every bucket name is available
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that only serves the named buckets
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shared: Arc::new(Shared {
                buckets: Some(buckets.into_iter().map(Into::into).collect()),
                ..Shared::default()
            }),
        }
    }

    /// Number of live documents held for `path`
    pub fn document_count(&self, path: &CollectionPath) -> usize {
        let now = Instant::now();
        self.shared
            .collections
            .read()
            .get(path)
            .map(|docs| docs.values().filter(|d| !d.is_expired(now)).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Cluster = MemoryCluster;

    async fn connect(&self, config: &ClusterConfig) -> Result<MemoryCluster> {
        if !config.endpoint.starts_with(MEMORY_SCHEME) {
            return Err(Error::Connection(format!(
                "unsupported endpoint {}, expected {}<host>",
                config.endpoint, MEMORY_SCHEME
            )));
        }
        debug!(endpoint = %config.endpoint, username = %config.username, "Opening memory cluster session");
        Ok(MemoryCluster {
            shared: self.shared.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// A session on the in-process store
#[derive(Clone)]
pub struct MemoryCluster {
    shared: Arc<Shared>,
    closed: Arc<AtomicBool>,
}

impl MemoryCluster {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    type Bucket = MemoryBucket;

    async fn wait_until_ready(&self, _timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn bucket(&self, name: &str) -> MemoryBucket {
        MemoryBucket {
            name: name.to_string(),
            shared: self.shared.clone(),
            closed: self.closed.clone(),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Memory cluster session closed");
        }
        Ok(())
    }
}

/// A bucket on the in-process store
#[derive(Clone)]
pub struct MemoryBucket {
    name: String,
    shared: Arc<Shared>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Bucket for MemoryBucket {
    type Collection = MemoryCollection;

    fn name(&self) -> &str {
        &self.name
    }

    async fn wait_until_ready(&self, _timeout: Duration) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if !self.shared.bucket_exists(&self.name) {
            return Err(Error::BucketNotFound(self.name.clone()));
        }
        Ok(())
    }

    fn default_collection(&self) -> MemoryCollection {
        self.collection_at(CollectionPath::default_for(&self.name))
    }

    fn collection(&self, scope: &str, name: &str) -> MemoryCollection {
        self.collection_at(CollectionPath::new(&self.name, scope, name))
    }
}

impl MemoryBucket {
    fn collection_at(&self, path: CollectionPath) -> MemoryCollection {
        MemoryCollection {
            path,
            shared: self.shared.clone(),
            closed: self.closed.clone(),
        }
    }
}

/// A collection on the in-process store
#[derive(Clone)]
pub struct MemoryCollection {
    path: CollectionPath,
    shared: Arc<Shared>,
    closed: Arc<AtomicBool>,
}

impl MemoryCollection {
    pub fn path(&self) -> &CollectionPath {
        &self.path
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Run `f` under the write lock with `key` dropped first if it has expired.
    fn with_docs<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, StoredDoc>) -> Result<T>) -> Result<T> {
        self.ensure_open()?;
        let mut collections = self.shared.collections.write();
        let docs = collections.entry(self.path.clone()).or_default();
        if docs.get(key).is_some_and(|doc| doc.is_expired(Instant::now())) {
            docs.remove(key);
        }
        f(docs)
    }

    /// Look up a live document under the read lock.
    fn read_doc<T>(&self, key: &str, f: impl FnOnce(&StoredDoc) -> T) -> Result<T> {
        self.ensure_open()?;
        let collections = self.shared.collections.read();
        collections
            .get(&self.path)
            .and_then(|docs| docs.get(key))
            .filter(|doc| !doc.is_expired(Instant::now()))
            .map(f)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    #[cfg(test)]
    fn stored_len(&self) -> usize {
        self.shared
            .collections
            .read()
            .get(&self.path)
            .map_or(0, HashMap::len)
    }
}

fn check_size(key: &str, content: &Bytes) -> Result<()> {
    if content.len() > MAX_VALUE_BYTES {
        return Err(Error::ValueTooLarge(format!(
            "{} ({} bytes, limit {})",
            key,
            content.len(),
            MAX_VALUE_BYTES
        )));
    }
    Ok(())
}

fn check_cas(key: &str, expected: Cas, current: Cas) -> Result<()> {
    if !expected.is_zero() && expected != current {
        return Err(Error::CasMismatch(format!(
            "{} (expected {}, found {})",
            key, expected, current
        )));
    }
    Ok(())
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn get(&self, key: &str) -> Result<Document> {
        self.read_doc(key, |doc| Document {
            key: key.to_string(),
            content: doc.content.clone(),
            cas: doc.cas,
        })
    }

    async fn insert(&self, key: &str, content: Bytes, expiry: Expiry) -> Result<Cas> {
        check_size(key, &content)?;
        self.with_docs(key, |docs| {
            if docs.contains_key(key) {
                return Err(Error::AlreadyExists(key.to_string()));
            }
            let cas = self.shared.next_cas();
            docs.insert(
                key.to_string(),
                StoredDoc { content, cas, expires_at: expires_at(expiry) },
            );
            Ok(cas)
        })
    }

    async fn upsert(&self, key: &str, content: Bytes, expiry: Expiry) -> Result<Cas> {
        check_size(key, &content)?;
        self.with_docs(key, |docs| {
            let cas = self.shared.next_cas();
            docs.insert(
                key.to_string(),
                StoredDoc { content, cas, expires_at: expires_at(expiry) },
            );
            Ok(cas)
        })
    }

    async fn remove(&self, key: &str, cas: Cas) -> Result<Cas> {
        self.with_docs(key, |docs| {
            let current = docs.get(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
            check_cas(key, cas, current.cas)?;
            docs.remove(key);
            Ok(self.shared.next_cas())
        })
    }

    async fn increment(&self, key: &str, delta: u64, initial: i64, expiry: Expiry) -> Result<CounterResult> {
        self.with_docs(key, |docs| {
            let value = match docs.get(key) {
                Some(doc) => {
                    let current: u64 = serde_json::from_slice(&doc.content).map_err(|_| {
                        Error::InvalidArgument(format!("{} does not hold a counter", key))
                    })?;
                    current.wrapping_add(delta)
                }
                None if initial < 0 => return Err(Error::NotFound(key.to_string())),
                None => initial as u64,
            };

            let cas = self.shared.next_cas();
            let expires = match docs.get(key) {
                Some(doc) => doc.expires_at,
                None => expires_at(expiry),
            };
            docs.insert(
                key.to_string(),
                StoredDoc {
                    content: Bytes::from(value.to_string()),
                    cas,
                    expires_at: expires,
                },
            );
            Ok(CounterResult { value, cas })
        })
    }

    async fn mutate_in(
        &self,
        key: &str,
        cas: Cas,
        specs: &[MutateInSpec],
        expiry: Expiry,
    ) -> Result<MutateInResult> {
        if specs.is_empty() {
            return Err(Error::InvalidArgument("mutate_in requires at least one spec".to_string()));
        }
        self.with_docs(key, |docs| {
            let current = docs.get(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
            check_cas(key, cas, current.cas)?;

            let mut root: Value = serde_json::from_slice(&current.content)
                .map_err(|e| Error::decode(key, e))?;
            let values = specs
                .iter()
                .map(|spec| apply_spec(&mut root, spec))
                .collect::<Result<Vec<_>>>()?;

            let content = Bytes::from(
                serde_json::to_vec(&root).map_err(|e| Error::Internal(e.to_string()))?,
            );
            check_size(key, &content)?;

            let new_cas = self.shared.next_cas();
            let expires = if expiry.is_none() { current.expires_at } else { expires_at(expiry) };
            docs.insert(
                key.to_string(),
                StoredDoc { content, cas: new_cas, expires_at: expires },
            );
            Ok(MutateInResult { cas: new_cas, values })
        })
    }

    async fn touch(&self, key: &str, expiry: Expiry) -> Result<Cas> {
        self.with_docs(key, |docs| {
            let cas = self.shared.next_cas();
            let doc = docs.get_mut(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
            doc.cas = cas;
            doc.expires_at = expires_at(expiry);
            Ok(cas)
        })
    }
}

/// Walk to the object holding the last segment of `path`.
fn parent_of<'a>(root: &'a mut Value, path: &str, create: bool) -> Result<(&'a mut Map<String, Value>, String)> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidArgument(format!("invalid path '{}'", path)));
    }
    let Some((leaf, parents)) = segments.split_last() else {
        return Err(Error::InvalidArgument(format!("invalid path '{}'", path)));
    };

    let mut current = root;
    for segment in parents {
        let map = current
            .as_object_mut()
            .ok_or_else(|| Error::PathMismatch(path.to_string()))?;
        current = if create {
            map.entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
        } else {
            map.get_mut(*segment)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?
        };
    }
    let map = current
        .as_object_mut()
        .ok_or_else(|| Error::PathMismatch(path.to_string()))?;
    Ok((map, leaf.to_string()))
}

fn apply_spec(root: &mut Value, spec: &MutateInSpec) -> Result<Option<Value>> {
    let path = spec.path();
    match spec {
        MutateInSpec::Insert { value, .. } => {
            let (parent, leaf) = parent_of(root, path, true)?;
            if parent.contains_key(&leaf) {
                return Err(Error::PathExists(path.to_string()));
            }
            parent.insert(leaf, value.clone());
            Ok(None)
        }
        MutateInSpec::Upsert { value, .. } => {
            let (parent, leaf) = parent_of(root, path, true)?;
            parent.insert(leaf, value.clone());
            Ok(None)
        }
        MutateInSpec::Replace { value, .. } => {
            let (parent, leaf) = parent_of(root, path, false)?;
            let slot = parent
                .get_mut(&leaf)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
            *slot = value.clone();
            Ok(None)
        }
        MutateInSpec::Remove { .. } => {
            let (parent, leaf) = parent_of(root, path, false)?;
            parent
                .remove(&leaf)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
            Ok(None)
        }
        MutateInSpec::ArrayAppend { value, .. } => {
            let (parent, leaf) = parent_of(root, path, true)?;
            let slot = parent.entry(leaf).or_insert_with(|| Value::Array(Vec::new()));
            let array = slot
                .as_array_mut()
                .ok_or_else(|| Error::PathMismatch(path.to_string()))?;
            array.push(value.clone());
            Ok(None)
        }
        MutateInSpec::Increment { delta, .. } => {
            let (parent, leaf) = parent_of(root, path, true)?;
            let current = match parent.get(&leaf) {
                Some(existing) => existing
                    .as_i64()
                    .ok_or_else(|| Error::PathMismatch(path.to_string()))?,
                None => 0,
            };
            let next = current
                .checked_add(*delta)
                .ok_or_else(|| Error::InvalidArgument(format!("increment overflows at '{}'", path)))?;
            parent.insert(leaf, Value::from(next));
            Ok(Some(Value::from(next)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn open(connector: &MemoryConnector) -> MemoryCollection {
        let cluster = connector
            .connect(&ClusterConfig::new("memory://test", "default"))
            .await
            .unwrap();
        cluster.bucket("default").default_collection()
    }

    fn body(value: Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).unwrap())
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let collection = open(&MemoryConnector::new()).await;

        let cas = collection.insert("user::1", body(json!({"name": "Ada"})), Expiry::NONE).await.unwrap();
        let doc = collection.get("user::1").await.unwrap();
        assert_eq!(doc.cas, cas);
        assert_eq!(doc.decode::<Value>().unwrap(), json!({"name": "Ada"}));

        collection.remove("user::1", cas).await.unwrap();
        assert_eq!(collection.get("user::1").await, Err(Error::NotFound("user::1".to_string())));
    }

    #[tokio::test]
    async fn test_insert_existing_fails() {
        let collection = open(&MemoryConnector::new()).await;
        collection.insert("k", body(json!(1)), Expiry::NONE).await.unwrap();
        let err = collection.insert("k", body(json!(2)), Expiry::NONE).await.unwrap_err();
        assert_eq!(err, Error::AlreadyExists("k".to_string()));
    }

    #[tokio::test]
    async fn test_remove_with_stale_cas() {
        let collection = open(&MemoryConnector::new()).await;
        let first = collection.upsert("k", body(json!(1)), Expiry::NONE).await.unwrap();
        collection.upsert("k", body(json!(2)), Expiry::NONE).await.unwrap();

        let err = collection.remove("k", first).await.unwrap_err();
        assert!(matches!(err, Error::CasMismatch(_)));
        // Zero CAS removes unconditionally
        assert!(collection.remove("k", Cas::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_value_too_large() {
        let collection = open(&MemoryConnector::new()).await;
        let big = Bytes::from(vec![b'x'; MAX_VALUE_BYTES + 1]);
        let err = collection.upsert("big", big, Expiry::NONE).await.unwrap_err();
        assert!(matches!(err, Error::ValueTooLarge(_)));
    }

    #[tokio::test]
    async fn test_increment_creates_then_adds() {
        let collection = open(&MemoryConnector::new()).await;

        let first = collection.increment("hits", 5, 100, Expiry::NONE).await.unwrap();
        assert_eq!(first.value, 100);
        let second = collection.increment("hits", 5, 100, Expiry::NONE).await.unwrap();
        assert_eq!(second.value, 105);
        assert!(second.cas > first.cas);

        let err = collection.increment("missing", 1, -1, Expiry::NONE).await.unwrap_err();
        assert_eq!(err, Error::NotFound("missing".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_touch() {
        let collection = open(&MemoryConnector::new()).await;
        collection.upsert("session", body(json!("a")), Expiry::from_secs(10)).await.unwrap();
        collection.upsert("other", body(json!("b")), Expiry::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        collection.touch("session", Expiry::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(collection.get("session").await.is_ok());
        assert!(matches!(collection.get("other").await, Err(Error::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_purges_only_the_touched_key() {
        let connector = MemoryConnector::new();
        let collection = open(&connector).await;
        for i in 0..100 {
            collection.upsert(&format!("tmp::{}", i), body(json!(i)), Expiry::from_secs(5)).await.unwrap();
        }
        collection.upsert("kept", body(json!("x")), Expiry::NONE).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(connector.document_count(collection.path()), 1);

        // Reads leave expired entries in place; writes drop only their own key
        assert!(matches!(collection.get("tmp::0").await, Err(Error::NotFound(_))));
        assert_eq!(collection.stored_len(), 101);
        collection.upsert("kept", body(json!("y")), Expiry::NONE).await.unwrap();
        assert_eq!(collection.stored_len(), 101);
        collection.insert("tmp::0", body(json!("fresh")), Expiry::NONE).await.unwrap();
        assert_eq!(collection.stored_len(), 101);
        assert_eq!(connector.document_count(collection.path()), 2);
    }

    #[tokio::test]
    async fn test_mutate_in_applies_in_order() {
        let collection = open(&MemoryConnector::new()).await;
        let cas = collection
            .insert("user::1", body(json!({"name": "Ada", "tags": []})), Expiry::NONE)
            .await
            .unwrap();

        let specs = vec![
            MutateInSpec::upsert("address.city", "London"),
            MutateInSpec::array_append("tags", "admin"),
            MutateInSpec::increment("logins", 3),
            MutateInSpec::replace("name", "Ada L."),
        ];
        let result = collection.mutate_in("user::1", cas, &specs, Expiry::NONE).await.unwrap();
        assert_eq!(result.values, vec![None, None, Some(json!(3)), None]);

        let doc: Value = collection.get("user::1").await.unwrap().decode().unwrap();
        assert_eq!(
            doc,
            json!({"name": "Ada L.", "tags": ["admin"], "address": {"city": "London"}, "logins": 3})
        );
    }

    #[tokio::test]
    async fn test_mutate_in_is_all_or_nothing() {
        let collection = open(&MemoryConnector::new()).await;
        collection.insert("doc", body(json!({"a": 1})), Expiry::NONE).await.unwrap();

        let specs = vec![MutateInSpec::upsert("b", 2), MutateInSpec::remove("missing")];
        let err = collection.mutate_in("doc", Cas::ZERO, &specs, Expiry::NONE).await.unwrap_err();
        assert_eq!(err, Error::PathNotFound("missing".to_string()));

        let doc: Value = collection.get("doc").await.unwrap().decode().unwrap();
        assert_eq!(doc, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_mutate_in_insert_existing_path() {
        let collection = open(&MemoryConnector::new()).await;
        collection.insert("doc", body(json!({"a": 1})), Expiry::NONE).await.unwrap();
        let err = collection
            .mutate_in("doc", Cas::ZERO, &[MutateInSpec::insert("a", 2)], Expiry::NONE)
            .await
            .unwrap_err();
        assert_eq!(err, Error::PathExists("a".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_bucket_not_ready() {
        let connector = MemoryConnector::with_buckets(["travel"]);
        let cluster = connector.connect(&ClusterConfig::default()).await.unwrap();

        assert!(cluster.bucket("travel").wait_until_ready(Duration::from_secs(1)).await.is_ok());
        let err = cluster.bucket("nope").wait_until_ready(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, Error::BucketNotFound("nope".to_string()));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let err = MemoryConnector::new()
            .connect(&ClusterConfig::new("couchbase://localhost", "default"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_calls() {
        let connector = MemoryConnector::new();
        let cluster = connector.connect(&ClusterConfig::default()).await.unwrap();
        let collection = cluster.bucket("default").default_collection();

        assert!(cluster.close().await.is_ok());
        assert!(cluster.close().await.is_ok());
        assert_eq!(collection.get("k").await, Err(Error::Closed));
    }

    #[tokio::test]
    async fn test_sessions_share_data() {
        let connector = MemoryConnector::new();
        let first = open(&connector).await;
        let second = open(&connector).await;

        first.upsert("shared", body(json!(true)), Expiry::NONE).await.unwrap();
        assert!(second.get("shared").await.is_ok());
        assert_eq!(connector.document_count(first.path()), 1);
    }
}
