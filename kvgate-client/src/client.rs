/// Single-key CRUD facade
use kvgate_core::{Cas, Collection, CounterResult, ExecutorConfig, Expiry, MutateInResult, MutateInSpec, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::error;

use crate::executor::{BatchReport, BulkExecutor};
use crate::operation::{Operation, encode_json};

/// Client bound to one collection
///
/// Single-key calls return the store's error unmodified. Batches go through a
/// [`BulkExecutor`] sharing the same collection.
///
/// # Example
/// ```no_run
/// # use kvgate_client::{Bootstrap, Operation};
/// # use kvgate_core::{ClusterConfig, Expiry, MemoryConnector};
/// # async fn example() -> kvgate_core::Result<()> {
/// let config = ClusterConfig::new("memory://localhost", "default");
/// let handle = Bootstrap::new(MemoryConnector::new(), config).run().await;
/// let client = handle.client();
///
/// let cas = client.insert("user::1", &serde_json::json!({"name": "Ada"}), Expiry::NONE).await?;
/// client.execute(vec![Operation::touch("user::1", Expiry::from_secs(60))]).await?;
/// client.remove("user::1", cas).await?;
///
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Client<C: Collection + ?Sized> {
    collection: Arc<C>,
    executor: BulkExecutor<C>,
}

impl<C: Collection + ?Sized> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<C: Collection + ?Sized> Client<C> {
    pub fn new(collection: Arc<C>) -> Self {
        Self {
            executor: BulkExecutor::new(collection.clone()),
            collection,
        }
    }

    /// Configure the executor used by [`Client::execute`]
    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = self.executor.with_config(config);
        self
    }

    pub fn collection(&self) -> &Arc<C> {
        &self.collection
    }

    /// Read a document and decode it into `T`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<(T, Cas)> {
        let doc = self.collection.get(key).await?;
        match doc.decode::<T>() {
            Ok(value) => Ok((value, doc.cas)),
            Err(e) => {
                error!(key, error = %e, "Failed to read content");
                Err(e)
            }
        }
    }

    pub async fn insert<T: Serialize + ?Sized>(&self, key: &str, value: &T, expiry: Expiry) -> Result<Cas> {
        let content = encode_json(key, value)?;
        self.collection.insert(key, content, expiry).await
    }

    pub async fn upsert<T: Serialize + ?Sized>(&self, key: &str, value: &T, expiry: Expiry) -> Result<Cas> {
        let content = encode_json(key, value)?;
        self.collection.upsert(key, content, expiry).await
    }

    pub async fn remove(&self, key: &str, cas: Cas) -> Result<Cas> {
        self.collection.remove(key, cas).await
    }

    pub async fn counter(&self, key: &str, delta: u64, initial: i64, expiry: Expiry) -> Result<CounterResult> {
        self.collection.increment(key, delta, initial, expiry).await
    }

    pub async fn mutate_in(
        &self,
        key: &str,
        cas: Cas,
        specs: &[MutateInSpec],
        expiry: Expiry,
    ) -> Result<MutateInResult> {
        self.collection.mutate_in(key, cas, specs, expiry).await
    }

    pub async fn touch(&self, key: &str, expiry: Expiry) -> Result<Cas> {
        self.collection.touch(key, expiry).await
    }

    /// Run a batch; see [`BulkExecutor::execute`]
    pub async fn execute(&self, ops: Vec<Operation>) -> Result<()> {
        self.executor.execute(ops).await
    }

    /// Run a batch keeping per-key results; see [`BulkExecutor::execute_detailed`]
    pub async fn execute_detailed(&self, ops: Vec<Operation>) -> BatchReport {
        self.executor.execute_detailed(ops).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvgate_core::{Bucket, Cluster, ClusterConfig, Connector, Error, MemoryCollection, MemoryConnector};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: String,
        name: String,
        age: u32,
    }

    async fn client() -> Client<MemoryCollection> {
        let collection = MemoryConnector::new()
            .connect(&ClusterConfig::default())
            .await
            .unwrap()
            .bucket("default")
            .default_collection();
        Client::new(Arc::new(collection))
    }

    fn user() -> User {
        User { id: "user::1001".to_string(), name: "Vishal".to_string(), age: 30 }
    }

    #[tokio::test]
    async fn test_insert_then_get() {
        let client = client().await;
        let cas = client.insert("user::1001", &user(), Expiry::NONE).await.unwrap();

        let (read, read_cas): (User, Cas) = client.get("user::1001").await.unwrap();
        assert_eq!(read, user());
        assert_eq!(read_cas, cas);
    }

    #[tokio::test]
    async fn test_single_key_errors_are_unmodified() {
        let client = client().await;
        client.insert("user::1001", &user(), Expiry::NONE).await.unwrap();

        assert_eq!(
            client.insert("user::1001", &user(), Expiry::NONE).await,
            Err(Error::AlreadyExists("user::1001".to_string()))
        );
        assert_eq!(
            client.remove("user::404", Cas::ZERO).await,
            Err(Error::NotFound("user::404".to_string()))
        );
    }

    #[tokio::test]
    async fn test_get_into_wrong_shape() {
        let client = client().await;
        client.upsert("user::1", &vec![1, 2, 3], Expiry::NONE).await.unwrap();

        let err = client.get::<User>("user::1").await.unwrap_err();
        assert!(matches!(err, Error::Decode { ref key, .. } if key == "user::1"));
    }

    #[tokio::test]
    async fn test_cas_guarded_mutation() {
        let client = client().await;
        let cas = client.upsert("user::1001", &user(), Expiry::NONE).await.unwrap();

        let result = client
            .mutate_in("user::1001", cas, &[MutateInSpec::replace("age", 31)], Expiry::NONE)
            .await
            .unwrap();

        // The old token no longer matches
        let stale = client
            .mutate_in("user::1001", cas, &[MutateInSpec::replace("age", 32)], Expiry::NONE)
            .await;
        assert!(matches!(stale, Err(Error::CasMismatch(_))));

        let (read, read_cas): (User, Cas) = client.get("user::1001").await.unwrap();
        assert_eq!(read.age, 31);
        assert_eq!(read_cas, result.cas);
    }

    #[tokio::test]
    async fn test_counter_and_batch() {
        let client = client().await.with_executor_config(ExecutorConfig::new().with_max_in_flight(2));

        let ops = (0..10).map(|_| Operation::counter("page::views", 1, 0, Expiry::NONE)).collect();
        client.execute(ops).await.unwrap();

        // Created at 0 by the first call, then nine increments
        let next = client.counter("page::views", 1, 0, Expiry::NONE).await.unwrap();
        assert_eq!(next.value, 10);
    }
}
