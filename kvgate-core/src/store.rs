/// Store primitives consumed by the client layer
///
/// These traits describe the driver-side surface of a clustered document store:
/// opening a cluster session, opening buckets, resolving collections and the
/// single-key primitives that bulk operations dispatch to. Wire protocols live
/// behind implementations of these traits.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::{
    ClusterConfig, Result,
    types::{Cas, CounterResult, Document, Expiry, MutateInResult, MutateInSpec},
};

/// Opens cluster sessions
#[async_trait]
pub trait Connector: Send + Sync {
    type Cluster: Cluster;

    /// Open a session to the configured endpoint with the configured credentials.
    async fn connect(&self, config: &ClusterConfig) -> Result<Self::Cluster>;
}

/// A live cluster session
#[async_trait]
pub trait Cluster: Send + Sync + 'static {
    type Bucket: Bucket;

    /// Readiness probe. Returns once the cluster can serve requests or `timeout` elapses.
    async fn wait_until_ready(&self, timeout: Duration) -> Result<()>;

    /// Open a handle to a bucket. Local and non-blocking; readiness is probed separately.
    fn bucket(&self, name: &str) -> Self::Bucket;

    /// Release the session. Must tolerate repeated calls.
    async fn close(&self) -> Result<()>;
}

/// A bucket handle
#[async_trait]
pub trait Bucket: Send + Sync + 'static {
    type Collection: Collection;

    fn name(&self) -> &str;

    /// Readiness probe for this bucket.
    async fn wait_until_ready(&self, timeout: Duration) -> Result<()>;

    fn default_collection(&self) -> Self::Collection;

    fn collection(&self, scope: &str, name: &str) -> Self::Collection;
}

/// Single-key primitives on a collection
///
/// Implementations must be safe to call concurrently from many tasks.
#[async_trait]
pub trait Collection: Send + Sync + 'static {
    /// Read a document and its version token
    async fn get(&self, key: &str) -> Result<Document>;

    /// Create a document; fails with `AlreadyExists` if the key is taken
    async fn insert(&self, key: &str, content: Bytes, expiry: Expiry) -> Result<Cas>;

    /// Create or replace a document
    async fn upsert(&self, key: &str, content: Bytes, expiry: Expiry) -> Result<Cas>;

    /// Delete a document. A non-zero `cas` must match the current version.
    async fn remove(&self, key: &str, cas: Cas) -> Result<Cas>;

    /// Atomically add `delta` to a counter document.
    ///
    /// An absent document is created holding `initial`; a negative `initial`
    /// means the counter must already exist.
    async fn increment(&self, key: &str, delta: u64, initial: i64, expiry: Expiry) -> Result<CounterResult>;

    /// Apply field-level mutations in order, all or nothing
    async fn mutate_in(
        &self,
        key: &str,
        cas: Cas,
        specs: &[MutateInSpec],
        expiry: Expiry,
    ) -> Result<MutateInResult>;

    /// Reset a document's expiry without touching its content
    async fn touch(&self, key: &str, expiry: Expiry) -> Result<Cas>;
}
