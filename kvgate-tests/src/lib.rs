/// Test utilities for kvgate
///
/// Stub store collaborators with scripted failures and call counting, used by
/// the integration tests to drive bootstrap and the bulk executor.

use async_trait::async_trait;
use bytes::Bytes;
use kvgate_core::{
    Bucket, Cas, Cluster, ClusterConfig, Collection, Connector, CounterResult, Document, Error, Expiry,
    MemoryBucket, MemoryCluster, MemoryCollection, MemoryConnector, MutateInResult, MutateInSpec, Result,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Failure script for [`ScriptedConnector`]
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Number of connect calls that fail before one succeeds
    pub connect_failures: u64,
    /// Number of cluster readiness probes that fail before one succeeds
    pub cluster_probe_failures: u64,
    /// Number of bucket readiness probes that fail before one succeeds
    pub bucket_probe_failures: u64,
    /// Failing probes never return instead of returning an error
    pub hang_failing_probes: bool,
    /// Cluster close returns an error
    pub close_fails: bool,
}

impl Script {
    /// A store that accepts everything first time
    pub fn healthy() -> Self {
        Self::default()
    }

    /// A store that never accepts connections
    pub fn unreachable() -> Self {
        Self {
            connect_failures: u64::MAX,
            ..Self::default()
        }
    }
}

/// Which collection resolution path ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Default,
    Named { scope: String, collection: String },
}

/// Observations recorded by the scripted stubs
#[derive(Debug, Default)]
pub struct ScriptStats {
    pub connects: AtomicU64,
    pub cluster_probes: AtomicU64,
    pub bucket_probes: AtomicU64,
    /// Successful cluster probes
    pub cluster_ready: AtomicU64,
    /// Successful bucket probes
    pub bucket_ready: AtomicU64,
    pub closes: AtomicU64,
    pub resolutions: Mutex<Vec<Resolution>>,
}

impl ScriptStats {
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn cluster_probes(&self) -> u64 {
        self.cluster_probes.load(Ordering::SeqCst)
    }

    pub fn bucket_probes(&self) -> u64 {
        self.bucket_probes.load(Ordering::SeqCst)
    }

    pub fn cluster_ready(&self) -> u64 {
        self.cluster_ready.load(Ordering::SeqCst)
    }

    pub fn bucket_ready(&self) -> u64 {
        self.bucket_ready.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn resolutions(&self) -> Vec<Resolution> {
        self.resolutions.lock().clone()
    }
}

/// Connector that fails according to a [`Script`] and serves a memory store once ready
#[derive(Clone)]
pub struct ScriptedConnector {
    script: Script,
    memory: MemoryConnector,
    stats: Arc<ScriptStats>,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            memory: MemoryConnector::new(),
            stats: Arc::new(ScriptStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ScriptStats> {
        self.stats.clone()
    }
}

/// Returns true while the attempt number `attempt` (1-based) is scripted to fail.
fn scripted_failure(attempt: u64, failures: u64) -> bool {
    attempt <= failures
}

async fn failing_probe(script: &Script, err: Error) -> Result<()> {
    if script.hang_failing_probes {
        std::future::pending::<()>().await;
    }
    Err(err)
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Cluster = ScriptedCluster;

    async fn connect(&self, config: &ClusterConfig) -> Result<ScriptedCluster> {
        let attempt = self.stats.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if scripted_failure(attempt, self.script.connect_failures) {
            return Err(Error::Connection(format!("connection refused (attempt {})", attempt)));
        }
        let inner = self
            .memory
            .connect(&ClusterConfig::new("memory://scripted", config.bucket.clone()))
            .await?;
        Ok(ScriptedCluster {
            inner,
            script: self.script.clone(),
            stats: self.stats.clone(),
        })
    }
}

pub struct ScriptedCluster {
    inner: MemoryCluster,
    script: Script,
    stats: Arc<ScriptStats>,
}

#[async_trait]
impl Cluster for ScriptedCluster {
    type Bucket = ScriptedBucket;

    async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let attempt = self.stats.cluster_probes.fetch_add(1, Ordering::SeqCst) + 1;
        if scripted_failure(attempt, self.script.cluster_probe_failures) {
            return failing_probe(&self.script, Error::Timeout(format!("cluster not ready after {:?}", timeout))).await;
        }
        self.stats.cluster_ready.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn bucket(&self, name: &str) -> ScriptedBucket {
        ScriptedBucket {
            inner: self.inner.bucket(name),
            script: self.script.clone(),
            stats: self.stats.clone(),
        }
    }

    async fn close(&self) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await?;
        if self.script.close_fails {
            return Err(Error::Unavailable("close timed out".to_string()));
        }
        Ok(())
    }
}

pub struct ScriptedBucket {
    inner: MemoryBucket,
    script: Script,
    stats: Arc<ScriptStats>,
}

#[async_trait]
impl Bucket for ScriptedBucket {
    type Collection = MemoryCollection;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let attempt = self.stats.bucket_probes.fetch_add(1, Ordering::SeqCst) + 1;
        if scripted_failure(attempt, self.script.bucket_probe_failures) {
            return failing_probe(&self.script, Error::BucketNotFound(format!("{} (waited {:?})", self.name(), timeout))).await;
        }
        self.stats.bucket_ready.fetch_add(1, Ordering::SeqCst);
        self.inner.wait_until_ready(timeout).await
    }

    fn default_collection(&self) -> MemoryCollection {
        self.stats.resolutions.lock().push(Resolution::Default);
        self.inner.default_collection()
    }

    fn collection(&self, scope: &str, name: &str) -> MemoryCollection {
        self.stats.resolutions.lock().push(Resolution::Named {
            scope: scope.to_string(),
            collection: name.to_string(),
        });
        self.inner.collection(scope, name)
    }
}

/// Collection stub counting every primitive call
///
/// Calls succeed unless the key was registered with [`CountingCollection::fail_key`].
/// An optional per-call delay keeps operations in flight long enough to
/// observe concurrency; [`CountingCollection::delay_key`] overrides it per key.
#[derive(Default)]
pub struct CountingCollection {
    calls: AtomicUsize,
    per_key: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, Error>>,
    panics: Mutex<HashSet<String>>,
    delay: Option<Duration>,
    key_delays: Mutex<HashMap<String, Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_cas: AtomicU64,
}

impl CountingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold calls on `key` for `delay` instead of the default delay
    pub fn delay_key(&self, key: impl Into<String>, delay: Duration) {
        self.key_delays.lock().insert(key.into(), delay);
    }

    /// Make every call on `key` panic
    pub fn panic_key(&self, key: impl Into<String>) {
        self.panics.lock().insert(key.into());
    }

    /// Make every call on `key` fail with `error`
    pub fn fail_key(&self, key: impl Into<String>, error: Error) {
        self.failures.lock().insert(key.into(), error);
    }

    /// Total primitive calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Primitive calls made for `key`
    pub fn calls_for(&self, key: &str) -> usize {
        self.per_key.lock().get(key).copied().unwrap_or(0)
    }

    /// Highest number of calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn call(&self, key: &str) -> Result<Cas> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_key.lock().entry(key.to_string()).or_insert(0) += 1;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = self.key_delays.lock().get(key).copied().or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let panics = self.panics.lock().contains(key);
        if panics {
            panic!("scripted panic on {}", key);
        }

        let failure = self.failures.lock().get(key).cloned();
        match failure {
            Some(e) => Err(e),
            None => Ok(Cas(self.next_cas.fetch_add(1, Ordering::SeqCst) + 1)),
        }
    }
}

#[async_trait]
impl Collection for CountingCollection {
    async fn get(&self, key: &str) -> Result<Document> {
        let cas = self.call(key).await?;
        let content = serde_json::to_vec(&serde_json::json!({ "key": key }))
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Document {
            key: key.to_string(),
            content: Bytes::from(content),
            cas,
        })
    }

    async fn insert(&self, key: &str, _content: Bytes, _expiry: Expiry) -> Result<Cas> {
        self.call(key).await
    }

    async fn upsert(&self, key: &str, _content: Bytes, _expiry: Expiry) -> Result<Cas> {
        self.call(key).await
    }

    async fn remove(&self, key: &str, _cas: Cas) -> Result<Cas> {
        self.call(key).await
    }

    async fn increment(&self, key: &str, delta: u64, _initial: i64, _expiry: Expiry) -> Result<CounterResult> {
        let cas = self.call(key).await?;
        Ok(CounterResult { value: delta, cas })
    }

    async fn mutate_in(
        &self,
        key: &str,
        _cas: Cas,
        specs: &[MutateInSpec],
        _expiry: Expiry,
    ) -> Result<MutateInResult> {
        let cas = self.call(key).await?;
        Ok(MutateInResult { cas, values: vec![None; specs.len()] })
    }

    async fn touch(&self, key: &str, _expiry: Expiry) -> Result<Cas> {
        self.call(key).await
    }
}

/// Bootstrap configuration with the default 10s probe bound and 5s retry delay.
///
/// Tests run bootstrap under paused tokio time, so real timing costs nothing.
pub fn test_config() -> ClusterConfig {
    ClusterConfig::new("memory://test", "default")
        .with_ready_timeout(Duration::from_secs(10))
        .with_retry_delay(Duration::from_secs(5))
}
