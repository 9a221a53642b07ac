/// Cluster and bucket readiness bootstrap
///
/// Connects to the cluster, waits for it to become ready, opens the configured
/// bucket and waits for that too. Every failure is logged and retried after a
/// fixed delay; there is no attempt ceiling, so `run` only returns once the
/// store is usable.

use kvgate_core::{Bucket, Cluster, ClusterConfig, Connector, Error, Result};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::handle::{CollectionTarget, ConnectionHandle};

/// Number of most recent states kept by [`Bootstrap::history`]
pub const HISTORY_LIMIT: usize = 32;

/// Bootstrap progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// No cluster session
    Disconnected,
    /// Opening and probing a cluster session
    Connecting,
    /// Cluster probe succeeded
    ClusterReady,
    /// Probing the bucket
    OpeningBucket,
    /// Bucket probe succeeded; terminal
    BucketReady,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::ClusterReady => "CLUSTER_READY",
            Self::OpeningBucket => "OPENING_BUCKET",
            Self::BucketReady => "BUCKET_READY",
        };
        f.write_str(name)
    }
}

/// Attempt counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapAttempts {
    /// Cluster connect attempts, each followed by a probe when the connect succeeds
    pub cluster: u64,
    /// Bucket readiness probes
    pub bucket: u64,
}

/// Bootstrap state machine
pub struct Bootstrap<K: Connector> {
    connector: K,
    config: ClusterConfig,
    state: RwLock<BootstrapState>,
    history: RwLock<VecDeque<BootstrapState>>,
    cluster_attempts: AtomicU64,
    bucket_attempts: AtomicU64,
}

impl<K: Connector> Bootstrap<K> {
    pub fn new(connector: K, config: ClusterConfig) -> Self {
        Self {
            connector,
            config,
            state: RwLock::new(BootstrapState::Disconnected),
            history: RwLock::new(VecDeque::from([BootstrapState::Disconnected])),
            cluster_attempts: AtomicU64::new(0),
            bucket_attempts: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> BootstrapState {
        *self.state.read()
    }

    /// The last [`HISTORY_LIMIT`] states entered, oldest first
    pub fn history(&self) -> Vec<BootstrapState> {
        self.history.read().iter().copied().collect()
    }

    pub fn attempts(&self) -> BootstrapAttempts {
        BootstrapAttempts {
            cluster: self.cluster_attempts.load(Ordering::SeqCst),
            bucket: self.bucket_attempts.load(Ordering::SeqCst),
        }
    }

    /// Block until the cluster and bucket are ready and return the handle.
    ///
    /// Never fails. Cancel the future (or kill the process) to give up.
    pub async fn run(&self) -> ConnectionHandle<K::Cluster> {
        info!(endpoint = %self.config.endpoint, "Connecting to cluster");

        let cluster = self.connect_cluster().await;
        let bucket = self.open_bucket(&cluster).await;
        let (collection, target) =
            resolve_collection(&bucket, &self.config.scope, &self.config.collection);

        ConnectionHandle::new(cluster, bucket, collection, target)
    }

    async fn connect_cluster(&self) -> K::Cluster {
        loop {
            self.transition(BootstrapState::Connecting);
            let attempt = self.cluster_attempts.fetch_add(1, Ordering::SeqCst) + 1;

            match self.connector.connect(&self.config).await {
                Ok(cluster) => {
                    let probe = cluster.wait_until_ready(self.config.ready_timeout());
                    match self.bounded(probe).await {
                        Ok(()) => {
                            info!(attempt, "Connected to cluster");
                            self.transition(BootstrapState::ClusterReady);
                            return cluster;
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "Cluster not ready");
                            if let Err(e) = cluster.close().await {
                                debug!(error = %e, "Failed to release unready cluster session");
                            }
                        }
                    }
                }
                Err(e) => error!(attempt, error = %e, "Error connecting to cluster"),
            }

            self.transition(BootstrapState::Disconnected);
            time::sleep(self.config.retry_delay()).await;
        }
    }

    async fn open_bucket(&self, cluster: &K::Cluster) -> <K::Cluster as Cluster>::Bucket {
        self.transition(BootstrapState::OpeningBucket);
        let bucket = cluster.bucket(&self.config.bucket);

        loop {
            let attempt = self.bucket_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let probe = bucket.wait_until_ready(self.config.ready_timeout());
            match self.bounded(probe).await {
                Ok(()) => {
                    info!(bucket = %self.config.bucket, attempt, "Bucket is ready");
                    self.transition(BootstrapState::BucketReady);
                    return bucket;
                }
                Err(e) => {
                    error!(bucket = %self.config.bucket, attempt, error = %e, "Error opening bucket");
                }
            }
            time::sleep(self.config.retry_delay()).await;
        }
    }

    /// Enforce the readiness timeout even if the probe ignores it.
    async fn bounded<F>(&self, probe: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let timeout = self.config.ready_timeout();
        match time::timeout(timeout, probe).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout(format!("not ready within {:?}", timeout))),
        }
    }

    fn transition(&self, next: BootstrapState) {
        let mut state = self.state.write();
        let previous = *state;
        if previous != next {
            debug!(from = %previous, to = %next, "Bootstrap state change");
        }
        *state = next;

        let mut history = self.history.write();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(next);
    }
}

/// Pick the collection a handle will address.
///
/// A named collection needs both names; anything else resolves to the bucket's
/// default collection.
pub fn resolve_collection<B: Bucket>(bucket: &B, scope: &str, collection: &str) -> (B::Collection, CollectionTarget) {
    if !scope.is_empty() && !collection.is_empty() {
        info!(scope, collection, "Using named collection");
        let target = CollectionTarget::Named {
            bucket: bucket.name().to_string(),
            scope: scope.to_string(),
            collection: collection.to_string(),
        };
        (bucket.collection(scope, collection), target)
    } else {
        info!(bucket = bucket.name(), "Using default collection");
        let target = CollectionTarget::Default {
            bucket: bucket.name().to_string(),
        };
        (bucket.default_collection(), target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvgate_core::{MemoryConnector, memory::MemoryBucket};
    use std::time::Duration;

    async fn memory_bucket(name: &str) -> MemoryBucket {
        let cluster = MemoryConnector::new()
            .connect(&ClusterConfig::default())
            .await
            .unwrap();
        cluster.bucket(name)
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BootstrapState::BucketReady.to_string(), "BUCKET_READY");
        assert_eq!(BootstrapState::Disconnected.to_string(), "DISCONNECTED");
    }

    #[tokio::test]
    async fn test_resolve_default_when_names_missing() {
        let bucket = memory_bucket("travel").await;

        let (collection, target) = resolve_collection(&bucket, "", "");
        assert_eq!(target, CollectionTarget::Default { bucket: "travel".to_string() });
        assert!(collection.path().is_default());

        // Half-specified pairs fall back to the default collection too
        let (_, target) = resolve_collection(&bucket, "inventory", "");
        assert!(matches!(target, CollectionTarget::Default { .. }));
    }

    #[tokio::test]
    async fn test_resolve_named() {
        let bucket = memory_bucket("travel").await;
        let (collection, target) = resolve_collection(&bucket, "inventory", "hotel");
        assert_eq!(target.path(), *collection.path());
        assert_eq!(collection.path().collection, "hotel");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_against_memory_store() {
        let config = ClusterConfig::new("memory://local", "default")
            .with_collection("app", "users")
            .with_retry_delay(Duration::from_millis(10));
        let bootstrap = Bootstrap::new(MemoryConnector::new(), config);

        let handle = bootstrap.run().await;

        assert_eq!(bootstrap.state(), BootstrapState::BucketReady);
        assert_eq!(bootstrap.attempts(), BootstrapAttempts { cluster: 1, bucket: 1 });
        assert_eq!(
            bootstrap.history(),
            vec![
                BootstrapState::Disconnected,
                BootstrapState::Connecting,
                BootstrapState::ClusterReady,
                BootstrapState::OpeningBucket,
                BootstrapState::BucketReady,
            ]
        );
        assert_eq!(handle.target().path().scope, "app");
    }
}
