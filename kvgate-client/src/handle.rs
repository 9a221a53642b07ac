/// Ready-to-use connection produced by bootstrap
use kvgate_core::{Bucket, Cluster, CollectionPath};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

use crate::client::Client;

/// Collection type reached through a cluster's buckets
pub type CollectionOf<C> = <<C as Cluster>::Bucket as Bucket>::Collection;

/// Which collection a handle resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionTarget {
    /// The bucket's default collection
    Default { bucket: String },
    /// A named collection inside a named scope
    Named {
        bucket: String,
        scope: String,
        collection: String,
    },
}

impl CollectionTarget {
    pub fn path(&self) -> CollectionPath {
        match self {
            Self::Default { bucket } => CollectionPath::default_for(bucket),
            Self::Named { bucket, scope, collection } => CollectionPath::new(bucket, scope, collection),
        }
    }
}

impl fmt::Display for CollectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Cluster session, bucket and collection, each layered on the previous.
///
/// Only [`Bootstrap`](crate::Bootstrap) creates handles, and only after the
/// cluster and the bucket have both passed their readiness probes.
pub struct ConnectionHandle<C: Cluster> {
    cluster: C,
    bucket: C::Bucket,
    collection: Arc<CollectionOf<C>>,
    target: CollectionTarget,
    closed: AtomicBool,
}

impl<C: Cluster> ConnectionHandle<C> {
    pub(crate) fn new(
        cluster: C,
        bucket: C::Bucket,
        collection: CollectionOf<C>,
        target: CollectionTarget,
    ) -> Self {
        Self {
            cluster,
            bucket,
            collection: Arc::new(collection),
            target,
            closed: AtomicBool::new(false),
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn bucket(&self) -> &C::Bucket {
        &self.bucket
    }

    /// Shared reference to the resolved collection
    pub fn collection(&self) -> Arc<CollectionOf<C>> {
        self.collection.clone()
    }

    pub fn target(&self) -> &CollectionTarget {
        &self.target
    }

    /// CRUD facade bound to this handle's collection
    pub fn client(&self) -> Client<CollectionOf<C>> {
        Client::new(self.collection())
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Release the cluster session.
    ///
    /// Best effort: close errors are logged, never returned. Only the first
    /// call reaches the cluster; later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Cluster session already closed");
            return;
        }
        match self.cluster.close().await {
            Ok(()) => info!("Cluster connection closed"),
            Err(e) => error!(error = %e, "Error closing cluster connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_paths() {
        let default = CollectionTarget::Default { bucket: "travel".to_string() };
        assert!(default.path().is_default());

        let named = CollectionTarget::Named {
            bucket: "travel".to_string(),
            scope: "inventory".to_string(),
            collection: "hotel".to_string(),
        };
        assert_eq!(named.to_string(), "travel.inventory.hotel");
    }
}
