/// Connection and executor configuration
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Cluster connection parameters and bootstrap timing
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster endpoint (e.g. "memory://local")
    pub endpoint: String,

    pub username: String,

    pub password: String,

    /// Bucket to open once the cluster is ready
    pub bucket: String,

    /// Scope name; empty selects the bucket's default collection
    pub scope: String,

    /// Collection name; empty selects the bucket's default collection
    pub collection: String,

    /// Bound on each cluster or bucket readiness probe
    pub ready_timeout_ms: u64,

    /// Fixed delay between bootstrap attempts
    pub retry_delay_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoint: "memory://localhost".to_string(),
            username: String::new(),
            password: String::new(),
            bucket: "default".to_string(),
            scope: String::new(),
            collection: String::new(),
            ready_timeout_ms: 10_000,
            retry_delay_ms: 5_000,
        }
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("scope", &self.scope)
            .field("collection", &self.collection)
            .field("ready_timeout_ms", &self.ready_timeout_ms)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

impl ClusterConfig {
    /// Create a configuration for `endpoint` and `bucket` with default timing
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| {
            Error::InvalidArgument(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_slice(&raw).map_err(|e| {
            Error::InvalidArgument(format!("cannot parse config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_collection(mut self, scope: impl Into<String>, collection: impl Into<String>) -> Self {
        self.scope = scope.into();
        self.collection = collection.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// True when both a scope and a collection name were supplied
    pub fn has_named_collection(&self) -> bool {
        !self.scope.is_empty() && !self.collection.is_empty()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(Error::InvalidArgument("endpoint must not be empty".to_string()));
        }
        if self.bucket.is_empty() {
            return Err(Error::InvalidArgument("bucket must not be empty".to_string()));
        }
        if self.scope.is_empty() != self.collection.is_empty() {
            // Resolution falls back to the default collection in this case.
            tracing::warn!(
                scope = %self.scope,
                collection = %self.collection,
                "Only one of scope/collection supplied, the default collection will be used"
            );
        }
        Ok(())
    }
}

/// Bulk executor settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum operations in flight at once (None = one task per operation, unbounded)
    pub max_in_flight: Option<usize>,
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound concurrent dispatch. Zero is treated as one.
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit.max(1));
        self
    }
}
