pub mod error;
pub mod types;
pub mod config;
pub mod store;
pub mod memory;

pub use error::{Error, Result};
pub use types::*;
pub use config::{ClusterConfig, ExecutorConfig};
pub use store::{Bucket, Cluster, Collection, Connector};
pub use memory::{MemoryBucket, MemoryCluster, MemoryCollection, MemoryConnector};
