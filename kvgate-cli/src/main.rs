/// kvgate command line client
///
/// Bootstraps a connection, writes a document, reads it back, runs a small
/// batch and shuts the connection down.

use anyhow::{Context, bail};
use clap::Parser;
use kvgate_client::{Bootstrap, Operation};
use kvgate_core::{Cas, ClusterConfig, ExecutorConfig, Expiry, MemoryConnector, memory::MEMORY_SCHEME};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kvgate")]
#[command(about = "Connect to a document store and run a sample round trip", long_about = None)]
struct Args {
    /// JSON config file; command line flags override its values
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Cluster endpoint
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(short, long)]
    username: Option<String>,

    #[arg(short, long)]
    password: Option<String>,

    #[arg(short, long)]
    bucket: Option<String>,

    /// Scope name (needs --collection too)
    #[arg(long)]
    scope: Option<String>,

    /// Collection name (needs --scope too)
    #[arg(long)]
    collection: Option<String>,

    /// Readiness probe bound in seconds
    #[arg(long)]
    ready_timeout: Option<u64>,

    /// Delay between bootstrap attempts in seconds
    #[arg(long)]
    retry_delay: Option<u64>,

    /// Maximum batch operations in flight (0 = unbounded)
    #[arg(long, default_value = "0")]
    max_in_flight: usize,
}

impl Args {
    fn cluster_config(&self) -> anyhow::Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClusterConfig::default(),
        };

        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.bucket = bucket.clone();
        }
        if let Some(scope) = &self.scope {
            config.scope = scope.clone();
        }
        if let Some(collection) = &self.collection {
            config.collection = collection.clone();
        }
        if let Some(secs) = self.ready_timeout {
            config = config.with_ready_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.retry_delay {
            config = config.with_retry_delay(Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    fn executor_config(&self) -> ExecutorConfig {
        match self.max_in_flight {
            0 => ExecutorConfig::new(),
            limit => ExecutorConfig::new().with_max_in_flight(limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: String,
    name: String,
    age: u32,
    time: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to info level, override with RUST_LOG
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    let config = args.cluster_config()?;
    if !config.endpoint.starts_with(MEMORY_SCHEME) {
        bail!("unsupported endpoint {}: only {}<host> is available", config.endpoint, MEMORY_SCHEME);
    }
    info!(?config, "Starting");

    let handle = Bootstrap::new(MemoryConnector::new(), config).run().await;
    info!(collection = %handle.target(), "Connected");

    let client = handle.client().with_executor_config(args.executor_config());
    let outcome = round_trip(&client).await;
    handle.shutdown().await;
    outcome
}

async fn round_trip(client: &kvgate_client::Client<kvgate_core::MemoryCollection>) -> anyhow::Result<()> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let user = User {
        id: "user::1001".to_string(),
        name: "Vishal".to_string(),
        age: 30,
        time: now,
    };

    let cas = client
        .insert(&user.id, &user, Expiry::NONE)
        .await
        .inspect_err(|e| error!(error = %e, "Insert error"))?;
    info!(%cas, "Inserted");

    let (fetched, _): (User, Cas) = client
        .get(&user.id)
        .await
        .inspect_err(|e| error!(error = %e, "Get error"))?;
    info!(?fetched, "Fetched");

    let batch = vec![
        Operation::upsert_json("user::1002", &User { id: "user::1002".to_string(), age: 41, ..user.clone() }, Expiry::NONE)?,
        Operation::counter("users::count", 1, 1, Expiry::NONE),
        Operation::touch(user.id.clone(), Expiry::from_secs(3600)),
        Operation::get(user.id.clone()),
    ];
    let report = client.execute_detailed(batch).await;
    info!(
        total = report.len(),
        failed = report.failures().count(),
        "Batch finished"
    );
    report.into_result()?;
    Ok(())
}
