/// Concurrent execution of independent operations
///
/// Every operation is dispatched on its own task and runs exactly once. The
/// executor waits for all of them, never cancels or retries, and reports
/// failures either as a single representative error ([`BulkExecutor::execute`])
/// or as the full per-key result list ([`BulkExecutor::execute_detailed`]).

use kvgate_core::{Collection, Error, ExecutorConfig, Result};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error};

use crate::operation::{Operation, OperationKind, OperationResult};

/// Per-key outcomes of a batch, in submission order
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub results: Vec<OperationResult>,
    last_error: Option<Error>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(OperationResult::is_ok)
    }

    /// Failed results, in submission order
    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.iter().filter(|r| !r.is_ok())
    }

    /// Failure observed last in completion order
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Reduce to the single-error form returned by [`BulkExecutor::execute`]
    pub fn into_result(self) -> Result<()> {
        match self.last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Runs batches of operations against one shared collection
pub struct BulkExecutor<C: Collection + ?Sized> {
    collection: Arc<C>,
    config: ExecutorConfig,
}

impl<C: Collection + ?Sized> Clone for BulkExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: Collection + ?Sized> BulkExecutor<C> {
    /// One task per operation, no concurrency cap
    pub fn new(collection: Arc<C>) -> Self {
        Self {
            collection,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every operation and return the last failure observed, if any.
    ///
    /// Each failure is logged with its kind and key as it is collected.
    pub async fn execute(&self, ops: Vec<Operation>) -> Result<()> {
        self.execute_detailed(ops).await.into_result()
    }

    /// Run every operation and return all results in submission order.
    pub async fn execute_detailed(&self, ops: Vec<Operation>) -> BatchReport {
        let total = ops.len();
        let mut slots: Vec<Option<OperationResult>> = vec![None; total];
        let mut last_error = None;

        for (index, result) in self.run(ops).await {
            if let Some(e) = &result.error {
                last_error = Some(e.clone());
            }
            slots[index] = Some(result);
        }

        BatchReport {
            results: slots.into_iter().flatten().collect(),
            last_error,
        }
    }

    /// Dispatch all operations and gather `(index, result)` pairs in completion order.
    async fn run(&self, ops: Vec<Operation>) -> Vec<(usize, OperationResult)> {
        let total = ops.len();
        if total == 0 {
            return Vec::new();
        }

        let (tx, mut rx) = mpsc::channel(total);
        let limiter = self
            .config
            .max_in_flight
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let mut outstanding: Vec<Option<(String, OperationKind)>> = ops
            .iter()
            .map(|op| Some((op.key().to_string(), op.kind())))
            .collect();

        debug!(total, max_in_flight = ?self.config.max_in_flight, "Dispatching batch");

        for (index, op) in ops.into_iter().enumerate() {
            let tx = tx.clone();
            let collection = self.collection.clone();
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let result = op.dispatch(&*collection).await;
                let _ = tx.send((index, result)).await;
            });
        }
        drop(tx);

        let mut collected = Vec::with_capacity(total);
        while collected.len() < total {
            // None once every task has finished or died
            let Some((index, result)) = rx.recv().await else {
                break;
            };
            outstanding[index] = None;
            log_failure(&result);
            collected.push((index, result));
        }

        // Tasks that panicked never reported; account for them so the batch still has N results.
        for (index, slot) in outstanding.into_iter().enumerate() {
            if let Some((key, kind)) = slot {
                let result = OperationResult::failed(
                    key,
                    kind,
                    Error::Internal("operation task terminated without a result".to_string()),
                );
                log_failure(&result);
                collected.push((index, result));
            }
        }

        collected
    }
}

fn log_failure(result: &OperationResult) {
    if let Some(e) = &result.error {
        error!(
            kind = %result.kind,
            key = %result.key,
            code = e.code(),
            "Operation {} failed for key {}: {}",
            result.kind,
            result.key,
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvgate_core::{Bucket, Cas, Cluster, ClusterConfig, Connector, Expiry, MemoryCollection, MemoryConnector};
    use serde_json::json;

    async fn executor() -> BulkExecutor<MemoryCollection> {
        let collection = MemoryConnector::new()
            .connect(&ClusterConfig::default())
            .await
            .unwrap()
            .bucket("default")
            .default_collection();
        BulkExecutor::new(Arc::new(collection))
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let executor = executor().await;
        assert!(executor.execute(Vec::new()).await.is_ok());
        assert!(executor.execute_detailed(Vec::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_mixed_batch_against_memory_store() {
        let executor = executor().await;
        let ops = (0..20)
            .map(|i| Operation::upsert_json(format!("user::{}", i), &json!({"id": i}), Expiry::NONE).unwrap())
            .collect();
        executor.execute(ops).await.unwrap();

        let report = executor
            .execute_detailed(vec![
                Operation::get("user::3"),
                Operation::insert_json("user::4", &json!({}), Expiry::NONE).unwrap(),
                Operation::remove("user::5", Cas::ZERO),
                Operation::counter("visits", 1, 0, Expiry::NONE),
            ])
            .await;

        assert_eq!(report.len(), 4);
        assert_eq!(report.results[0].key, "user::3");
        assert_eq!(report.results[1].kind, OperationKind::Insert);
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.last_error(), Some(&Error::AlreadyExists("user::4".to_string())));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bounded_batch_completes() {
        let executor = executor().await.with_config(ExecutorConfig::new().with_max_in_flight(3));
        let ops = (0..50)
            .map(|i| Operation::counter(format!("ctr::{}", i % 5), 1, 1, Expiry::NONE))
            .collect();

        let report = executor.execute_detailed(ops).await;
        assert_eq!(report.len(), 50);
        assert!(report.is_success());
    }
}
