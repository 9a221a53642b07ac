/// kvgate client library
///
/// Bootstraps a connection to a clustered document store, then serves
/// single-key CRUD calls and concurrent bulk batches over it.

pub mod bootstrap;
pub mod handle;
pub mod operation;
pub mod executor;
pub mod client;

// Re-export key types
pub use bootstrap::{Bootstrap, BootstrapAttempts, BootstrapState, HISTORY_LIMIT, resolve_collection};
pub use client::Client;
pub use executor::{BatchReport, BulkExecutor};
pub use handle::{CollectionOf, CollectionTarget, ConnectionHandle};
pub use kvgate_core::{Error, Result};
pub use operation::{Operation, OperationAction, OperationKind, OperationOutput, OperationResult};
