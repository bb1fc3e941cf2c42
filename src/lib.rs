///
/// Typed errors of the store and of the coordination recipes
///
pub mod error;

///
/// Client settings
///
pub mod config;

///
/// Result of key-space operations
///
pub mod result;

///
/// HTTP seam used by the request executor
///
pub mod transport;

///
/// Failover-aware execution of single requests against a cluster
///
pub mod executor;

///
/// Key-value capability the recipes are built on
///
pub mod kv;

///
/// etcd v2 HTTP client
///
pub mod client;

///
/// Utility function to manage various transient errors.
pub mod retry;

///
/// Provides a queue-based distributed lock
///
pub mod lock;

///
/// Keeps TTL'd keys alive
///
pub mod lease;

///
/// Robust API for watching etcd changes
pub mod watcher;

///
/// Single-key leader election
///
pub mod election;

///
/// Alias for etcd v2 modification index
pub type Revision = u64;

pub use {
    client::Client,
    config::ClientConfig,
    error::{EtcdError, ErrorKind},
    kv::KvStore,
    lock::Lock,
    result::EtcdResult,
};
