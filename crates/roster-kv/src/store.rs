//! KV gateway trait and operation types
//!
//! Explicit operations, atomic transactions, lease-coupled writes.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

/// Opaque lease identifier issued by the store
pub type LeaseId = i64;

/// Gateway errors
#[derive(Error, Debug, Clone)]
pub enum KvError {
    /// Network or timeout failure talking to the backend
    #[error("kv backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// Transaction aborted by a compare predicate
    #[error("kv transaction conflict: {reason}")]
    Conflict { reason: String },

    /// Key or lease absent
    #[error("kv not found: {what}")]
    NotFound { what: String },
}

impl KvError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// Result type for gateway operations
pub type KvResult<T> = std::result::Result<T, KvError>;

/// A stored key-value pair with its MVCC metadata
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
    /// Per-key write counter, 1 on first put. A compare of `version != 0`
    /// is an existence check.
    pub version: u64,
    /// Store-wide revision at which this key was last written
    pub mod_revision: u64,
    /// Lease owning this key, if any
    pub lease: Option<LeaseId>,
}

/// Mutation inside a transaction
#[derive(Debug, Clone)]
pub enum TxnOp {
    Put {
        key: String,
        value: Bytes,
        lease: Option<LeaseId>,
    },
    Delete {
        key: String,
    },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
            lease: None,
        }
    }

    pub fn put_with_lease(key: impl Into<String>, value: impl Into<Bytes>, lease: LeaseId) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
            lease: Some(lease),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Compare predicate guarding a transaction
#[derive(Debug, Clone)]
pub enum Compare {
    /// Key exists (its per-key version is non-zero)
    VersionNotZero { key: String },
    /// Key's per-key version equals the given value (0 = key absent)
    VersionEqual { key: String, version: u64 },
}

impl Compare {
    pub fn exists(key: impl Into<String>) -> Self {
        Self::VersionNotZero { key: key.into() }
    }

    pub fn absent(key: impl Into<String>) -> Self {
        Self::VersionEqual {
            key: key.into(),
            version: 0,
        }
    }
}

/// Outcome of a transaction
#[derive(Debug, Clone)]
pub struct TxnResult {
    /// False when a compare predicate failed; no op was applied
    pub succeeded: bool,
}

/// Kind of a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A change event observed on a watched prefix
#[derive(Debug, Clone)]
pub struct KvEvent {
    pub key: String,
    /// For DELETE events this is the value the key held before deletion
    pub value: Bytes,
    pub kind: EventKind,
    pub revision: u64,
}

/// A prefix-filtered subscription to store change events
pub struct KvWatcher {
    rx: broadcast::Receiver<KvEvent>,
    prefix: String,
}

impl KvWatcher {
    pub fn new(rx: broadcast::Receiver<KvEvent>, prefix: impl Into<String>) -> Self {
        Self {
            rx,
            prefix: prefix.into(),
        }
    }

    /// Next event under the watched prefix.
    ///
    /// Returns `None` when the store is gone. A lagged receiver skips the
    /// missed events and keeps going; callers treating the watch as an
    /// invalidation signal tolerate over-invalidation, not under-.
    pub async fn recv(&mut self) -> Option<KvEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key.starts_with(&self.prefix) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, prefix = %self.prefix, "kv watch lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The transactional KV store with leases that the registry is built on.
///
/// The two-key instance record (instance key + lease key) is only ever
/// created through `txn` and destroyed through `lease_revoke` or expiry, so
/// the sibling-key invariant holds by construction.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read one key
    async fn get(&self, key: &str) -> KvResult<Option<KeyValue>>;

    /// Read all keys under a prefix, ordered by key
    async fn get_prefix(&self, prefix: &str) -> KvResult<Vec<KeyValue>>;

    /// Unconditional single-key put without a lease
    async fn put(&self, key: &str, value: Bytes) -> KvResult<()>;

    /// Unconditional single-key delete
    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Atomically apply `ops` if every compare predicate holds
    async fn txn(&self, compares: Vec<Compare>, ops: Vec<TxnOp>) -> KvResult<TxnResult>;

    /// Grant a lease with the given TTL
    async fn lease_grant(&self, ttl_seconds: i64) -> KvResult<LeaseId>;

    /// Revoke a lease, deleting every key attached to it
    async fn lease_revoke(&self, lease_id: LeaseId) -> KvResult<()>;

    /// Renew a lease and return the remaining TTL in seconds.
    ///
    /// A return of 0 means the backend could not renew within the deadline
    /// (soft failure); the lease may still expire.
    async fn lease_renew(&self, lease_id: LeaseId) -> KvResult<i64>;

    /// Subscribe to change events under a prefix
    fn watch(&self, prefix: &str) -> KvWatcher;

    /// Current store-wide revision
    async fn current_revision(&self) -> KvResult<u64>;

    /// Expire overdue leases now, deleting their keys. Returns the number of
    /// leases expired. The server runs this on a timer; backends with
    /// server-side expiry may make it a no-op.
    async fn sweep_expired(&self) -> KvResult<usize>;
}
