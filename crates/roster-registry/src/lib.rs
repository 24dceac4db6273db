//! Roster Registry
//!
//! The service-instance registry core: instance lifecycle bound to KV
//! leases, heartbeat processing, discovery queries with version rules, and
//! the revision-carrying find-cache.
//!
//! # Overview
//!
//! - [`instance::InstanceStore`] - create/read/update/delete of instance
//!   records, each co-written with its lease key in one transaction
//! - [`lease::LeaseKeeper`] - TTL computation and lease grant/revoke/renew
//! - [`heartbeat::HeartbeatEngine`] - single and bounded-concurrency batch
//!   heartbeats
//! - [`discovery::Discovery`] - consumer-facing queries, shared-service
//!   visibility, dependency-edge recording
//! - [`cache::FindCache`] - memoized query results with a monotonic revision
//!   per cache key, invalidated through the KV watch stream
//! - [`quota::QuotaManager`] - instance-quota seam applied before admission

pub mod cache;
pub mod discovery;
pub mod heartbeat;
pub mod instance;
pub mod keys;
pub mod lease;
pub mod quota;
pub mod service;
pub mod version;

pub use cache::{CacheEntry, FindCache};
pub use discovery::{
    AccessChecker, AllowAllAccess, BatchFindKey, BatchFindResult, DependencyWriter, Discovery,
    FindFailed, FindRequest, FindResult, FindUpdated, KvDependencyWriter,
};
pub use heartbeat::{HeartbeatEngine, HeartbeatSetOutcome, HeartbeatSetResult};
pub use instance::InstanceStore;
pub use lease::LeaseKeeper;
pub use quota::{QuotaManager, QuotaReservation, UnlimitedQuota};
pub use service::ServiceDirectory;
pub use version::{Version, VersionRule};

use roster_core::Error;
use roster_kv::KvError;

/// Map a gateway error observed on a read/write path into the workspace
/// error taxonomy. Call sites that need a domain-specific mapping (absent
/// lease, failed compare) handle those variants before falling through here.
pub(crate) fn kv_error(e: KvError) -> Error {
    match e {
        KvError::Unavailable { reason } => Error::unavailable(reason),
        KvError::Conflict { reason } => Error::internal(format!("unexpected kv conflict: {reason}")),
        KvError::NotFound { what } => Error::internal(format!("unexpected kv absence: {what}")),
    }
}
