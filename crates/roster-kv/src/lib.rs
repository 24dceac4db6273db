//! Roster KV
//!
//! Thin typed gateway over the transactional key-value store backing the
//! registry: put-with-lease, compare-and-swap transactions, lease
//! grant/revoke/renew, and prefix watches.
//!
//! The production deployment points this trait at an etcd-style store; the
//! in-memory backend here implements the same contract (including lease
//! expiry deleting attached keys and watch event fanout) for tests and
//! single-process runs.

pub mod memory;
pub mod store;

pub use memory::MemoryKv;
pub use store::{
    Compare, EventKind, KeyValue, KvError, KvEvent, KvResult, KvStore, KvWatcher, LeaseId, TxnOp,
    TxnResult,
};
