//! In-memory KV backend
//!
//! Implements the full gateway contract: MVCC metadata per key, a store-wide
//! revision, leases with clock-derived deadlines, and watch event fanout.
//! Lease expiry is checked on every access and on the explicit sweep, so a
//! manually advanced clock drives eviction deterministically in tests.

use crate::store::{
    Compare, EventKind, KeyValue, KvError, KvEvent, KvResult, KvStore, KvWatcher, LeaseId, TxnOp,
    TxnResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use roster_core::clock::{Clock, WallClock};
use roster_core::constants::WATCH_CHANNEL_CAPACITY;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    version: u64,
    mod_revision: u64,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct LeaseRecord {
    ttl_seconds: i64,
    deadline_ms: u64,
    keys: HashSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, LeaseRecord>,
    revision: u64,
    next_lease_id: LeaseId,
}

/// In-memory implementation of [`KvStore`]
pub struct MemoryKv {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<KvEvent>,
}

impl MemoryKv {
    /// Create a store on the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(WallClock::new()))
    }

    /// Create a store on an injected clock (tests drive expiry manually)
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                next_lease_id: 1,
                ..Default::default()
            }),
            clock,
            events,
        }
    }

    fn emit(&self, event: KvEvent) {
        // No receivers is fine; the event is simply dropped.
        let _ = self.events.send(event);
    }

    /// Delete every key attached to expired leases. One revision bump per
    /// expired lease, mirroring the backend's atomic pair deletion.
    fn expire_due(&self, inner: &mut Inner) -> usize {
        let now_ms = self.clock.now_ms();
        let due: Vec<LeaseId> = inner
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline_ms <= now_ms)
            .map(|(id, _)| *id)
            .collect();

        for lease_id in &due {
            self.remove_lease(inner, *lease_id);
        }
        due.len()
    }

    fn remove_lease(&self, inner: &mut Inner, lease_id: LeaseId) {
        let Some(lease) = inner.leases.remove(&lease_id) else {
            return;
        };
        if lease.keys.is_empty() {
            return;
        }
        inner.revision += 1;
        let revision = inner.revision;
        for key in lease.keys {
            if let Some(entry) = inner.data.remove(&key) {
                self.emit(KvEvent {
                    key,
                    value: entry.value,
                    kind: EventKind::Delete,
                    revision,
                });
            }
        }
    }

    fn detach_from_lease(inner: &mut Inner, key: &str, lease_id: LeaseId) {
        if let Some(lease) = inner.leases.get_mut(&lease_id) {
            lease.keys.remove(key);
        }
    }

    fn apply_put(
        &self,
        inner: &mut Inner,
        key: String,
        value: Bytes,
        lease: Option<LeaseId>,
        revision: u64,
    ) {
        let (version, old_lease) = match inner.data.get(&key) {
            Some(existing) => (existing.version + 1, existing.lease),
            None => (1, None),
        };
        if let Some(old) = old_lease {
            if Some(old) != lease {
                Self::detach_from_lease(inner, &key, old);
            }
        }
        if let Some(lease_id) = lease {
            if let Some(record) = inner.leases.get_mut(&lease_id) {
                record.keys.insert(key.clone());
            }
        }
        inner.data.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                version,
                mod_revision: revision,
                lease,
            },
        );
        self.emit(KvEvent {
            key,
            value,
            kind: EventKind::Put,
            revision,
        });
    }

    fn apply_delete(&self, inner: &mut Inner, key: String, revision: u64) {
        if let Some(entry) = inner.data.remove(&key) {
            if let Some(lease_id) = entry.lease {
                Self::detach_from_lease(inner, &key, lease_id);
            }
            self.emit(KvEvent {
                key,
                value: entry.value,
                kind: EventKind::Delete,
                revision,
            });
        }
    }

    fn compare_holds(inner: &Inner, compare: &Compare) -> bool {
        match compare {
            Compare::VersionNotZero { key } => inner.data.contains_key(key),
            Compare::VersionEqual { key, version } => {
                let actual = inner.data.get(key).map(|e| e.version).unwrap_or(0);
                actual == *version
            }
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKv").finish()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> KvResult<Option<KeyValue>> {
        let mut inner = self.inner.write().await;
        self.expire_due(&mut inner);
        Ok(inner.data.get(key).map(|entry| KeyValue {
            key: key.to_string(),
            value: entry.value.clone(),
            version: entry.version,
            mod_revision: entry.mod_revision,
            lease: entry.lease,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> KvResult<Vec<KeyValue>> {
        let mut inner = self.inner.write().await;
        self.expire_due(&mut inner);
        Ok(inner
            .data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
                version: entry.version,
                mod_revision: entry.mod_revision,
                lease: entry.lease,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: Bytes) -> KvResult<()> {
        let mut inner = self.inner.write().await;
        self.expire_due(&mut inner);
        inner.revision += 1;
        let revision = inner.revision;
        self.apply_put(&mut inner, key.to_string(), value, None, revision);
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        let mut inner = self.inner.write().await;
        self.expire_due(&mut inner);
        inner.revision += 1;
        let revision = inner.revision;
        self.apply_delete(&mut inner, key.to_string(), revision);
        Ok(())
    }

    async fn txn(&self, compares: Vec<Compare>, ops: Vec<TxnOp>) -> KvResult<TxnResult> {
        let mut inner = self.inner.write().await;
        self.expire_due(&mut inner);

        if !compares.iter().all(|c| Self::compare_holds(&inner, c)) {
            return Ok(TxnResult { succeeded: false });
        }

        // Validate leases up front so the transaction stays all-or-nothing.
        for op in &ops {
            if let TxnOp::Put {
                lease: Some(lease_id),
                ..
            } = op
            {
                if !inner.leases.contains_key(lease_id) {
                    return Err(KvError::not_found(format!("lease {lease_id}")));
                }
            }
        }

        inner.revision += 1;
        let revision = inner.revision;
        for op in ops {
            match op {
                TxnOp::Put { key, value, lease } => {
                    self.apply_put(&mut inner, key, value, lease, revision)
                }
                TxnOp::Delete { key } => self.apply_delete(&mut inner, key, revision),
            }
        }
        Ok(TxnResult { succeeded: true })
    }

    async fn lease_grant(&self, ttl_seconds: i64) -> KvResult<LeaseId> {
        if ttl_seconds <= 0 {
            return Err(KvError::unavailable(format!(
                "lease ttl must be positive, got {ttl_seconds}"
            )));
        }
        let mut inner = self.inner.write().await;
        self.expire_due(&mut inner);
        let lease_id = inner.next_lease_id;
        inner.next_lease_id += 1;
        let deadline_ms = self.clock.now_ms() + (ttl_seconds as u64) * 1_000;
        inner.leases.insert(
            lease_id,
            LeaseRecord {
                ttl_seconds,
                deadline_ms,
                keys: HashSet::new(),
            },
        );
        Ok(lease_id)
    }

    async fn lease_revoke(&self, lease_id: LeaseId) -> KvResult<()> {
        let mut inner = self.inner.write().await;
        self.expire_due(&mut inner);
        if !inner.leases.contains_key(&lease_id) {
            return Err(KvError::not_found(format!("lease {lease_id}")));
        }
        self.remove_lease(&mut inner, lease_id);
        Ok(())
    }

    async fn lease_renew(&self, lease_id: LeaseId) -> KvResult<i64> {
        let mut inner = self.inner.write().await;
        self.expire_due(&mut inner);
        let now_ms = self.clock.now_ms();
        match inner.leases.get_mut(&lease_id) {
            Some(lease) => {
                lease.deadline_ms = now_ms + (lease.ttl_seconds as u64) * 1_000;
                Ok(lease.ttl_seconds)
            }
            None => Err(KvError::not_found(format!("lease {lease_id}"))),
        }
    }

    fn watch(&self, prefix: &str) -> KvWatcher {
        KvWatcher::new(self.events.subscribe(), prefix)
    }

    async fn current_revision(&self) -> KvResult<u64> {
        let inner = self.inner.read().await;
        Ok(inner.revision)
    }

    async fn sweep_expired(&self) -> KvResult<usize> {
        let mut inner = self.inner.write().await;
        Ok(self.expire_due(&mut inner))
    }
}
