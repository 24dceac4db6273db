//! Heartbeat processing
//!
//! A heartbeat renews the lease recorded beside the instance; the record
//! itself is untouched. Batch heartbeats deduplicate, fan out on a bounded
//! worker set, and aggregate per-element outcomes: one failure degrades the
//! top-level result to instance-not-exists while per-element detail is kept.

use crate::instance::InstanceStore;
use crate::lease::LeaseKeeper;
use roster_core::constants::HEARTBEAT_SET_ELEMENTS_COUNT_MAX;
use roster_core::error::{Error, Result};
use roster_core::model::DomainProject;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Per-element outcome of a batch heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatSetResult {
    pub service_id: String,
    pub instance_id: String,
    /// Empty on success
    pub err_message: String,
}

/// Aggregated outcome of a batch heartbeat
#[derive(Debug)]
pub struct HeartbeatSetOutcome {
    /// At least one element failed
    pub failed: bool,
    /// One result per deduplicated element, in completion order
    pub results: Vec<HeartbeatSetResult>,
}

/// Single and batch heartbeat processing
#[derive(Clone)]
pub struct HeartbeatEngine {
    store: Arc<InstanceStore>,
    lease: LeaseKeeper,
    set_concurrency: usize,
}

impl HeartbeatEngine {
    pub fn new(store: Arc<InstanceStore>, lease: LeaseKeeper, set_concurrency: usize) -> Self {
        assert!(set_concurrency > 0, "set_concurrency must be positive");
        Self {
            store,
            lease,
            set_concurrency,
        }
    }

    /// Renew one instance's lease. Returns the remaining TTL; 0 marks the
    /// soft renewal failure, still a success for the caller.
    pub async fn heartbeat(
        &self,
        dp: &DomainProject,
        service_id: &str,
        instance_id: &str,
    ) -> Result<i64> {
        let lease_id = self.store.lease_id_of(dp, service_id, instance_id).await?;
        let ttl = self.lease.renew(lease_id).await?;
        if ttl > 0 {
            tracing::debug!(service_id, instance_id, ttl, "heartbeat renewed lease");
        }
        Ok(ttl)
    }

    /// Process a batch of heartbeats.
    ///
    /// Duplicate (service_id, instance_id) pairs are dropped with a warning
    /// and not acknowledged individually. Each unique pair runs on the
    /// bounded worker set; the join barrier collects exactly one result per
    /// pair. Result order is not guaranteed; callers correlate by ids.
    pub async fn heartbeat_set(
        &self,
        dp: &DomainProject,
        elements: &[(String, String)],
    ) -> Result<HeartbeatSetOutcome> {
        if elements.is_empty() {
            return Err(Error::invalid_params(
                "heartbeat set must contain at least one instance",
            ));
        }
        if elements.len() > HEARTBEAT_SET_ELEMENTS_COUNT_MAX {
            return Err(Error::invalid_params(format!(
                "heartbeat set exceeds {HEARTBEAT_SET_ELEMENTS_COUNT_MAX} instances"
            )));
        }

        let mut seen = HashSet::with_capacity(elements.len());
        let semaphore = Arc::new(Semaphore::new(self.set_concurrency));
        let mut tasks = JoinSet::new();

        for (service_id, instance_id) in elements {
            if !seen.insert(format!("{service_id}/{instance_id}")) {
                tracing::warn!(service_id, instance_id, "duplicate instance in heartbeat set");
                continue;
            }
            let engine = self.clone();
            let dp = dp.clone();
            let semaphore = semaphore.clone();
            let service_id = service_id.clone();
            let instance_id = instance_id.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let err_message = match engine.heartbeat(&dp, &service_id, &instance_id).await {
                    Ok(_) => String::new(),
                    Err(e) => {
                        tracing::error!(
                            service_id = %service_id,
                            instance_id = %instance_id,
                            error = %e,
                            "heartbeat set element failed"
                        );
                        e.to_string()
                    }
                };
                HeartbeatSetResult {
                    service_id,
                    instance_id,
                    err_message,
                }
            });
        }

        let mut results = Vec::with_capacity(seen.len());
        while let Some(joined) = tasks.join_next().await {
            let result =
                joined.map_err(|e| Error::internal(format!("heartbeat task panicked: {e}")))?;
            results.push(result);
        }

        let failed = results.iter().any(|r| !r.err_message.is_empty());
        if failed {
            tracing::error!(count = results.len(), "batch heartbeat had failures");
        } else {
            tracing::info!(count = results.len(), "batch heartbeat succeeded");
        }
        Ok(HeartbeatSetOutcome { failed, results })
    }
}
