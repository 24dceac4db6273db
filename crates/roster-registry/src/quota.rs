//! Instance quota seam
//!
//! Quota policy lives outside this subsystem; the store only applies a
//! reservation before admission and confirms or releases it afterwards. The
//! registry's own instance registration bypasses quota entirely.

use async_trait::async_trait;
use roster_core::error::{Error, Result};
use roster_core::model::DomainProject;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Applies instance quota before admission
#[async_trait]
pub trait QuotaManager: Send + Sync {
    /// Reserve `count` instance slots for a service. A denial surfaces as
    /// the quota's own error kind.
    async fn apply(
        &self,
        domain_project: &DomainProject,
        service_id: &str,
        count: u64,
    ) -> Result<Box<dyn QuotaReservation>>;
}

/// A held reservation; exactly one of the two methods consumes it
#[async_trait]
pub trait QuotaReservation: Send + std::fmt::Debug {
    /// Confirm the reservation after a successful commit. Call sites treat
    /// failures as log-only.
    async fn report_used(self: Box<Self>) -> Result<()>;

    /// Release an unused reservation on a failure path
    async fn close(self: Box<Self>);
}

/// No-limit quota manager; the default wiring
#[derive(Debug, Default)]
pub struct UnlimitedQuota;

#[derive(Debug)]
struct NoopReservation;

#[async_trait]
impl QuotaReservation for NoopReservation {
    async fn report_used(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn close(self: Box<Self>) {}
}

#[async_trait]
impl QuotaManager for UnlimitedQuota {
    async fn apply(
        &self,
        _domain_project: &DomainProject,
        _service_id: &str,
        _count: u64,
    ) -> Result<Box<dyn QuotaReservation>> {
        Ok(Box::new(NoopReservation))
    }
}

/// Fixed-limit quota manager counting committed instances process-wide.
/// Used in tests and single-tenant deployments.
#[derive(Debug)]
pub struct FixedQuota {
    limit: u64,
    used: Arc<AtomicU64>,
}

impl FixedQuota {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FixedReservation {
    count: u64,
    used: Arc<AtomicU64>,
}

#[async_trait]
impl QuotaReservation for FixedReservation {
    async fn report_used(self: Box<Self>) -> Result<()> {
        // The slots were reserved at apply time; confirming keeps them.
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.used.fetch_sub(self.count, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuotaManager for FixedQuota {
    async fn apply(
        &self,
        domain_project: &DomainProject,
        service_id: &str,
        count: u64,
    ) -> Result<Box<dyn QuotaReservation>> {
        let prior = self.used.fetch_add(count, Ordering::SeqCst);
        if prior + count > self.limit {
            self.used.fetch_sub(count, Ordering::SeqCst);
            return Err(Error::forbidden(format!(
                "instance quota exceeded for service {service_id} in {domain_project}: limit {}",
                self.limit
            )));
        }
        Ok(Box::new(FixedReservation {
            count,
            used: self.used.clone(),
        }))
    }
}
