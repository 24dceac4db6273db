//! Lease TTL computation and lifecycle
//!
//! The lease keeper turns health-check settings into a TTL and delegates
//! grant/revoke/renew to the KV gateway. A renewal that comes back with TTL 0
//! is a soft failure: the backend could not renew within its deadline, the
//! client already considers itself alive, and a genuinely dead lease is
//! caught by the next heartbeat.

use crate::kv_error;
use roster_core::constants::{
    LEASE_RENEWAL_INTERVAL_SECONDS_DEFAULT, LEASE_RETRY_TIMES_DEFAULT, LEASE_TTL_SECONDS_MAX,
};
use roster_core::error::{Error, Result};
use roster_core::model::{HealthCheck, HealthMode};
use roster_kv::{KvError, KvStore, LeaseId};
use std::sync::Arc;

/// Lease lifecycle operations over the KV gateway
#[derive(Clone)]
pub struct LeaseKeeper {
    kv: Arc<dyn KvStore>,
}

impl LeaseKeeper {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Normalize health-check settings for admission.
    ///
    /// - absent block: registry defaults (HEARTBEAT, 30 s, 3 retries)
    /// - PLATFORM: a sidecar relays heartbeats; caller-supplied
    ///   interval/times are overridden with the defaults (120 s TTL)
    /// - HEARTBEAT / PUSH: `interval * (times + 1)` must land in
    ///   `(0, 2^31)`, otherwise the registration is invalid
    pub fn normalize_health_check(health_check: Option<HealthCheck>) -> Result<HealthCheck> {
        let defaults = HealthCheck {
            mode: HealthMode::Heartbeat,
            interval: LEASE_RENEWAL_INTERVAL_SECONDS_DEFAULT,
            times: LEASE_RETRY_TIMES_DEFAULT,
        };

        let Some(mut hc) = health_check else {
            return Ok(defaults);
        };

        match hc.mode {
            HealthMode::Platform => {
                hc.interval = defaults.interval;
                hc.times = defaults.times;
            }
            HealthMode::Heartbeat | HealthMode::Push => {
                let ttl = (hc.interval as i64) * (hc.times as i64 + 1);
                if ttl <= 0 || ttl >= LEASE_TTL_SECONDS_MAX {
                    return Err(Error::invalid_params(
                        "invalid 'healthCheck' settings in request body",
                    ));
                }
            }
        }
        Ok(hc)
    }

    /// TTL in seconds for a normalized health check
    pub fn ttl_for(health_check: &HealthCheck) -> i64 {
        let ttl = (health_check.interval as i64) * (health_check.times as i64 + 1);
        debug_assert!(ttl > 0 && ttl < LEASE_TTL_SECONDS_MAX);
        ttl
    }

    /// Grant a lease with the given TTL
    pub async fn grant(&self, ttl_seconds: i64) -> Result<LeaseId> {
        self.kv
            .lease_grant(ttl_seconds)
            .await
            .map_err(|e| Error::unavailable(format!("grant lease failed: {e}")))
    }

    /// Revoke a lease; the KV deletes every key it owns
    pub async fn revoke(&self, lease_id: LeaseId) -> Result<()> {
        match self.kv.lease_revoke(lease_id).await {
            Ok(()) => Ok(()),
            Err(KvError::NotFound { .. }) => Err(Error::instance_not_exists(
                "instance lease does not exist",
            )),
            Err(KvError::Unavailable { reason }) => Err(Error::unavailable(reason)),
            Err(e) => Err(kv_error(e)),
        }
    }

    /// Renew a lease and return the remaining TTL.
    ///
    /// TTL 0 is the soft renewal failure: logged here, reported as success
    /// to the caller.
    pub async fn renew(&self, lease_id: LeaseId) -> Result<i64> {
        match self.kv.lease_renew(lease_id).await {
            Ok(0) => {
                tracing::error!(lease_id, "lease renewal timed out against the backend");
                Ok(0)
            }
            Ok(ttl) => Ok(ttl),
            Err(KvError::NotFound { .. }) => Err(Error::instance_not_exists(
                "instance lease does not exist",
            )),
            Err(KvError::Unavailable { reason }) => Err(Error::unavailable(reason)),
            Err(e) => Err(kv_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_kv::MemoryKv;

    fn hc(mode: HealthMode, interval: i32, times: i32) -> HealthCheck {
        HealthCheck {
            mode,
            interval,
            times,
        }
    }

    #[test]
    fn test_missing_block_gets_defaults() {
        let normalized = LeaseKeeper::normalize_health_check(None).unwrap();
        assert_eq!(normalized.mode, HealthMode::Heartbeat);
        assert_eq!(LeaseKeeper::ttl_for(&normalized), 120);
    }

    #[test]
    fn test_platform_overrides_caller_values() {
        let normalized =
            LeaseKeeper::normalize_health_check(Some(hc(HealthMode::Platform, 1, 0))).unwrap();
        assert_eq!(normalized.interval, 30);
        assert_eq!(normalized.times, 3);
        assert_eq!(LeaseKeeper::ttl_for(&normalized), 120);
    }

    #[test]
    fn test_heartbeat_ttl_bounds() {
        // Zero product is rejected.
        let err = LeaseKeeper::normalize_health_check(Some(hc(HealthMode::Heartbeat, 0, 0)))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));

        // Negative interval is rejected.
        assert!(
            LeaseKeeper::normalize_health_check(Some(hc(HealthMode::Heartbeat, -1, 3))).is_err()
        );

        // Product at or above 2^31 is rejected.
        assert!(LeaseKeeper::normalize_health_check(Some(hc(
            HealthMode::Heartbeat,
            i32::MAX,
            i32::MAX
        )))
        .is_err());

        // A sane setting passes through untouched.
        let normalized =
            LeaseKeeper::normalize_health_check(Some(hc(HealthMode::Heartbeat, 30, 3))).unwrap();
        assert_eq!(LeaseKeeper::ttl_for(&normalized), 120);
    }

    #[tokio::test]
    async fn test_renew_missing_lease_is_instance_not_exists() {
        let keeper = LeaseKeeper::new(Arc::new(MemoryKv::new()));
        let err = keeper.renew(42).await.unwrap_err();
        assert!(matches!(err, Error::InstanceNotExists { .. }));
        assert!(!err.is_internal());
    }

    #[tokio::test]
    async fn test_grant_and_renew_round_trip() {
        let keeper = LeaseKeeper::new(Arc::new(MemoryKv::new()));
        let lease = keeper.grant(30).await.unwrap();
        assert_eq!(keeper.renew(lease).await.unwrap(), 30);
        keeper.revoke(lease).await.unwrap();
        assert!(keeper.renew(lease).await.is_err());
    }
}
