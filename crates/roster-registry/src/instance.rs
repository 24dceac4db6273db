//! Instance store
//!
//! Create/read/update/delete of instance records. A live instance is a pair
//! of KV keys under one lease: the JSON record and the lease key holding the
//! printed lease id. The pair is only ever created by the registration
//! transaction and only ever destroyed by revoking (or expiring) the lease,
//! so neither key exists without its sibling.

use crate::keys;
use crate::kv_error;
use crate::lease::LeaseKeeper;
use crate::quota::QuotaManager;
use crate::service::ServiceDirectory;
use bytes::Bytes;
use roster_core::clock::Clock;
use roster_core::context::RequestContext;
use roster_core::error::{Error, Result};
use roster_core::model::{DomainProject, Instance, InstanceStatus};
use roster_kv::{Compare, KvStore, TxnOp};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Store for instance records and their leases
pub struct InstanceStore {
    kv: Arc<dyn KvStore>,
    lease: LeaseKeeper,
    services: ServiceDirectory,
    quota: Arc<dyn QuotaManager>,
    clock: Arc<dyn Clock>,
}

impl InstanceStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        lease: LeaseKeeper,
        services: ServiceDirectory,
        quota: Arc<dyn QuotaManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kv,
            lease,
            services,
            quota,
            clock,
        }
    }

    pub fn services(&self) -> &ServiceDirectory {
        &self.services
    }

    /// Register an instance and return its id.
    ///
    /// Re-registering with the same (service, endpoints, host) is idempotent:
    /// the existing id comes back and no new lease is granted.
    pub async fn register(&self, ctx: &RequestContext, mut instance: Instance) -> Result<String> {
        let dp = ctx.domain_project.clone();

        if instance.service_id.is_empty() {
            return Err(Error::invalid_params("serviceId must not be empty"));
        }
        if instance.endpoints.is_empty() {
            return Err(Error::invalid_params("endpoints must not be empty"));
        }

        if let Some(existing_id) = self.find_by_endpoints(&dp, &instance).await? {
            tracing::info!(
                service_id = %instance.service_id,
                instance_id = %existing_id,
                operator = %ctx.remote_ip,
                "register instance reuses existing record"
            );
            return Ok(existing_id);
        }

        let ttl = self.preprocess(&dp, &mut instance).await?;

        let reservation = if ctx.is_registry_self {
            None
        } else {
            Some(self.quota.apply(&dp, &instance.service_id, 1).await?)
        };

        match self.commit_new_instance(&dp, &instance, ttl).await {
            Ok(()) => {
                if let Some(reservation) = reservation {
                    if let Err(e) = reservation.report_used().await {
                        tracing::error!(
                            service_id = %instance.service_id,
                            instance_id = %instance.instance_id,
                            error = %e,
                            "reporting used quota failed"
                        );
                    }
                }
                tracing::info!(
                    service_id = %instance.service_id,
                    instance_id = %instance.instance_id,
                    ttl,
                    endpoints = ?instance.endpoints,
                    host = %instance.host_name,
                    operator = %ctx.remote_ip,
                    "register instance"
                );
                Ok(instance.instance_id)
            }
            Err(e) => {
                if let Some(reservation) = reservation {
                    reservation.close().await;
                }
                Err(e)
            }
        }
    }

    /// Fill defaults, validate the health check, and copy the owning
    /// service's version onto the record. Returns the lease TTL.
    async fn preprocess(&self, dp: &DomainProject, instance: &mut Instance) -> Result<i64> {
        if instance.instance_id.is_empty() {
            instance.instance_id = Uuid::new_v4().simple().to_string();
        }
        let now = self.clock.now_unix_secs().to_string();
        instance.timestamp = now.clone();
        instance.mod_timestamp = now;
        let health_check = LeaseKeeper::normalize_health_check(instance.health_check.take())?;
        let ttl = LeaseKeeper::ttl_for(&health_check);
        instance.health_check = Some(health_check);

        let service = self
            .services
            .get_service(dp, &instance.service_id)
            .await?
            .ok_or_else(|| Error::service_not_exists("invalid 'serviceId' in request body"))?;
        instance.version = service.version;
        Ok(ttl)
    }

    /// Grant the lease, then commit the two-key record in one transaction
    /// guarded by the owning service's existence.
    async fn commit_new_instance(
        &self,
        dp: &DomainProject,
        instance: &Instance,
        ttl: i64,
    ) -> Result<()> {
        let data = serde_json::to_vec(instance)
            .map_err(|e| Error::internal(format!("encoding instance record failed: {e}")))?;

        let lease_id = self.lease.grant(ttl).await?;

        let instance_key = keys::instance_key(dp, &instance.service_id, &instance.instance_id);
        let lease_key = keys::lease_key(dp, &instance.service_id, &instance.instance_id);
        let result = self
            .kv
            .txn(
                vec![Compare::exists(keys::service_key(dp, &instance.service_id))],
                vec![
                    TxnOp::put_with_lease(instance_key, Bytes::from(data), lease_id),
                    TxnOp::put_with_lease(lease_key, Bytes::from(lease_id.to_string()), lease_id),
                ],
            )
            .await
            .map_err(|e| Error::unavailable(format!("commit instance failed: {e}")))?;

        if !result.succeeded {
            // The service vanished between preprocess and commit.
            if let Err(e) = self.lease.revoke(lease_id).await {
                tracing::warn!(lease_id, error = %e, "revoking lease after failed commit");
            }
            return Err(Error::service_not_exists("service does not exist"));
        }
        Ok(())
    }

    /// Unregister by revoking the instance's lease; the KV deletes both keys
    pub async fn unregister(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        instance_id: &str,
    ) -> Result<()> {
        let dp = &ctx.domain_project;

        if !self.exists_by_id(dp, service_id, instance_id).await? {
            return Err(Error::instance_not_exists("instance does not exist"));
        }

        let lease_id = self.lease_id_of(dp, service_id, instance_id).await?;
        self.lease.revoke(lease_id).await?;

        tracing::info!(
            service_id,
            instance_id,
            operator = %ctx.remote_ip,
            "unregister instance"
        );
        Ok(())
    }

    /// Read one instance record
    pub async fn get_one(
        &self,
        dp: &DomainProject,
        service_id: &str,
        instance_id: &str,
    ) -> Result<Option<Instance>> {
        let key = keys::instance_key(dp, service_id, instance_id);
        match self.kv.get(&key).await.map_err(kv_error)? {
            Some(kv) => Ok(Some(decode_instance(&key, &kv.value)?)),
            None => Ok(None),
        }
    }

    /// All instances of one service, ordered by instance id
    pub async fn get_all(&self, dp: &DomainProject, service_id: &str) -> Result<Vec<Instance>> {
        Ok(self.get_all_with_revision(dp, service_id).await?.0)
    }

    /// All instances of one service plus the highest mod-revision observed
    /// among their records (0 when the service has none)
    pub async fn get_all_with_revision(
        &self,
        dp: &DomainProject,
        service_id: &str,
    ) -> Result<(Vec<Instance>, u64)> {
        let prefix = keys::instance_prefix(dp, service_id);
        let entries = self.kv.get_prefix(&prefix).await.map_err(kv_error)?;
        let mut instances = Vec::with_capacity(entries.len());
        let mut max_revision = 0;
        for entry in entries {
            instances.push(decode_instance(&entry.key, &entry.value)?);
            max_revision = max_revision.max(entry.mod_revision);
        }
        instances.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok((instances, max_revision))
    }

    /// Update the status field, preserving the lease
    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        instance_id: &str,
        status: InstanceStatus,
    ) -> Result<()> {
        self.update_record(&ctx.domain_project, service_id, instance_id, |instance| {
            instance.status = status;
        })
        .await?;
        tracing::info!(service_id, instance_id, status = %status, "update instance status");
        Ok(())
    }

    /// Replace the properties map, preserving the lease
    pub async fn update_properties(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        instance_id: &str,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        self.update_record(&ctx.domain_project, service_id, instance_id, |instance| {
            instance.properties = properties;
        })
        .await?;
        tracing::info!(service_id, instance_id, "update instance properties");
        Ok(())
    }

    /// Read-modify-write of one scalar field. Last writer wins; the put
    /// reuses the record's lease so expiry behavior is unchanged.
    async fn update_record<F>(
        &self,
        dp: &DomainProject,
        service_id: &str,
        instance_id: &str,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut Instance),
    {
        let key = keys::instance_key(dp, service_id, instance_id);
        let entry = self
            .kv
            .get(&key)
            .await
            .map_err(kv_error)?
            .ok_or_else(|| Error::instance_not_exists("instance does not exist"))?;

        let mut instance = decode_instance(&key, &entry.value)?;
        mutate(&mut instance);
        instance.mod_timestamp = self.clock.now_unix_secs().to_string();

        let lease_id = entry
            .lease
            .ok_or_else(|| Error::internal(format!("instance record {key} carries no lease")))?;
        let data = serde_json::to_vec(&instance)
            .map_err(|e| Error::internal(format!("encoding instance record failed: {e}")))?;

        self.kv
            .txn(
                vec![],
                vec![TxnOp::put_with_lease(key, Bytes::from(data), lease_id)],
            )
            .await
            .map_err(|e| Error::unavailable(format!("update instance failed: {e}")))?;
        Ok(())
    }

    /// Existing instance id for the same (endpoints, host) under a service.
    /// The full endpoint set together with the host name is the dedup key;
    /// two live instances of one service never share it.
    pub async fn find_by_endpoints(
        &self,
        dp: &DomainProject,
        instance: &Instance,
    ) -> Result<Option<String>> {
        let (existing, _) = self
            .get_all_with_revision(dp, &instance.service_id)
            .await?;
        Ok(existing
            .into_iter()
            .find(|candidate| candidate.same_endpoints(instance))
            .map(|candidate| candidate.instance_id))
    }

    /// Existence check by id
    pub async fn exists_by_id(
        &self,
        dp: &DomainProject,
        service_id: &str,
        instance_id: &str,
    ) -> Result<bool> {
        let key = keys::instance_key(dp, service_id, instance_id);
        Ok(self.kv.get(&key).await.map_err(kv_error)?.is_some())
    }

    /// Lease id recorded beside an instance. A present instance key with a
    /// missing lease key is reported as instance-not-exists, not internal.
    pub async fn lease_id_of(
        &self,
        dp: &DomainProject,
        service_id: &str,
        instance_id: &str,
    ) -> Result<i64> {
        let key = keys::lease_key(dp, service_id, instance_id);
        let entry = self
            .kv
            .get(&key)
            .await
            .map_err(kv_error)?
            .ok_or_else(|| Error::instance_not_exists("instance lease does not exist"))?;
        let printed = String::from_utf8_lossy(&entry.value).to_string();
        printed
            .parse::<i64>()
            .map_err(|_| Error::internal(format!("malformed lease id '{printed}' at {key}")))
    }
}

fn decode_instance(key: &str, value: &[u8]) -> Result<Instance> {
    serde_json::from_slice(value)
        .map_err(|e| Error::internal(format!("malformed instance record at {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{FixedQuota, UnlimitedQuota};
    use roster_core::clock::ManualClock;
    use roster_core::model::{HealthCheck, HealthMode, Service};
    use roster_kv::MemoryKv;

    struct Fixture {
        kv: Arc<MemoryKv>,
        clock: Arc<ManualClock>,
        store: InstanceStore,
    }

    fn fixture() -> Fixture {
        fixture_with_quota(Arc::new(UnlimitedQuota))
    }

    fn fixture_with_quota(quota: Arc<dyn QuotaManager>) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        let store = InstanceStore::new(
            kv.clone(),
            LeaseKeeper::new(kv.clone()),
            ServiceDirectory::new(kv.clone()),
            quota,
            clock.clone(),
        );
        Fixture { kv, clock, store }
    }

    async fn seed_service(kv: &MemoryKv, dp: &DomainProject, service_id: &str, version: &str) {
        let service = Service {
            service_id: service_id.into(),
            environment: "production".into(),
            app_id: "app".into(),
            service_name: format!("svc-{service_id}"),
            version: version.into(),
            ..Default::default()
        };
        kv.put(
            &keys::service_key(dp, service_id),
            Bytes::from(serde_json::to_vec(&service).unwrap()),
        )
        .await
        .unwrap();
    }

    fn request(service_id: &str, endpoint: &str) -> Instance {
        Instance {
            service_id: service_id.into(),
            endpoints: vec![endpoint.into()],
            host_name: "host-1".into(),
            health_check: Some(HealthCheck {
                mode: HealthMode::Heartbeat,
                interval: 30,
                times: 3,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_creates_record_and_lease_key() {
        let f = fixture();
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;

        let id = f.store.register(&ctx, request("s1", "rest://h:9")).await.unwrap();
        assert!(!id.is_empty());

        let stored = f
            .store
            .get_one(&ctx.domain_project, "s1", &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, "1.0.0");
        assert_eq!(stored.status, InstanceStatus::Up);
        assert_eq!(stored.timestamp, stored.mod_timestamp);

        let lease_id = f
            .store
            .lease_id_of(&ctx.domain_project, "s1", &id)
            .await
            .unwrap();
        assert!(lease_id > 0);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_on_endpoints_and_host() {
        let f = fixture();
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;

        let first = f.store.register(&ctx, request("s1", "rest://h:9")).await.unwrap();
        let lease_before = f
            .store
            .lease_id_of(&ctx.domain_project, "s1", &first)
            .await
            .unwrap();

        let second = f.store.register(&ctx, request("s1", "rest://h:9")).await.unwrap();
        assert_eq!(first, second);

        let lease_after = f
            .store
            .lease_id_of(&ctx.domain_project, "s1", &first)
            .await
            .unwrap();
        assert_eq!(lease_before, lease_after);

        // The dedup key is (endpoints, host): the same endpoints on a
        // different host is a new instance.
        let mut other_host = request("s1", "rest://h:9");
        other_host.host_name = "host-2".into();
        let third = f.store.register(&ctx, other_host).await.unwrap();
        assert_ne!(first, third);

        // So is a different endpoint set on the same host.
        let fourth = f.store.register(&ctx, request("s1", "rest://h2:9")).await.unwrap();
        assert_ne!(first, fourth);
        assert_ne!(third, fourth);
    }

    #[tokio::test]
    async fn test_register_missing_service() {
        let f = fixture();
        let ctx = RequestContext::default();
        let err = f
            .store
            .register(&ctx, request("nope", "rest://h:9"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotExists { .. }));
    }

    #[tokio::test]
    async fn test_register_invalid_health_check() {
        let f = fixture();
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;

        let mut bad = request("s1", "rest://h:9");
        bad.health_check = Some(HealthCheck {
            mode: HealthMode::Heartbeat,
            interval: 0,
            times: 0,
        });
        let err = f.store.register(&ctx, bad).await.unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_register_races_service_deletion() {
        // The service exists at preprocess but is gone at commit: the
        // transaction compare fails and the granted lease is revoked.
        let f = fixture();
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;

        let mut instance = request("s1", "rest://h:9");
        f.store.preprocess(&ctx.domain_project, &mut instance).await.unwrap();

        f.kv.delete(&keys::service_key(&ctx.domain_project, "s1"))
            .await
            .unwrap();

        let err = f
            .store
            .commit_new_instance(&ctx.domain_project, &instance, 120)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotExists { .. }));
        assert!(f
            .store
            .get_one(&ctx.domain_project, "s1", &instance.instance_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_quota_denial_and_release() {
        let quota = Arc::new(FixedQuota::new(1));
        let f = fixture_with_quota(quota.clone());
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;

        f.store.register(&ctx, request("s1", "rest://a:1")).await.unwrap();
        let denied = f
            .store
            .register(&ctx, request("s1", "rest://b:2"))
            .await
            .unwrap_err();
        assert!(matches!(denied, Error::Forbidden { .. }));
        assert_eq!(quota.used(), 1);

        // The registry's own registration bypasses quota.
        let mut self_ctx = RequestContext::default();
        self_ctx.is_registry_self = true;
        f.store.register(&self_ctx, request("s1", "rest://c:3")).await.unwrap();
        assert_eq!(quota.used(), 1);
    }

    #[tokio::test]
    async fn test_unregister_then_reads_fail() {
        let f = fixture();
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;
        let id = f.store.register(&ctx, request("s1", "rest://h:9")).await.unwrap();

        f.store.unregister(&ctx, "s1", &id).await.unwrap();
        assert!(f
            .store
            .get_one(&ctx.domain_project, "s1", &id)
            .await
            .unwrap()
            .is_none());

        // Repeated unregister reports the instance as gone.
        let err = f.store.unregister(&ctx, "s1", &id).await.unwrap_err();
        assert!(matches!(err, Error::InstanceNotExists { .. }));
    }

    #[tokio::test]
    async fn test_expiry_removes_both_keys() {
        let f = fixture();
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;

        let mut short = request("s1", "rest://h:9");
        short.health_check = Some(HealthCheck {
            mode: HealthMode::Heartbeat,
            interval: 1,
            times: 0,
        });
        let id = f.store.register(&ctx, short).await.unwrap();

        f.clock.advance_secs(2);
        assert!(f
            .store
            .get_one(&ctx.domain_project, "s1", &id)
            .await
            .unwrap()
            .is_none());
        let err = f
            .store
            .lease_id_of(&ctx.domain_project, "s1", &id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InstanceNotExists { .. }));
    }

    #[tokio::test]
    async fn test_update_status_preserves_lease_and_timestamp() {
        let f = fixture();
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;
        let id = f.store.register(&ctx, request("s1", "rest://h:9")).await.unwrap();
        let created = f
            .store
            .get_one(&ctx.domain_project, "s1", &id)
            .await
            .unwrap()
            .unwrap();

        f.clock.advance_secs(5);
        f.store
            .update_status(&ctx, "s1", &id, InstanceStatus::OutOfService)
            .await
            .unwrap();

        let updated = f
            .store
            .get_one(&ctx.domain_project, "s1", &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, InstanceStatus::OutOfService);
        assert_eq!(updated.timestamp, created.timestamp);
        assert_ne!(updated.mod_timestamp, created.mod_timestamp);

        // The record still rides the original lease: expiry removes it.
        f.clock.advance_secs(121);
        assert!(f
            .store
            .get_one(&ctx.domain_project, "s1", &id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_properties_replaces_map() {
        let f = fixture();
        let ctx = RequestContext::default();
        seed_service(&f.kv, &ctx.domain_project, "s1", "1.0.0").await;
        let id = f.store.register(&ctx, request("s1", "rest://h:9")).await.unwrap();

        let mut props = HashMap::new();
        props.insert("zone".to_string(), "az-1".to_string());
        f.store
            .update_properties(&ctx, "s1", &id, props)
            .await
            .unwrap();

        let updated = f
            .store
            .get_one(&ctx.domain_project, "s1", &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.properties.get("zone").map(String::as_str), Some("az-1"));

        let err = f
            .store
            .update_properties(&ctx, "s1", "missing", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InstanceNotExists { .. }));
    }
}
