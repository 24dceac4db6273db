//! Composition root
//!
//! Owns the process-wide singletons in a fixed construction order: KV ->
//! lease keeper -> stores -> find-cache -> discovery. Background work (the
//! lease-expiry sweep and the cache invalidation watch) is spawned here.

use roster_core::clock::{Clock, WallClock};
use roster_core::config::RosterConfig;
use roster_core::constants::LEASE_SWEEP_INTERVAL_MS;
use roster_core::context::RequestContext;
use roster_core::error::Result;
use roster_core::model::{DomainProject, Instance, Service};
use roster_kv::{KvStore, MemoryKv};
use roster_registry::{
    keys, AllowAllAccess, Discovery, FindCache, HeartbeatEngine, InstanceStore, KvDependencyWriter,
    LeaseKeeper, ServiceDirectory, UnlimitedQuota,
};
use std::sync::Arc;
use std::time::Duration;

/// Shared server state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RosterConfig>,
    pub kv: Arc<dyn KvStore>,
    pub store: Arc<InstanceStore>,
    pub heartbeat: HeartbeatEngine,
    pub discovery: Arc<Discovery>,
}

impl AppState {
    /// Assemble the registry on the in-process KV backend.
    ///
    /// Production deployments swap `kv` for the etcd-backed gateway; every
    /// component downstream only sees the trait.
    pub fn build(config: RosterConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let clock: Arc<dyn Clock> = Arc::new(WallClock::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::with_clock(clock.clone()));

        let lease = LeaseKeeper::new(kv.clone());
        let services = ServiceDirectory::new(kv.clone());
        let store = Arc::new(InstanceStore::new(
            kv.clone(),
            lease.clone(),
            services.clone(),
            Arc::new(UnlimitedQuota),
            clock,
        ));
        let cache = Arc::new(FindCache::new(kv.clone(), services.clone(), store.clone()));
        let heartbeat = HeartbeatEngine::new(
            store.clone(),
            lease,
            config.heartbeat.set_concurrency,
        );
        let discovery = Arc::new(Discovery::new(
            services,
            store.clone(),
            cache.clone(),
            Arc::new(AllowAllAccess),
            Arc::new(KvDependencyWriter::new(kv.clone())),
            config.clone(),
        ));

        // Cache invalidation follows the KV change stream.
        tokio::spawn(cache.run(kv.watch(&keys::watch_root())));

        // Evict instances whose leases have expired.
        let sweeper = kv.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(LEASE_SWEEP_INTERVAL_MS));
            loop {
                ticker.tick().await;
                match sweeper.sweep_expired().await {
                    Ok(0) => {}
                    Ok(expired) => tracing::info!(expired, "evicted expired leases"),
                    Err(e) => tracing::error!(error = %e, "lease sweep failed"),
                }
            }
        });

        Ok(Self {
            config,
            kv,
            store,
            heartbeat,
            discovery,
        })
    }

    /// Write the registry's own service record and register this process as
    /// one of its instances. Self-registration bypasses quota.
    pub async fn bootstrap_self(&self, advertise_endpoint: &str) -> Result<String> {
        let dp = DomainProject::registry();
        let identity = &self.config.registry;
        let service = Service {
            service_id: "roster".to_string(),
            environment: identity.environment.clone(),
            app_id: identity.app_id.clone(),
            service_name: identity.service_name.clone(),
            version: identity.version.clone(),
            ..Default::default()
        };
        self.kv
            .put(
                &keys::service_key(&dp, &service.service_id),
                bytes::Bytes::from(serde_json::to_vec(&service).map_err(|e| {
                    roster_core::Error::internal(format!("encoding self record failed: {e}"))
                })?),
            )
            .await
            .map_err(|e| roster_core::Error::unavailable(e.to_string()))?;

        let mut ctx = RequestContext::new(dp);
        ctx.is_registry_self = true;
        let instance = Instance {
            service_id: service.service_id.clone(),
            endpoints: vec![advertise_endpoint.to_string()],
            host_name: hostname(),
            ..Default::default()
        };
        let instance_id = self.store.register(&ctx, instance).await?;
        tracing::info!(instance_id = %instance_id, "registered the registry's own instance");
        Ok(instance_id)
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_and_bootstrap() {
        let state = AppState::build(RosterConfig::default()).unwrap();
        let instance_id = state.bootstrap_self("rest://127.0.0.1:30100").await.unwrap();

        let health = state.discovery.cluster_health().await.unwrap();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].instance_id, instance_id);

        // Bootstrap is idempotent on the endpoint set.
        let again = state.bootstrap_self("rest://127.0.0.1:30100").await.unwrap();
        assert_eq!(instance_id, again);
    }
}
