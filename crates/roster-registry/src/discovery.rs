//! Discovery queries
//!
//! Resolves consumer requests to provider instances: version-rule matching
//! through the find-cache, shared-service tenant redirection, tag and
//! accessibility prechecks, and dependency-edge recording as a side effect
//! of the first successful lookup.

use crate::cache::{CacheEntry, FindCache};
use crate::instance::InstanceStore;
use crate::keys;
use crate::kv_error;
use crate::service::ServiceDirectory;
use crate::version::VersionRule;
use async_trait::async_trait;
use bytes::Bytes;
use roster_core::config::RosterConfig;
use roster_core::context::RequestContext;
use roster_core::error::{Error, Result};
use roster_core::model::{DomainProject, Instance, Service, ServiceKey};
use roster_kv::KvStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Black/white-list and cross-app accessibility predicate.
///
/// The rule administration lives outside this subsystem; a denial from the
/// predicate is returned to the caller verbatim.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    /// `consumer_service_id` may be empty for anonymous lookups
    async fn accessible(
        &self,
        ctx: &RequestContext,
        consumer_service_id: &str,
        provider_service_id: &str,
    ) -> Result<()>;
}

/// Permissive default predicate
#[derive(Debug, Default)]
pub struct AllowAllAccess;

#[async_trait]
impl AccessChecker for AllowAllAccess {
    async fn accessible(
        &self,
        _ctx: &RequestContext,
        _consumer_service_id: &str,
        _provider_service_id: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Records consumer -> provider dependency edges
#[async_trait]
pub trait DependencyWriter: Send + Sync {
    async fn exists(&self, consumer_service_id: &str, provider: &ServiceKey) -> Result<bool>;

    async fn record(
        &self,
        domain_project: &DomainProject,
        consumer: &Service,
        provider: &ServiceKey,
    ) -> Result<()>;
}

/// Default writer persisting edge markers in the KV
pub struct KvDependencyWriter {
    kv: Arc<dyn KvStore>,
}

impl KvDependencyWriter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl DependencyWriter for KvDependencyWriter {
    async fn exists(&self, consumer_service_id: &str, provider: &ServiceKey) -> Result<bool> {
        let key = keys::dep_rule_key(consumer_service_id, provider);
        Ok(self.kv.get(&key).await.map_err(kv_error)?.is_some())
    }

    async fn record(
        &self,
        _domain_project: &DomainProject,
        consumer: &Service,
        provider: &ServiceKey,
    ) -> Result<()> {
        let key = keys::dep_rule_key(&consumer.service_id, provider);
        self.kv
            .put(&key, Bytes::from(consumer.service_id.clone()))
            .await
            .map_err(kv_error)?;
        tracing::debug!(
            consumer = %consumer.service_id,
            provider = %provider.service_name,
            rule = %provider.version,
            "recorded dependency edge"
        );
        Ok(())
    }
}

/// One discovery request
#[derive(Debug, Clone, Default)]
pub struct FindRequest {
    /// Empty for anonymous lookups
    pub consumer_service_id: String,
    pub environment: String,
    pub app_id: String,
    pub service_name: String,
    pub version_rule: String,
    pub tags: Vec<String>,
}

/// Result of one discovery request
#[derive(Debug, Clone)]
pub struct FindResult {
    /// Empty when `not_modified`
    pub instances: Vec<Instance>,
    pub rev: String,
    /// The caller's revision matched; the payload was omitted
    pub not_modified: bool,
}

/// One element of a batch discovery request
#[derive(Debug, Clone, Default)]
pub struct BatchFindKey {
    pub environment: String,
    pub app_id: String,
    pub service_name: String,
    pub version_rule: String,
    /// Revision the caller last observed for this element
    pub rev: String,
}

/// An updated element of a batch discovery response
#[derive(Debug, Clone)]
pub struct FindUpdated {
    pub index: i64,
    pub rev: String,
    pub instances: Vec<Instance>,
}

/// Elements that failed with the same error code share one entry
#[derive(Debug, Clone)]
pub struct FindFailed {
    pub code: u32,
    pub message: String,
    pub indexes: Vec<i64>,
}

/// Buckets of a batch discovery response
#[derive(Debug, Clone, Default)]
pub struct BatchFindResult {
    pub updated: Vec<FindUpdated>,
    pub not_modified: Vec<i64>,
    pub failed: Vec<FindFailed>,
}

/// Consumer-facing discovery operations
pub struct Discovery {
    services: ServiceDirectory,
    store: Arc<InstanceStore>,
    cache: Arc<FindCache>,
    access: Arc<dyn AccessChecker>,
    deps: Arc<dyn DependencyWriter>,
    config: Arc<RosterConfig>,
}

impl Discovery {
    pub fn new(
        services: ServiceDirectory,
        store: Arc<InstanceStore>,
        cache: Arc<FindCache>,
        access: Arc<dyn AccessChecker>,
        deps: Arc<dyn DependencyWriter>,
        config: Arc<RosterConfig>,
    ) -> Self {
        Self {
            services,
            store,
            cache,
            access,
            deps,
            config,
        }
    }

    /// Resolve a provider key to its instances.
    ///
    /// When the caller supplies the revision it last observed and nothing
    /// changed, the instance list is omitted and `not_modified` is set.
    pub async fn find(&self, ctx: &RequestContext, request: FindRequest) -> Result<FindResult> {
        if request.app_id.is_empty() || request.service_name.is_empty() {
            return Err(Error::invalid_params(
                "appId and serviceName must not be empty",
            ));
        }

        let consumer = if request.consumer_service_id.is_empty() {
            None
        } else {
            let service = self
                .services
                .get_service(&ctx.domain_project, &request.consumer_service_id)
                .await?
                .ok_or_else(|| {
                    Error::service_not_exists(format!(
                        "consumer {} does not exist",
                        request.consumer_service_id
                    ))
                })?;
            Some(service)
        };

        let environment = consumer
            .as_ref()
            .map(|c| c.environment.clone())
            .unwrap_or_else(|| request.environment.clone());
        let mut provider = ServiceKey {
            tenant: ctx.target_domain_project(),
            environment,
            app_id: request.app_id.clone(),
            service_name: request.service_name.clone(),
            alias: request.service_name.clone(),
            version: request.version_rule.clone(),
        };

        if self.is_shared(&provider) {
            // Shared services live in the registry's tenant and environment
            // no matter who asks.
            provider.environment = self.config.registry.environment.clone();
        } else {
            // Non-shared lookups never cross the caller's own tenant.
            provider.tenant = ctx.domain_project.clone();
        }

        let entry = self
            .cache
            .get(consumer.as_ref(), &provider, &request.tags)
            .await?;
        let Some(entry) = entry else {
            return Err(self.classify_miss(&provider, &request.tags).await?);
        };

        if let (Some(consumer_service), Some(first_provider)) =
            (consumer.as_ref(), entry.service_ids.first())
        {
            self.access
                .accessible(ctx, &consumer_service.service_id, first_provider)
                .await?;
            self.record_dependency(ctx, consumer_service, &provider, &entry)
                .await?;
        }

        if ctx.request_rev.as_deref() == Some(entry.rev.as_str()) {
            return Ok(FindResult {
                instances: Vec::new(),
                rev: entry.rev.clone(),
                not_modified: true,
            });
        }
        Ok(FindResult {
            instances: entry.instances.clone(),
            rev: entry.rev.clone(),
            not_modified: false,
        })
    }

    /// Distinguish an absent provider from a provider that exists but lacks
    /// the requested tags
    async fn classify_miss(&self, provider: &ServiceKey, tags: &[String]) -> Result<Error> {
        let flag = format!(
            "{}/{}/{}/{}",
            provider.environment, provider.app_id, provider.service_name, provider.version
        );
        if tags.is_empty() {
            return Ok(Error::service_not_exists(format!(
                "find provider [{flag}] failed, provider does not exist"
            )));
        }

        let candidates = self.services.list_services(&provider.tenant).await?;
        let matching: Vec<Service> = candidates
            .into_iter()
            .map(|(service, _)| service)
            .filter(|s| {
                s.environment == provider.environment
                    && s.app_id == provider.app_id
                    && (s.service_name == provider.service_name
                        || (!s.alias.is_empty() && s.alias == provider.service_name))
            })
            .collect();
        let rule = VersionRule::parse(&provider.version)?;
        if rule.filter_services(matching).is_empty() {
            return Ok(Error::service_not_exists(format!(
                "find provider [{flag}] failed, provider does not exist"
            )));
        }
        Ok(Error::tag_not_exists(format!(
            "provider [{flag}] tags do not contain {tags:?}"
        )))
    }

    /// Record the consumer -> provider edge once per provider key. The
    /// queried name may be an alias, so the key is reshaped from the first
    /// matched provider's canonical record before writing.
    async fn record_dependency(
        &self,
        ctx: &RequestContext,
        consumer: &Service,
        provider: &ServiceKey,
        entry: &CacheEntry,
    ) -> Result<()> {
        if self.deps.exists(&consumer.service_id, provider).await? {
            return Ok(());
        }
        let first = &entry.service_ids[0];
        let canonical = self
            .services
            .get_service(&provider.tenant, first)
            .await?
            .ok_or_else(|| {
                Error::service_not_exists(format!(
                    "find provider [{}/{}] failed, provider does not exist",
                    provider.app_id, provider.service_name
                ))
            })?;
        let reshaped = ServiceKey::from_service(provider.tenant.clone(), &canonical, &provider.version);
        self.deps
            .record(&ctx.domain_project, consumer, &reshaped)
            .await
    }

    fn is_shared(&self, provider: &ServiceKey) -> bool {
        provider.tenant == DomainProject::registry()
            && provider.app_id == self.config.registry.app_id
            && (self
                .config
                .shared_service_names
                .contains(&provider.service_name)
                || self.config.shared_service_names.contains(&provider.alias))
    }

    /// Provider existence, tag containment, and accessibility checks shared
    /// by the by-id read paths
    async fn instance_precheck(
        &self,
        ctx: &RequestContext,
        provider_service_id: &str,
        consumer_service_id: &str,
        tags: &[String],
    ) -> Result<()> {
        let target = ctx.target_domain_project();
        if !self.services.service_exists(&target, provider_service_id).await? {
            return Err(Error::service_not_exists("provider serviceId is invalid"));
        }

        if !tags.is_empty() {
            let (provider_tags, _) = self.services.get_tags(&target, provider_service_id).await?;
            if provider_tags.is_empty() {
                return Err(Error::tag_not_exists("provider has no tag"));
            }
            for tag in tags {
                if !provider_tags.contains_key(tag) {
                    return Err(Error::tag_not_exists(format!(
                        "provider tags do not contain '{tag}'"
                    )));
                }
            }
        }

        self.access
            .accessible(ctx, consumer_service_id, provider_service_id)
            .await
    }

    /// Read one provider instance by id
    pub async fn get_one_instance(
        &self,
        ctx: &RequestContext,
        consumer_service_id: &str,
        provider_service_id: &str,
        instance_id: &str,
        tags: &[String],
    ) -> Result<Instance> {
        self.instance_precheck(ctx, provider_service_id, consumer_service_id, tags)
            .await?;
        let target = ctx.target_domain_project();
        self.store
            .get_one(&target, provider_service_id, instance_id)
            .await?
            .ok_or_else(|| Error::instance_not_exists("instance does not exist"))
    }

    /// Read all instances of one provider by id
    pub async fn get_instances(
        &self,
        ctx: &RequestContext,
        consumer_service_id: &str,
        provider_service_id: &str,
        tags: &[String],
    ) -> Result<Vec<Instance>> {
        self.instance_precheck(ctx, provider_service_id, consumer_service_id, tags)
            .await?;
        let target = ctx.target_domain_project();
        self.store.get_all(&target, provider_service_id).await
    }

    /// Sequential `find` per element, threading each element's revision.
    /// Results are bucketed by outcome; failures sharing an error code share
    /// one failure entry. An internal error aborts the batch.
    pub async fn batch_find(
        &self,
        ctx: &RequestContext,
        consumer_service_id: &str,
        elements: &[BatchFindKey],
    ) -> Result<BatchFindResult> {
        if elements.is_empty() {
            return Err(Error::invalid_params(
                "batch find must contain at least one service key",
            ));
        }

        let mut result = BatchFindResult::default();
        let mut failed: HashMap<u32, FindFailed> = HashMap::new();

        for (index, element) in elements.iter().enumerate() {
            let mut element_ctx = ctx.clone();
            element_ctx.request_rev = if element.rev.is_empty() {
                None
            } else {
                Some(element.rev.clone())
            };
            let request = FindRequest {
                consumer_service_id: consumer_service_id.to_string(),
                environment: element.environment.clone(),
                app_id: element.app_id.clone(),
                service_name: element.service_name.clone(),
                version_rule: element.version_rule.clone(),
                tags: Vec::new(),
            };

            match self.find(&element_ctx, request).await {
                Ok(found) if found.not_modified => result.not_modified.push(index as i64),
                Ok(found) => result.updated.push(FindUpdated {
                    index: index as i64,
                    rev: found.rev,
                    instances: found.instances,
                }),
                Err(e) if e.is_internal() => return Err(e),
                Err(e) => {
                    failed
                        .entry(e.code())
                        .or_insert_with(|| FindFailed {
                            code: e.code(),
                            message: e.message().to_string(),
                            indexes: Vec::new(),
                        })
                        .indexes
                        .push(index as i64);
                }
            }
        }

        let mut failures: Vec<FindFailed> = failed.into_values().collect();
        failures.sort_by_key(|f| f.code);
        result.failed = failures;
        Ok(result)
    }

    /// Instances of the registry's own service record
    pub async fn cluster_health(&self) -> Result<Vec<Instance>> {
        let dp = DomainProject::registry();
        let identity = &self.config.registry;
        let service_id = self
            .services
            .find_service_id(
                &dp,
                &identity.environment,
                &identity.app_id,
                &identity.service_name,
                &identity.version,
            )
            .await?
            .ok_or_else(|| {
                Error::service_not_exists("the registry's own serviceId does not exist")
            })?;
        self.store.get_all(&dp, &service_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::LeaseKeeper;
    use crate::quota::UnlimitedQuota;
    use roster_core::clock::ManualClock;
    use roster_core::model::{HealthCheck, HealthMode};
    use roster_kv::MemoryKv;

    struct Fixture {
        kv: Arc<MemoryKv>,
        store: Arc<InstanceStore>,
        cache: Arc<FindCache>,
        discovery: Discovery,
    }

    fn fixture() -> Fixture {
        fixture_with_config(RosterConfig::default())
    }

    fn fixture_with_config(config: RosterConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let kv: Arc<MemoryKv> = Arc::new(MemoryKv::with_clock(clock.clone()));
        let services = ServiceDirectory::new(kv.clone());
        let store = Arc::new(InstanceStore::new(
            kv.clone(),
            LeaseKeeper::new(kv.clone()),
            services.clone(),
            Arc::new(UnlimitedQuota),
            clock,
        ));
        let cache = Arc::new(FindCache::new(kv.clone(), services.clone(), store.clone()));
        let discovery = Discovery::new(
            services,
            store.clone(),
            cache.clone(),
            Arc::new(AllowAllAccess),
            Arc::new(KvDependencyWriter::new(kv.clone())),
            Arc::new(config),
        );
        Fixture {
            kv,
            store,
            cache,
            discovery,
        }
    }

    async fn seed_service(f: &Fixture, dp: &DomainProject, service: Service) {
        f.kv.put(
            &keys::service_key(dp, &service.service_id),
            Bytes::from(serde_json::to_vec(&service).unwrap()),
        )
        .await
        .unwrap();
    }

    fn service(id: &str, env: &str, name: &str, version: &str) -> Service {
        Service {
            service_id: id.into(),
            environment: env.into(),
            app_id: "app".into(),
            service_name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    async fn register(f: &Fixture, dp: &DomainProject, service_id: &str, endpoint: &str) -> String {
        let ctx = RequestContext::new(dp.clone());
        f.store
            .register(
                &ctx,
                Instance {
                    service_id: service_id.into(),
                    endpoints: vec![endpoint.into()],
                    host_name: "h".into(),
                    health_check: Some(HealthCheck {
                        mode: HealthMode::Heartbeat,
                        interval: 30,
                        times: 3,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    fn find_request(consumer: &str, env: &str, name: &str, rule: &str) -> FindRequest {
        FindRequest {
            consumer_service_id: consumer.to_string(),
            environment: env.to_string(),
            app_id: "app".to_string(),
            service_name: name.to_string(),
            version_rule: rule.to_string(),
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_find_resolves_latest_and_records_dependency() {
        let f = fixture();
        let dp = DomainProject::registry();
        seed_service(&f, &dp, service("c1", "production", "consumer", "1.0.0")).await;
        seed_service(&f, &dp, service("p1", "production", "provider", "1.0.0")).await;
        seed_service(&f, &dp, service("p2", "production", "provider", "2.0.0")).await;
        register(&f, &dp, "p1", "rest://a:1").await;
        register(&f, &dp, "p2", "rest://b:2").await;

        let ctx = RequestContext::new(dp.clone());
        let found = f
            .discovery
            .find(&ctx, find_request("c1", "production", "provider", "latest"))
            .await
            .unwrap();
        assert_eq!(found.instances.len(), 1);
        assert_eq!(found.instances[0].service_id, "p2");
        assert!(!found.not_modified);

        // The dependency edge was recorded under the canonical provider key.
        let edge_key = keys::dep_rule_key(
            "c1",
            &ServiceKey {
                tenant: dp.clone(),
                environment: "production".into(),
                app_id: "app".into(),
                service_name: "provider".into(),
                alias: String::new(),
                version: "latest".into(),
            },
        );
        assert!(f.kv.get(&edge_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_missing_consumer() {
        let f = fixture();
        let dp = DomainProject::registry();
        seed_service(&f, &dp, service("p1", "production", "provider", "1.0.0")).await;

        let ctx = RequestContext::new(dp);
        let err = f
            .discovery
            .find(&ctx, find_request("ghost", "production", "provider", "latest"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotExists { .. }));
    }

    #[tokio::test]
    async fn test_find_missing_provider() {
        let f = fixture();
        let dp = DomainProject::registry();
        let ctx = RequestContext::new(dp);
        let err = f
            .discovery
            .find(&ctx, find_request("", "production", "ghost", "latest"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotExists { .. }));
    }

    #[tokio::test]
    async fn test_find_revision_skip() {
        let f = fixture();
        let dp = DomainProject::registry();
        seed_service(&f, &dp, service("p1", "production", "provider", "1.0.0")).await;
        register(&f, &dp, "p1", "rest://a:1").await;

        let ctx = RequestContext::new(dp.clone());
        let first = f
            .discovery
            .find(&ctx, find_request("", "production", "provider", "latest"))
            .await
            .unwrap();
        assert!(!first.not_modified);

        let ctx = ctx.with_request_rev(first.rev.clone());
        let second = f
            .discovery
            .find(&ctx, find_request("", "production", "provider", "latest"))
            .await
            .unwrap();
        assert!(second.not_modified);
        assert!(second.instances.is_empty());
        assert_eq!(second.rev, first.rev);
    }

    #[tokio::test]
    async fn test_shared_service_cross_tenant() {
        let mut config = RosterConfig::default();
        config.registry.environment = "production".into();
        config.shared_service_names.insert("shared-cfg".into());
        let f = fixture_with_config(config);

        // The shared provider lives in the registry tenant, under the
        // registry's own app and environment.
        let registry_dp = DomainProject::registry();
        seed_service(
            &f,
            &registry_dp,
            Service {
                service_id: "sp".into(),
                environment: "production".into(),
                app_id: "default".into(),
                service_name: "shared-cfg".into(),
                version: "1.0.0".into(),
                ..Default::default()
            },
        )
        .await;
        register(&f, &registry_dp, "sp", "rest://shared:1").await;

        // The consumer lives in another tenant and a different environment.
        let tenant2 = DomainProject::new("t2", "p");
        seed_service(&f, &tenant2, service("c2", "development", "consumer", "1.0.0")).await;

        let ctx = RequestContext::new(tenant2).with_target(registry_dp);
        let found = f
            .discovery
            .find(
                &ctx,
                FindRequest {
                    consumer_service_id: "c2".into(),
                    environment: "development".into(),
                    app_id: "default".into(),
                    service_name: "shared-cfg".into(),
                    version_rule: "latest".into(),
                    tags: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(found.instances.len(), 1);
        assert_eq!(found.instances[0].service_id, "sp");
    }

    #[tokio::test]
    async fn test_non_shared_lookup_stays_in_own_tenant() {
        let f = fixture();
        let registry_dp = DomainProject::registry();
        seed_service(&f, &registry_dp, service("p1", "production", "provider", "1.0.0")).await;
        register(&f, &registry_dp, "p1", "rest://a:1").await;

        // A caller in another tenant cannot see it, even with an explicit
        // target, because "provider" is not in the shared list.
        let ctx = RequestContext::new(DomainProject::new("t2", "p"))
            .with_target(DomainProject::registry());
        let err = f
            .discovery
            .find(&ctx, find_request("", "production", "provider", "latest"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotExists { .. }));
    }

    #[tokio::test]
    async fn test_get_one_instance_prechecks() {
        let f = fixture();
        let dp = DomainProject::registry();
        seed_service(&f, &dp, service("p1", "production", "provider", "1.0.0")).await;
        let id = register(&f, &dp, "p1", "rest://a:1").await;

        let ctx = RequestContext::new(dp.clone());
        let instance = f
            .discovery
            .get_one_instance(&ctx, "", "p1", &id, &[])
            .await
            .unwrap();
        assert_eq!(instance.instance_id, id);

        let err = f
            .discovery
            .get_one_instance(&ctx, "", "ghost", &id, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotExists { .. }));

        let err = f
            .discovery
            .get_one_instance(&ctx, "", "p1", &id, &["stage".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TagNotExists { .. }));

        let err = f
            .discovery
            .get_one_instance(&ctx, "", "p1", "missing", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InstanceNotExists { .. }));
    }

    #[tokio::test]
    async fn test_batch_find_buckets() {
        let f = fixture();
        let dp = DomainProject::registry();
        seed_service(&f, &dp, service("p1", "production", "provider", "1.0.0")).await;
        register(&f, &dp, "p1", "rest://a:1").await;

        let ctx = RequestContext::new(dp.clone());
        let probe = f
            .discovery
            .find(&ctx, find_request("", "production", "provider", "latest"))
            .await
            .unwrap();

        let elements = vec![
            // Unchanged element: client already holds the latest rev.
            BatchFindKey {
                environment: "production".into(),
                app_id: "app".into(),
                service_name: "provider".into(),
                version_rule: "latest".into(),
                rev: probe.rev.clone(),
            },
            // Updated element: stale rev.
            BatchFindKey {
                environment: "production".into(),
                app_id: "app".into(),
                service_name: "provider".into(),
                version_rule: "latest".into(),
                rev: "0".into(),
            },
            // Two failures sharing a code.
            BatchFindKey {
                environment: "production".into(),
                app_id: "app".into(),
                service_name: "ghost-a".into(),
                version_rule: "latest".into(),
                rev: String::new(),
            },
            BatchFindKey {
                environment: "production".into(),
                app_id: "app".into(),
                service_name: "ghost-b".into(),
                version_rule: "latest".into(),
                rev: String::new(),
            },
        ];

        let result = f.discovery.batch_find(&ctx, "", &elements).await.unwrap();
        assert_eq!(result.not_modified, vec![0]);
        assert_eq!(result.updated.len(), 1);
        assert_eq!(result.updated[0].index, 1);
        assert_eq!(result.updated[0].instances.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].indexes, vec![2, 3]);
        assert_eq!(
            result.failed[0].code,
            Error::service_not_exists("").code()
        );
    }

    #[tokio::test]
    async fn test_cluster_health_reads_own_instances() {
        let config = RosterConfig::default();
        let identity = config.registry.clone();
        let f = fixture_with_config(config);
        let dp = DomainProject::registry();

        // No record yet.
        let err = f.discovery.cluster_health().await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotExists { .. }));

        seed_service(
            &f,
            &dp,
            Service {
                service_id: "roster-self".into(),
                environment: identity.environment.clone(),
                app_id: identity.app_id.clone(),
                service_name: identity.service_name.clone(),
                version: identity.version.clone(),
                ..Default::default()
            },
        )
        .await;
        register(&f, &dp, "roster-self", "rest://self:30100").await;

        let instances = f.discovery.cluster_health().await.unwrap();
        assert_eq!(instances.len(), 1);
    }

    #[tokio::test]
    async fn test_find_alias_reshapes_dependency_key() {
        let f = fixture();
        let dp = DomainProject::registry();
        seed_service(&f, &dp, service("c1", "production", "consumer", "1.0.0")).await;
        seed_service(
            &f,
            &dp,
            Service {
                service_id: "p1".into(),
                environment: "production".into(),
                app_id: "app".into(),
                service_name: "canonical".into(),
                alias: "nickname".into(),
                version: "1.0.0".into(),
                ..Default::default()
            },
        )
        .await;
        register(&f, &dp, "p1", "rest://a:1").await;

        let ctx = RequestContext::new(dp.clone());
        let found = f
            .discovery
            .find(&ctx, find_request("c1", "production", "nickname", "latest"))
            .await
            .unwrap();
        assert_eq!(found.instances.len(), 1);

        // The recorded edge names the canonical service, not the alias.
        let reshaped = ServiceKey {
            tenant: dp.clone(),
            environment: "production".into(),
            app_id: "app".into(),
            service_name: "canonical".into(),
            alias: "nickname".into(),
            version: "latest".into(),
        };
        assert!(f
            .kv
            .get(&keys::dep_rule_key("c1", &reshaped))
            .await
            .unwrap()
            .is_some());
    }
}
