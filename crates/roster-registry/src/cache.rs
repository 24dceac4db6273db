//! Find-cache with revision
//!
//! Memoizes discovery query results per (consumer view, provider key, tags)
//! and stamps each entry with a revision token derived from the KV
//! mod-revisions observed during the rebuild. Identical rev between server
//! and client means the payload is unchanged and may be omitted.
//!
//! Invalidation is driven by the KV watch stream: instance and tag events
//! evict through a reverse index keyed by service id; service-record events
//! additionally evict every entry matching the service's identity, so a new
//! version shows up in `latest` lookups that never referenced its id.

use crate::instance::InstanceStore;
use crate::keys;
use crate::kv_error;
use crate::service::ServiceDirectory;
use crate::version::VersionRule;
use roster_core::error::Result;
use roster_core::model::{Instance, Service, ServiceKey};
use roster_kv::{KvEvent, KvStore, KvWatcher};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Key of one memoized query
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct CacheKey {
    /// `{env}/{app}/{name}/{version}` of the consumer; empty when anonymous
    consumer: String,
    /// Provider tenant as `{domain}/{project}`
    tenant: String,
    environment: String,
    app_id: String,
    service_name: String,
    version_rule: String,
    /// Sorted request tags
    tags: Vec<String>,
}

/// A memoized query result
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Matching provider service ids, highest version first
    pub service_ids: Vec<String>,
    /// Matching instances, ordered by (service_id, instance_id)
    pub instances: Vec<Instance>,
    /// Revision token; identical token implies identical payload
    pub rev: String,
    built_revision: u64,
}

/// Process-wide query cache
pub struct FindCache {
    kv: Arc<dyn KvStore>,
    services: ServiceDirectory,
    store: Arc<InstanceStore>,
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    /// Per-key single-flight locks; at most one rebuild per key at a time
    flights: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    /// Last (revision, payload fingerprint) issued per key; keeps rev
    /// monotonic across invalidations and stable across rebuilds that
    /// resolve to an identical payload
    last_revs: RwLock<HashMap<CacheKey, (u64, u64)>>,
    /// Reverse index: contributing service id -> cache keys
    index: RwLock<HashMap<String, HashSet<CacheKey>>>,
}

impl FindCache {
    pub fn new(kv: Arc<dyn KvStore>, services: ServiceDirectory, store: Arc<InstanceStore>) -> Self {
        Self {
            kv,
            services,
            store,
            entries: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            last_revs: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a provider key to its cached result, rebuilding on miss.
    ///
    /// Returns `None` when no service matches the provider identity, rule,
    /// and tags. Concurrent callers for the same key wait on the rebuild
    /// leader and observe its result.
    pub async fn get(
        &self,
        consumer: Option<&Service>,
        provider: &ServiceKey,
        tags: &[String],
    ) -> Result<Option<Arc<CacheEntry>>> {
        let key = Self::cache_key(consumer, provider, tags);

        if let Some(entry) = self.entries.read().await.get(&key) {
            return Ok(Some(entry.clone()));
        }

        let flight = {
            let mut flights = self.flights.lock().await;
            flights
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _leader = flight.lock().await;

        // A follower arrives here after the leader finished.
        if let Some(entry) = self.entries.read().await.get(&key) {
            return Ok(Some(entry.clone()));
        }

        let Some((entry, fingerprint)) = self.rebuild(&key, provider, tags).await? else {
            return Ok(None);
        };
        let entry = Arc::new(entry);

        self.last_revs
            .write()
            .await
            .insert(key.clone(), (entry.built_revision, fingerprint));
        {
            let mut index = self.index.write().await;
            for service_id in &entry.service_ids {
                index
                    .entry(service_id.clone())
                    .or_default()
                    .insert(key.clone());
            }
        }
        self.entries.write().await.insert(key, entry.clone());
        Ok(Some(entry))
    }

    fn cache_key(consumer: Option<&Service>, provider: &ServiceKey, tags: &[String]) -> CacheKey {
        let consumer = consumer
            .map(|c| {
                format!(
                    "{}/{}/{}/{}",
                    c.environment, c.app_id, c.service_name, c.version
                )
            })
            .unwrap_or_default();
        let mut tags = tags.to_vec();
        tags.sort_unstable();
        CacheKey {
            consumer,
            tenant: provider.tenant.to_string(),
            environment: provider.environment.clone(),
            app_id: provider.app_id.clone(),
            service_name: provider.service_name.clone(),
            version_rule: provider.version.clone(),
            tags,
        }
    }

    /// Resolve the provider identity against the store and build a fresh
    /// entry, returning it with a fingerprint of the payload sources.
    ///
    /// The revision token obeys two rules per cache key: identical payload
    /// sources keep the previously issued token, and any change produces a
    /// strictly larger one. The usual case takes the highest mod-revision
    /// observed among the contributing service, tag, and instance records;
    /// when a deletion lowers that maximum the token falls forward to the
    /// store revision instead.
    async fn rebuild(
        &self,
        key: &CacheKey,
        provider: &ServiceKey,
        tags: &[String],
    ) -> Result<Option<(CacheEntry, u64)>> {
        let all = self.services.list_services(&provider.tenant).await?;
        let mut max_revision = 0u64;
        let mut candidates = Vec::new();
        for (service, revision) in all {
            if service.environment == provider.environment
                && service.app_id == provider.app_id
                && (service.service_name == provider.service_name
                    || (!service.alias.is_empty() && service.alias == provider.service_name))
            {
                max_revision = max_revision.max(revision);
                candidates.push(service);
            }
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        if !tags.is_empty() {
            let mut tagged = Vec::with_capacity(candidates.len());
            for service in candidates {
                let (service_tags, tag_revision) = self
                    .services
                    .get_tags(&provider.tenant, &service.service_id)
                    .await?;
                max_revision = max_revision.max(tag_revision);
                if tags.iter().all(|tag| service_tags.contains_key(tag)) {
                    tagged.push(service);
                }
            }
            candidates = tagged;
            if candidates.is_empty() {
                return Ok(None);
            }
        }

        let rule = VersionRule::parse(&provider.version)?;
        let matched = rule.filter_services(candidates);
        if matched.is_empty() {
            return Ok(None);
        }

        let service_ids: Vec<String> = matched.iter().map(|s| s.service_id.clone()).collect();
        let mut instances = Vec::new();
        for service_id in &service_ids {
            let (mut service_instances, revision) = self
                .store
                .get_all_with_revision(&provider.tenant, service_id)
                .await?;
            max_revision = max_revision.max(revision);
            instances.append(&mut service_instances);
        }
        instances.sort_by(|a, b| {
            (a.service_id.as_str(), a.instance_id.as_str())
                .cmp(&(b.service_id.as_str(), b.instance_id.as_str()))
        });

        let fingerprint = Self::fingerprint(&service_ids, &instances, max_revision);
        let previous = self.last_revs.read().await.get(key).copied();
        let mut revision = max_revision;
        if let Some((previous_rev, previous_fingerprint)) = previous {
            if fingerprint == previous_fingerprint {
                // Nothing the payload depends on changed; keep the token.
                revision = previous_rev;
            } else if revision <= previous_rev {
                let current = self.kv.current_revision().await.map_err(kv_error)?;
                revision = current.max(previous_rev + 1);
            }
        }

        Ok(Some((
            CacheEntry {
                service_ids,
                instances,
                rev: revision.to_string(),
                built_revision: revision,
            },
            fingerprint,
        )))
    }

    fn fingerprint(service_ids: &[String], instances: &[Instance], max_revision: u64) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        service_ids.hash(&mut hasher);
        for instance in instances {
            instance.service_id.hash(&mut hasher);
            instance.instance_id.hash(&mut hasher);
            instance.mod_timestamp.hash(&mut hasher);
            instance.status.as_str().hash(&mut hasher);
        }
        max_revision.hash(&mut hasher);
        hasher.finish()
    }

    /// Classify one KV change event and evict the affected entries
    pub async fn handle_event(&self, event: &KvEvent) {
        if let Some(service_id) = keys::service_id_of_instance_key(&event.key) {
            self.invalidate_service(service_id).await;
            return;
        }
        if let Some(service_id) = keys::service_id_of_service_key(&event.key) {
            self.invalidate_service(service_id).await;
            if let Ok(service) = serde_json::from_slice::<Service>(&event.value) {
                if let Some(tenant) = keys::tenant_of_service_key(&event.key) {
                    self.invalidate_identity(&tenant.to_string(), &service).await;
                }
            }
            return;
        }
        if let Some(service_id) = keys::service_id_of_tag_key(&event.key) {
            self.invalidate_service(service_id).await;
        }
    }

    /// Consume the watch stream until the store goes away
    pub async fn run(self: Arc<Self>, mut watcher: KvWatcher) {
        while let Some(event) = watcher.recv().await {
            self.handle_event(&event).await;
        }
        tracing::debug!("find-cache watch stream closed");
    }

    /// Evict every entry that referenced a service id
    async fn invalidate_service(&self, service_id: &str) {
        let affected = {
            let mut index = self.index.write().await;
            index.remove(service_id)
        };
        let Some(affected) = affected else {
            return;
        };
        let mut entries = self.entries.write().await;
        for key in affected {
            entries.remove(&key);
        }
    }

    /// Evict every entry whose provider identity matches a service record,
    /// whether or not the entry referenced its id
    async fn invalidate_identity(&self, tenant: &str, service: &Service) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| {
            !(key.tenant == tenant
                && key.environment == service.environment
                && key.app_id == service.app_id
                && (key.service_name == service.service_name
                    || (!service.alias.is_empty() && key.service_name == service.alias)))
        });
    }

    #[cfg(test)]
    async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}
