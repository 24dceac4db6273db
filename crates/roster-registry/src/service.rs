//! Read-side access to service records
//!
//! Service registration itself lives outside this subsystem; Roster only
//! reads the records (and their tag maps) that the registration subsystem
//! maintains in the KV.

use crate::keys;
use crate::kv_error;
use roster_core::error::{Error, Result};
use roster_core::model::{DomainProject, Service};
use roster_kv::KvStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Read-only directory of service records
#[derive(Clone)]
pub struct ServiceDirectory {
    kv: Arc<dyn KvStore>,
}

impl ServiceDirectory {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Read one service record by id
    pub async fn get_service(&self, dp: &DomainProject, service_id: &str) -> Result<Option<Service>> {
        Ok(self
            .get_service_with_revision(dp, service_id)
            .await?
            .map(|(service, _)| service))
    }

    /// Read one service record along with its KV mod-revision
    pub async fn get_service_with_revision(
        &self,
        dp: &DomainProject,
        service_id: &str,
    ) -> Result<Option<(Service, u64)>> {
        let key = keys::service_key(dp, service_id);
        match self.kv.get(&key).await.map_err(kv_error)? {
            Some(kv) => {
                let service: Service = serde_json::from_slice(&kv.value).map_err(|e| {
                    Error::internal(format!("malformed service record at {key}: {e}"))
                })?;
                Ok(Some((service, kv.mod_revision)))
            }
            None => Ok(None),
        }
    }

    /// Existence check by id
    pub async fn service_exists(&self, dp: &DomainProject, service_id: &str) -> Result<bool> {
        let key = keys::service_key(dp, service_id);
        Ok(self.kv.get(&key).await.map_err(kv_error)?.is_some())
    }

    /// All service records in a tenant, each with its KV mod-revision
    pub async fn list_services(&self, dp: &DomainProject) -> Result<Vec<(Service, u64)>> {
        let prefix = keys::service_prefix(dp);
        let entries = self.kv.get_prefix(&prefix).await.map_err(kv_error)?;
        let mut services = Vec::with_capacity(entries.len());
        for entry in entries {
            let service: Service = serde_json::from_slice(&entry.value).map_err(|e| {
                Error::internal(format!("malformed service record at {}: {e}", entry.key))
            })?;
            services.push((service, entry.mod_revision));
        }
        Ok(services)
    }

    /// Resolve a service id by exact identity (environment, app, name,
    /// version). Used by cluster-health to find the registry's own record.
    pub async fn find_service_id(
        &self,
        dp: &DomainProject,
        environment: &str,
        app_id: &str,
        service_name: &str,
        version: &str,
    ) -> Result<Option<String>> {
        let services = self.list_services(dp).await?;
        Ok(services
            .into_iter()
            .map(|(service, _)| service)
            .find(|s| {
                s.environment == environment
                    && s.app_id == app_id
                    && s.service_name == service_name
                    && s.version == version
            })
            .map(|s| s.service_id))
    }

    /// Tag map of a service and the mod-revision of the tag record.
    /// A service without a tag record has an empty map at revision 0.
    pub async fn get_tags(
        &self,
        dp: &DomainProject,
        service_id: &str,
    ) -> Result<(HashMap<String, String>, u64)> {
        let key = keys::tag_key(dp, service_id);
        match self.kv.get(&key).await.map_err(kv_error)? {
            Some(kv) => {
                let tags: HashMap<String, String> =
                    serde_json::from_slice(&kv.value).map_err(|e| {
                        Error::internal(format!("malformed tag record at {key}: {e}"))
                    })?;
                Ok((tags, kv.mod_revision))
            }
            None => Ok((HashMap::new(), 0)),
        }
    }
}
