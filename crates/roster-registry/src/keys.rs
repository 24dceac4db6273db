//! Canonical KV key layout
//!
//! Keys are hierarchical, `/`-separated, UTF-8. Every per-tenant key is
//! prefixed with `{domain}/{project}`. The layout is part of the persisted
//! contract; change it and existing deployments stop resolving.

use roster_core::model::{DomainProject, ServiceKey};

/// Root prefix of every registry key
pub const KEY_ROOT: &str = "/roster";

/// Prefix covering every key the find-cache watches
pub fn watch_root() -> String {
    format!("{KEY_ROOT}/")
}

/// Service record: `/roster/service/{domain}/{project}/{service_id}`
pub fn service_key(dp: &DomainProject, service_id: &str) -> String {
    format!("{KEY_ROOT}/service/{}/{}/{service_id}", dp.domain, dp.project)
}

/// Prefix of all service records in a tenant
pub fn service_prefix(dp: &DomainProject) -> String {
    format!("{KEY_ROOT}/service/{}/{}/", dp.domain, dp.project)
}

/// Instance record: `/roster/inst/{domain}/{project}/{service_id}/{instance_id}`
pub fn instance_key(dp: &DomainProject, service_id: &str, instance_id: &str) -> String {
    format!(
        "{KEY_ROOT}/inst/{}/{}/{service_id}/{instance_id}",
        dp.domain, dp.project
    )
}

/// Prefix of all instance records of one service
pub fn instance_prefix(dp: &DomainProject, service_id: &str) -> String {
    format!("{KEY_ROOT}/inst/{}/{}/{service_id}/", dp.domain, dp.project)
}

/// Lease sibling of an instance record; the value is the printed lease id
pub fn lease_key(dp: &DomainProject, service_id: &str, instance_id: &str) -> String {
    format!(
        "{KEY_ROOT}/lease/{}/{}/{service_id}/{instance_id}",
        dp.domain, dp.project
    )
}

/// Tag map of a service: `/roster/tag/{domain}/{project}/{service_id}`
pub fn tag_key(dp: &DomainProject, service_id: &str) -> String {
    format!("{KEY_ROOT}/tag/{}/{}/{service_id}", dp.domain, dp.project)
}

/// Dependency edge marker recorded on the first successful discovery of a
/// provider key by a consumer
pub fn dep_rule_key(consumer_service_id: &str, provider: &ServiceKey) -> String {
    format!(
        "{KEY_ROOT}/dep-rule/{consumer_service_id}/{}/{}/{}/{}",
        provider.environment, provider.app_id, provider.service_name, provider.version
    )
}

/// Segment prefixes used to classify watch events
pub const INSTANCE_SEGMENT: &str = "/roster/inst/";
pub const SERVICE_SEGMENT: &str = "/roster/service/";
pub const TAG_SEGMENT: &str = "/roster/tag/";

/// Extract the service id from an instance key, if the key is one
pub fn service_id_of_instance_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(INSTANCE_SEGMENT)?;
    // rest = {domain}/{project}/{service_id}/{instance_id}
    let mut parts = rest.split('/');
    let _domain = parts.next()?;
    let _project = parts.next()?;
    parts.next()
}

/// Extract the service id from a service record key, if the key is one
pub fn service_id_of_service_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(SERVICE_SEGMENT)?;
    let mut parts = rest.split('/');
    let _domain = parts.next()?;
    let _project = parts.next()?;
    parts.next()
}

/// Extract the service id from a tag key, if the key is one
pub fn service_id_of_tag_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(TAG_SEGMENT)?;
    let mut parts = rest.split('/');
    let _domain = parts.next()?;
    let _project = parts.next()?;
    parts.next()
}

/// Tenant of a service record key
pub fn tenant_of_service_key(key: &str) -> Option<DomainProject> {
    let rest = key.strip_prefix(SERVICE_SEGMENT)?;
    let mut parts = rest.split('/');
    let domain = parts.next()?;
    let project = parts.next()?;
    Some(DomainProject::new(domain, project))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dp() -> DomainProject {
        DomainProject::new("tenant1", "proj1")
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(
            service_key(&dp(), "s1"),
            "/roster/service/tenant1/proj1/s1"
        );
        assert_eq!(
            instance_key(&dp(), "s1", "i1"),
            "/roster/inst/tenant1/proj1/s1/i1"
        );
        assert_eq!(
            lease_key(&dp(), "s1", "i1"),
            "/roster/lease/tenant1/proj1/s1/i1"
        );
        assert_eq!(tag_key(&dp(), "s1"), "/roster/tag/tenant1/proj1/s1");
    }

    #[test]
    fn test_instance_key_is_under_prefix() {
        let key = instance_key(&dp(), "s1", "i1");
        assert!(key.starts_with(&instance_prefix(&dp(), "s1")));
    }

    #[test]
    fn test_dep_rule_key() {
        let provider = ServiceKey {
            tenant: dp(),
            environment: "production".into(),
            app_id: "app".into(),
            service_name: "svc".into(),
            alias: "svc".into(),
            version: "1.0+".into(),
        };
        assert_eq!(
            dep_rule_key("consumer1", &provider),
            "/roster/dep-rule/consumer1/production/app/svc/1.0+"
        );
    }

    #[test]
    fn test_service_id_extraction() {
        let key = instance_key(&dp(), "s1", "i1");
        assert_eq!(service_id_of_instance_key(&key), Some("s1"));
        assert_eq!(service_id_of_instance_key("/roster/service/x"), None);

        let key = service_key(&dp(), "s2");
        assert_eq!(service_id_of_service_key(&key), Some("s2"));
        assert_eq!(tenant_of_service_key(&key), Some(dp()));

        let key = tag_key(&dp(), "s3");
        assert_eq!(service_id_of_tag_key(&key), Some("s3"));
    }
}
