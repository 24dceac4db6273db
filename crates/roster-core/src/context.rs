//! Per-request context metadata
//!
//! Carried from the RPC headers down through every component: tenant
//! (domain/project), the optional cross-tenant discovery target, the client
//! IP for logging, and the caller's request revision.

use crate::model::DomainProject;

/// Metadata parsed from the RPC headers for one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The caller's own tenant
    pub domain_project: DomainProject,
    /// Target tenant for cross-tenant discovery of shared services
    pub target: Option<DomainProject>,
    /// Client IP, logging only
    pub remote_ip: String,
    /// Revision the client last observed, for unchanged-response skipping
    pub request_rev: Option<String>,
    /// Set when the caller is the registry's own instance registration;
    /// bypasses quota
    pub is_registry_self: bool,
}

impl RequestContext {
    pub fn new(domain_project: DomainProject) -> Self {
        Self {
            domain_project,
            target: None,
            remote_ip: String::new(),
            request_rev: None,
            is_registry_self: false,
        }
    }

    pub fn with_target(mut self, target: DomainProject) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_remote_ip(mut self, ip: impl Into<String>) -> Self {
        self.remote_ip = ip.into();
        self
    }

    pub fn with_request_rev(mut self, rev: impl Into<String>) -> Self {
        self.request_rev = Some(rev.into());
        self
    }

    /// Tenant the discovery query resolves against: the explicit target if
    /// one was provided, otherwise the caller's own tenant.
    pub fn target_domain_project(&self) -> DomainProject {
        self.target
            .clone()
            .unwrap_or_else(|| self.domain_project.clone())
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(DomainProject::registry())
    }
}
