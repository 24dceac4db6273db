//! Domain model for the service-instance registry
//!
//! The instance record is JSON-encoded into the KV store; field names and
//! enumeration spellings here are part of the wire contract.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Two-level tenant partition carried in request context.
///
/// Every per-tenant KV key is prefixed with `{domain}/{project}`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct DomainProject {
    pub domain: String,
    pub project: String,
}

/// Domain and project of the registry's own service record
pub const REGISTRY_DOMAIN: &str = "default";
pub const REGISTRY_PROJECT: &str = "default";

impl DomainProject {
    pub fn new(domain: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            project: project.into(),
        }
    }

    /// The distinguished tenant holding the registry's own service record
    pub fn registry() -> Self {
        Self::new(REGISTRY_DOMAIN, REGISTRY_PROJECT)
    }
}

impl Default for DomainProject {
    fn default() -> Self {
        Self::registry()
    }
}

impl fmt::Display for DomainProject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.project)
    }
}

/// Instance liveness status
///
/// Parsed once at the RPC boundary; stored SCREAMING on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    #[default]
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "STARTING")]
    Starting,
    #[serde(rename = "OUTOFSERVICE")]
    OutOfService,
    #[serde(rename = "TESTING")]
    Testing,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Starting => "STARTING",
            Self::OutOfService => "OUTOFSERVICE",
            Self::Testing => "TESTING",
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "STARTING" => Ok(Self::Starting),
            "OUTOFSERVICE" => Ok(Self::OutOfService),
            "TESTING" => Ok(Self::Testing),
            other => Err(Error::invalid_params(format!(
                "unknown instance status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an instance's liveness is established
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthMode {
    /// The instance sends heartbeats itself
    #[default]
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
    /// A platform sidecar sends heartbeats; registry defaults apply
    #[serde(rename = "PLATFORM")]
    Platform,
    /// Liveness is pushed by an external monitor
    #[serde(rename = "PUSH")]
    Push,
}

/// Health-check settings controlling the instance lease TTL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub mode: HealthMode,
    pub interval: i32,
    pub times: i32,
}

/// A running endpoint of a registered microservice.
///
/// `timestamp` is immutable after creation; `mod_timestamp` tracks the last
/// record mutation. Both are seconds since epoch, printed as strings on the
/// wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub mod_timestamp: String,
}

impl Instance {
    /// Idempotent-registration match: same full endpoint set on the same
    /// host. Endpoint order within the request is preserved on the record
    /// but does not affect the match.
    pub fn same_endpoints(&self, other: &Instance) -> bool {
        if self.host_name != other.host_name {
            return false;
        }
        if self.endpoints.len() != other.endpoints.len() {
            return false;
        }
        let mut a = self.endpoints.clone();
        let mut b = other.endpoints.clone();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }
}

/// A named logical microservice; parent of instances.
///
/// Service records are written by the service-registration subsystem; Roster
/// only reads them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

/// Identity of a provider as seen by a discovery query.
///
/// `version` holds a version *rule* (`latest`, exact, `1.0+`, `1.0-2.0`)
/// rather than a concrete version.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceKey {
    pub tenant: DomainProject,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub version: String,
}

impl ServiceKey {
    /// Rebuild the key from a canonical service record, preserving the
    /// version rule. Used when the queried name was an alias.
    pub fn from_service(tenant: DomainProject, service: &Service, version_rule: &str) -> Self {
        Self {
            tenant,
            environment: service.environment.clone(),
            app_id: service.app_id.clone(),
            service_name: service.service_name.clone(),
            alias: service.alias.clone(),
            version: version_rule.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in ["UP", "DOWN", "STARTING", "OUTOFSERVICE", "TESTING"] {
            let parsed: InstanceStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("RUNNING".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn test_status_default_is_up() {
        assert_eq!(InstanceStatus::default(), InstanceStatus::Up);
    }

    #[test]
    fn test_instance_wire_names() {
        let inst = Instance {
            instance_id: "i1".into(),
            service_id: "s1".into(),
            endpoints: vec!["rest://127.0.0.1:8080".into()],
            host_name: "host-1".into(),
            status: InstanceStatus::Up,
            health_check: Some(HealthCheck {
                mode: HealthMode::Heartbeat,
                interval: 30,
                times: 3,
            }),
            properties: HashMap::new(),
            version: "1.0.0".into(),
            timestamp: "1596119874".into(),
            mod_timestamp: "1596119874".into(),
        };

        let json = serde_json::to_value(&inst).unwrap();
        assert_eq!(json["instanceId"], "i1");
        assert_eq!(json["hostName"], "host-1");
        assert_eq!(json["status"], "UP");
        assert_eq!(json["healthCheck"]["mode"], "HEARTBEAT");
        assert_eq!(json["modTimestamp"], "1596119874");
    }

    #[test]
    fn test_same_endpoints_ignores_order() {
        let a = Instance {
            endpoints: vec!["rest://a:1".into(), "rest://b:2".into()],
            host_name: "host-1".into(),
            ..Default::default()
        };
        let b = Instance {
            endpoints: vec!["rest://b:2".into(), "rest://a:1".into()],
            host_name: "host-1".into(),
            ..Default::default()
        };
        let c = Instance {
            endpoints: vec!["rest://a:1".into()],
            host_name: "host-1".into(),
            ..Default::default()
        };
        assert!(a.same_endpoints(&b));
        assert!(!a.same_endpoints(&c));
    }

    #[test]
    fn test_same_endpoints_requires_same_host() {
        let a = Instance {
            endpoints: vec!["rest://a:1".into()],
            host_name: "host-1".into(),
            ..Default::default()
        };
        let mut b = a.clone();
        b.host_name = "host-2".into();
        assert!(!a.same_endpoints(&b));
    }

    #[test]
    fn test_domain_project_display() {
        let dp = DomainProject::new("t2", "p1");
        assert_eq!(dp.to_string(), "t2/p1");
        assert_eq!(DomainProject::registry().to_string(), "default/default");
    }
}
