//! Configuration for Roster
//!
//! Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Main configuration for the registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterConfig {
    /// The registry's own service identity
    #[serde(default)]
    pub registry: RegistryIdentity,

    /// Names of services declared once in the registry's tenant and visible
    /// from all tenants
    #[serde(default)]
    pub shared_service_names: HashSet<String>,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Heartbeat configuration
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl RosterConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        self.server.validate()?;
        self.heartbeat.validate()?;
        Ok(())
    }
}

/// The registry's own service identity, registered under the registry tenant
/// and used by cluster-health and shared-service resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryIdentity {
    #[serde(default = "default_registry_environment")]
    pub environment: String,
    #[serde(default = "default_registry_app_id")]
    pub app_id: String,
    #[serde(default = "default_registry_service_name")]
    pub service_name: String,
    #[serde(default = "default_registry_version")]
    pub version: String,
}

fn default_registry_environment() -> String {
    "production".to_string()
}

fn default_registry_app_id() -> String {
    "default".to_string()
}

fn default_registry_service_name() -> String {
    "ROSTER".to_string()
}

fn default_registry_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for RegistryIdentity {
    fn default() -> Self {
        Self {
            environment: default_registry_environment(),
            app_id: default_registry_app_id(),
            service_name: default_registry_service_name(),
            version: default_registry_version(),
        }
    }
}

impl RegistryIdentity {
    fn validate(&self) -> Result<()> {
        if self.service_name.is_empty() {
            return Err(Error::invalid_params(
                "registry.service_name must not be empty",
            ));
        }
        if self.app_id.is_empty() {
            return Err(Error::invalid_params("registry.app_id must not be empty"));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:30100".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        if !self.bind_address.contains(':') {
            return Err(Error::invalid_params(
                "server.bind_address must be in host:port format",
            ));
        }
        Ok(())
    }
}

/// Heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Upper bound on concurrent lease renewals in one batch heartbeat
    #[serde(default = "default_set_concurrency")]
    pub set_concurrency: usize,
}

fn default_set_concurrency() -> usize {
    HEARTBEAT_SET_CONCURRENCY_DEFAULT
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            set_concurrency: default_set_concurrency(),
        }
    }
}

impl HeartbeatConfig {
    fn validate(&self) -> Result<()> {
        if self.set_concurrency == 0 {
            return Err(Error::invalid_params(
                "heartbeat.set_concurrency must be positive",
            ));
        }
        Ok(())
    }
}
