//! Roster Core
//!
//! Core types, errors, and constants for the Roster service-instance registry.
//!
//! # Overview
//!
//! Roster is the instance-lifecycle subsystem of a service-discovery control
//! plane: it accepts instance registrations, keeps a lease-bound liveness
//! record per instance, renews leases on heartbeat, answers discovery queries
//! with a revision cursor, and evicts instances whose leases expire.
//!
//! This crate holds the pieces shared by every other crate in the workspace:
//! the error taxonomy, the domain model, configuration, explicit limits, the
//! clock abstraction, and telemetry bootstrap.

pub mod clock;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod model;
pub mod telemetry;

pub use clock::{Clock, ManualClock, WallClock};
pub use config::{RegistryIdentity, RosterConfig, ServerConfig};
pub use constants::*;
pub use context::RequestContext;
pub use error::{Error, Result};
pub use model::{
    DomainProject, HealthCheck, HealthMode, Instance, InstanceStatus, Service, ServiceKey,
};
pub use telemetry::{init_telemetry, TelemetryConfig};
