//! Roster Server
//!
//! HTTP surface and composition root for the Roster service registry.

pub mod api;
pub mod state;

pub use state::AppState;
