//! Roster server binary

use anyhow::Context;
use clap::Parser;
use roster_core::config::RosterConfig;
use roster_core::telemetry::{init_telemetry, TelemetryConfig};
use roster_server::api;
use roster_server::state::AppState;

/// Roster service-instance registry
#[derive(Parser, Debug)]
#[command(name = "roster-server")]
#[command(about = "Service-instance registry with lease-bound liveness and discovery")]
#[command(version)]
struct Cli {
    /// HTTP bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Comma-separated names of shared services visible from every tenant
    #[arg(long)]
    shared_services: Option<String>,

    /// Environment of the registry's own service record
    #[arg(long)]
    environment: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig::from_env())
        .context("telemetry initialization failed")?;

    let mut config = RosterConfig::default();
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(environment) = cli.environment {
        config.registry.environment = environment;
    }
    if let Some(shared) = cli.shared_services {
        config.shared_service_names = shared
            .split(',')
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
    }

    let bind_address = config.server.bind_address.clone();
    let state = AppState::build(config).context("assembling registry state failed")?;
    state
        .bootstrap_self(&format!("rest://{bind_address}"))
        .await
        .context("self registration failed")?;

    let router = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address} failed"))?;
    tracing::info!(bind = %bind_address, "roster server listening");
    axum::serve(listener, router).await.context("server failed")?;
    Ok(())
}
