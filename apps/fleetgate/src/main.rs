use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fleetgate_core::GatewayEngine;
use fleetgate_storage::{CredentialStore, SeaOrmStore};

#[derive(Debug, Parser)]
#[command(
    name = "fleetgate",
    version,
    about = "Multi-tenant LLM API gateway over a fleet of per-user upstream credentials"
)]
struct Cli {
    /// Database DSN, e.g. sqlite://fleetgate.db?mode=rwc
    #[arg(long, env = "FLEETGATE_DSN", default_value = "sqlite://fleetgate.db?mode=rwc")]
    dsn: String,

    /// Bind host.
    #[arg(long, env = "FLEETGATE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Bind port.
    #[arg(long, env = "FLEETGATE_PORT", default_value_t = 8787)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let store = SeaOrmStore::connect(&cli.dsn)
        .await
        .with_context(|| format!("connecting to {}", cli.dsn))?;
    store.sync().await.context("schema sync")?;
    for seed in fleetgate_provider_impl::provider_seeds() {
        store
            .ensure_provider(&seed)
            .await
            .with_context(|| format!("seeding provider {}", seed.name))?;
    }

    let store: Arc<dyn CredentialStore> = Arc::new(store);
    let registry = Arc::new(fleetgate_provider_impl::build_registry());
    tracing::info!(handlers = ?registry.names(), "handler registry ready");

    let engine = Arc::new(GatewayEngine::new(store, registry));
    let app = fleetgate_router::proxy_router(engine);

    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    println!("listening on {bind}");
    axum::serve(listener, app).await?;
    Ok(())
}
