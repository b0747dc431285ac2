use mimalloc::MiMalloc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use vaultdb::config::Config;
use vaultdb::router::{ProbeState, probe_router};
use vaultdb::{CallerScope, Client, ClientOptions, SqlxConnector, VaultReader};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const MIGRATION_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        vault_addr = %cfg.vault.addr,
        secret_path = %cfg.database.secret_path,
        driver = %cfg.database.driver,
        grace_period_secs = cfg.database.grace_period_secs,
        refresh_interval_secs = ?cfg.database.refresh_interval_secs,
        loglevel = %cfg.loglevel
    );

    let reader = VaultReader::new(&cfg.vault)?;
    let connector = SqlxConnector::new(cfg.database.max_connections);
    let client = Arc::new(Client::new(
        reader,
        connector,
        ClientOptions::from(&cfg.database),
    ));

    if let Some(dir) = cfg.database.migrations_dir.as_ref() {
        let pool = client
            .acquire(&CallerScope::with_timeout(MIGRATION_TIMEOUT))
            .await?;
        vaultdb::db::run_migrations(&pool, dir).await?;
    } else {
        warn!("no migrations directory configured; skipping migrations");
    }

    let app = probe_router(ProbeState::new(client.clone()));

    let listener = TcpListener::bind(cfg.listen_addr.as_str()).await?;
    info!("HTTP server listening on {}", cfg.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, client.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "timed out closing database connections"
        );
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
    }
}
