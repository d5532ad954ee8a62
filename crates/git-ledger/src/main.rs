//! git-ledger service entry point: configuration, logging, database and
//! provider wiring, HTTP serving.

mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use git_ledger_app::{ProviderKind, Settings};
use git_ledger_db::{connect_options, PgLedgerStore};
use git_ledger_git::{GitProvider, RepoCache};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // `.env` must land before clap reads the environment; the logger
    // needs the parsed `--debug` flag, so the load result is reported
    // afterwards.
    let dotenv = dotenvy::dotenv();

    let settings = Settings::parse();
    init_tracing(settings.debug);

    if let Err(err) = dotenv {
        warn!(error = %err, "no .env file loaded, continuing with existing environment");
    }

    settings.validate()?;
    let pinned = settings.pinned_repos()?;
    if !pinned.is_empty() {
        info!(pinned = pinned.len(), "pinned repositories configured");
    }

    let options = connect_options(
        &settings.database_host,
        settings.database_port,
        &settings.database_user,
        &settings.database_password,
        &settings.database_dbname,
    );
    let store = PgLedgerStore::connect(options, 10)
        .await
        .context("could not open database connection")?;
    store
        .run_migrations()
        .await
        .context("database migration failed")?;

    let provider = match settings.git_provider {
        ProviderKind::Cache => {
            let (Some(cache_dir), Some(min_free_gb)) =
                (settings.cache_dir.as_ref(), settings.min_free_disk_gb)
            else {
                bail!("cache provider requires CACHE_DIR and MIN_FREE_DISK_GB");
            };
            info!(dir = %cache_dir.display(), min_free_gb, "initiating cache git provider");
            GitProvider::Cache(
                RepoCache::new(cache_dir, min_free_gb, pinned)
                    .context("could not create a cache git provider")?,
            )
        }
        ProviderKind::Memory => {
            info!("initiating in-memory git provider");
            GitProvider::Ephemeral
        }
    };

    let forge = reqwest::Client::builder()
        .user_agent(concat!("git-ledger/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("could not build forge API client")?;

    let state = AppState {
        store: Arc::new(store),
        provider: Arc::new(provider),
        forge,
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.server_port));
    info!(%addr, "starting server");
    axum::Server::bind(&addr)
        .serve(server::router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install TERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
