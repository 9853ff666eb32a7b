use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    lifecycle::{LifecycleCoordinator, LifecycleSettings},
    list_file::ListFile,
    secret_hash::{HashParams, SecretHasher},
    storage_service::StorageService,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;
    tracing::info!(
        addr = %cfg.addr(),
        content_dir = %cfg.content_dir.display(),
        site = %cfg.site_name,
        "starting drophost"
    );

    if !cfg.content_dir.exists() {
        fs::create_dir_all(&cfg.content_dir)
            .with_context(|| format!("creating content dir {}", cfg.content_dir.display()))?;
        tracing::info!("Created content directory at {}", cfg.content_dir.display());
    }

    // --- Metadata store ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        pool.close().await;
        return Ok(());
    }
    let db = Arc::new(pool);

    // --- Credential and domain lists, reloaded on change ---
    let keys = ListFile::load("keys", &cfg.keys_file);
    let domains = ListFile::load("domains", &cfg.domains_file);
    let _watchers = [keys.watch(), domains.watch()]
        .into_iter()
        .filter_map(|watch| match watch {
            Ok(watcher) => watcher,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "list hot-reload disabled");
                None
            }
        })
        .collect::<Vec<_>>();

    // --- Components ---
    let hasher = SecretHasher::new(&HashParams {
        mem_cost_kib: cfg.hash_memory_kib,
        ..HashParams::default()
    })?;
    let store = StorageService::new(db.clone(), cfg.content_dir.clone());
    let lifecycle = LifecycleCoordinator::new(
        store,
        hasher,
        keys,
        LifecycleSettings {
            size_limit: cfg.size_limit_bytes,
            key_length_limit: cfg.key_length_limit,
            site_name: cfg.site_name.clone(),
            upload_window: cfg.upload_ratelimit,
            shorten_window: cfg.shorten_ratelimit,
        },
    );
    let state = state::AppState {
        lifecycle: Arc::new(lifecycle),
        domains,
        trust_proxy: cfg.trust_proxy,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.size_limit_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, draining connections");
}
