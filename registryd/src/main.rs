mod api;
mod catalog;
mod config;
mod id;
mod metadata;
mod registry;
mod store;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::{Backend, Config, StoreConfig};
use crate::registry::Registry;
use crate::store::sqlite::KvDb;
use crate::store::{EtcdStore, KvStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("registryd=info"))
        )
        .init();

    tracing::info!("Starting registryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/kv-registry/registryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Connect the store once; the registry only ever sees the handle
    let store = open_store(&config.store).await?;
    let registry = Arc::new(Registry::new(store.clone(), config.registry.base_path.clone()));

    tracing::info!(
        "Serving services under {} from {}",
        registry.base_path(),
        registry.backend()
    );

    let app = api::routes::router(api::routes::AppState {
        registry: registry.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let cancel = CancellationToken::new();
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let _ = server_handle.await;

    if let Err(e) = store.close().await {
        tracing::error!("Failed to close store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    let store: Arc<dyn KvStore> = match config.backend {
        Backend::Etcd => {
            let store = EtcdStore::connect(&config.endpoints)
                .await
                .with_context(|| format!("Cannot create etcd registry at {}", config.endpoints.join(",")))?;
            Arc::new(store)
        }
        Backend::Sqlite => {
            let db = KvDb::open(&config.db_path)?;
            tracing::info!("Opened database at {:?}", config.db_path);
            Arc::new(SqliteStore::spawn(db))
        }
        Backend::Memory => {
            tracing::warn!("Using in-memory store, registry contents are lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    tracing::debug!("Opened {} store", config.backend.as_str());
    Ok(store)
}
