use anyhow::{Context, Result};
use axum::Router;
use chrono::Duration;
use config::{AppConfig, Backend};
use services::{
    auth_service::{AuthService, IdentityProvider, LocalIdentity, RemoteIdentity},
    backend_client::BackendClient,
    image_pipeline::{AssetUploader, ImagePipeline, LocalAssetUploader, RemoteAssetUploader},
    item_store::{ItemStore, LocalItemStore, RemoteItemStore},
    kv_store::KeyValueStore,
    sync_service::ItemSyncService,
    view_state::CollectionViewModel,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;
    let cfg = Arc::new(cfg);

    tracing::info!("Starting luxury-catalog with config: {:?}", cfg);

    // --- Ensure data directory exists ---
    if !cfg.data_dir.exists() {
        fs::create_dir_all(&cfg.data_dir)?;
        tracing::info!("Created data directory at {}", cfg.data_dir.display());
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path_obj = Path::new(db_path);
    tracing::debug!(
        "Interpreted SQLite path => {} (exists? {})",
        db_path,
        db_path_obj.exists()
    );

    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx refuses to create a missing file unless asked via the URL
    if db_path != ":memory:" && !db_path_obj.exists() {
        fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(db_path)
            .with_context(|| format!("creating database file {}", db_path))?;
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );
    let kv = KeyValueStore::new(db);
    kv.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Pick backend implementations ---
    let (store, uploader, identity, local_assets): (
        Arc<dyn ItemStore>,
        Arc<dyn AssetUploader>,
        Arc<dyn IdentityProvider>,
        Option<LocalAssetUploader>,
    ) = match &cfg.backend {
        Backend::Local => {
            let assets = LocalAssetUploader::new(cfg.assets_dir());
            fs::create_dir_all(&assets.root)?;
            (
                Arc::new(LocalItemStore::new(kv.clone())),
                Arc::new(assets.clone()),
                Arc::new(LocalIdentity::new(
                    kv.clone(),
                    Duration::days(cfg.session_ttl_days),
                )),
                Some(assets),
            )
        }
        Backend::Remote(remote) => {
            let client = BackendClient::new(Arc::new(remote.clone()));
            (
                Arc::new(RemoteItemStore::new(client.clone())),
                Arc::new(RemoteAssetUploader::new(client.clone())),
                Arc::new(RemoteIdentity::new(client)),
                None,
            )
        }
    };
    tracing::info!(backend = store.backend_tag(), "backend selected");

    // --- Initialize core services ---
    let auth = Arc::new(AuthService::new(identity, kv.clone()));
    match auth.restore().await {
        Some(session) => tracing::info!(user = %session.user_id, "restored session"),
        None => tracing::info!("no active session"),
    }

    let sync = ItemSyncService::new(
        store,
        ImagePipeline::new(uploader, cfg.jpeg_quality),
        auth.clone(),
        cfg.image_failure_policy,
    );
    let view = CollectionViewModel::new(sync, cfg.locale);

    let app_state = state::AppState {
        config: cfg.clone(),
        kv,
        auth,
        view,
        local_assets,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(app_state);

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
    axum::serve(listener, app).await?;

    Ok(())
}
