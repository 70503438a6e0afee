mod admin;
mod api;
mod config;
mod manifest;
mod resolver;
mod songs;
mod state;
mod streaming;
mod utils;

use std::sync::Arc;

use admin::admin_router;
use api::api_router;
use axum::Router;
use catalog::{RedbSongStore, SongStore, UnavailableStore};
use config::{config_path_from_env, load_or_create_config, resolve_path};
use state::AppState;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    if config.admin_token.trim().is_empty() {
        warn!("admin_token is empty; admin routes are disabled.");
    }

    let db_path = resolve_path(&config_path, &config.db_path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let songs: Arc<dyn SongStore> = match RedbSongStore::open(&db_path) {
        Ok(store) => {
            info!("Opened song catalog at {:?}", db_path);
            Arc::new(store)
        }
        Err(err) => {
            warn!("Song catalog unavailable ({:?}): {}", db_path, err);
            Arc::new(UnavailableStore::new(err.to_string()))
        }
    };

    let bind_addr = config.bind_addr();
    let state = AppState::new(&config_path, config, songs);
    let paths = state.resolver.paths();
    for dir in [&paths.songs_root(), &paths.upload_folder] {
        if let Err(err) = std::fs::create_dir_all(dir) {
            warn!("Failed to create media directory {:?}: {}", dir, err);
        }
    }

    let app = Router::new()
        .nest("/api/v1", api_router(state.clone()))
        .nest("/admin", admin_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
