use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use directories::ProjectDirs;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::require_api_key,
    config::VaultConfig,
    handlers::{control_link, create_link, health, sweep, view_link, view_link_with_password},
    store::{crypto, Store},
    vault::Vault,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer key for operator routes (`/api/sweep`). Unset ⇒ open.
    pub api_key: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub cors_origins: Option<String>,
    /// Take the requester address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that sets them.
    pub trust_forwarded: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("VANISH_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("VANISH_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            api_key: std::env::var("VANISH_API_KEY").ok().filter(|k| !k.is_empty()),
            data_dir: std::env::var("VANISH_DATA_DIR").ok().map(PathBuf::from),
            sweep_interval: Duration::from_secs(
                std::env::var("VANISH_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            cors_origins: std::env::var("VANISH_CORS_ORIGINS").ok(),
            trust_forwarded: std::env::var("VANISH_TRUST_PROXY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Resolve (and create) the data directory: the configured one, else the
/// platform data dir (`~/.local/share/vanish/`, etc.).
/// Public so the CLI's offline commands can reuse this logic.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match data_dir {
        Some(d) => d.clone(),
        None => ProjectDirs::from("", "", "vanish")
            .context("could not determine platform data directory")?
            .data_dir()
            .to_owned(),
    };
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir {}", path.display()))?;
    Ok(path)
}

/// Open the store in `data_dir` and build a [`Vault`] from environment
/// configuration and the persisted fingerprint salt.
pub fn open_vault(data_dir: &Path) -> Result<Vault> {
    let salt = crypto::load_or_create_salt(data_dir)?;
    let config = VaultConfig::from_env()?.with_fingerprint_salt(salt);
    let store = Store::open(&data_dir.join("vanish.db")).context("open store")?;
    Ok(Vault::new(store, config))
}

/// Routes without CORS or tracing layers.
pub fn router(state: AppState) -> Router {
    // Public routes: the identifier is the capability.
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/links", post(create_link))
        .route("/api/links/{id}", get(view_link).post(view_link_with_password))
        .route("/api/expire", post(control_link));

    // Operator routes (API key required if configured).
    let protected = Router::new()
        .route("/api/sweep", post(sweep))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let vault = open_vault(&data_dir)?;
    info!(records = vault.store().count()?, "store opened");

    vault.clone().spawn_sweep(cfg.sweep_interval);

    if cfg.api_key.is_none() {
        info!("VANISH_API_KEY not set; /api/sweep is open");
    }

    let state = AppState {
        vault,
        api_key: cfg.api_key,
        trust_forwarded: cfg.trust_forwarded,
    };

    let app = router(state)
        .layer(build_cors(cfg.cors_origins.as_deref()))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "vanish server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_data_dir_is_created() {
        let root = tempfile::tempdir().unwrap();
        let wanted = root.path().join("nested").join("vanish");
        let got = resolve_data_dir(Some(&wanted)).unwrap();
        assert_eq!(got, wanted);
        assert!(wanted.is_dir());
    }

    #[test]
    fn open_vault_persists_the_salt() {
        let dir = tempfile::tempdir().unwrap();
        let first = open_vault(dir.path()).unwrap().fingerprint("203.0.113.1");
        let second = open_vault(dir.path()).unwrap().fingerprint("203.0.113.1");
        assert_eq!(first, second);
        assert!(dir.path().join("vanish.salt").is_file());
    }
}
