// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Emission Cache Server - caching proxy for electricity emission estimates.
//!
//! Lookups are forwarded to the Climatiq `/estimate` API and the responses
//! are cached in Redis for one hour.
//!
//! # Endpoints
//!
//! - `GET /` - API information
//! - `GET /health` - Health check
//! - `GET /emission/electricity/:region/:energy` - Emission estimate (`source` is `cache` or `api`)

use anyhow::Context;
use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod routes;
mod services;
mod types;

use config::{CacheBackend, Config};
use services::{CacheStore, ClimatiqClient, MemoryCache, OriginClient, RedisCache};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn CacheStore>,
    pub origin: Arc<dyn OriginClient>,
    pub config: Arc<Config>,
}

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let cors = cors_layer(&state.config);

    Router::new()
        // Root endpoint - API information
        .route("/", get(routes::health::info))
        // Health check
        .route("/health", get(routes::health::check))
        // Emission lookups
        .route(
            "/emission/electricity/:region/:energy",
            get(routes::emission::get_electricity),
        )
        // Middleware
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_allow_any() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
        .allow_headers(Any)
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,emission_cache_server=debug"));

    if config.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
    }
}

fn build_cache(config: &Config) -> anyhow::Result<Arc<dyn CacheStore>> {
    Ok(match config.cache_backend {
        CacheBackend::Redis => Arc::new(
            RedisCache::new(&config.redis_url()).context("Failed to configure Redis cache")?,
        ),
        CacheBackend::Memory => {
            tracing::warn!("Using in-process memory cache; entries are not shared between instances");
            Arc::new(MemoryCache::new())
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(&config);

    tracing::info!(
        port = config.port,
        cache_backend = ?config.cache_backend,
        redis_host = %config.redis_host,
        cache_ttl_secs = config.cache_ttl_secs,
        upstream = %config.climatiq_base_url,
        upstream_timeout_secs = config.upstream_timeout_secs,
        "Starting Emission Cache Server"
    );

    if config.climatiq_api_key.is_empty() {
        tracing::warn!("CLIMATIQ_API_KEY is not set; upstream requests will be rejected");
    }

    let cache = build_cache(&config)?;
    let origin: Arc<dyn OriginClient> =
        Arc::new(ClimatiqClient::new(&config).context("Failed to build upstream client")?);

    let state = AppState {
        cache,
        origin,
        config: Arc::new(config.clone()),
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}
