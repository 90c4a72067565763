// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP + WebSocket broadcast server.
//!
//! Binds a single listener, enforces the single-instance discovery guard,
//! fans out accepted envelopes over topic-filtered WebSocket subscriptions,
//! and drains the voice playback queue on graceful shutdown.

mod bus;
mod error;
mod handlers;
mod voice;

pub use bus::EventBus;
pub use voice::{VoiceCatalog, VoiceNotifyRequest, VoicePhase, VoiceResolution, VoiceSkipReason};

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use oeb_discovery::Registry;
use oeb_store::EventStore;
use oeb_voice::{PlaybackQueue, QueueConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

/// Reject any request body over this size with 413.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Layered server configuration. Assembled by the daemon binary from
/// defaults, environment variables, and CLI flags, in that ascending
/// priority order.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub capacity: usize,
    pub persist_path: Option<PathBuf>,
    pub default_app: String,
    pub default_app_root: String,
    pub voice_enabled: bool,
    /// Well-known per-namespace directory backing both process discovery
    /// and the voice clip cache (under a `voice/` subdirectory).
    pub cache_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:0".parse().expect("valid default bind address"),
            capacity: oeb_store::DEFAULT_CAPACITY,
            persist_path: None,
            default_app: "oeb".to_string(),
            default_app_root: "/".to_string(),
            voice_enabled: true,
            cache_dir: std::env::temp_dir().join("observability-event-bus"),
        }
    }
}

/// Shared state reachable from every handler.
pub struct AppState {
    pub store: Arc<EventStore>,
    pub bus: EventBus,
    pub voice: Option<PlaybackQueue>,
    pub voice_catalog: VoiceCatalog,
    pub config: ServerConfig,
    pub nonce: String,
    pub started_at: Instant,
}

/// Failures that can prevent the server from starting or that terminate
/// an already-running `serve` call.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("another instance is already running on port {port}")]
    AlreadyRunning { port: u16 },
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("discovery registry error: {0}")]
    Discovery(#[from] oeb_discovery::DiscoveryError),
    #[error("failed to open event store: {0}")]
    Store(#[from] oeb_store::StoreError),
    #[error("server terminated: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build the Axum router. Exposed separately from [`serve`] so integration
/// tests can bind their own ephemeral listener against a hand-built state.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events/{name}", post(handlers::ingest_hook))
        .route(
            "/events",
            post(handlers::ingest_programmatic).get(handlers::query_events),
        )
        .route("/health", get(handlers::health))
        .route("/voice/notify", post(handlers::voice_notify))
        .route("/ws", get(handlers::ws_upgrade))
        .fallback(handlers::not_found)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list([HeaderValue::from_static("*")]))
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([axum::http::header::CONTENT_TYPE]))
}

/// Run the server to completion: check the single-instance guard, bind,
/// write the discovery triple, serve until SIGTERM/SIGINT, then drain the
/// voice queue and clear the triple.
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let registry = Registry::new(config.cache_dir.clone());

    if let Some(port) = registry.read_port() {
        return Err(ServerError::AlreadyRunning { port });
    }

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.bind,
            source,
        })?;
    let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
        addr: config.bind,
        source,
    })?;

    let instance = registry.acquire(local_addr.port())?;

    let store = Arc::new(EventStore::new(config.capacity, config.persist_path.clone())?);
    let voice = config
        .voice_enabled
        .then(|| PlaybackQueue::spawn(QueueConfig::default()));
    let voice_catalog = VoiceCatalog::new(config.cache_dir.join("voice"));

    let state = Arc::new(AppState {
        store,
        bus: EventBus::new(),
        voice,
        voice_catalog,
        config: config.clone(),
        nonce: instance.nonce().to_string(),
        started_at: Instant::now(),
    });

    let app = build_app(Arc::clone(&state));

    info!(bind = %local_addr, "oeb-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    if let Some(queue) = &state.voice {
        queue.stop().await;
    }
    instance.clear();
    info!("oeb-server shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_capacity_and_voice_enabled() {
        let config = ServerConfig::default();
        assert_eq!(config.capacity, oeb_store::DEFAULT_CAPACITY);
        assert!(config.voice_enabled);
    }
}
