//! `GatewayServer`: Axum HTTP + WebSocket listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{Json, Response};
use axum::routing::get;
use courier_settings::{ConnectionSettings, ServerSettings};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::bridge::BridgeStatus;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::{ConnectionContext, serve_connection};
use crate::websocket::registry::RegistryHandle;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handed to every accepted connection.
    pub connection: ConnectionContext,
    /// Event bridge health.
    pub bridge: BridgeStatus,
    /// Tracks every upgraded connection for shutdown.
    pub connections: TaskTracker,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for rendering `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The gateway's HTTP side.
pub struct GatewayServer {
    config: ServerSettings,
    connection: Arc<ConnectionSettings>,
    registry: RegistryHandle,
    bridge: BridgeStatus,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl GatewayServer {
    /// Create a new server around a running registry.
    pub fn new(
        config: ServerSettings,
        connection: ConnectionSettings,
        registry: RegistryHandle,
        bridge: BridgeStatus,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            connection: Arc::new(connection),
            registry,
            bridge,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            connection: ConnectionContext {
                registry: self.registry.clone(),
                settings: Arc::clone(&self.connection),
                shutdown: self.shutdown.token(),
            },
            bridge: self.bridge.clone(),
            connections: self.shutdown.connections().clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let shutdown = self.shutdown.token();

        info!(%addr, "gateway listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Registry handle.
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Listener settings.
    pub fn config(&self) -> &ServerSettings {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max = state.connection.settings.max_frame_size;
    let tracker = state.connections;
    let connection = state.connection;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_failed_upgrade(|e: axum::Error| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| tracker.track_future(serve_connection(socket, connection)))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.connection.registry.connection_count().await;
    Json(health::health_check(
        state.start_time,
        connections,
        state.bridge.snapshot(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}
