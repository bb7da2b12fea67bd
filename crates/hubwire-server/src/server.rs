//! `HubServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::rpc::chain::InterceptorChain;
use crate::rpc::context::HubContext;
use crate::rpc::dispatcher::Dispatcher;
use crate::rpc::registry::MethodRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::gateway::PushGateway;
use crate::websocket::session::{SessionConfig, run_ws_session};
use crate::websocket::table::ConnectionTable;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub table: Arc<ConnectionTable>,
    /// Invocation dispatcher.
    pub dispatcher: Arc<Dispatcher>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Per-session tunables.
    pub session: SessionConfig,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The hub server.
pub struct HubServer {
    config: ServerConfig,
    registry: Arc<MethodRegistry>,
    table: Arc<ConnectionTable>,
    gateway: Arc<PushGateway>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl HubServer {
    /// Create a server. The registry is frozen from here on.
    pub fn new(config: ServerConfig, registry: MethodRegistry) -> Self {
        let registry = Arc::new(registry);
        let table = Arc::new(ConnectionTable::new(config.max_connections));
        let gateway = Arc::new(PushGateway::new(Arc::clone(&table)));
        let hub = Arc::new(HubContext::new(Arc::clone(&gateway)));
        let start_time = hub.server_start_time;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            hub,
            InterceptorChain::new(config.handler_timeout()),
        ));
        Self {
            config,
            registry,
            table,
            gateway,
            dispatcher,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time,
        }
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            table: Arc::clone(&self.table),
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            session: SessionConfig::from(&self.config),
            max_message_size: self.config.max_message_size,
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

    /// Bind `host:port` and serve until the shutdown token is cancelled.
    ///
    /// Returns the bound address (port 0 auto-assigns) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
        });

        info!(%addr, methods = self.registry.len(), "hub server listening");
        Ok((addr, handle))
    }

    /// The push gateway.
    pub fn gateway(&self) -> &Arc<PushGateway> {
        &self.gateway
    }

    /// The connection table.
    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }
}

/// GET /ws
///
/// Capacity is checked before the upgrade is validated so a full server
/// always answers 503.
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.table.is_full() {
        warn!(
            max = state.table.max_connections(),
            "connection limit reached, refusing upgrade"
        );
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let AppState {
        table,
        dispatcher,
        shutdown,
        session,
        max_message_size,
        ..
    } = state;
    upgrade
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            // Sessions run on their own task so graceful shutdown can join them.
            let token = shutdown.token();
            let handle = tokio::spawn(run_ws_session(socket, table, dispatcher, session, token));
            shutdown.track(handle);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.table.len(),
        state.dispatcher.registry().len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
