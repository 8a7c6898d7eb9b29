use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use argus_core::BroadcastMessage;
use argus_store::Database;

use crate::client::{self, ClientRegistry};
use crate::event_bridge;
use crate::handlers::{self, HandlerState};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub request_timeout_secs: u64,
    /// Dashboard origins allowed by CORS. Empty means permissive (dev mode).
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_send_queue: 256,
            request_timeout_secs: 60,
            allowed_origins: vec![
                "http://localhost:5173".into(),
                "http://localhost:3000".into(),
            ],
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
    pub event_tx: broadcast::Sender<BroadcastMessage>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(handlers::liveness))
        .route("/health/ready", get(handlers::readiness))
        .route("/health/ws", get(handlers::ws_health))
        .route("/api/v1/events", post(handlers::ingest_event))
        .route("/api/v1/metrics/overview", get(handlers::metrics_overview))
        .route("/api/v1/metrics/tool-calls", get(handlers::metrics_tool_calls))
        .route("/api/v1/metrics/latency", get(handlers::metrics_latency))
        .route("/api/v1/metrics/token-usage", get(handlers::metrics_token_usage))
        .route("/api/v1/metrics/failure-rate", get(handlers::metrics_failure_rate))
        .route("/api/v1/tool-calls/recent", get(handlers::recent_tool_calls))
        .route("/api/v1/tool-calls/chains/{request_id}", get(handlers::tool_call_chain))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.allowed_origins))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::ACCEPT, header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(Duration::from_secs(300))
    }
}

/// Create and start the server. Returns a handle that keeps the background
/// tasks (serve loop, event bridge, dead-client cleanup) alive.
pub async fn start(
    config: ServerConfig,
    db: Database,
    event_tx: broadcast::Sender<BroadcastMessage>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    // Start event bridge
    let bridge_rx = event_tx.subscribe();
    let bridge_handle = event_bridge::create_bridge(Arc::clone(&client_registry), bridge_rx);

    // Start dead-client cleanup task (every 60s)
    let cleanup_handle = client::start_cleanup_task(
        Arc::clone(&client_registry),
        Duration::from_secs(60),
    );

    let app_state = AppState {
        handler_state: Arc::new(HandlerState::new(db)),
        client_registry: Arc::clone(&client_registry),
        event_tx,
    };

    let router = build_router(app_state, &config);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "argus server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _bridge: bridge_handle,
        _cleanup: cleanup_handle,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler. A failed handshake is answered by axum and
/// never touches hub state.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a new WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx, cancel) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    client::handle_ws_connection(socket, client_id, rx, cancel, state.client_registry).await;
}
