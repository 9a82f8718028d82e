use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use drover_core::events::FleetEvent;
use drover_engine::Fleet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientId, ClientRegistry};
use crate::event_bridge;
use crate::handlers::HandlerState;
use crate::rpc::{RpcRequest, RpcResponse};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Outbound frames buffered per client before frames are dropped.
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub client_registry: Arc<ClientRegistry>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind the listener and start serving. The returned handle stops the server
/// and its background tasks on [`ServerHandle::shutdown`].
pub async fn start(config: ServerConfig, fleet: Fleet) -> Result<ServerHandle, std::io::Error> {
    let cancel = CancellationToken::new();
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    let bridge = event_bridge::create_bridge(Arc::clone(&client_registry), fleet.subscribe());
    let cleanup = client::start_cleanup_task(Arc::clone(&client_registry), CLEANUP_INTERVAL, cancel.clone());

    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let handler_state = Arc::new(HandlerState::new(fleet));
    let rpc = tokio::spawn(process_rpc_messages(
        msg_rx,
        Arc::clone(&handler_state),
        Arc::clone(&client_registry),
    ));

    let router = build_router(AppState {
        handler_state,
        client_registry,
        message_tx: msg_tx,
    });
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "control server listening");

    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "control server failed");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        cancel,
        tasks: vec![server, bridge, rpc, cleanup],
    })
}

/// Keeps the server's tasks alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting connections and end background tasks.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// A new client gets the current status before anything else.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "control client connected");

    let status = FleetEvent::Status(state.handler_state.fleet.status());
    if let Some(json) = event_bridge::serialize_event(&status) {
        state.client_registry.send_to(&client_id, json);
    }

    client::handle_ws_connection(socket, client_id, rx, state.client_registry, state.message_tx).await;
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.handler_state.fleet.status();
    axum::Json(serde_json::json!({
        "status": "healthy",
        "agents": status.count,
        "active": status.active,
    }))
}

async fn process_rpc_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    state: Arc<HandlerState>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw_message)) = rx.recv().await {
        let request: RpcRequest = match serde_json::from_str(&raw_message) {
            Ok(req) => req,
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "unparseable control frame");
                reply(&registry, &client_id, &RpcResponse::parse_error());
                continue;
            }
        };

        let params = request.params.unwrap_or(serde_json::Value::Null);
        if let Some(response) = crate::handlers::dispatch(&state, &request.method, &params, request.id).await {
            reply(&registry, &client_id, &response);
        }
    }
}

fn reply(registry: &ClientRegistry, client_id: &ClientId, response: &RpcResponse) {
    if let Ok(json) = serde_json::to_string(response) {
        registry.send_to(client_id, json);
    }
}
