//! # REST + WebSocket API
//!
//! Axum router over one [`Node`]. Every handler reads a snapshot through the
//! node's query methods; nothing here holds a lock across an await.
//!
//! ## Endpoints
//!
//! | Method | Path               | Description                            |
//! |--------|--------------------|----------------------------------------|
//! | GET    | `/health`          | Liveness probe                         |
//! | GET    | `/status`          | Node snapshot                          |
//! | GET    | `/chain`           | Full chain, genesis first              |
//! | GET    | `/blocks/:number`  | One block by number                    |
//! | GET    | `/history`         | Recent history lines, oldest first     |
//! | GET    | `/mempool`         | Pending transactions in arrival order  |
//! | POST   | `/transactions`    | Sign and broadcast `{recipient, data}` |
//! | POST   | `/mining/start`    | Start the miner                        |
//! | POST   | `/mining/stop`     | Stop the miner                         |
//! | GET    | `/ws`              | Live `NodeEvent` stream                |

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ember_protocol::network::{MempoolError, Node, NodeError, NodeSnapshot};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state of every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub node: Node,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/chain", get(chain_handler))
        .route("/blocks/:number", get(block_handler))
        .route("/history", get(history_handler))
        .route("/mempool", get(mempool_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/mining/start", post(start_mining_handler))
        .route("/mining/stop", post(stop_mining_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub node: NodeSnapshot,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTransactionRequest {
    pub recipient: String,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MiningResponse {
    /// Whether the miner runs after the call.
    pub mining: bool,
    /// Whether the call changed anything.
    pub changed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: state.version.clone(),
        node: state.node.snapshot(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn chain_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.chain_snapshot())
}

/// `GET /blocks/:number`: 404 past the tip.
async fn block_handler(Path(number): Path<u64>, State(state): State<AppState>) -> Response {
    match state.node.block(number) {
        Some(block) => Json(block).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("no block #{number}; tip is #{}", state.node.height()),
        ),
    }
}

async fn history_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.history())
}

async fn mempool_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.pending_transactions())
}

/// `POST /transactions`: sign with the node wallet, stage and broadcast.
async fn submit_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitTransactionRequest>,
) -> Response {
    if req.recipient.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "recipient must not be empty");
    }
    match state.node.submit_transaction(req.recipient, req.data) {
        Ok(tx) => (StatusCode::CREATED, Json(tx)).into_response(),
        Err(e @ NodeError::Mempool(MempoolError::Full { .. })) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e @ NodeError::Mempool(MempoolError::Duplicate { .. })) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn start_mining_handler(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.node.start_mining();
    Json(MiningResponse {
        mining: state.node.is_mining(),
        changed,
    })
}

async fn stop_mining_handler(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.node.stop_mining();
    Json(MiningResponse {
        mining: state.node.is_mining(),
        changed,
    })
}

/// `GET /ws`: push-only stream of JSON-encoded node events.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.node.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let payload = match serde_json::to_string(&event) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to serialize ws event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "ws subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                // Client messages are ignored.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}
