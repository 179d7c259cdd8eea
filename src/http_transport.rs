use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware,
    response::{sse::Event, sse::KeepAlive, sse::Sse, IntoResponse, Response as AxumResponse},
    routing::{get, post},
    Json, Router,
};
use dashmap::DashMap;
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

use crate::handlers::oauth_handler::oauth_routes;
use crate::mcp::error_codes;
use crate::mcp::types::{ErrorObject, Request as McpRequest, Response as McpResponse};
use crate::middleware::secure_headers_middleware::secure_headers_middleware;
use crate::server::Server;
use crate::session_tokens::SessionId;

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

const SSE_REQUEST_QUEUE: usize = 16;
const SSE_EVENT_BUFFER: usize = 100;

// Shared state for the Axum application
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<Server>,
    pub active_connections: Arc<DashMap<SessionId, mpsc::Sender<String>>>,
}

impl AppState {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            active_connections: Arc::new(DashMap::new()),
        }
    }
}

/// Full remote-mode router: MCP endpoints, OAuth endpoints and health check.
pub fn build_router(app_state: AppState) -> Router {
    let redirect_path = app_state.server.config().oauth.redirect_path.clone();
    Router::new()
        .route("/mcp", post(mcp_handler))
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .route("/health", get(health_handler))
        .merge(oauth_routes(&redirect_path))
        .layer(middleware::from_fn(secure_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Router for the local-mode callback listener: OAuth endpoints and health only.
pub fn build_oauth_router(app_state: AppState) -> Router {
    let redirect_path = app_state.server.config().oauth.redirect_path.clone();
    Router::new()
        .route("/health", get(health_handler))
        .merge(oauth_routes(&redirect_path))
        .layer(middleware::from_fn(secure_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub async fn run_http_server(server: Arc<Server>) -> anyhow::Result<()> {
    let addr = server.config().bind_address.clone();
    let app = build_router(AppState::new(server));

    info!(address = %addr, "MCP HTTP server listening (/mcp, SSE on /sse, POST on /message)");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub async fn run_oauth_listener(server: Arc<Server>, addr: &str) -> anyhow::Result<()> {
    let app = build_oauth_router(AppState::new(server));

    info!(address = %addr, "OAuth callback listener started");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler(State(app_state): State<AppState>) -> impl IntoResponse {
    let sessions = app_state.server.sessions().session_count().await.unwrap_or(0);
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": app_state.server.config().version,
            "authorized_sessions": sessions,
        })),
    )
}

fn json_rpc_error(
    status: StatusCode,
    error: ErrorObject,
    id: Option<serde_json::Value>,
) -> AxumResponse {
    (status, Json(McpResponse::error(error, id))).into_response()
}

/// Streamable HTTP endpoint. The `Mcp-Session-Id` header carries the session;
/// `initialize` without one is issued a fresh session.
#[instrument(skip_all)]
async fn mcp_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AxumResponse {
    let request = match serde_json::from_slice::<McpRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to parse MCP request body");
            return json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorObject::new(error_codes::PARSE_ERROR, format!("Failed to parse request: {e}")),
                None,
            );
        }
    };

    let header_session = headers
        .get(MCP_SESSION_ID_HEADER)
        .map(|value| value.to_str().ok().and_then(SessionId::parse));
    let (session, issued) = match header_session {
        Some(Some(session)) => (session, false),
        Some(None) => {
            return json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorObject::new(error_codes::INVALID_REQUEST, "Malformed Mcp-Session-Id header"),
                request.id,
            );
        }
        None if request.method == "initialize" => (SessionId::new(), true),
        None => {
            return json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorObject::new(
                    error_codes::SESSION_REQUIRED,
                    "Missing Mcp-Session-Id header; call initialize first",
                ),
                request.id,
            );
        }
    };

    let is_notification = request.is_notification();
    let request_id = request.id.clone();
    let result = app_state.server.handle_request(request, Some(&session)).await;

    let response = match result {
        _ if is_notification => return StatusCode::ACCEPTED.into_response(),
        Ok(Some(value)) => McpResponse::success(value, request_id),
        Ok(None) => return StatusCode::ACCEPTED.into_response(),
        Err(error) => McpResponse::error(error, request_id),
    };

    let mut http_response = (StatusCode::OK, Json(response)).into_response();
    if issued {
        info!(session_id = %session, "Issued new MCP session");
        match HeaderValue::from_str(session.as_str()) {
            Ok(value) => {
                http_response
                    .headers_mut()
                    .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), value);
            }
            Err(e) => error!(error = %e, "Session id is not a valid header value"),
        }
    }
    http_response
}

// RAII guard to ensure connection cleanup from DashMap
struct ConnectionGuard {
    session_id: SessionId,
    active_connections: Arc<DashMap<SessionId, mpsc::Sender<String>>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        info!(session_id = %self.session_id, "Removing SSE session from active list.");
        self.active_connections.remove(&self.session_id);
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[instrument(skip_all)]
async fn sse_handler(State(app_state): State<AppState>) -> Sse<EventStream> {
    let session_id = SessionId::new();
    info!(%session_id, "New SSE connection (/sse), establishing session.");

    let (client_request_tx, mut client_request_rx) = mpsc::channel::<String>(SSE_REQUEST_QUEUE);
    let (sse_event_tx, _) = broadcast::channel::<String>(SSE_EVENT_BUFFER);

    app_state
        .active_connections
        .insert(session_id.clone(), client_request_tx);

    let server = Arc::clone(&app_state.server);
    let task_events = sse_event_tx.clone();
    let guard = ConnectionGuard {
        session_id: session_id.clone(),
        active_connections: Arc::clone(&app_state.active_connections),
    };

    let task_session = session_id.clone();
    tokio::spawn(async move {
        let session_id = task_session;
        while let Some(request_str) = client_request_rx.recv().await {
            if let Some(response_str) = server
                .process_json_rpc_request_str(&request_str, Some(&session_id))
                .await
            {
                if let Err(e) = task_events.send(response_str) {
                    warn!(
                        %session_id,
                        error = %e,
                        "Failed to send to SSE broadcast. Client likely disconnected."
                    );
                    break;
                }
            }
        }
        info!(%session_id, "Exiting SSE session processing task.");
    });

    let endpoint = format!(
        "{}/message?sessionId={}",
        app_state.server.config().public_url.trim_end_matches('/'),
        session_id
    );
    let mut sse_broadcast_rx = sse_event_tx.subscribe();
    let response_stream = async_stream::stream! {
        // Dropping the stream removes the session and ends the processing task.
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint));

        loop {
            match sse_broadcast_rx.recv().await {
                Ok(response_json_str) => {
                    yield Ok(Event::default().event("message").data(response_json_str));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(%session_id, count = n, "SSE stream lagged. Some messages missed.");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!(%session_id, "SSE broadcast channel closed. Ending SSE stream.");
                    break;
                }
            }
        }
    };

    Sse::new(Box::pin(response_stream) as EventStream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

#[derive(Deserialize, Debug)]
struct MessageParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[instrument(skip(app_state, body))]
async fn message_handler(
    State(app_state): State<AppState>,
    Query(query_params): Query<MessageParams>,
    body: Bytes,
) -> AxumResponse {
    let Some(session_id) = SessionId::parse(&query_params.session_id) else {
        return json_rpc_error(
            StatusCode::BAD_REQUEST,
            ErrorObject::new(error_codes::INVALID_REQUEST, "Malformed sessionId"),
            None,
        );
    };

    let body = match String::from_utf8(body.to_vec()) {
        Ok(body) => body,
        Err(_) => {
            return json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorObject::new(
                    error_codes::PARSE_ERROR,
                    "Parse error: Invalid UTF-8 in request body",
                ),
                None,
            );
        }
    };

    let request_id = match serde_json::from_str::<McpRequest>(&body) {
        Ok(request) => request.id,
        Err(e) => {
            warn!(%session_id, error = %e, "Failed to parse body as MCP request");
            return json_rpc_error(
                StatusCode::BAD_REQUEST,
                ErrorObject::new(
                    error_codes::PARSE_ERROR,
                    "Parse error: Invalid JSON request structure",
                ),
                None,
            );
        }
    };

    let Some(client_tx) = app_state
        .active_connections
        .get(&session_id)
        .map(|entry| entry.value().clone())
    else {
        warn!(%session_id, "SSE session not found");
        return json_rpc_error(
            StatusCode::NOT_FOUND,
            ErrorObject::new(error_codes::SESSION_REQUIRED, "Session ID not found or expired"),
            request_id,
        );
    };

    match client_tx.try_send(body) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%session_id, "Request queue full");
            json_rpc_error(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorObject::new(error_codes::INTERNAL_ERROR, "Server busy, request queue full"),
                request_id,
            )
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(%session_id, "Session no longer active");
            app_state.active_connections.remove(&session_id);
            json_rpc_error(
                StatusCode::GONE,
                ErrorObject::new(error_codes::SESSION_REQUIRED, "Session no longer active"),
                request_id,
            )
        }
    }
}
