use crate::auth::{AuthClient, AuthClientOperations};
use crate::config::ServerConfig;
use crate::fulcra::{FulcraApi, FulcraApiError, HttpFulcraClient};
use crate::handlers::initialize::handle_initialize;
use crate::handlers::ping::handle_ping;
use crate::handlers::resources::{handle_resources_list, handle_resources_read};
use crate::handlers::tool::{get_tool_definitions, handle_tools_call};
use crate::mcp::error_codes;
use crate::mcp::types::{
    CallToolParams, ErrorObject, InitializeParams, InitializedNotificationParams,
    ListResourcesParams, ListToolsParams, ListToolsResult, PingParams, ReadResourceParams, Request,
    Response,
};
use crate::session_tokens::{
    InMemorySessionTokenStore, SessionId, SessionTokenStore, TokenPair, TokenStoreError,
};
use anyhow::{Context, Result};
use dashmap::DashMap;
use oauth2::AccessToken;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Failures of a tool or resource call. These are reported to the client as
/// tool results (or JSON-RPC errors for resources) and never carry token
/// material.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("This session is not connected to a Fulcra account. Authorize access at {authorize_link} and then retry.")]
    NotAuthorized { authorize_link: String },
    #[error("No MCP session is associated with this request")]
    SessionRequired,
    #[error("The Fulcra session expired and could not be renewed. Authorize again at {authorize_link}")]
    RefreshFailed { authorize_link: String },
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("Tool '{0}' not found or not callable via tools/call")]
    UnknownTool(String),
    #[error(transparent)]
    Upstream(#[from] FulcraApiError),
    #[error("Session store error: {0}")]
    Store(#[from] TokenStoreError),
}

impl ToolError {
    pub fn code(&self) -> i64 {
        match self {
            ToolError::NotAuthorized { .. } => error_codes::NOT_AUTHORIZED,
            ToolError::SessionRequired => error_codes::SESSION_REQUIRED,
            ToolError::RefreshFailed { .. } => error_codes::TOKEN_REFRESH_FAILED,
            ToolError::InvalidArguments { .. } => error_codes::INVALID_PARAMS,
            ToolError::UnknownTool(_) => error_codes::METHOD_NOT_FOUND,
            ToolError::Upstream(_) => error_codes::UPSTREAM_API_FAILED,
            ToolError::Store(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let error = ErrorObject::new(self.code(), self.to_string());
        match self {
            ToolError::NotAuthorized { authorize_link }
            | ToolError::RefreshFailed { authorize_link } => {
                error.with_data(json!({ "authorize_url": authorize_link }))
            }
            _ => error,
        }
    }
}

pub struct Server {
    config: Arc<ServerConfig>,
    sessions: Arc<dyn SessionTokenStore>,
    auth_client: Arc<dyn AuthClientOperations>,
    fulcra: Arc<dyn FulcraApi>,
    // One refresh at a time per session; refresh tokens may rotate.
    refresh_locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl Server {
    pub fn new(
        config: Arc<ServerConfig>,
        sessions: Arc<dyn SessionTokenStore>,
        auth_client: Arc<dyn AuthClientOperations>,
        fulcra: Arc<dyn FulcraApi>,
    ) -> Self {
        Self {
            config,
            sessions,
            auth_client,
            fulcra,
            refresh_locks: DashMap::new(),
        }
    }

    /// Builds a server with the OAuth client, Fulcra HTTP client and an empty
    /// in-memory token store.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let auth_client = AuthClient::new(config.oauth.clone(), config.redirect_uri())
            .context("Failed to build OAuth client")?;
        let fulcra = HttpFulcraClient::new(&config.fulcra_api_url, config.request_timeout())
            .context("Failed to build Fulcra API client")?;

        Ok(Self::new(
            Arc::new(config),
            Arc::new(InMemorySessionTokenStore::new()),
            Arc::new(auth_client),
            Arc::new(fulcra),
        ))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn sessions(&self) -> Arc<dyn SessionTokenStore> {
        Arc::clone(&self.sessions)
    }

    pub fn auth_client(&self) -> Arc<dyn AuthClientOperations> {
        Arc::clone(&self.auth_client)
    }

    pub fn fulcra(&self) -> &dyn FulcraApi {
        self.fulcra.as_ref()
    }

    pub fn not_authorized(&self, session: &SessionId) -> ToolError {
        ToolError::NotAuthorized {
            authorize_link: self.config.authorize_link(session),
        }
    }

    /// Returns a usable access token for `session`, refreshing it when it is
    /// within the configured skew of expiring.
    #[instrument(skip(self))]
    pub async fn access_token(
        &self,
        session: Option<&SessionId>,
    ) -> Result<AccessToken, ToolError> {
        let session = session.ok_or(ToolError::SessionRequired)?;
        let tokens = self.current_tokens(session).await?;
        if !tokens.expires_within(self.config.refresh_skew()) {
            return Ok(tokens.access_token().clone());
        }

        let lock = self.refresh_lock(session);
        let _guard = lock.lock().await;

        // Another request may have refreshed while this one waited.
        let tokens = self.current_tokens(session).await?;
        if !tokens.expires_within(self.config.refresh_skew()) {
            debug!(session_id = %session, "Token already refreshed by a concurrent request");
            return Ok(tokens.access_token().clone());
        }

        let Some(refresh_token) = tokens.refresh_token() else {
            if tokens.is_expired() {
                info!(
                    session_id = %session,
                    "Access token expired and no refresh token is available"
                );
                self.drop_session(session).await?;
                return Err(self.not_authorized(session));
            }
            return Ok(tokens.access_token().clone());
        };

        match self.auth_client.refresh(refresh_token).await {
            Ok(refreshed) => {
                let access_token = refreshed.access_token().clone();
                self.sessions.update_tokens(session, refreshed).await?;
                info!(session_id = %session, "Refreshed access token");
                Ok(access_token)
            }
            Err(e) if tokens.is_expired() => {
                warn!(
                    session_id = %session,
                    error = %e,
                    "Token refresh failed; dropping session tokens"
                );
                self.drop_session(session).await?;
                Err(ToolError::RefreshFailed {
                    authorize_link: self.config.authorize_link(session),
                })
            }
            Err(e) => {
                warn!(
                    session_id = %session,
                    error = %e,
                    "Token refresh failed; using current token until it expires"
                );
                Ok(tokens.access_token().clone())
            }
        }
    }

    async fn current_tokens(&self, session: &SessionId) -> Result<TokenPair, ToolError> {
        self.sessions
            .get_tokens(session)
            .await?
            .ok_or_else(|| self.not_authorized(session))
    }

    fn refresh_lock(&self, session: &SessionId) -> Arc<Mutex<()>> {
        Arc::clone(self.refresh_locks.entry(session.clone()).or_default().value())
    }

    async fn drop_session(&self, session: &SessionId) -> Result<(), ToolError> {
        self.sessions.remove_session(session).await?;
        self.refresh_locks.remove(session);
        Ok(())
    }

    /// Serves newline-delimited JSON-RPC on stdin/stdout for `session`.
    pub async fn run_stdio(&self, session: SessionId) -> Result<()> {
        info!(session_id = %session, "MCP server reading from stdin and writing to stdout.");
        let reader = BufReader::new(tokio::io::stdin());
        let writer = BufWriter::new(tokio::io::stdout());
        self.serve_lines(reader, writer, &session).await
    }

    pub async fn serve_lines<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        session: &SessionId,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line_buf = String::new();

        loop {
            line_buf.clear();
            let read = reader.read_line(&mut line_buf).await.context("Error reading from stdin")?;
            if read == 0 {
                info!("Stdin closed, shutting down.");
                break;
            }

            let trimmed_line = line_buf.trim();
            if trimmed_line.is_empty() {
                continue;
            }
            debug!(bytes = trimmed_line.len(), "Received request");

            if let Some(response_json) = self
                .process_json_rpc_request_str(trimmed_line, Some(session))
                .await
            {
                writer
                    .write_all(response_json.as_bytes())
                    .await
                    .context("Failed to write response")?;
                writer.write_all(b"\n").await.context("Failed to write newline")?;
                writer.flush().await.context("Failed to flush output")?;
            }
        }

        Ok(())
    }

    #[instrument(
        skip(self, request, session),
        fields(request_id = ?request.id, method = %request.method)
    )]
    pub async fn handle_request(
        &self,
        request: Request,
        session: Option<&SessionId>,
    ) -> Result<Option<Value>, ErrorObject> {
        if request.jsonrpc != "2.0" {
            return Err(ErrorObject::new(error_codes::INVALID_REQUEST, "Invalid jsonrpc version"));
        }

        match request.method.as_str() {
            "initialize" => {
                let params: InitializeParams = deserialize_params(request.params, "initialize")?;
                let result = handle_initialize(params, &self.config.version).await?;
                ok_some(result)
            }
            "initialized" | "notifications/initialized" => {
                let _params: InitializedNotificationParams =
                    deserialize_params(request.params, "initialized")?;
                info!("Received initialized notification");
                Ok(None)
            }
            "ping" => {
                let params: PingParams = deserialize_params(request.params, "ping")?;
                let result = handle_ping(params).await?;
                ok_some(result)
            }
            "tools/list" => {
                let _params: ListToolsParams = deserialize_params(request.params, "tools/list")?;
                ok_some(ListToolsResult {
                    tools: get_tool_definitions(),
                })
            }
            "tools/call" => {
                let params: CallToolParams = deserialize_params(request.params, "tools/call")?;
                handle_tools_call(params, self, session).await
            }
            "resources/list" => {
                let params: ListResourcesParams =
                    deserialize_params(request.params, "resources/list")?;
                let result = handle_resources_list(params).await?;
                ok_some(result)
            }
            "resources/read" => {
                let params: ReadResourceParams =
                    deserialize_params(request.params, "resources/read")?;
                let result = handle_resources_read(params, self, session).await?;
                ok_some(result)
            }
            method if method.starts_with("notifications/") => {
                debug!(method, "Ignoring notification");
                Ok(None)
            }
            _ => Err(ErrorObject::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            )),
        }
    }

    /// Processes a raw JSON-RPC request string and returns the serialized
    /// response, or `None` for notifications.
    pub async fn process_json_rpc_request_str(
        &self,
        json_request_str: &str,
        session: Option<&SessionId>,
    ) -> Option<String> {
        let request = match serde_json::from_str::<Request>(json_request_str) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Failed to parse JSON-RPC request");
                let err_obj = ErrorObject::new(
                    error_codes::PARSE_ERROR,
                    format!("Failed to parse request: {e}"),
                );
                return Some(serialize_response(&Response::error(err_obj, None)));
            }
        };

        let is_notification = request.is_notification();
        let request_id = request.id.clone();
        let response = match self.handle_request(request, session).await {
            Ok(Some(result)) => Response::success(result, request_id),
            Ok(None) => return None,
            Err(error_object) => Response::error(error_object, request_id),
        };

        if is_notification {
            debug!("Dropping response to notification");
            return None;
        }
        Some(serialize_response(&response))
    }
}

pub fn serialize_response(response: &Response) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize response");
        format!(
            "{{\"jsonrpc\":\"2.0\",\"error\":{{\"code\":{},\"message\":\"Failed to serialize response\"}},\"id\":null}}",
            error_codes::INTERNAL_ERROR
        )
    })
}

pub fn deserialize_params<T: serde::de::DeserializeOwned + Default>(
    params: Option<Value>,
    method_name: &str,
) -> Result<T, ErrorObject> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(p) => deserialize_value(p, method_name),
    }
}

pub fn deserialize_value<T: serde::de::DeserializeOwned>(
    value: Value,
    method_name: &str,
) -> Result<T, ErrorObject> {
    serde_json::from_value(value).map_err(|e| {
        ErrorObject::new(
            error_codes::INVALID_PARAMS,
            format!("Invalid params/arguments for {method_name}: {e}"),
        )
    })
}

pub fn ok_some<T: serde::Serialize>(value: T) -> Result<Option<Value>, ErrorObject> {
    serde_json::to_value(value)
        .map_err(|e| {
            ErrorObject::new(
                error_codes::INTERNAL_ERROR,
                format!("Failed to serialize result: {e}"),
            )
        })
        .map(Some)
}

/// Local mode: one session for the single stdio client, plus the OAuth
/// callback listener on the loopback address.
pub async fn run_local(server: Arc<Server>) -> Result<()> {
    let session = SessionId::new();
    info!(
        session_id = %session,
        authorize_url = %server.config().authorize_link(&session),
        "Open the authorize URL in a browser to connect your Fulcra account"
    );

    let callback_addr = server.config().callback_bind_address.clone();
    let listener_server = Arc::clone(&server);
    let listener = tokio::spawn(async move {
        if let Err(e) =
            crate::http_transport::run_oauth_listener(listener_server, &callback_addr).await
        {
            error!(error = %e, "OAuth callback listener stopped");
        }
    });

    let result = server.run_stdio(session).await;
    listener.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, MockAuthClientOperations};
    use crate::fulcra::MockFulcraApi;
    use std::time::Duration;

    fn server_with(
        auth: MockAuthClientOperations,
        sessions: Arc<InMemorySessionTokenStore>,
    ) -> Server {
        Server::new(
            Arc::new(ServerConfig::default()),
            sessions,
            Arc::new(auth),
            Arc::new(MockFulcraApi::new()),
        )
    }

    fn idle_server() -> Server {
        server_with(
            MockAuthClientOperations::new(),
            Arc::new(InMemorySessionTokenStore::new()),
        )
    }

    fn token_pair(access: &str, refresh: &str, lifetime_secs: u64) -> TokenPair {
        TokenPair::new(
            access,
            Some(refresh.to_string()),
            Some(Duration::from_secs(lifetime_secs)),
        )
    }

    fn request(method: &str, params: Option<Value>, id: Option<Value>) -> Request {
        Request {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id,
        }
    }

    #[tokio::test]
    async fn test_rejects_wrong_jsonrpc_version() {
        let server = idle_server();
        let mut req = request("ping", None, Some(json!(1)));
        req.jsonrpc = "1.0".to_string();
        let err = server.handle_request(req, None).await.unwrap_err();
        assert_eq!(err.code, error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = idle_server();
        let err = server
            .handle_request(request("does/not/exist", None, Some(json!(1))), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_produce_no_response() {
        let server = idle_server();
        let out = server
            .process_json_rpc_request_str(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                None,
            )
            .await;
        assert!(out.is_none());
        let out = server
            .process_json_rpc_request_str(
                r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{}}"#,
                None,
            )
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_parse_error_response() {
        let server = idle_server();
        let out = server.process_json_rpc_request_str("{not json", None).await.unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["error"]["code"], error_codes::PARSE_ERROR);
        assert_eq!(value["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_access_token_without_session_entry_links_to_authorize() {
        let server = idle_server();
        let session = SessionId::new();
        let err = server.access_token(Some(&session)).await.unwrap_err();
        match err {
            ToolError::NotAuthorized { authorize_link } => {
                assert_eq!(
                    authorize_link,
                    format!("http://localhost:4449/oauth/authorize?session_id={session}")
                );
            }
            other => panic!("Expected NotAuthorized, got {other:?}"),
        }
        assert!(matches!(server.access_token(None).await, Err(ToolError::SessionRequired)));
    }

    #[tokio::test]
    async fn test_fresh_token_is_used_without_refresh() {
        let sessions = Arc::new(InMemorySessionTokenStore::new());
        let session = SessionId::new();
        sessions
            .store_tokens(&session, token_pair("access-1", "refresh-1", 3600))
            .await
            .unwrap();
        let mut auth = MockAuthClientOperations::new();
        auth.expect_refresh().never();

        let server = server_with(auth, sessions);
        let token = server.access_token(Some(&session)).await.unwrap();
        assert_eq!(token.secret(), "access-1");
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_stored() {
        let sessions = Arc::new(InMemorySessionTokenStore::new());
        let session = SessionId::new();
        sessions
            .store_tokens(&session, token_pair("access-old", "refresh-1", 5))
            .await
            .unwrap();
        let mut auth = MockAuthClientOperations::new();
        auth.expect_refresh()
            .withf(|rt| rt.secret() == "refresh-1")
            .times(1)
            .returning(|rt| {
                let refreshed = TokenPair::new("access-new", None, Some(Duration::from_secs(3600)));
                Ok(refreshed.or_refresh_token(rt))
            });

        let server = server_with(auth, Arc::clone(&sessions));
        let token = server.access_token(Some(&session)).await.unwrap();
        assert_eq!(token.secret(), "access-new");

        let stored = sessions.get_tokens(&session).await.unwrap().unwrap();
        assert_eq!(stored.access_token().secret(), "access-new");
        assert_eq!(stored.refresh_token().unwrap().secret(), "refresh-1");
        assert_eq!(sessions.session_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_refresh() {
        let sessions = Arc::new(InMemorySessionTokenStore::new());
        let session = SessionId::new();
        sessions
            .store_tokens(&session, token_pair("access-old", "refresh-1", 5))
            .await
            .unwrap();
        let mut auth = MockAuthClientOperations::new();
        auth.expect_refresh()
            .withf(|rt| rt.secret() == "refresh-1")
            .times(1)
            .returning(|_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(token_pair("access-new", "refresh-2", 3600))
            });

        let server = Arc::new(server_with(auth, Arc::clone(&sessions)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let server = Arc::clone(&server);
                let session = session.clone();
                tokio::spawn(async move { server.access_token(Some(&session)).await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.secret(), "access-new");
        }
        let stored = sessions.get_tokens(&session).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token().unwrap().secret(), "refresh-2");
    }

    #[tokio::test]
    async fn test_failed_refresh_of_expired_token_drops_session() {
        let sessions = Arc::new(InMemorySessionTokenStore::new());
        let session = SessionId::new();
        let expired = TokenPair::new("access-old", Some("refresh-1".to_string()), None)
            .with_expires_at(Some(chrono::Utc::now() - chrono::Duration::seconds(30)));
        sessions.store_tokens(&session, expired).await.unwrap();

        let mut auth = MockAuthClientOperations::new();
        auth.expect_refresh()
            .returning(|_| Err(AuthError::Refresh("invalid_grant".to_string())));

        let server = server_with(auth, Arc::clone(&sessions));
        let err = server.access_token(Some(&session)).await.unwrap_err();
        assert!(matches!(err, ToolError::RefreshFailed { .. }));
        assert_eq!(err.code(), error_codes::TOKEN_REFRESH_FAILED);
        assert!(!err.to_string().contains("access-old"));
        assert_eq!(sessions.session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_of_live_token_keeps_using_it() {
        let sessions = Arc::new(InMemorySessionTokenStore::new());
        let session = SessionId::new();
        sessions
            .store_tokens(&session, token_pair("access-1", "refresh-1", 10))
            .await
            .unwrap();

        let mut auth = MockAuthClientOperations::new();
        auth.expect_refresh()
            .returning(|_| Err(AuthError::Refresh("temporarily_unavailable".to_string())));

        let server = server_with(auth, Arc::clone(&sessions));
        let token = server.access_token(Some(&session)).await.unwrap();
        assert_eq!(token.secret(), "access-1");
        assert_eq!(sessions.session_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_serve_lines_answers_each_request() {
        let server = idle_server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#, "\n",
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#, "\n",
        );
        let mut output = Vec::new();
        server
            .serve_lines(BufReader::new(input.as_bytes()), &mut output, &SessionId::new())
            .await
            .unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[0]["result"], json!({}));
        assert_eq!(lines[1]["id"], 2);
        assert!(lines[1]["result"]["tools"].as_array().unwrap().len() >= 8);
    }
}
