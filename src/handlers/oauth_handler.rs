use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, Redirect},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::auth::AuthError;
use crate::http_transport::AppState;
use crate::session_tokens::SessionId;

pub const AUTHORIZE_PATH: &str = "/oauth/authorize";

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[instrument(skip(app_state))]
async fn authorize_handler(
    State(app_state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, (StatusCode, String)> {
    let session = match query.session_id.as_deref() {
        Some(raw) => SessionId::parse(raw)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, "Invalid session_id".to_string()))?,
        None => SessionId::new(),
    };

    match app_state.server.auth_client().authorization_url(&session).await {
        Ok(request) => {
            info!(session_id = %session, "Redirecting to identity provider");
            Ok(Redirect::temporary(&request.url))
        }
        Err(AuthError::NotConfigured) => {
            warn!("Authorization requested but no OAuth client is configured");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "OAuth is not configured on this server".to_string(),
            ))
        }
        Err(e) => {
            error!(error = %e, "Failed to build authorization URL");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

// `code` and `state` are never logged.
#[instrument(skip_all)]
async fn callback_handler(
    State(app_state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Html<String>, (StatusCode, String)> {
    if let Some(provider_error) = query.error {
        let message = match query.error_description {
            Some(description) => format!("{provider_error}: {description}"),
            None => provider_error,
        };
        warn!(error = %message, "Identity provider returned an error");
        return Err((StatusCode::BAD_REQUEST, format!("Authorization failed: {message}")));
    }

    let (Some(code), Some(state)) = (query.code, query.state) else {
        return Err((StatusCode::BAD_REQUEST, "Missing code or state parameter".to_string()));
    };

    let (session, tokens) = app_state
        .server
        .auth_client()
        .exchange_code(&code, &state)
        .await
        .map_err(|e| match e {
            AuthError::UnknownState => {
                warn!("Callback with unknown or expired state");
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            AuthError::NotConfigured => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            other => {
                error!(error = %other, "Authorization code exchange failed");
                (StatusCode::BAD_GATEWAY, other.to_string())
            }
        })?;

    let replaced = app_state
        .server
        .sessions()
        .store_tokens(&session, tokens)
        .await
        .map_err(|e| {
            error!(session_id = %session, error = %e, "Failed to store session tokens");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store session".to_string())
        })?;
    info!(session_id = %session, replaced, "Session authorized");

    Ok(Html(format!(
        "<!doctype html>\n<html><head><title>Fulcra connected</title></head>\
         <body><h1>Fulcra account connected</h1>\
         <p>Session <code>{session}</code> is authorized. You can close this window and return to your MCP client.</p>\
         </body></html>"
    )))
}

pub fn oauth_routes(redirect_path: &str) -> Router<AppState> {
    Router::new()
        .route(AUTHORIZE_PATH, get(authorize_handler))
        .route(redirect_path, get(callback_handler))
}
