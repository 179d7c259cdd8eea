pub mod pending;

use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge, RedirectUrl,
    RefreshToken, RequestTokenError, Scope, TokenResponse as OAuthTokenResponse, TokenUrl,
};
use tracing::{info, warn};

use crate::config::OAuthConfig;
use crate::session_tokens::{SessionId, TokenPair};
use pending::PendingAuthorizations;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("OAuth client is not configured (missing client id)")]
    NotConfigured,
    #[error("Invalid OAuth configuration: {0}")]
    InvalidConfig(String),
    #[error("Unknown or expired authorization state")]
    UnknownState,
    #[error("Authorization code exchange failed: {0}")]
    Exchange(String),
    #[error("Token refresh failed: {0}")]
    Refresh(String),
}

/// URL the user visits to grant access, plus the CSRF state bound to it.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthClientOperations: Send + Sync {
    /// Starts an authorization for `session` and returns the provider URL.
    async fn authorization_url(
        &self,
        session: &SessionId,
    ) -> Result<AuthorizationRequest, AuthError>;
    /// Completes the authorization identified by `state`, returning the
    /// session it was started for together with the issued tokens.
    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
    ) -> Result<(SessionId, TokenPair), AuthError>;
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair, AuthError>;
}

#[derive(Debug)]
pub struct AuthClient {
    oauth_client: Option<BasicClient>,
    config: OAuthConfig,
    pending: PendingAuthorizations,
}

impl AuthClient {
    pub fn new(config: OAuthConfig, redirect_uri: String) -> Result<Self, AuthError> {
        let oauth_client = if config.client_id.trim().is_empty() {
            warn!("No OAuth client id configured; authorization is disabled");
            None
        } else {
            let client_secret = if config.client_secret.is_empty() {
                None
            } else {
                Some(ClientSecret::new(config.client_secret.clone()))
            };
            let auth_url = AuthUrl::new(config.auth_url.clone())
                .map_err(|e| AuthError::InvalidConfig(format!("auth_url: {e}")))?;
            let token_url = TokenUrl::new(config.token_url.clone())
                .map_err(|e| AuthError::InvalidConfig(format!("token_url: {e}")))?;
            let redirect_url = RedirectUrl::new(redirect_uri)
                .map_err(|e| AuthError::InvalidConfig(format!("redirect_uri: {e}")))?;

            Some(
                BasicClient::new(
                    ClientId::new(config.client_id.clone()),
                    client_secret,
                    auth_url,
                    Some(token_url),
                )
                .set_redirect_uri(redirect_url),
            )
        };

        Ok(Self {
            oauth_client,
            config,
            pending: PendingAuthorizations::default(),
        })
    }

    fn client(&self) -> Result<&BasicClient, AuthError> {
        self.oauth_client.as_ref().ok_or(AuthError::NotConfigured)
    }

    pub fn pending_authorizations(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl AuthClientOperations for AuthClient {
    async fn authorization_url(
        &self,
        session: &SessionId,
    ) -> Result<AuthorizationRequest, AuthError> {
        let client = self.client()?;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.config.scopes.iter().map(|s| Scope::new(s.clone())))
            .set_pkce_challenge(pkce_challenge);
        if !self.config.audience.is_empty() {
            request = request.add_extra_param("audience", self.config.audience.clone());
        }
        let (url, csrf_state) = request.url();

        let state = csrf_state.secret().clone();
        self.pending.insert(state.clone(), session.clone(), pkce_verifier);
        info!(session_id = %session, "Issued authorization request");

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state,
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
    ) -> Result<(SessionId, TokenPair), AuthError> {
        let client = self.client()?;
        let pending = self.pending.take(state).ok_or(AuthError::UnknownState)?;

        let token_res = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(pending.pkce_verifier)
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::Exchange(describe_token_error(e)))?;

        info!(session_id = %pending.session_id, "Authorization code exchanged");
        Ok((pending.session_id, token_pair_from_response(&token_res)))
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<TokenPair, AuthError> {
        let client = self.client()?;
        let token_res = client
            .exchange_refresh_token(refresh_token)
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::Refresh(describe_token_error(e)))?;

        Ok(token_pair_from_response(&token_res).or_refresh_token(refresh_token))
    }
}

fn token_pair_from_response(token_res: &BasicTokenResponse) -> TokenPair {
    let scope = token_res.scopes().map(|scopes| {
        scopes.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" ")
    });
    TokenPair::new(
        token_res.access_token().secret().clone(),
        token_res.refresh_token().map(|rt| rt.secret().clone()),
        token_res.expires_in(),
    )
    .with_scope(scope)
}

/// Describes a token endpoint failure without echoing the response body,
/// which may contain token material.
fn describe_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> String
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => match response.error_description() {
            Some(description) => format!("{}: {}", response.error(), description),
            None => response.error().to_string(),
        },
        RequestTokenError::Request(e) => format!("request to token endpoint failed: {e}"),
        RequestTokenError::Parse(_, _) => {
            "token endpoint returned an unparseable response".to_string()
        }
        RequestTokenError::Other(message) => message,
    }
}
