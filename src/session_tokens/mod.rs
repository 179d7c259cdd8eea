//! Session token mapping.
//!
//! Maps opaque session identifiers to the OAuth tokens obtained for them.
//! Only [`SessionId`] values ever leave the server; [`TokenPair`] has no
//! `Serialize` impl and its `Debug` output redacts the secrets.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use oauth2::{AccessToken, RefreshToken};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identifier handed to MCP clients in place of a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accepts only well-formed identifiers; anything else is rejected rather than stored.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim())
            .ok()
            .map(|uuid| Self(uuid.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access/refresh token pair for one session.
#[derive(Debug, Clone)]
pub struct TokenPair {
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    expires_at: Option<DateTime<Utc>>,
    scope: Option<String>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Option<std::time::Duration>,
    ) -> Self {
        Self {
            access_token: AccessToken::new(access_token.into()),
            refresh_token: refresh_token.map(RefreshToken::new),
            expires_at: expires_in.map(|d| Utc::now() + Duration::seconds(d.as_secs() as i64)),
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope.filter(|s| !s.is_empty());
        self
    }

    pub fn with_expires_at(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Keeps `previous` when the provider did not rotate the refresh token.
    pub fn or_refresh_token(mut self, previous: &RefreshToken) -> Self {
        if self.refresh_token.is_none() {
            self.refresh_token = Some(previous.clone());
        }
        self
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    /// True when the token expires within `skew` from now. Tokens without an
    /// expiry never expire.
    pub fn expires_within(&self, skew: Duration) -> bool {
        self.expires_at
            .map(|expires_at| expires_at <= Utc::now() + skew)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub tokens: TokenPair,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionEntry {
    fn new(tokens: TokenPair) -> Self {
        let now = Utc::now();
        Self {
            tokens,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Token-free view of a session, safe to log or return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
}

impl SessionSummary {
    fn from_entry(session_id: &SessionId, entry: &SessionEntry) -> Self {
        Self {
            session_id: session_id.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            expires_at: entry.tokens.expires_at(),
            has_refresh_token: entry.tokens.refresh_token().is_some(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("No tokens stored for session {0}")]
    SessionNotFound(SessionId),
    #[error("An internal error occurred: {0}")]
    InternalError(#[from] anyhow::Error),
}

#[async_trait]
pub trait SessionTokenStore: Send + Sync {
    /// Stores tokens for `session`, replacing any previous pair. Returns
    /// `true` when an existing entry was replaced.
    async fn store_tokens(
        &self,
        session: &SessionId,
        tokens: TokenPair,
    ) -> Result<bool, TokenStoreError>;
    async fn get_tokens(&self, session: &SessionId) -> Result<Option<TokenPair>, TokenStoreError>;
    /// Replaces the pair of an existing session, e.g. after a refresh.
    async fn update_tokens(
        &self,
        session: &SessionId,
        tokens: TokenPair,
    ) -> Result<(), TokenStoreError>;
    async fn remove_session(&self, session: &SessionId) -> Result<bool, TokenStoreError>;
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, TokenStoreError>;
    async fn session_count(&self) -> Result<usize, TokenStoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySessionTokenStore {
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
}

impl InMemorySessionTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionTokenStore for InMemorySessionTokenStore {
    async fn store_tokens(
        &self,
        session: &SessionId,
        tokens: TokenPair,
    ) -> Result<bool, TokenStoreError> {
        match self.sessions.entry(session.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.tokens = tokens;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(SessionEntry::new(tokens));
                Ok(false)
            }
        }
    }

    async fn get_tokens(&self, session: &SessionId) -> Result<Option<TokenPair>, TokenStoreError> {
        Ok(self.sessions.get(session).map(|entry| entry.tokens.clone()))
    }

    async fn update_tokens(
        &self,
        session: &SessionId,
        tokens: TokenPair,
    ) -> Result<(), TokenStoreError> {
        match self.sessions.get_mut(session) {
            Some(mut entry) => {
                entry.tokens = tokens;
                entry.updated_at = Utc::now();
                Ok(())
            }
            None => Err(TokenStoreError::SessionNotFound(session.clone())),
        }
    }

    async fn remove_session(&self, session: &SessionId) -> Result<bool, TokenStoreError> {
        Ok(self.sessions.remove(session).is_some())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, TokenStoreError> {
        Ok(self
            .sessions
            .iter()
            .map(|entry| SessionSummary::from_entry(entry.key(), entry.value()))
            .collect())
    }

    async fn session_count(&self) -> Result<usize, TokenStoreError> {
        Ok(self.sessions.len())
    }
}
