use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use oauth2::PkceCodeVerifier;

use crate::session_tokens::SessionId;

/// How long a user has to complete the provider's consent screen.
pub const PENDING_AUTHORIZATION_TTL_SECS: i64 = 600;

/// An authorization request waiting for its callback, keyed by CSRF state.
#[derive(Debug)]
pub struct PendingAuthorization {
    pub session_id: SessionId,
    pub pkce_verifier: PkceCodeVerifier,
    pub created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at + ttl <= Utc::now()
    }
}

#[derive(Debug)]
pub struct PendingAuthorizations {
    entries: DashMap<String, PendingAuthorization>,
    ttl: Duration,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::with_ttl(Duration::seconds(PENDING_AUTHORIZATION_TTL_SECS))
    }
}

impl PendingAuthorizations {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, state: String, session_id: SessionId, pkce_verifier: PkceCodeVerifier) {
        self.purge_expired();
        self.entries.insert(
            state,
            PendingAuthorization {
                session_id,
                pkce_verifier,
                created_at: Utc::now(),
            },
        );
    }

    /// Removes and returns the pending authorization for `state`. A state can
    /// be taken once; expired entries are discarded.
    pub fn take(&self, state: &str) -> Option<PendingAuthorization> {
        let (_, pending) = self.entries.remove(state)?;
        if pending.is_expired(self.ttl) {
            tracing::info!(
                session_id = %pending.session_id,
                "Discarding expired authorization request"
            );
            return None;
        }
        Some(pending)
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, pending| !pending.is_expired(ttl));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
