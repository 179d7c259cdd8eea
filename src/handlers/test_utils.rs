// Shared test utilities for handlers

use std::sync::Arc;
use std::time::Duration;

use crate::auth::MockAuthClientOperations;
use crate::config::ServerConfig;
use crate::fulcra::MockFulcraApi;
use crate::server::Server;
use crate::session_tokens::{InMemorySessionTokenStore, SessionId, SessionTokenStore, TokenPair};

pub const TEST_ACCESS_TOKEN: &str = "test-access-token-0123456789";
pub const TEST_REFRESH_TOKEN: &str = "test-refresh-token-0123456789";

pub fn server_with_fulcra(fulcra: MockFulcraApi) -> (Server, Arc<InMemorySessionTokenStore>) {
    let sessions = Arc::new(InMemorySessionTokenStore::new());
    let server = Server::new(
        Arc::new(ServerConfig::default()),
        sessions.clone(),
        Arc::new(MockAuthClientOperations::new()),
        Arc::new(fulcra),
    );
    (server, sessions)
}

/// Creates a session holding a long-lived token pair.
pub async fn authorized_session(sessions: &InMemorySessionTokenStore) -> SessionId {
    let session = SessionId::new();
    let tokens = TokenPair::new(
        TEST_ACCESS_TOKEN,
        Some(TEST_REFRESH_TOKEN.to_string()),
        Some(Duration::from_secs(3600)),
    );
    sessions.store_tokens(&session, tokens).await.unwrap();
    session
}
