//! Hand-written fakes for the identity provider and the Fulcra API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use fulcra_context_mcp::auth::{AuthClientOperations, AuthError, AuthorizationRequest};
use fulcra_context_mcp::config::ServerConfig;
use fulcra_context_mcp::fulcra::{
    FulcraApi, FulcraApiError, LocationAtTimeQuery, LocationTimeSeriesQuery, MetricSamplesQuery,
    MetricTimeSeriesQuery, SleepCyclesQuery, TimeRange,
};
use fulcra_context_mcp::server::Server;
use fulcra_context_mcp::session_tokens::{InMemorySessionTokenStore, SessionId, TokenPair};
use oauth2::{AccessToken, RefreshToken};
use serde_json::{json, Value};

pub const ISSUED_ACCESS_TOKEN: &str = "eyJ-issued-access-token-for-integration";
pub const ISSUED_REFRESH_TOKEN: &str = "issued-refresh-token-for-integration";

/// Identity provider fake: remembers the state issued for each session and
/// accepts each state exactly once.
#[derive(Default)]
pub struct StubAuthClient {
    pending: Mutex<HashMap<String, SessionId>>,
}

#[async_trait]
impl AuthClientOperations for StubAuthClient {
    async fn authorization_url(
        &self,
        session: &SessionId,
    ) -> Result<AuthorizationRequest, AuthError> {
        let state = format!("state-{session}");
        self.pending
            .lock()
            .unwrap()
            .insert(state.clone(), session.clone());
        Ok(AuthorizationRequest {
            url: format!("https://idp.example.com/authorize?state={state}"),
            state,
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        state: &str,
    ) -> Result<(SessionId, TokenPair), AuthError> {
        let session = self
            .pending
            .lock()
            .unwrap()
            .remove(state)
            .ok_or(AuthError::UnknownState)?;
        if code != "valid-code" {
            return Err(AuthError::Exchange("invalid_grant".to_string()));
        }
        let tokens = TokenPair::new(
            ISSUED_ACCESS_TOKEN,
            Some(ISSUED_REFRESH_TOKEN.to_string()),
            Some(Duration::from_secs(3600)),
        );
        Ok((session, tokens))
    }

    async fn refresh(&self, _refresh_token: &RefreshToken) -> Result<TokenPair, AuthError> {
        Err(AuthError::Refresh("refresh not expected in this test".to_string()))
    }
}

/// Fulcra API fake that records every token it is called with.
#[derive(Default)]
pub struct StubFulcra {
    seen_tokens: Mutex<Vec<String>>,
}

impl StubFulcra {
    pub fn seen_tokens(&self) -> Vec<String> {
        self.seen_tokens.lock().unwrap().clone()
    }

    fn record(&self, token: &AccessToken, body: Value) -> Result<Value, FulcraApiError> {
        self.seen_tokens.lock().unwrap().push(token.secret().clone());
        Ok(body)
    }
}

#[async_trait]
impl FulcraApi for StubFulcra {
    async fn user_info(&self, token: &AccessToken) -> Result<Value, FulcraApiError> {
        self.record(token, json!({ "preferred_timezone": "America/New_York" }))
    }

    async fn metrics_catalog(&self, token: &AccessToken) -> Result<Value, FulcraApiError> {
        self.record(token, json!([{ "name": "StepCount" }, { "name": "HeartRate" }]))
    }

    async fn metric_time_series(
        &self,
        token: &AccessToken,
        query: &MetricTimeSeriesQuery,
    ) -> Result<Value, FulcraApiError> {
        self.record(token, json!({ "metric": query.metric, "samples": [] }))
    }

    async fn metric_samples(
        &self,
        token: &AccessToken,
        query: &MetricSamplesQuery,
    ) -> Result<Value, FulcraApiError> {
        self.record(token, json!({ "metric": query.metric, "samples": [] }))
    }

    async fn apple_workouts(
        &self,
        token: &AccessToken,
        _range: &TimeRange,
    ) -> Result<Value, FulcraApiError> {
        self.record(token, json!([{ "workout_activity_type": "running" }]))
    }

    async fn sleep_cycles(
        &self,
        token: &AccessToken,
        _query: &SleepCyclesQuery,
    ) -> Result<Value, FulcraApiError> {
        self.record(token, json!([]))
    }

    async fn location_at_time(
        &self,
        token: &AccessToken,
        _query: &LocationAtTimeQuery,
    ) -> Result<Value, FulcraApiError> {
        self.record(token, json!({ "lat": 40.7, "lon": -74.0 }))
    }

    async fn location_time_series(
        &self,
        token: &AccessToken,
        _query: &LocationTimeSeriesQuery,
    ) -> Result<Value, FulcraApiError> {
        self.record(token, json!([]))
    }
}

pub struct TestHarness {
    pub server: Arc<Server>,
    pub sessions: Arc<InMemorySessionTokenStore>,
    pub fulcra: Arc<StubFulcra>,
}

pub fn harness() -> TestHarness {
    let sessions = Arc::new(InMemorySessionTokenStore::new());
    let fulcra = Arc::new(StubFulcra::default());
    let server = Server::new(
        Arc::new(ServerConfig::default()),
        sessions.clone(),
        Arc::new(StubAuthClient::default()),
        fulcra.clone(),
    );
    TestHarness {
        server: Arc::new(server),
        sessions,
        fulcra,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_mcp(session: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json");
    if let Some(session) = session {
        builder = builder.header("mcp-session-id", session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_string(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}
