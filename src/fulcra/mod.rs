//! Thin client for the Fulcra data API.
//!
//! Every call takes the caller's access token explicitly; the client itself
//! holds no credentials.

pub mod claims;
pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use oauth2::AccessToken;
use serde_json::Value;

pub use client::HttpFulcraClient;

#[derive(Debug, thiserror::Error)]
pub enum FulcraApiError {
    #[error("Fulcra API rejected the access token")]
    Unauthorized,
    #[error("Fulcra API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Fulcra API request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Access token does not identify a Fulcra user: {0}")]
    MissingUserId(String),
    #[error("Invalid Fulcra API URL: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeRange {
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricTimeSeriesQuery {
    pub metric: String,
    pub range: TimeRange,
    /// Seconds between samples.
    pub sample_rate: f64,
    pub replace_nulls: bool,
    pub calculations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSamplesQuery {
    pub metric: String,
    pub range: TimeRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SleepCyclesQuery {
    pub range: TimeRange,
    pub cycle_gap: Option<u64>,
    pub stages: Vec<i64>,
    pub gap_stages: Vec<i64>,
    pub clip_to_range: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationAtTimeQuery {
    pub time: DateTime<FixedOffset>,
    /// Seconds to search around `time`.
    pub window_size: u64,
    pub include_after: bool,
    pub reverse_geocode: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationTimeSeriesQuery {
    pub range: TimeRange,
    pub change_meters: Option<f64>,
    pub sample_rate: u64,
    pub look_back: u64,
    pub reverse_geocode: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FulcraApi: Send + Sync {
    async fn user_info(&self, token: &AccessToken) -> Result<Value, FulcraApiError>;
    async fn metrics_catalog(&self, token: &AccessToken) -> Result<Value, FulcraApiError>;
    async fn metric_time_series(
        &self,
        token: &AccessToken,
        query: &MetricTimeSeriesQuery,
    ) -> Result<Value, FulcraApiError>;
    async fn metric_samples(
        &self,
        token: &AccessToken,
        query: &MetricSamplesQuery,
    ) -> Result<Value, FulcraApiError>;
    async fn apple_workouts(
        &self,
        token: &AccessToken,
        range: &TimeRange,
    ) -> Result<Value, FulcraApiError>;
    async fn sleep_cycles(
        &self,
        token: &AccessToken,
        query: &SleepCyclesQuery,
    ) -> Result<Value, FulcraApiError>;
    async fn location_at_time(
        &self,
        token: &AccessToken,
        query: &LocationAtTimeQuery,
    ) -> Result<Value, FulcraApiError>;
    async fn location_time_series(
        &self,
        token: &AccessToken,
        query: &LocationTimeSeriesQuery,
    ) -> Result<Value, FulcraApiError>;
}
