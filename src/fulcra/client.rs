use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, SecondsFormat};
use oauth2::AccessToken;
use reqwest::{Client as HttpClient, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::claims::fulcra_user_id;
use super::{
    FulcraApi, FulcraApiError, LocationAtTimeQuery, LocationTimeSeriesQuery, MetricSamplesQuery,
    MetricTimeSeriesQuery, SleepCyclesQuery, TimeRange,
};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// reqwest-backed [`FulcraApi`] implementation.
#[derive(Debug, Clone)]
pub struct HttpFulcraClient {
    http: HttpClient,
    base_url: Url,
}

impl HttpFulcraClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FulcraApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FulcraApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        let http = HttpClient::builder()
            .timeout(timeout)
            .user_agent(concat!("fulcra-context-mcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base_url })
    }

    /// Appends `segments` to the base URL path. Each segment is
    /// percent-encoded, so `/`, `?` and `#` cannot escape it.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, FulcraApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                FulcraApiError::InvalidUrl(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Endpoint under `/data/v0/{user_id}/` for the user the token belongs to.
    fn user_endpoint(&self, token: &AccessToken, segments: &[&str]) -> Result<Url, FulcraApiError> {
        let user_id = fulcra_user_id(token)?;
        let mut path = vec!["data", "v0", user_id.as_str()];
        path.extend_from_slice(segments);
        self.endpoint(&path)
    }

    async fn get_json(
        &self,
        token: &AccessToken,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<Value, FulcraApiError> {
        let url_path = url.path().to_string();
        debug!(path = %url_path, "Calling Fulcra API");

        let response = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(path = %url_path, "Fulcra API rejected access token");
            return Err(FulcraApiError::Unauthorized);
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(FulcraApiError::Status {
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        Ok(response.json::<Value>().await?)
    }
}

fn timestamp(time: &DateTime<FixedOffset>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn range_params(range: &TimeRange) -> Vec<(&'static str, String)> {
    vec![
        ("start_time", timestamp(&range.start_time)),
        ("end_time", timestamp(&range.end_time)),
    ]
}

fn metric_time_series_params(query: &MetricTimeSeriesQuery) -> Vec<(&'static str, String)> {
    let mut params = range_params(&query.range);
    params.push(("metrics", query.metric.clone()));
    params.push(("samprate", query.sample_rate.to_string()));
    params.push(("replace_nulls", query.replace_nulls.to_string()));
    params.extend(query.calculations.iter().map(|c| ("calculations", c.clone())));
    params
}

fn sleep_cycles_params(query: &SleepCyclesQuery) -> Vec<(&'static str, String)> {
    let mut params = range_params(&query.range);
    if let Some(gap) = query.cycle_gap {
        params.push(("cycle_gap", gap.to_string()));
    }
    params.extend(query.stages.iter().map(|s| ("stages", s.to_string())));
    params.extend(query.gap_stages.iter().map(|s| ("gap_stages", s.to_string())));
    params.push(("clip_to_range", query.clip_to_range.to_string()));
    params
}

fn location_at_time_params(query: &LocationAtTimeQuery) -> Vec<(&'static str, String)> {
    vec![
        ("time", timestamp(&query.time)),
        ("window_size", query.window_size.to_string()),
        ("include_after", query.include_after.to_string()),
        ("reverse_geocode", query.reverse_geocode.to_string()),
    ]
}

fn location_time_series_params(query: &LocationTimeSeriesQuery) -> Vec<(&'static str, String)> {
    let mut params = range_params(&query.range);
    if let Some(change) = query.change_meters {
        params.push(("change_meters", change.to_string()));
    }
    params.push(("sample_rate", query.sample_rate.to_string()));
    params.push(("look_back", query.look_back.to_string()));
    params.push(("reverse_geocode", query.reverse_geocode.to_string()));
    params
}

#[async_trait]
impl FulcraApi for HttpFulcraClient {
    #[instrument(skip_all)]
    async fn user_info(&self, token: &AccessToken) -> Result<Value, FulcraApiError> {
        self.get_json(token, self.endpoint(&["user", "v0", "info"])?, &[]).await
    }

    #[instrument(skip_all)]
    async fn metrics_catalog(&self, token: &AccessToken) -> Result<Value, FulcraApiError> {
        self.get_json(token, self.endpoint(&["data", "v0", "metrics_catalog"])?, &[])
            .await
    }

    #[instrument(skip(self, token), fields(metric = %query.metric))]
    async fn metric_time_series(
        &self,
        token: &AccessToken,
        query: &MetricTimeSeriesQuery,
    ) -> Result<Value, FulcraApiError> {
        let url = self.endpoint(&["data", "v0", "time_series_grouped"])?;
        self.get_json(token, url, &metric_time_series_params(query)).await
    }

    #[instrument(skip(self, token), fields(metric = %query.metric))]
    async fn metric_samples(
        &self,
        token: &AccessToken,
        query: &MetricSamplesQuery,
    ) -> Result<Value, FulcraApiError> {
        let url = self.user_endpoint(token, &["metric_samples", query.metric.as_str()])?;
        self.get_json(token, url, &range_params(&query.range)).await
    }

    #[instrument(skip_all)]
    async fn apple_workouts(
        &self,
        token: &AccessToken,
        range: &TimeRange,
    ) -> Result<Value, FulcraApiError> {
        let url = self.user_endpoint(token, &["apple", "workouts"])?;
        self.get_json(token, url, &range_params(range)).await
    }

    #[instrument(skip_all)]
    async fn sleep_cycles(
        &self,
        token: &AccessToken,
        query: &SleepCyclesQuery,
    ) -> Result<Value, FulcraApiError> {
        let url = self.user_endpoint(token, &["sleep_cycles"])?;
        self.get_json(token, url, &sleep_cycles_params(query)).await
    }

    #[instrument(skip_all)]
    async fn location_at_time(
        &self,
        token: &AccessToken,
        query: &LocationAtTimeQuery,
    ) -> Result<Value, FulcraApiError> {
        let url = self.user_endpoint(token, &["location_at_time"])?;
        self.get_json(token, url, &location_at_time_params(query)).await
    }

    #[instrument(skip_all)]
    async fn location_time_series(
        &self,
        token: &AccessToken,
        query: &LocationTimeSeriesQuery,
    ) -> Result<Value, FulcraApiError> {
        let url = self.user_endpoint(token, &["location_time_series"])?;
        self.get_json(token, url, &location_time_series_params(query)).await
    }
}
