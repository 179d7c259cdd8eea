use crate::fulcra::{
    FulcraApi, FulcraApiError, LocationAtTimeQuery, LocationTimeSeriesQuery, MetricSamplesQuery,
    MetricTimeSeriesQuery, SleepCyclesQuery, TimeRange,
};
use crate::handlers::ping::PING_TOOL_REPLY;
use crate::mcp::arguments::{
    boolean_schema, integer_schema, list_schema, number_schema, string_schema, timestamp_schema,
};
use crate::mcp::types::{
    CallToolParams, CallToolResult, ErrorObject, LocationAtTimeParams, LocationTimeSeriesParams,
    MetricSamplesParams, MetricTimeSeriesParams, NoArguments, SleepCyclesParams, TimeRangeParams,
    ToolAnnotations, ToolDefinition,
};
use crate::server::{ok_some, Server, ToolError};
use crate::session_tokens::SessionId;

use chrono::{DateTime, FixedOffset};
use oauth2::AccessToken;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

pub const DEFAULT_METRIC_SAMPLE_RATE: f64 = 60.0;
pub const DEFAULT_REPLACE_NULLS: bool = false;
pub const DEFAULT_CLIP_TO_RANGE: bool = true;
pub const DEFAULT_LOCATION_WINDOW_SIZE: u64 = 14400;
pub const DEFAULT_INCLUDE_AFTER: bool = false;
pub const DEFAULT_REVERSE_GEOCODE: bool = false;
pub const DEFAULT_LOCATION_SAMPLE_RATE: u64 = 900;
pub const DEFAULT_LOCATION_LOOK_BACK: u64 = 14400;

/// A validated tool invocation with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub enum FulcraToolCall {
    Ping,
    UserInfo,
    MetricsCatalog,
    MetricTimeSeries(MetricTimeSeriesQuery),
    MetricSamples(MetricSamplesQuery),
    Workouts(TimeRange),
    SleepCycles(SleepCyclesQuery),
    LocationAtTime(LocationAtTimeQuery),
    LocationTimeSeries(LocationTimeSeriesQuery),
}

impl FulcraToolCall {
    pub fn parse(tool_name: &str, arguments: Value) -> Result<Self, ToolError> {
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let call = match tool_name {
            "ping" => {
                let _: NoArguments = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::Ping
            }
            "get_user_info" => {
                let _: NoArguments = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::UserInfo
            }
            "get_metrics_catalog" => {
                let _: NoArguments = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::MetricsCatalog
            }
            "get_metric_time_series" => {
                let p: MetricTimeSeriesParams = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::MetricTimeSeries(MetricTimeSeriesQuery {
                    metric: metric_name(tool_name, p.metric_name)?,
                    range: time_range(tool_name, p.start_time, p.end_time)?,
                    sample_rate: positive(
                        tool_name,
                        "sample_rate",
                        p.sample_rate.unwrap_or(DEFAULT_METRIC_SAMPLE_RATE),
                    )?,
                    replace_nulls: p.replace_nulls.unwrap_or(DEFAULT_REPLACE_NULLS),
                    calculations: p.calculations.unwrap_or_default(),
                })
            }
            "get_metric_samples" => {
                let p: MetricSamplesParams = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::MetricSamples(MetricSamplesQuery {
                    metric: metric_name(tool_name, p.metric_name)?,
                    range: time_range(tool_name, p.start_time, p.end_time)?,
                })
            }
            "get_workouts" => {
                let p: TimeRangeParams = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::Workouts(time_range(tool_name, p.start_time, p.end_time)?)
            }
            "get_sleep_cycles" => {
                let p: SleepCyclesParams = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::SleepCycles(SleepCyclesQuery {
                    range: time_range(tool_name, p.start_time, p.end_time)?,
                    cycle_gap: p.cycle_gap,
                    stages: p.stages.unwrap_or_default(),
                    gap_stages: p.gap_stages.unwrap_or_default(),
                    clip_to_range: p.clip_to_range.unwrap_or(DEFAULT_CLIP_TO_RANGE),
                })
            }
            "get_location_at_time" => {
                let p: LocationAtTimeParams = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::LocationAtTime(LocationAtTimeQuery {
                    time: p.time,
                    window_size: p.window_size.unwrap_or(DEFAULT_LOCATION_WINDOW_SIZE),
                    include_after: p.include_after.unwrap_or(DEFAULT_INCLUDE_AFTER),
                    reverse_geocode: p.reverse_geocode.unwrap_or(DEFAULT_REVERSE_GEOCODE),
                })
            }
            "get_location_time_series" => {
                let p: LocationTimeSeriesParams = tool_arguments(tool_name, arguments)?;
                FulcraToolCall::LocationTimeSeries(LocationTimeSeriesQuery {
                    range: time_range(tool_name, p.start_time, p.end_time)?,
                    change_meters: p.change_meters,
                    sample_rate: p.sample_rate.unwrap_or(DEFAULT_LOCATION_SAMPLE_RATE),
                    look_back: p.look_back.unwrap_or(DEFAULT_LOCATION_LOOK_BACK),
                    reverse_geocode: p.reverse_geocode.unwrap_or(DEFAULT_REVERSE_GEOCODE),
                })
            }
            _ => return Err(ToolError::UnknownTool(tool_name.to_string())),
        };
        Ok(call)
    }

    pub fn requires_token(&self) -> bool {
        !matches!(self, FulcraToolCall::Ping)
    }

    /// Calls the Fulcra API and renders the response as tool output text.
    pub async fn execute(
        &self,
        fulcra: &dyn FulcraApi,
        token: &AccessToken,
    ) -> Result<String, FulcraApiError> {
        let text = match self {
            FulcraToolCall::Ping => PING_TOOL_REPLY.to_string(),
            FulcraToolCall::UserInfo => {
                let info = fulcra.user_info(token).await?;
                format!("User info: {info}")
            }
            FulcraToolCall::MetricsCatalog => {
                let catalog = fulcra.metrics_catalog(token).await?;
                format!("Available metrics: {catalog}")
            }
            FulcraToolCall::MetricTimeSeries(query) => {
                let series = fulcra.metric_time_series(token, query).await?;
                format!("{} time series {}: {series}", query.metric, during(&query.range))
            }
            FulcraToolCall::MetricSamples(query) => {
                let samples = fulcra.metric_samples(token, query).await?;
                format!("{} samples {}: {samples}", query.metric, during(&query.range))
            }
            FulcraToolCall::Workouts(range) => {
                let workouts = fulcra.apple_workouts(token, range).await?;
                format!("Workouts {}: {workouts}", during(range))
            }
            FulcraToolCall::SleepCycles(query) => {
                let cycles = fulcra.sleep_cycles(token, query).await?;
                format!("Sleep cycles {}: {cycles}", during(&query.range))
            }
            FulcraToolCall::LocationAtTime(query) => {
                let location = fulcra.location_at_time(token, query).await?;
                format!("Location at {}: {location}", query.time.to_rfc3339())
            }
            FulcraToolCall::LocationTimeSeries(query) => {
                let locations = fulcra.location_time_series(token, query).await?;
                format!("Locations {}: {locations}", during(&query.range))
            }
        };
        Ok(text)
    }
}

fn during(range: &TimeRange) -> String {
    format!(
        "during {} and {}",
        range.start_time.to_rfc3339(),
        range.end_time.to_rfc3339()
    )
}

fn tool_arguments<T: DeserializeOwned>(tool_name: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments {
        tool: tool_name.to_string(),
        message: e.to_string(),
    })
}

fn invalid(tool_name: &str, message: impl Into<String>) -> ToolError {
    ToolError::InvalidArguments {
        tool: tool_name.to_string(),
        message: message.into(),
    }
}

fn metric_name(tool_name: &str, raw: String) -> Result<String, ToolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid(tool_name, "metric_name must not be empty"));
    }
    if trimmed.contains(&['/', '?', '#'][..]) || trimmed == "." || trimmed == ".." {
        return Err(invalid(tool_name, "metric_name must be a plain metric name"));
    }
    Ok(trimmed.to_string())
}

fn time_range(
    tool_name: &str,
    start_time: DateTime<FixedOffset>,
    end_time: DateTime<FixedOffset>,
) -> Result<TimeRange, ToolError> {
    if end_time < start_time {
        return Err(invalid(tool_name, "end_time must not be before start_time"));
    }
    Ok(TimeRange { start_time, end_time })
}

fn positive(tool_name: &str, field: &str, value: f64) -> Result<f64, ToolError> {
    if value <= 0.0 {
        return Err(invalid(tool_name, format!("{field} must be greater than zero")));
    }
    Ok(value)
}

#[instrument(skip(server, params, session), fields(tool_name = %params.name))]
pub async fn handle_tools_call(
    params: CallToolParams,
    server: &Server,
    session: Option<&SessionId>,
) -> Result<Option<Value>, ErrorObject> {
    let tool_name = params.name.clone();

    match run_tool(params, server, session).await {
        Ok(text) => ok_some(CallToolResult::text(text)),
        Err(err) => {
            warn!(tool = %tool_name, code = err.code(), error = %err, "Tool call failed");
            ok_some(CallToolResult::error(err.to_string()))
        }
    }
}

async fn run_tool(
    params: CallToolParams,
    server: &Server,
    session: Option<&SessionId>,
) -> Result<String, ToolError> {
    let call = FulcraToolCall::parse(&params.name, params.arguments)?;

    if !call.requires_token() {
        return Ok(PING_TOOL_REPLY.to_string());
    }

    let session = session.ok_or(ToolError::SessionRequired)?;
    let token = server.access_token(Some(session)).await?;
    let text = call.execute(server.fulcra(), &token).await.map_err(|e| match e {
        FulcraApiError::Unauthorized => server.not_authorized(session),
        other => ToolError::Upstream(other),
    })?;
    info!(session_id = %session, tool = %params.name, "Tool call completed");
    Ok(text)
}

fn read_only_annotations(title: &str) -> Option<ToolAnnotations> {
    Some(ToolAnnotations {
        title: Some(title.to_string()),
        read_only_hint: Some(true),
        destructive_hint: Some(false),
        idempotent_hint: Some(true),
        open_world_hint: Some(true),
    })
}

fn start_end_properties() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "start_time".to_string(),
        timestamp_schema("The starting time of the period in question, including the time zone."),
    );
    properties.insert(
        "end_time".to_string(),
        timestamp_schema("The ending time of the period in question, including the time zone."),
    );
    properties
}

fn object_schema(properties: Map<String, Value>, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// Define the tools the server offers
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    let metric_name_schema =
        string_schema("Name of the metric, as listed by get_metrics_catalog (e.g. StepCount).");

    let mut metric_series = start_end_properties();
    metric_series.insert("metric_name".to_string(), metric_name_schema.clone());
    metric_series.insert(
        "sample_rate".to_string(),
        number_schema("Number of seconds per sample.", Some(DEFAULT_METRIC_SAMPLE_RATE)),
    );
    metric_series.insert(
        "replace_nulls".to_string(),
        boolean_schema("Replace missing values with zero.", DEFAULT_REPLACE_NULLS),
    );
    metric_series.insert(
        "calculations".to_string(),
        list_schema(
            "string",
            "Extra calculations to return per sample period (e.g. max, min, delta).",
        ),
    );

    let mut metric_samples = start_end_properties();
    metric_samples.insert("metric_name".to_string(), metric_name_schema);

    let mut sleep = start_end_properties();
    sleep.insert(
        "cycle_gap".to_string(),
        integer_schema("Minimum gap in seconds between two sleep cycles.", None),
    );
    sleep.insert(
        "stages".to_string(),
        list_schema("integer", "Sleep stages counted as part of a cycle."),
    );
    sleep.insert(
        "gap_stages".to_string(),
        list_schema("integer", "Sleep stages counted as gaps between cycles."),
    );
    sleep.insert(
        "clip_to_range".to_string(),
        boolean_schema("Clip cycles to the requested time range.", DEFAULT_CLIP_TO_RANGE),
    );

    let mut location_at = Map::new();
    location_at.insert(
        "time".to_string(),
        timestamp_schema("The point in time to look up, including the time zone."),
    );
    location_at.insert(
        "window_size".to_string(),
        integer_schema(
            "Seconds around the time to search for a location.",
            Some(DEFAULT_LOCATION_WINDOW_SIZE),
        ),
    );
    location_at.insert(
        "include_after".to_string(),
        boolean_schema("Also consider samples after the requested time.", DEFAULT_INCLUDE_AFTER),
    );
    location_at.insert(
        "reverse_geocode".to_string(),
        boolean_schema("Resolve coordinates to an address.", DEFAULT_REVERSE_GEOCODE),
    );

    let mut location_series = start_end_properties();
    location_series.insert(
        "change_meters".to_string(),
        number_schema("Only report a new location after moving at least this many meters.", None),
    );
    location_series.insert(
        "sample_rate".to_string(),
        integer_schema("Number of seconds per sample.", Some(DEFAULT_LOCATION_SAMPLE_RATE)),
    );
    location_series.insert(
        "look_back".to_string(),
        integer_schema(
            "Seconds before the start time to look for an initial location.",
            Some(DEFAULT_LOCATION_LOOK_BACK),
        ),
    );
    location_series.insert(
        "reverse_geocode".to_string(),
        boolean_schema("Resolve coordinates to addresses.", DEFAULT_REVERSE_GEOCODE),
    );

    vec![
        ToolDefinition {
            name: "ping".to_string(),
            description: Some("Checks if the server is responsive.".to_string()),
            input_schema: json!({ "type": "object", "properties": {} }),
            annotations: Some(ToolAnnotations {
                title: Some("Ping Server".to_string()),
                read_only_hint: Some(true),
                destructive_hint: None,
                idempotent_hint: Some(true),
                open_world_hint: Some(false),
            }),
        },
        ToolDefinition {
            name: "get_user_info".to_string(),
            description: Some(
                "Get information about the Fulcra user, including their preferred time zone."
                    .to_string(),
            ),
            input_schema: json!({ "type": "object", "properties": {} }),
            annotations: read_only_annotations("User Info"),
        },
        ToolDefinition {
            name: "get_metrics_catalog".to_string(),
            description: Some(
                "List the metrics that can be retrieved with get_metric_time_series and get_metric_samples."
                    .to_string(),
            ),
            input_schema: json!({ "type": "object", "properties": {} }),
            annotations: read_only_annotations("Metrics Catalog"),
        },
        ToolDefinition {
            name: "get_metric_time_series".to_string(),
            description: Some(
                "Get a time series of a metric, resampled at a fixed rate, for a period of time."
                    .to_string(),
            ),
            input_schema: object_schema(metric_series, &["metric_name", "start_time", "end_time"]),
            annotations: read_only_annotations("Metric Time Series"),
        },
        ToolDefinition {
            name: "get_metric_samples".to_string(),
            description: Some(
                "Get the raw samples recorded for a metric during a period of time.".to_string(),
            ),
            input_schema: object_schema(metric_samples, &["metric_name", "start_time", "end_time"]),
            annotations: read_only_annotations("Metric Samples"),
        },
        ToolDefinition {
            name: "get_workouts".to_string(),
            description: Some(
                "Get details about the workouts that the user has done during a period of time."
                    .to_string(),
            ),
            input_schema: object_schema(start_end_properties(), &["start_time", "end_time"]),
            annotations: read_only_annotations("Workouts"),
        },
        ToolDefinition {
            name: "get_sleep_cycles".to_string(),
            description: Some("Get the user's sleep cycles during a period of time.".to_string()),
            input_schema: object_schema(sleep, &["start_time", "end_time"]),
            annotations: read_only_annotations("Sleep Cycles"),
        },
        ToolDefinition {
            name: "get_location_at_time".to_string(),
            description: Some("Get where the user was at a point in time.".to_string()),
            input_schema: object_schema(location_at, &["time"]),
            annotations: read_only_annotations("Location At Time"),
        },
        ToolDefinition {
            name: "get_location_time_series".to_string(),
            description: Some("Get the user's locations during a period of time.".to_string()),
            input_schema: object_schema(location_series, &["start_time", "end_time"]),
            annotations: read_only_annotations("Location Time Series"),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fulcra::MockFulcraApi;
    use crate::handlers::test_utils::{authorized_session, server_with_fulcra, TEST_ACCESS_TOKEN};
    use crate::mcp::error_codes;

    fn call(name: &str, arguments: Value) -> CallToolParams {
        CallToolParams {
            name: name.to_string(),
            arguments,
        }
    }

    fn result_text(value: &Value) -> &str {
        value["content"][0]["text"].as_str().unwrap()
    }

    #[test]
    fn test_tool_names_are_unique() {
        let tools = get_tool_definitions();
        let mut names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), tools.len());
        assert_eq!(tools.len(), 9);
    }

    #[test]
    fn test_string_arguments_are_normalized() {
        let now = "2024-05-01T08:00:00+00:00";

        let parsed = FulcraToolCall::parse(
            "get_metric_time_series",
            json!({
                "metric_name": "steps",
                "start_time": now,
                "end_time": now,
                "sample_rate": "120",
                "replace_nulls": "true",
                "calculations": "[\"max\", \"min\"]",
            }),
        )
        .unwrap();
        let FulcraToolCall::MetricTimeSeries(query) = parsed else { panic!("wrong call") };
        assert_eq!(query.sample_rate, 120.0);
        assert!(query.replace_nulls);
        assert_eq!(query.calculations, vec!["max".to_string(), "min".to_string()]);

        let parsed = FulcraToolCall::parse(
            "get_sleep_cycles",
            json!({
                "start_time": now,
                "end_time": now,
                "clip_to_range": "0",
                "stages": "[2,4]",
                "gap_stages": "[1,3]",
            }),
        )
        .unwrap();
        let FulcraToolCall::SleepCycles(query) = parsed else { panic!("wrong call") };
        assert!(!query.clip_to_range);
        assert_eq!(query.stages, vec![2, 4]);
        assert_eq!(query.gap_stages, vec![1, 3]);

        let parsed = FulcraToolCall::parse(
            "get_location_at_time",
            json!({ "time": now, "reverse_geocode": "1" }),
        )
        .unwrap();
        let FulcraToolCall::LocationAtTime(query) = parsed else { panic!("wrong call") };
        assert!(query.reverse_geocode);
        assert_eq!(query.window_size, 14400);

        let parsed = FulcraToolCall::parse(
            "get_location_time_series",
            json!({
                "start_time": now,
                "end_time": now,
                "change_meters": "5.5",
                "sample_rate": "600",
                "reverse_geocode": "false",
            }),
        )
        .unwrap();
        let FulcraToolCall::LocationTimeSeries(query) = parsed else { panic!("wrong call") };
        assert_eq!(query.change_meters, Some(5.5));
        assert_eq!(query.sample_rate, 600);
        assert_eq!(query.look_back, 14400);
        assert!(!query.reverse_geocode);
    }

    #[test]
    fn test_defaults_apply_when_arguments_are_omitted() {
        let parsed = FulcraToolCall::parse(
            "get_metric_time_series",
            json!({
                "metric_name": "HeartRate",
                "start_time": "2024-05-01T00:00:00-07:00",
                "end_time": "2024-05-02T00:00:00-07:00",
            }),
        )
        .unwrap();
        let FulcraToolCall::MetricTimeSeries(query) = parsed else { panic!("wrong call") };
        assert_eq!(query.sample_rate, DEFAULT_METRIC_SAMPLE_RATE);
        assert!(!query.replace_nulls);
        assert!(query.calculations.is_empty());

        let parsed = FulcraToolCall::parse(
            "get_sleep_cycles",
            json!({ "start_time": "2024-05-01T00:00:00Z", "end_time": "2024-05-02T00:00:00Z" }),
        )
        .unwrap();
        let FulcraToolCall::SleepCycles(query) = parsed else { panic!("wrong call") };
        assert!(query.clip_to_range);
        assert!(query.cycle_gap.is_none());

        assert_eq!(
            FulcraToolCall::parse("get_user_info", Value::Null).unwrap(),
            FulcraToolCall::UserInfo
        );
    }

    #[test]
    fn test_invalid_arguments_name_the_problem() {
        let err = FulcraToolCall::parse(
            "get_workouts",
            json!({ "start_time": "2024-05-02T00:00:00Z", "end_time": "2024-05-01T00:00:00Z" }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("end_time must not be before start_time"));

        let err = FulcraToolCall::parse(
            "get_workouts",
            json!({ "start_time": "yesterday", "end_time": "2024-05-01T00:00:00Z" }),
        )
        .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().contains("time zone"));

        let err = FulcraToolCall::parse(
            "get_location_at_time",
            json!({ "time": "2024-05-01T00:00:00Z", "include_after": "perhaps" }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected a boolean"));

        assert!(matches!(
            FulcraToolCall::parse("launch_rockets", json!({})),
            Err(ToolError::UnknownTool(_))
        ));
    }

    #[test]
    fn test_metric_names_must_not_look_like_paths() {
        for name in ["../../../user/v0/info", "Heart Rate?x=1", "a/b#frag", ".."] {
            let err = FulcraToolCall::parse(
                "get_metric_samples",
                json!({
                    "metric_name": name,
                    "start_time": "2024-05-01T00:00:00Z",
                    "end_time": "2024-05-02T00:00:00Z"
                }),
            )
            .unwrap_err();
            assert!(err.to_string().contains("plain metric name"), "{name}: {err}");
        }
    }

    #[tokio::test]
    async fn test_workouts_call_formats_response() {
        let mut fulcra = MockFulcraApi::new();
        fulcra
            .expect_apple_workouts()
            .withf(|token, range| {
                token.secret() == TEST_ACCESS_TOKEN
                    && range.start_time.to_rfc3339() == "2024-05-01T00:00:00-07:00"
            })
            .times(1)
            .returning(|_, _| Ok(json!([{ "activity": "running", "duration": 1800 }])));
        let (server, sessions) = server_with_fulcra(fulcra);
        let session = authorized_session(&sessions).await;

        let params = call(
            "get_workouts",
            json!({
                "start_time": "2024-05-01T00:00:00-07:00",
                "end_time": "2024-05-02T00:00:00-07:00"
            }),
        );
        let result = handle_tools_call(params, &server, Some(&session)).await.unwrap().unwrap();

        assert_eq!(result["isError"], false);
        let text = result_text(&result);
        assert!(text.starts_with(
            "Workouts during 2024-05-01T00:00:00-07:00 and 2024-05-02T00:00:00-07:00: "
        ));
        assert!(text.contains("running"));
        assert!(!text.contains(TEST_ACCESS_TOKEN));
    }

    #[tokio::test]
    async fn test_unauthorized_session_gets_authorize_link() {
        let (server, _sessions) = server_with_fulcra(MockFulcraApi::new());
        let session = SessionId::new();

        let result = handle_tools_call(call("get_user_info", json!({})), &server, Some(&session))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["isError"], true);
        let text = result_text(&result);
        assert!(text.contains(&format!("/oauth/authorize?session_id={session}")));
    }

    #[tokio::test]
    async fn test_upstream_rejection_asks_for_reauthorization() {
        let mut fulcra = MockFulcraApi::new();
        fulcra
            .expect_user_info()
            .returning(|_| Err(FulcraApiError::Unauthorized));
        let (server, sessions) = server_with_fulcra(fulcra);
        let session = authorized_session(&sessions).await;

        let result = handle_tools_call(call("get_user_info", json!({})), &server, Some(&session))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["isError"], true);
        assert!(result_text(&result).contains("Authorize access at"));
        assert!(!result_text(&result).contains(TEST_ACCESS_TOKEN));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_a_tool_error() {
        let mut fulcra = MockFulcraApi::new();
        fulcra.expect_metrics_catalog().returning(|_| {
            Err(FulcraApiError::Status {
                status: 503,
                message: "maintenance".to_string(),
            })
        });
        let (server, sessions) = server_with_fulcra(fulcra);
        let session = authorized_session(&sessions).await;

        let params = call("get_metrics_catalog", Value::Null);
        let result = handle_tools_call(params, &server, Some(&session))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["isError"], true);
        assert!(result_text(&result).contains("503"));
    }

    #[tokio::test]
    async fn test_ping_needs_no_session() {
        let (server, _sessions) = server_with_fulcra(MockFulcraApi::new());
        let result = handle_tools_call(call("ping", json!({})), &server, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result_text(&result), "pong");
    }

    #[test]
    fn test_unknown_tool_maps_to_method_not_found() {
        let err = FulcraToolCall::parse("nope", json!({})).unwrap_err();
        assert_eq!(err.code(), error_codes::METHOD_NOT_FOUND);
    }
}
