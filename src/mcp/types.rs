use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::arguments;

/// Represents a JSON-RPC error object
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    pub id: Option<Value>, // ID can be number, string or null
}

impl Request {
    /// Requests without an id are notifications and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    pub id: Option<Value>,
}

impl Response {
    pub fn success(result: Value, id: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: Some(id.unwrap_or(Value::Null)),
        }
    }

    pub fn error(error: ErrorObject, id: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: Some(id.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ClientInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: String,
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<ClientInfo>,
    #[serde(default)]
    pub capabilities: Option<Value>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub server_info: ServerInfo,
    pub capabilities: ServerCapabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    pub tools: ListChangedCapability,
    pub resources: ListChangedCapability,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    pub list_changed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct PingParams {}

#[derive(Serialize, Deserialize, Debug)]
pub struct PingResult {}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ListToolsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDefinition>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct InitializedNotificationParams {}

// --- Tool Call Structs ---

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    pub content: Vec<ContentBlock>,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_error: Some(false),
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: Some(true),
            content: vec![ContentBlock::text(text)],
        }
    }
}

// --- Resources ---

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ListResourcesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ListResourcesResult {
    pub resources: Vec<ResourceDefinition>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ReadResourceParams {
    pub uri: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

// --- Fulcra tool arguments ---
//
// Clients frequently send booleans, numbers and lists as strings, so every
// non-string argument goes through a lenient deserializer.

#[derive(Deserialize, Debug, Default)]
pub struct NoArguments {}

#[derive(Deserialize, Debug)]
pub struct TimeRangeParams {
    #[serde(deserialize_with = "arguments::timestamp")]
    pub start_time: DateTime<FixedOffset>,
    #[serde(deserialize_with = "arguments::timestamp")]
    pub end_time: DateTime<FixedOffset>,
}

#[derive(Deserialize, Debug)]
pub struct MetricTimeSeriesParams {
    pub metric_name: String,
    #[serde(deserialize_with = "arguments::timestamp")]
    pub start_time: DateTime<FixedOffset>,
    #[serde(deserialize_with = "arguments::timestamp")]
    pub end_time: DateTime<FixedOffset>,
    /// Seconds between samples.
    #[serde(default, deserialize_with = "arguments::opt_number")]
    pub sample_rate: Option<f64>,
    #[serde(default, deserialize_with = "arguments::opt_bool")]
    pub replace_nulls: Option<bool>,
    #[serde(default, deserialize_with = "arguments::opt_list")]
    pub calculations: Option<Vec<String>>,
}

#[derive(Deserialize, Debug)]
pub struct MetricSamplesParams {
    pub metric_name: String,
    #[serde(deserialize_with = "arguments::timestamp")]
    pub start_time: DateTime<FixedOffset>,
    #[serde(deserialize_with = "arguments::timestamp")]
    pub end_time: DateTime<FixedOffset>,
}

#[derive(Deserialize, Debug)]
pub struct SleepCyclesParams {
    #[serde(deserialize_with = "arguments::timestamp")]
    pub start_time: DateTime<FixedOffset>,
    #[serde(deserialize_with = "arguments::timestamp")]
    pub end_time: DateTime<FixedOffset>,
    /// Minimum gap in seconds separating two cycles.
    #[serde(default, deserialize_with = "arguments::opt_integer")]
    pub cycle_gap: Option<u64>,
    #[serde(default, deserialize_with = "arguments::opt_list")]
    pub stages: Option<Vec<i64>>,
    #[serde(default, deserialize_with = "arguments::opt_list")]
    pub gap_stages: Option<Vec<i64>>,
    #[serde(default, deserialize_with = "arguments::opt_bool")]
    pub clip_to_range: Option<bool>,
}

#[derive(Deserialize, Debug)]
pub struct LocationAtTimeParams {
    #[serde(deserialize_with = "arguments::timestamp")]
    pub time: DateTime<FixedOffset>,
    #[serde(default, deserialize_with = "arguments::opt_integer")]
    pub window_size: Option<u64>,
    #[serde(default, deserialize_with = "arguments::opt_bool")]
    pub include_after: Option<bool>,
    #[serde(default, deserialize_with = "arguments::opt_bool")]
    pub reverse_geocode: Option<bool>,
}

#[derive(Deserialize, Debug)]
pub struct LocationTimeSeriesParams {
    #[serde(deserialize_with = "arguments::timestamp")]
    pub start_time: DateTime<FixedOffset>,
    #[serde(deserialize_with = "arguments::timestamp")]
    pub end_time: DateTime<FixedOffset>,
    #[serde(default, deserialize_with = "arguments::opt_number")]
    pub change_meters: Option<f64>,
    #[serde(default, deserialize_with = "arguments::opt_integer")]
    pub sample_rate: Option<u64>,
    #[serde(default, deserialize_with = "arguments::opt_integer")]
    pub look_back: Option<u64>,
    #[serde(default, deserialize_with = "arguments::opt_bool")]
    pub reverse_geocode: Option<bool>,
}
