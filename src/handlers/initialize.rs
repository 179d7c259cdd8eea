use crate::mcp::types::{
    ErrorObject, InitializeParams, InitializeResult, ListChangedCapability, ServerCapabilities,
    ServerInfo,
};
use tracing::info;

pub const SERVER_NAME: &str = "Fulcra Context Agent";

pub const SERVER_INSTRUCTIONS: &str = "This server provides personal data retrieval tools. \
Always specify the time zone when using times as parameters.";

/// Protocol revisions this server speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];

/// Echoes the client's revision when supported, otherwise offers the newest one.
pub fn negotiate_protocol_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

/// Handles the MCP initialize request.
pub async fn handle_initialize(
    params: InitializeParams,
    version: &str,
) -> Result<InitializeResult, ErrorObject> {
    let protocol_version = negotiate_protocol_version(&params.protocol_version);
    let client_name = params
        .client_info
        .as_ref()
        .and_then(|c| c.name.as_deref())
        .unwrap_or("unknown");
    info!(
        client = client_name,
        requested = %params.protocol_version,
        protocol_version,
        "Client initializing"
    );

    Ok(InitializeResult {
        protocol_version: protocol_version.to_string(),
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: version.to_string(),
        },
        capabilities: ServerCapabilities {
            tools: ListChangedCapability::default(),
            resources: ListChangedCapability::default(),
        },
        instructions: Some(SERVER_INSTRUCTIONS.to_string()),
    })
}
