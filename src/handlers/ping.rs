use crate::mcp::types::{ErrorObject, PingParams, PingResult};

/// Text returned by the `ping` tool. The `ping` method itself answers `{}`.
pub const PING_TOOL_REPLY: &str = "pong";

pub async fn handle_ping(_params: PingParams) -> Result<PingResult, ErrorObject> {
    Ok(PingResult {})
}
