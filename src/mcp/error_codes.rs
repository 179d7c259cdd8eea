// Standard JSON-RPC Error Codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// MCP reserved
pub const RESOURCE_NOT_FOUND: i64 = -32002;

// Session and authorization errors
pub const NOT_AUTHORIZED: i64 = -32030;
pub const SESSION_REQUIRED: i64 = -32031;

// Upstream Fulcra errors
pub const UPSTREAM_API_FAILED: i64 = -32040;
pub const TOKEN_REFRESH_FAILED: i64 = -32041;
