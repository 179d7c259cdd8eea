// Expose modules and types needed for tests and the binary itself
pub mod auth;
pub mod config;
pub mod fulcra;
pub mod handlers;
pub mod http_transport;
pub mod mcp;
pub mod middleware;
pub mod server;
pub mod session_tokens;
