pub mod arguments;
pub mod error_codes;
pub mod types;
