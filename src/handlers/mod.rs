pub mod initialize;
pub mod oauth_handler;
pub mod ping;
pub mod resources;
pub mod tool;

#[cfg(test)]
pub mod test_utils;
