//! Build metadata reported in `serverInfo` during MCP `initialize` and in the
//! startup log line.

#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub rust_version: &'static str,
}

impl BuildInfo {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            rust_version: option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
        }
    }
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self::new()
    }
}
