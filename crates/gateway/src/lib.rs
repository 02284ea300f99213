//! A small MCP-aware API gateway: reads one or more YAML/JSON config
//! documents describing upstream MCP servers and the tools they expose,
//! merges them into one routing table, and proxies `tools/call` to the
//! right backend over either subprocess stdio or streamable HTTP.

pub mod config;
pub mod http;
pub mod protocol;
pub mod reload;
pub mod router;
pub mod session;
pub mod supervisor;
pub mod template;
pub mod transport;
