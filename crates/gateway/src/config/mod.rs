//! C1: the merged, indexed, immutable gateway configuration snapshot.
//!
//! Mirrors the shape of the teacher's `RawConfig` → internal `Config` split:
//! operators author [`RawGatewayConfig`] documents (one per config-store
//! entry); [`merge_configs`] folds them into one [`GatewayConfig`] snapshot
//! with derived lookup tables for prefix-to-server and prefix-to-tool
//! resolution.

pub mod store;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One server definition: a name, the tools it allows, and the config bag
/// its templates render against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Free-form key/value bag, rendered into tool templates under `config.*`.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// `method` of a [`ToolDefinition`]: an HTTP verb, or one of the two
/// backend-transport markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Stdio,
    Streamable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub method: ToolMethod,
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
    /// Which backend (by name in `mcpServers`) a `stdio`/`streamable` tool
    /// dispatches to. Required for those two methods, ignored otherwise.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub request_template: Option<String>,
    #[serde(default)]
    pub response_template: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object"})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MCPServerConfig {
    Streamable {
        name: String,
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Stdio {
        name: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
}

impl MCPServerConfig {
    pub fn name(&self) -> &str {
        match self {
            MCPServerConfig::Streamable { name, .. } => name,
            MCPServerConfig::Stdio { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterEntry {
    pub prefix: String,
    pub server_name: String,
}

/// One document as returned by a [`store::ConfigStore`]. Multiple documents
/// are folded together by [`merge_configs`]; a single gateway deployment
/// typically has one document per team/namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawGatewayConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub routers: Vec<RouterEntry>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub mcp_servers: Vec<MCPServerConfig>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("duplicate prefix {prefix:?}: claimed by both {first:?} and {second:?}")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String,
    },
    #[error("duplicate server name {0:?}")]
    DuplicateServer(String),
    #[error("duplicate tool name {0:?}")]
    DuplicateTool(String),
    #[error("duplicate mcp server name {0:?}")]
    DuplicateMcpServer(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("router prefix {prefix:?} names unknown server {server:?}")]
    UnknownServer { prefix: String, server: String },
    #[error("server {server:?} allows unknown tool {tool:?}")]
    UnknownTool { server: String, tool: String },
    #[error("tool {tool:?} targets unknown mcp server {target:?}")]
    UnknownTarget { tool: String, target: String },
    #[error("tool {tool:?} has method {method:?} but no target mcp server configured")]
    MissingTarget { tool: String, method: String },
}

/// The immutable, fully-indexed configuration snapshot. Built once by
/// [`merge_configs`] and never mutated afterwards; the reload controller
/// (C7) publishes a brand new one instead.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub servers: BTreeMap<String, ServerConfig>,
    pub routers: Vec<RouterEntry>,
    pub tools: BTreeMap<String, ToolDefinition>,
    pub mcp_servers: BTreeMap<String, MCPServerConfig>,

    prefix_to_server: HashMap<String, String>,
    prefix_to_tools: HashMap<String, Vec<String>>,
}

impl GatewayConfig {
    pub fn prefix_to_server(&self, prefix: &str) -> Option<&ServerConfig> {
        self.prefix_to_server
            .get(prefix)
            .and_then(|name| self.servers.get(name))
    }

    /// The ordered tool list a prefix exposes via `tools/list`, projected
    /// from that prefix's server's `allowedTools`.
    pub fn tools_for_prefix(&self, prefix: &str) -> Vec<&ToolDefinition> {
        self.prefix_to_tools
            .get(prefix)
            .into_iter()
            .flatten()
            .filter_map(|name| self.tools.get(name))
            .collect()
    }

    pub fn tool_allowed_for_prefix(&self, prefix: &str, tool_name: &str) -> bool {
        self.prefix_to_tools
            .get(prefix)
            .is_some_and(|tools| tools.iter().any(|t| t == tool_name))
    }

    pub fn tool_by_name(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn mcp_server(&self, name: &str) -> Option<&MCPServerConfig> {
        self.mcp_servers.get(name)
    }
}

/// Concatenate `docs` and build the indexed [`GatewayConfig`] snapshot.
///
/// Pure and deterministic: any permutation of `docs` yields byte-identical
/// indexed tables, since every collection is keyed and iterated in sorted
/// (`BTreeMap`) order rather than insertion order.
pub fn merge_configs(docs: &[RawGatewayConfig]) -> Result<GatewayConfig, ConfigError> {
    let mut servers = BTreeMap::new();
    let mut tools = BTreeMap::new();
    let mut mcp_servers = BTreeMap::new();
    let mut routers: Vec<RouterEntry> = Vec::new();

    for doc in docs {
        for server in &doc.servers {
            if servers.contains_key(&server.name) {
                return Err(ConflictError::DuplicateServer(server.name.clone()).into());
            }
            servers.insert(server.name.clone(), server.clone());
        }
        for tool in &doc.tools {
            if tools.contains_key(&tool.name) {
                return Err(ConflictError::DuplicateTool(tool.name.clone()).into());
            }
            tools.insert(tool.name.clone(), tool.clone());
        }
        for mcp in &doc.mcp_servers {
            let name = mcp.name().to_string();
            if mcp_servers.contains_key(&name) {
                return Err(ConflictError::DuplicateMcpServer(name).into());
            }
            mcp_servers.insert(name, mcp.clone());
        }
        for router in &doc.routers {
            if let Some(existing) = routers.iter().find(|r| r.prefix == router.prefix) {
                return Err(ConflictError::DuplicatePrefix {
                    prefix: router.prefix.clone(),
                    first: existing.server_name.clone(),
                    second: router.server_name.clone(),
                }
                .into());
            }
            routers.push(router.clone());
        }
    }
    // Sort by name/prefix so the derived indices below are independent of
    // the order `docs` (and their contents) were supplied in.
    routers.sort_by(|a, b| a.prefix.cmp(&b.prefix));

    for router in &routers {
        if !servers.contains_key(&router.server_name) {
            return Err(ConfigError::UnknownServer {
                prefix: router.prefix.clone(),
                server: router.server_name.clone(),
            });
        }
    }
    for server in servers.values() {
        for tool in &server.allowed_tools {
            if !tools.contains_key(tool) {
                return Err(ConfigError::UnknownTool {
                    server: server.name.clone(),
                    tool: tool.clone(),
                });
            }
        }
    }
    for tool in tools.values() {
        let needs_target = matches!(tool.method, ToolMethod::Stdio | ToolMethod::Streamable);
        match (&tool.target, needs_target) {
            (Some(target), true) if !mcp_servers.contains_key(target) => {
                return Err(ConfigError::UnknownTarget {
                    tool: tool.name.clone(),
                    target: target.clone(),
                });
            },
            (None, true) => {
                return Err(ConfigError::MissingTarget {
                    tool: tool.name.clone(),
                    method: format!("{:?}", tool.method),
                });
            },
            _ => {},
        }
    }

    let mut prefix_to_server = HashMap::new();
    let mut prefix_to_tools = HashMap::new();
    for router in &routers {
        prefix_to_server.insert(router.prefix.clone(), router.server_name.clone());
        let server = &servers[&router.server_name];
        let mut allowed: Vec<String> = server.allowed_tools.clone();
        allowed.sort();
        prefix_to_tools.insert(router.prefix.clone(), allowed);
    }

    Ok(GatewayConfig {
        servers,
        routers,
        tools,
        mcp_servers,
        prefix_to_server,
        prefix_to_tools,
    })
}
