//! C5: the router. Resolves a `{prefix}/mcp` request to a server, dispatches
//! the four canonical methods, and turns a resolved tool + caller arguments
//! into a single backend invocation.

use std::sync::Arc;

use arc_swap::ArcSwap;
use reqwest::Method as HttpMethod;
use tracing::{info, warn};

use crate::config::{GatewayConfig, MCPServerConfig, ToolDefinition, ToolMethod};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeResult, JsonRpcError, JsonRpcErrorCode,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, Method, RequestId, ToolSchema,
};
use crate::template::{self, Template};
use crate::transport::stdio::StdioTransport;
use crate::transport::streamable::StreamableHttpTransport;
use crate::transport::TransportError;

/// Outcome of dispatching one request: either a response to write back, or
/// nothing at all for a notification. Notifications never get an ack or an
/// error, regardless of method.
pub enum Dispatch {
    Reply(JsonRpcResponse),
    NoReply,
}

pub struct Router {
    config: Arc<ArcSwap<GatewayConfig>>,
}

impl Router {
    pub fn new(config: Arc<ArcSwap<GatewayConfig>>) -> Self {
        Self { config }
    }

    pub fn snapshot(&self) -> Arc<GatewayConfig> {
        self.config.load_full()
    }

    pub async fn dispatch(
        &self,
        prefix: &str,
        request: JsonRpcRequest,
        env: &std::collections::BTreeMap<String, String>,
    ) -> Dispatch {
        let id = match request.id.clone() {
            Some(id) => id,
            None => {
                // Lifecycle notifications are accepted and ignored; nothing
                // replies to a notification regardless of method.
                self.log_notification(&request);
                return Dispatch::NoReply;
            },
        };

        let method = Method::from(request.method.as_str());
        let config = self.config.load_full();

        let Some(server) = config.prefix_to_server(prefix) else {
            return Dispatch::Reply(JsonRpcResponse::failure(
                id,
                JsonRpcErrorCode::InvalidRequest.error(format!("unknown prefix {prefix:?}")),
            ));
        };

        match method {
            Method::Initialize => Dispatch::Reply(JsonRpcResponse::success(
                id,
                serde_json::to_value(InitializeResult::new()).expect("InitializeResult serializes"),
            )),
            Method::Ping => Dispatch::Reply(JsonRpcResponse::success(id, serde_json::json!({}))),
            Method::ToolsList => {
                let tools = config
                    .tools_for_prefix(prefix)
                    .into_iter()
                    .map(tool_schema)
                    .collect();
                let result = ListToolsResult {
                    tools,
                    next_cursor: None,
                };
                Dispatch::Reply(JsonRpcResponse::success(
                    id,
                    serde_json::to_value(result).expect("ListToolsResult serializes"),
                ))
            },
            Method::ToolsCall => {
                self.dispatch_tools_call(&config, prefix, server.config.clone(), id, request, env)
                    .await
            },
            Method::NotificationsInitialized | Method::NotificationsCancelled => {
                // These carry an id in some clients despite being
                // conceptually notifications; still no reply is correct.
                Dispatch::NoReply
            },
            Method::Other(name) => Dispatch::Reply(JsonRpcResponse::failure(
                id,
                JsonRpcErrorCode::MethodNotFound.error(format!("unknown method {name:?}")),
            )),
        }
    }

    fn log_notification(&self, request: &JsonRpcRequest) {
        info!(method = %request.method, "received notification");
    }

    async fn dispatch_tools_call(
        &self,
        config: &GatewayConfig,
        prefix: &str,
        server_config: serde_json::Map<String, serde_json::Value>,
        id: RequestId,
        request: JsonRpcRequest,
        env: &std::collections::BTreeMap<String, String>,
    ) -> Dispatch {
        let params: CallToolParams = match request
            .params
            .clone()
            .ok_or_else(|| "missing params".to_string())
            .and_then(|v| serde_json::from_value(v).map_err(|e| e.to_string()))
        {
            Ok(p) => p,
            Err(msg) => {
                return Dispatch::Reply(JsonRpcResponse::failure(
                    id,
                    JsonRpcErrorCode::InvalidParams.error(msg),
                ));
            },
        };

        // An unresolved tool name is treated the same as an unresolved
        // JSON-RPC method: the caller named a remote procedure that does
        // not exist on this prefix.
        if !config.tool_allowed_for_prefix(prefix, &params.name) {
            return Dispatch::Reply(JsonRpcResponse::failure(
                id,
                JsonRpcErrorCode::MethodNotFound
                    .error(format!("tool {:?} is not exposed on prefix {prefix:?}", params.name)),
            ));
        }
        let Some(tool) = config.tool_by_name(&params.name) else {
            return Dispatch::Reply(JsonRpcResponse::failure(
                id,
                JsonRpcErrorCode::MethodNotFound.error(format!("unknown tool {:?}", params.name)),
            ));
        };

        let args = serde_json::Value::Object(params.arguments.clone().unwrap_or_default());
        let mut ctx = template::Context::new(env.clone());
        ctx.args = args;
        ctx.config = serde_json::Value::Object(server_config);

        match self.call_tool(config, tool, &ctx).await {
            Ok(result) => Dispatch::Reply(JsonRpcResponse::success(
                id,
                serde_json::to_value(result).expect("CallToolResult serializes"),
            )),
            Err(DispatchError::InvalidParams(msg)) => {
                Dispatch::Reply(JsonRpcResponse::failure(id, JsonRpcErrorCode::InvalidParams.error(msg)))
            },
            Err(DispatchError::Backend(e)) => {
                warn!(tool = %tool.name, error = %e, "backend invocation failed");
                // A backend failure is reported as a tool error: the
                // JSON-RPC envelope still succeeds, and only the nested
                // `CallToolResult.isError` flags the failure to the caller.
                Dispatch::Reply(JsonRpcResponse::success(
                    id,
                    serde_json::to_value(CallToolResult::error(e.to_string()))
                        .expect("CallToolResult serializes"),
                ))
            },
        }
    }

    async fn call_tool(
        &self,
        config: &GatewayConfig,
        tool: &ToolDefinition,
        ctx: &template::Context,
    ) -> Result<CallToolResult, DispatchError> {
        let body = match &tool.request_template {
            Some(src) => {
                let parsed = Template::parse(src).map_err(|e| DispatchError::InvalidParams(e.to_string()))?;
                parsed
                    .render_strict(ctx)
                    .map_err(|e| DispatchError::InvalidParams(e.to_string()))?
            },
            None => ctx.args.to_string(),
        };

        let target_name = tool.target.as_deref().ok_or_else(|| {
            DispatchError::InvalidParams(format!("tool {:?} has no target configured", tool.name))
        })?;
        let target = config.mcp_server(target_name).ok_or_else(|| {
            DispatchError::InvalidParams(format!("tool {:?} targets unknown server {target_name:?}", tool.name))
        })?;

        let raw = self.invoke_backend(tool, target, body.into_bytes()).await?;
        let text = String::from_utf8_lossy(&raw).into_owned();

        let text = match &tool.response_template {
            Some(src) => {
                let parsed = Template::parse(src).map_err(|e| DispatchError::InvalidParams(e.to_string()))?;
                let mut ctx = ctx.clone();
                ctx.args = serde_json::json!({ "response": text });
                parsed.render(&ctx)
            },
            None => text,
        };
        Ok(CallToolResult::ok(text))
    }

    async fn invoke_backend(
        &self,
        tool: &ToolDefinition,
        target: &MCPServerConfig,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, DispatchError> {
        match (&tool.method, target) {
            (ToolMethod::Stdio, MCPServerConfig::Stdio { command, args, env, .. }) => {
                let mut merged_env = env.clone();
                merged_env.extend(tool.env.clone());
                let transport = StdioTransport::new(command.clone(), args.clone(), merged_env);
                crate::transport::BackendTransport::call(&transport, &body)
                    .await
                    .map_err(DispatchError::Backend)
            },
            (ToolMethod::Streamable, MCPServerConfig::Streamable { url, headers, .. }) => {
                let transport = StreamableHttpTransport::new(url.clone(), headers.clone());
                crate::transport::BackendTransport::call(&transport, &body)
                    .await
                    .map_err(DispatchError::Backend)
            },
            (verb @ (ToolMethod::Get | ToolMethod::Post | ToolMethod::Put | ToolMethod::Delete | ToolMethod::Patch),
             MCPServerConfig::Streamable { url, headers, .. }) => {
                let transport = StreamableHttpTransport::new(url.clone(), headers.clone());
                transport
                    .call_verb(http_verb(verb), &body)
                    .await
                    .map_err(DispatchError::Backend)
            },
            (method, _) => Err(DispatchError::InvalidParams(format!(
                "tool {:?} method {method:?} is incompatible with target {:?}",
                tool.name,
                target.name()
            ))),
        }
    }
}

fn http_verb(method: &ToolMethod) -> HttpMethod {
    match method {
        ToolMethod::Get => HttpMethod::GET,
        ToolMethod::Post => HttpMethod::POST,
        ToolMethod::Put => HttpMethod::PUT,
        ToolMethod::Delete => HttpMethod::DELETE,
        ToolMethod::Patch => HttpMethod::PATCH,
        ToolMethod::Stdio | ToolMethod::Streamable => unreachable!("handled above"),
    }
}

fn tool_schema(tool: &ToolDefinition) -> ToolSchema {
    ToolSchema {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
    }
}

enum DispatchError {
    InvalidParams(String),
    Backend(TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{merge_configs, RawGatewayConfig, RouterEntry, ServerConfig, ToolDefinition};

    fn sample_config() -> Arc<ArcSwap<GatewayConfig>> {
        let doc = RawGatewayConfig {
            servers: vec![ServerConfig {
                name: "svc".to_string(),
                description: None,
                allowed_tools: vec!["echo".to_string()],
                config: Default::default(),
            }],
            routers: vec![RouterEntry {
                prefix: "/svc".to_string(),
                server_name: "svc".to_string(),
            }],
            tools: vec![ToolDefinition {
                name: "echo".to_string(),
                description: Some("echoes its input".to_string()),
                method: crate::config::ToolMethod::Stdio,
                input_schema: serde_json::json!({"type": "object"}),
                target: Some("local".to_string()),
                request_template: Some("{{ args.text }}".to_string()),
                response_template: None,
                env: Default::default(),
            }],
            mcp_servers: vec![MCPServerConfig::Stdio {
                name: "local".to_string(),
                command: "cat".to_string(),
                args: vec![],
                env: Default::default(),
            }],
        };
        let merged = merge_configs(&[doc]).unwrap();
        Arc::new(ArcSwap::from_pointee(merged))
    }

    #[tokio::test]
    async fn initialize_replies_with_server_info() {
        let router = Router::new(sample_config());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(1)),
            method: "initialize".to_string(),
            params: None,
        };
        match router.dispatch("/svc", req, &Default::default()).await {
            Dispatch::Reply(resp) => assert!(resp.result.is_some()),
            Dispatch::NoReply => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn notification_produces_no_reply() {
        let router = Router::new(sample_config());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: "notifications/initialized".to_string(),
            params: None,
        };
        assert!(matches!(
            router.dispatch("/svc", req, &Default::default()).await,
            Dispatch::NoReply
        ));
    }

    #[tokio::test]
    async fn tools_list_only_returns_allowed_tools() {
        let router = Router::new(sample_config());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(2)),
            method: "tools/list".to_string(),
            params: None,
        };
        match router.dispatch("/svc", req, &Default::default()).await {
            Dispatch::Reply(resp) => {
                let result = resp.result.unwrap();
                let tools = result["tools"].as_array().unwrap();
                assert_eq!(tools.len(), 1);
                assert_eq!(tools[0]["name"], "echo");
            },
            Dispatch::NoReply => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn tools_call_round_trips_through_stdio_backend() {
        let router = Router::new(sample_config());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(3)),
            method: "tools/call".to_string(),
            params: Some(serde_json::json!({"name": "echo", "arguments": {"text": "hi"}})),
        };
        match router.dispatch("/svc", req, &Default::default()).await {
            Dispatch::Reply(resp) => {
                let result = resp.result.unwrap();
                assert_eq!(result["content"][0]["text"], "hi");
                assert_eq!(result["isError"], false);
            },
            Dispatch::NoReply => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn unknown_prefix_is_invalid_request() {
        let router = Router::new(sample_config());
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(4)),
            method: "tools/list".to_string(),
            params: None,
        };
        match router.dispatch("/nope", req, &Default::default()).await {
            Dispatch::Reply(resp) => {
                assert_eq!(resp.error.unwrap().code, JsonRpcErrorCode::InvalidRequest.code());
            },
            Dispatch::NoReply => panic!("expected a reply"),
        }
    }
}
