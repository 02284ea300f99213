//! End-to-end coverage of the gateway's HTTP surface: one axum `Router`
//! built the same way the supervisor builds it, driven with `tower::oneshot`
//! instead of a bound socket.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use http_body_util::BodyExt;
use mcp_gateway::config::store::StaticConfigStore;
use mcp_gateway::config::{merge_configs, MCPServerConfig, RawGatewayConfig, RouterEntry, ServerConfig, ToolDefinition, ToolMethod};
use mcp_gateway::http::{build_router, AppState, SESSION_HEADER};
use mcp_gateway::reload::ReloadController;
use mcp_gateway::router::Router;
use mcp_gateway::session::local::LocalSessionStore;
use mcp_gateway::session::{Message, SessionStore};
use futures_util::StreamExt;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_state(backend_url: String) -> (AppState, Arc<dyn SessionStore>) {
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
            description: None,
            method: ToolMethod::Streamable,
            input_schema: serde_json::json!({"type": "object"}),
            target: Some("backend".to_string()),
            request_template: Some("{{ args.x }}".to_string()),
            response_template: None,
            env: Default::default(),
        }],
        mcp_servers: vec![MCPServerConfig::Streamable {
            name: "backend".to_string(),
            url: backend_url,
            headers: Default::default(),
        }],
    };
    let store = StaticConfigStore::new(vec![doc]);
    let reload = Arc::new(ReloadController::bootstrap(Box::new(store)).await.unwrap());
    let router = Arc::new(Router::new(reload.snapshot()));
    let sessions: Arc<dyn SessionStore> = Arc::new(LocalSessionStore::new());

    let state = AppState {
        router,
        sessions: sessions.clone(),
        reload,
        env: Arc::new(BTreeMap::new()),
    };
    (state, sessions)
}

fn jsonrpc(id: i64, method: &str, params: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    }))
    .unwrap()
}

#[tokio::test]
async fn s1_initialize_then_tools_list() {
    let (state, _sessions) = test_state("http://127.0.0.1:1/unused".to_string()).await;
    let app = build_router(state);

    let resp = app
        .clone()
        .oneshot(
            http::Request::post("/svc/mcp")
                .body(axum::body::Body::from(jsonrpc(1, "initialize", serde_json::json!({}))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), http::StatusCode::OK);
    let session_id = resp
        .headers()
        .get(SESSION_HEADER)
        .expect("session header present")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(uuid::Uuid::parse_str(&session_id).is_ok(), true);

    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["result"]["serverInfo"]["name"], "mcp-gateway");

    let resp = app
        .oneshot(
            http::Request::post("/svc/mcp")
                .header(SESSION_HEADER, session_id)
                .body(axum::body::Body::from(jsonrpc(2, "tools/list", serde_json::json!({}))))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), http::StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["result"]["tools"][0]["name"], "echo");
}

#[tokio::test]
async fn s2_tools_call_through_streamable_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("hi", "text/plain"))
        .mount(&server)
        .await;

    let (state, _sessions) = test_state(server.uri()).await;
    let app = build_router(state);

    let init = app
        .clone()
        .oneshot(
            http::Request::post("/svc/mcp")
                .body(axum::body::Body::from(jsonrpc(1, "initialize", serde_json::json!({}))))
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = init.headers().get(SESSION_HEADER).unwrap().to_str().unwrap().to_string();

    let resp = app
        .oneshot(
            http::Request::post("/svc/mcp")
                .header(SESSION_HEADER, session_id)
                .body(axum::body::Body::from(jsonrpc(
                    3,
                    "tools/call",
                    serde_json::json!({"name": "echo", "arguments": {"x": "hi"}}),
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), http::StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["result"]["content"][0]["text"], "hi");
    assert_eq!(value["result"]["isError"], false);
}

#[tokio::test]
async fn s3_unknown_tool_is_method_not_found_and_http_404() {
    let (state, _sessions) = test_state("http://127.0.0.1:1/unused".to_string()).await;
    let app = build_router(state);

    let init = app
        .clone()
        .oneshot(
            http::Request::post("/svc/mcp")
                .body(axum::body::Body::from(jsonrpc(1, "initialize", serde_json::json!({}))))
                .unwrap(),
        )
        .await
        .unwrap();
    let session_id = init.headers().get(SESSION_HEADER).unwrap().to_str().unwrap().to_string();

    let resp = app
        .oneshot(
            http::Request::post("/svc/mcp")
                .header(SESSION_HEADER, session_id)
                .body(axum::body::Body::from(jsonrpc(
                    4,
                    "tools/call",
                    serde_json::json!({"name": "missing"}),
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), http::StatusCode::NOT_FOUND);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"]["code"], -32601);
}

#[tokio::test]
async fn s6_overflow_drops_past_queue_capacity() {
    let sessions = LocalSessionStore::new();
    sessions
        .register(mcp_gateway::session::SessionMeta::new("s1", "/svc"))
        .await
        .unwrap();
    for i in 0..150 {
        sessions
            .publish("s1", Message::new(format!("m{i}")))
            .await
            .unwrap();
    }
    let mut drained = 0;
    while sessions.next_message("s1").await.unwrap().is_some() {
        drained += 1;
        if drained >= mcp_gateway::session::QUEUE_CAPACITY {
            break;
        }
    }
    assert_eq!(drained, mcp_gateway::session::QUEUE_CAPACITY);
}

#[tokio::test]
async fn s4_sse_drain_emits_exact_wire_format() {
    let (state, sessions) = test_state("http://127.0.0.1:1/unused".to_string()).await;
    sessions
        .register(mcp_gateway::session::SessionMeta::new("s4", "/svc"))
        .await
        .unwrap();
    sessions.publish("s4", Message::new("hello")).await.unwrap();
    let app = build_router(state);

    let resp = app
        .oneshot(
            http::Request::get("/svc/mcp")
                .header(SESSION_HEADER, "s4")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), http::StatusCode::OK);

    let mut stream = resp.into_body().into_data_stream();
    let chunk = tokio::time::timeout(std::time::Duration::from_secs(1), stream.next())
        .await
        .expect("first SSE frame arrives")
        .expect("stream yields a chunk")
        .unwrap();
    assert_eq!(chunk, "data: hello\n\n");
}

#[tokio::test]
async fn deleted_session_sse_returns_404() {
    let (state, sessions) = test_state("http://127.0.0.1:1/unused".to_string()).await;
    sessions
        .register(mcp_gateway::session::SessionMeta::new("s1", "/svc"))
        .await
        .unwrap();
    let app = build_router(state);

    let resp = app
        .clone()
        .oneshot(
            http::Request::delete("/svc/mcp")
                .header(SESSION_HEADER, "s1")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), http::StatusCode::OK);

    let resp = app
        .oneshot(
            http::Request::get("/svc/mcp")
                .header(SESSION_HEADER, "s1")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), http::StatusCode::NOT_FOUND);
}
