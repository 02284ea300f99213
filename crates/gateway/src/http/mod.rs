//! C6 — the streaming plane: the axum `Router` serving `{prefix}/mcp` and
//! the internal `/_reload` endpoint.
//!
//! `POST {prefix}/mcp` accepts one JSON-RPC message (request or
//! notification) and, for `initialize`, mints a new `Mcp-Session-Id`.
//! `GET {prefix}/mcp` opens the session's SSE stream and drains its message
//! queue until the client disconnects. `DELETE {prefix}/mcp` unregisters the
//! session. `OPTIONS` exists for CORS preflight only.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router as AxumRouter};
use futures::stream::Stream;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::protocol::{JsonRpcErrorCode, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::reload::ReloadController;
use crate::router::{Dispatch, Router};
use crate::session::{Message, SessionMeta, SessionStore};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub sessions: Arc<dyn SessionStore>,
    pub reload: Arc<ReloadController>,
    pub env: Arc<BTreeMap<String, String>>,
}

pub fn build_router(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/{prefix}/mcp", post(handle_post).get(handle_get).delete(handle_delete))
        .route("/_reload", post(handle_reload))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_post(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let prefix = format!("/{prefix}");
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let resp = JsonRpcResponse::failure(
                RequestId::Number(0),
                JsonRpcErrorCode::ParseError.error(e.to_string()),
            );
            return (StatusCode::BAD_REQUEST, Json(resp)).into_response();
        },
    };

    let incoming_session = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if request.method == "initialize" {
        return handle_initialize(state, prefix, request, incoming_session).await;
    }

    // Every other method requires a live session carried on the request. A
    // missing header is a malformed request (InvalidRequest); a present but
    // unknown id is the 404 case below, once the store is actually checked.
    let Some(session_id) = incoming_session else {
        let resp = JsonRpcResponse::failure(
            request.id.clone().unwrap_or(RequestId::Number(0)),
            JsonRpcErrorCode::InvalidRequest.error("missing Mcp-Session-Id header"),
        );
        return (StatusCode::BAD_REQUEST, Json(resp)).into_response();
    };
    match state.sessions.get(&session_id).await {
        Ok(Some(_)) => {},
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, "session lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    }

    let dispatch = state.router.dispatch(&prefix, request, &state.env).await;
    with_session_header(dispatch, &session_id)
}

async fn handle_initialize(
    state: AppState,
    prefix: String,
    request: JsonRpcRequest,
    incoming_session: Option<String>,
) -> Response {
    // Re-issuing `initialize` with an existing session id attached returns
    // that same session rather than minting a duplicate.
    if let Some(id) = &incoming_session {
        match state.sessions.get(id).await {
            Ok(Some(_)) => {
                let reply = state.router.dispatch(&prefix, request, &state.env).await;
                return with_session_header(reply, id);
            },
            Ok(None) => {},
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            },
        }
    }

    match state.router.dispatch(&prefix, request, &state.env).await {
        Dispatch::NoReply => StatusCode::ACCEPTED.into_response(),
        Dispatch::Reply(resp) if resp.error.is_none() => {
            let meta = SessionMeta::new(crate::session::SessionId::new().to_string(), prefix.clone());
            let session_id = meta.id.clone();
            if let Err(e) = state.sessions.register(meta).await {
                warn!(error = %e, "failed to register session");
            }
            with_session_header(Dispatch::Reply(resp), &session_id)
        },
        reply => with_session_header(reply, &incoming_session.unwrap_or_default()),
    }
}

fn with_session_header(dispatch: Dispatch, session_id: &str) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        headers.insert(SESSION_HEADER, value);
    }
    match dispatch {
        Dispatch::NoReply => (StatusCode::ACCEPTED, headers).into_response(),
        Dispatch::Reply(resp) => {
            let status = resp
                .error
                .as_ref()
                .map(|e| http_status_for_error_code(e.code))
                .unwrap_or(StatusCode::OK);
            (status, headers, Json(resp)).into_response()
        },
    }
}

fn http_status_for_error_code(code: i64) -> StatusCode {
    match code {
        c if c == JsonRpcErrorCode::ParseError.code() => StatusCode::BAD_REQUEST,
        c if c == JsonRpcErrorCode::InvalidRequest.code() => StatusCode::BAD_REQUEST,
        c if c == JsonRpcErrorCode::InvalidParams.code() => StatusCode::BAD_REQUEST,
        c if c == JsonRpcErrorCode::MethodNotFound.code() => StatusCode::NOT_FOUND,
        c if c == JsonRpcErrorCode::RequestTimeout.code() => StatusCode::GATEWAY_TIMEOUT,
        c if c == JsonRpcErrorCode::ConnectionClosed.code() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_get(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.sessions.get(&session_id).await {
        Ok(Some(_)) => {},
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, "session lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    }

    // `Last-Event-ID` signals the client reconnected after a drop. This
    // gateway does not replay a backlog — there is no durable per-session
    // event log — so the header is acknowledged (never silently dropped)
    // but does not change which messages are delivered from here on.
    if let Some(last_id) = headers.get(LAST_EVENT_ID_HEADER).and_then(|v| v.to_str().ok()) {
        info!(session_id = %session_id, last_event_id = %last_id, "client reconnected");
    }
    let _ = prefix;

    let stream = drain_stream(state.sessions.clone(), session_id);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn drain_stream(
    sessions: Arc<dyn SessionStore>,
    session_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold((sessions, session_id), |(sessions, session_id)| async move {
        match sessions.next_message(&session_id).await {
            Ok(Some(msg)) => Some((Ok(to_event(msg)), (sessions, session_id))),
            Ok(None) => None,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "session drain failed");
                None
            },
        }
    })
}

fn to_event(msg: Message) -> Event {
    // `msg.id` is the per-session message counter, not a wire-level SSE id;
    // the frame carries only `event:`/`data:` lines.
    let mut event = Event::default().data(msg.data);
    if let Some(name) = msg.event {
        event = event.event(name);
    }
    event
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    headers: HeaderMap,
) -> Response {
    let _ = prefix;
    let Some(session_id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match state.sessions.unregister(&session_id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            warn!(error = %e, "session unregister failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

async fn handle_reload(State(state): State<AppState>) -> Response {
    match state.reload.reload_now().await {
        Ok(snapshot) => {
            info!(servers = snapshot.servers.len(), "reload applied");
            (StatusCode::OK, Json(json!({"status": "reload triggered"}))).into_response()
        },
        Err(e) => {
            warn!(error = %e, "reload rejected");
            (StatusCode::CONFLICT, e.to_string()).into_response()
        },
    }
}
