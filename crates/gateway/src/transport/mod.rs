//! C4: backend transports. Both are one-shot: a single request in, a
//! single response out, no persistent connection held across tool calls.
//! The gateway does not pool or multiplex upstream MCP sessions; it
//! resolves a tool call to exactly one request/response pair.

pub mod stdio;
pub mod streamable;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// How long a single backend round-trip may take before the gateway gives
/// up and reports `RequestTimeout` back to the caller.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("backend request timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend connection failed: {0}")]
    Connection(String),
    #[error("backend returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("backend process exited with status {0}")]
    ProcessExited(String),
}

/// A single backend invocation: the body to send and where to send it is
/// entirely up to the implementor (HTTP URL + headers, or a subprocess
/// command + args); the router only ever sees bytes in, bytes out.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn call(&self, request_body: &[u8]) -> Result<Vec<u8>, TransportError>;
}
