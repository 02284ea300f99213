//! One-shot subprocess-stdio backend transport: spawns `command args...`,
//! writes one newline-terminated JSON-RPC request to its stdin, reads one
//! newline-terminated response from its stdout, then kills the process.
//!
//! Line-delimited JSON-RPC is the framing every stdio MCP server in the
//! wild actually speaks. Each call pays the process-spawn cost rather than
//! keeping a long-lived child around, since only a request/response pair is
//! required, not a persistent worker.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::{BackendTransport, TransportError, DEFAULT_TIMEOUT};

pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, request_body: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Connection("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Connection("child stdout unavailable".to_string()))?;

        stdin
            .write_all(request_body)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        stdin
            .shutdown()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let mut line = String::new();
        let mut reader = BufReader::new(stdout);
        let read = reader.read_line(&mut line);

        let result = match read.await {
            Ok(0) => Err(TransportError::MalformedResponse(
                "backend closed stdout without a response".to_string(),
            )),
            Ok(_) => Ok(line.trim_end().as_bytes().to_vec()),
            Err(e) => Err(TransportError::Connection(e.to_string())),
        };

        let _ = child.start_kill();
        let _ = child.wait().await;
        result
    }
}

#[async_trait]
impl BackendTransport for StdioTransport {
    async fn call(&self, request_body: &[u8]) -> Result<Vec<u8>, TransportError> {
        tokio::time::timeout(self.timeout, self.run(request_body))
            .await
            .unwrap_or(Err(TransportError::Timeout(self.timeout)))
    }
}
