//! One-shot streamable-HTTP backend transport: a single `POST` with a JSON
//! body, configured headers, and a hard timeout. The upstream server's own
//! SSE behavior (if any) is not followed; the gateway reads exactly one
//! JSON-RPC response body per call.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};

use super::{BackendTransport, TransportError, DEFAULT_TIMEOUT};

pub struct StreamableHttpTransport {
    client: Client,
    url: String,
    headers: BTreeMap<String, String>,
    timeout: Duration,
}

impl StreamableHttpTransport {
    pub fn new(url: impl Into<String>, headers: BTreeMap<String, String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            headers,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send with an explicit HTTP verb; used for tools whose `method` is a
    /// plain REST verb rather than the `streamable` JSON-RPC proxy marker.
    /// `GET`/`DELETE` carry `request_body` as the query string, not a body.
    pub async fn call_verb(&self, verb: Method, request_body: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut req = self.client.request(verb.clone(), &self.url).timeout(self.timeout);
        req = match verb {
            Method::GET | Method::DELETE => {
                let query = String::from_utf8_lossy(request_body).into_owned();
                if query.is_empty() {
                    req
                } else {
                    req.query(&[("q", query)])
                }
            },
            _ => req
                .header("content-type", "application/json")
                .body(request_body.to_vec()),
        };
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Connection(e.to_string())
            }
        })?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl BackendTransport for StreamableHttpTransport {
    async fn call(&self, request_body: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.call_verb(Method::POST, request_body).await
    }
}
