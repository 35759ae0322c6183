//! Coordinator RPC client.
//!
//! The worker only ever makes two calls: `fetch_job` once per session and
//! `next_frame` once per loop iteration. [`Coordinator`] is the seam the
//! loop depends on; [`JsonRpcCoordinator`] is the production transport,
//! JSON-RPC 2.0 over HTTP POST using [`reqwest`].

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use farmhand_core::job::{FrameClaim, JobDescriptor};

const JSONRPC_VERSION: &str = "2.0";

/// Errors from the coordinator transport. Queue exhaustion arrives as a
/// [`RpcError::Fault`] and is indistinguishable from any other failure.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid coordinator endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The HTTP request itself failed (connection refused, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The coordinator answered with a non-2xx status code.
    #[error("Coordinator HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    /// The remote procedure raised.
    #[error("Coordinator fault {code}: {message}")]
    Fault { code: i64, message: String },

    /// The payload did not decode into the expected type.
    #[error("Malformed coordinator response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Remote work queue the worker claims frames from.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Fetch the job descriptor for this worker's session.
    async fn fetch_job(&self, token: i64) -> Result<JobDescriptor, RpcError>;

    /// Claim the next frame. Faults once the queue is exhausted.
    async fn next_frame(&self, token: i64) -> Result<FrameClaim, RpcError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    #[serde(default)]
    code: i64,
    message: String,
}

/// JSON-RPC client for a single coordinator endpoint.
#[derive(Debug)]
pub struct JsonRpcCoordinator {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    next_id: AtomicU64,
}

impl JsonRpcCoordinator {
    /// Create a client for `endpoint`, e.g. `http://localhost:8081`.
    ///
    /// No request is made here; an unreachable coordinator surfaces on
    /// the first call.
    pub fn connect(endpoint: &str) -> Result<Self, RpcError> {
        let endpoint = reqwest::Url::parse(endpoint).map_err(|e| RpcError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::with_client(reqwest::Client::new(), endpoint))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, endpoint: reqwest::Url) -> Self {
        Self {
            client,
            endpoint,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &reqwest::Url {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        tracing::debug!(method, id = request.id, "Coordinator call");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RpcError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: RpcResponse = serde_json::from_str(&body)?;
        if let Some(fault) = envelope.error {
            return Err(RpcError::Fault {
                code: fault.code,
                message: fault.message,
            });
        }
        let result = envelope.result.unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait]
impl Coordinator for JsonRpcCoordinator {
    async fn fetch_job(&self, token: i64) -> Result<JobDescriptor, RpcError> {
        self.call("fetch_job", serde_json::json!([token])).await
    }

    async fn next_frame(&self, token: i64) -> Result<FrameClaim, RpcError> {
        self.call("next_frame", serde_json::json!([token])).await
    }
}
