//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Every request runs through the backoff retry executor; transient failures
//! (connection errors, non-2xx statuses, timeouts) are retried, JSON-RPC
//! execution errors are returned as-is.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use chainwatch_core::error::TransportError;
use chainwatch_core::policy::{RetryConfig, RetryPolicy};
use chainwatch_core::request::{JsonRpcRequest, JsonRpcResponse};
use chainwatch_core::transport::{HealthStatus, RpcTransport};

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Latest blockhash as returned by `getLatestBlockhash`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestBlockhash {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

/// HTTP JSON-RPC client with retry built in.
pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        config.retry.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    /// Current slot (`getSlot`), i.e. the chain tip.
    pub async fn latest_slot(&self) -> Result<u64, TransportError> {
        self.call(self.next_id(), "getSlot", vec![]).await
    }

    /// Latest blockhash at `commitment`.
    pub async fn latest_blockhash(&self, commitment: &str) -> Result<LatestBlockhash, TransportError> {
        let resp: WithContext<LatestBlockhash> = self
            .call(
                self.next_id(),
                "getLatestBlockhash",
                vec![serde_json::json!({ "commitment": commitment })],
            )
            .await?;
        Ok(resp.value)
    }

    /// Call `method` with an id drawn from this client's counter.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        self.call(self.next_id(), method, params).await
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    TransportError::Http(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        tracing::debug!(url = %self.url, method = %req.method, "sending request");
        self.retry
            .run_if(|| self.send_once(&req), TransportError::is_retryable)
            .await
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    fn url(&self) -> &str {
        &self.url
    }
}
