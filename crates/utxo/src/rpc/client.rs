// Path: crates/utxo/src/rpc/client.rs
use crate::error::ClientError;
use async_trait::async_trait;
use ferry_types::config::ChainClientConfig;
use reqwest::{header::HeaderValue, header::RETRY_AFTER, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A JSON-RPC connection to a chain daemon.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Calls `method` with positional `params` and returns the `result` member.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError>;
}

const BASE_BACKOFF_MS: u64 = 50;

fn retry_delay(attempt: u32, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(5));
    }
    let ms = BASE_BACKOFF_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(800);
    Duration::from_millis(ms)
}

fn ascii_snippet(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    let s: String = s.trim().chars().take(160).collect();
    s.replace('\n', "\\n").replace('\r', "\\r")
}

/// JSON-RPC 1.0 over HTTP with basic auth, as spoken by bitcoind and its forks.
///
/// The daemon answers RPC-level failures with HTTP 500 and a JSON error body; those
/// are surfaced as [`ClientError::Rpc`] without retrying. Connection failures, 429 and
/// non-JSON 5xx answers are retried with exponential backoff.
pub struct RpcClient {
    url: String,
    username: String,
    password: String,
    client: Client,
    retries: u32,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.url)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    pub fn new(cfg: &ChainClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.rpc.request_timeout_secs))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            url: cfg.rpc_url(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            client,
            retries: cfg.rpc.retries,
            next_id: AtomicU64::new(1),
        })
    }

    fn decode(method: &str, body: &[u8]) -> Option<Result<Value, ClientError>> {
        let resp: JsonRpcResponse = serde_json::from_slice(body).ok()?;
        if let Some(err) = resp.error {
            return Some(Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
            }));
        }
        tracing::trace!(target: "rpc", method, id = %resp.id, "rpc response");
        Some(Ok(resp.result.unwrap_or(Value::Null)))
    }
}

#[async_trait]
impl ChainRpc for RpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        let req = JsonRpcRequest {
            jsonrpc: "1.0".to_string(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params: Value::Array(params),
        };

        let mut attempt = 0;
        loop {
            let sent = self
                .client
                .post(&self.url)
                .basic_auth(&self.username, Some(&self.password))
                .json(&req)
                .send()
                .await;
            let resp = match sent {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.retries && (e.is_connect() || e.is_timeout()) {
                        tracing::debug!(target: "rpc", method, attempt, error = %e, "rpc send error, retrying");
                        sleep(retry_delay(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ClientError::Transport(format!("{method}: {e}")));
                }
            };

            let status = resp.status();
            let retry_after = resp.headers().get(RETRY_AFTER).cloned();
            let body = resp
                .bytes()
                .await
                .map_err(|e| ClientError::Transport(format!("{method}: {e}")))?;

            if let Some(decoded) = Self::decode(method, &body) {
                return decoded;
            }

            // 429 / 5xx without a JSON-RPC body → backoff & retry
            if status.as_u16() == 429 || status.is_server_error() {
                if attempt < self.retries {
                    let delay = retry_delay(attempt, retry_after.as_ref());
                    tracing::debug!(
                        target: "rpc",
                        method,
                        status = status.as_u16(),
                        ?delay,
                        body = %ascii_snippet(&body),
                        "rpc HTTP error, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(ClientError::Transport(format!(
                    "{method}: HTTP {} after {} retries: {}",
                    status.as_u16(),
                    self.retries,
                    ascii_snippet(&body)
                )));
            }
            return Err(ClientError::Decode(format!(
                "{method}: HTTP {}: {}",
                status.as_u16(),
                ascii_snippet(&body)
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_types::Chain;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_delay(0, None), Duration::from_millis(50));
        assert_eq!(retry_delay(2, None), Duration::from_millis(200));
        assert_eq!(retry_delay(10, None), Duration::from_millis(800));
        let after = HeaderValue::from_static("30");
        assert_eq!(retry_delay(0, Some(&after)), Duration::from_secs(5));
    }

    #[test]
    fn decodes_error_and_result_bodies() {
        let err = br#"{"result":null,"error":{"code":-8,"message":"Block height out of range"},"id":1}"#;
        match RpcClient::decode("getblockhash", err) {
            Some(Err(e)) => assert!(e.is_rpc_code(-8)),
            other => panic!("unexpected {other:?}"),
        }
        let ok = br#"{"result":812345,"error":null,"id":2}"#;
        assert_eq!(
            RpcClient::decode("getblockcount", ok).unwrap().unwrap(),
            Value::from(812345)
        );
        assert!(RpcClient::decode("getblockcount", b"<html>bad gateway</html>").is_none());
    }

    #[test]
    fn builds_from_config() {
        let mut cfg = ChainClientConfig::new(Chain::BTC, "127.0.0.1:8332");
        cfg.username = "user".into();
        let client = RpcClient::new(&cfg).unwrap();
        assert_eq!(client.url, "http://127.0.0.1:8332");
        assert_eq!(client.retries, 3);
    }
}
