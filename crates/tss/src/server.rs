// Path: crates/tss/src/server.rs
use crate::error::TssError;
use crate::types::{KeysignRequest, KeysignResponse};
use async_trait::async_trait;
use reqwest::{header::HeaderValue, header::RETRY_AFTER, Client};
use std::time::Duration;
use tokio::time::sleep;

/// A remote TSS keysign service.
#[async_trait]
pub trait TssServer: Send + Sync {
    /// Runs one keysign ceremony for every message in `req`.
    async fn key_sign(&self, req: KeysignRequest) -> Result<KeysignResponse, TssError>;
}

const HTTP_RETRIES: usize = 8;
const BASE_BACKOFF_MS: u64 = 50;

fn retry_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(5));
    }
    let ms = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(16)).min(800);
    Duration::from_millis(ms)
}

fn ascii_snippet(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    let s: String = s.trim().chars().take(160).collect();
    s.replace('\n', "\\n").replace('\r', "\\r")
}

/// Talks to the TSS service over HTTP: `POST <url>/keysign` with a JSON body.
#[derive(Clone, Debug)]
pub struct HttpTssServer {
    url: String,
    client: Client,
}

impl HttpTssServer {
    /// `url` is the service base, without a trailing path.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, TssError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TssError::Server(e.to_string()))?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TssServer for HttpTssServer {
    async fn key_sign(&self, req: KeysignRequest) -> Result<KeysignResponse, TssError> {
        let url = format!("{}/keysign", self.url);
        let mut attempt = 0;
        let body = loop {
            let resp = match self.client.post(&url).json(&req).send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempt < HTTP_RETRIES && (e.is_connect() || e.is_request()) {
                        tracing::debug!(target: "tss", attempt, error = %e, "keysign send error, retrying");
                        sleep(retry_delay(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(TssError::Server(format!("keysign send failed: {e}")));
                }
            };

            let status = resp.status();
            let retry_after = resp.headers().get(RETRY_AFTER).cloned();
            let body = resp
                .bytes()
                .await
                .map_err(|e| TssError::Server(e.to_string()))?;

            // 429 / 5xx → backoff & retry
            if status.as_u16() == 429 || status.is_server_error() {
                if attempt < HTTP_RETRIES {
                    let delay = retry_delay(attempt, retry_after.as_ref());
                    tracing::debug!(
                        target: "tss",
                        status = status.as_u16(),
                        ?delay,
                        body = %ascii_snippet(&body),
                        "keysign HTTP error, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                return Err(TssError::Server(format!(
                    "keysign HTTP {} after {} retries: {}",
                    status.as_u16(),
                    HTTP_RETRIES,
                    ascii_snippet(&body)
                )));
            }
            if !status.is_success() {
                return Err(TssError::Server(format!(
                    "keysign HTTP {}: {}",
                    status.as_u16(),
                    ascii_snippet(&body)
                )));
            }
            break body;
        };

        serde_json::from_slice(&body).map_err(|e| TssError::Decode(e.to_string()))
    }
}
