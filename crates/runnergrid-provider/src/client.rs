//! Shared HTTP client for the CI provider API.
//!
//! Plain HTTP/1 over a fresh connection per request (a hyper handshake with
//! the connection driven in the background), each request bounded by a
//! timeout. Rate-limit responses are retried with exponential backoff up to
//! a small bounded number of attempts.
//!
//! The access token is supplied once via the process environment, held only
//! in memory, and scrubbed from any error text via [`ProviderClient::redact`].

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use http_body_util::Full;
use regex::Regex;
use tracing::debug;

use crate::error::HttpError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_MAX: Duration = Duration::from_secs(8);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Response from the provider API: status plus raw body.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_slice(&self.body).map_err(|e| e.to_string())
    }
}

/// HTTP client bound to one provider endpoint and access token.
#[derive(Clone)]
pub struct ProviderClient {
    authority: String,
    token: String,
    timeout: Duration,
    max_attempts: u32,
}

impl ProviderClient {
    /// Create a client for `base_url` (`http://host:port` or `host:port`).
    pub fn new(base_url: &str, token: String) -> Result<Self, HttpError> {
        let authority = base_url
            .strip_prefix("http://")
            .unwrap_or(base_url)
            .trim_end_matches('/')
            .to_string();
        if authority.is_empty() || authority.contains("://") {
            return Err(HttpError::BadUrl(format!(
                "expected http://host:port, got {base_url}"
            )));
        }
        Ok(Self {
            authority,
            token,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the rate-limit retry budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// The endpoint this client talks to, as a URL.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.authority)
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, HttpError> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, HttpError> {
        self.request(Method::POST, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, HttpError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Issue a request, retrying 429 responses with exponential backoff.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, HttpError> {
        let body_bytes = match body {
            Some(v) => {
                Some(serde_json::to_vec(&v).map_err(|e| HttpError::Transport(e.to_string()))?)
            }
            None => None,
        };

        let mut backoff = RETRY_BASE;
        for attempt in 1..=self.max_attempts {
            let resp = match tokio::time::timeout(
                self.timeout,
                self.attempt(&method, path, body_bytes.as_deref()),
            )
            .await
            {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(HttpError::Timeout(self.timeout)),
            };

            if resp.status == StatusCode::TOO_MANY_REQUESTS {
                if attempt == self.max_attempts {
                    return Err(HttpError::RateLimited(self.max_attempts));
                }
                debug!(%path, attempt, backoff_ms = backoff.as_millis() as u64, "rate limited, backing off");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RETRY_MAX);
                continue;
            }

            return Ok(resp);
        }
        Err(HttpError::RateLimited(self.max_attempts))
    }

    async fn attempt(
        &self,
        method: &Method,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<ApiResponse, HttpError> {
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| HttpError::Transport(self.redact(&e.to_string())))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HttpError::Transport(self.redact(&e.to_string())))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let uri = format!("http://{}{}", self.authority, path);
        let mut builder = http::Request::builder()
            .method(method.clone())
            .uri(&uri)
            .header("host", &self.authority)
            .header("authorization", format!("Bearer {}", self.token))
            .header("accept", "application/json")
            .header("user-agent", "runnergrid/0.1");
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::copy_from_slice(body.unwrap_or_default())))
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| HttpError::Transport(self.redact(&e.to_string())))?;

        let (parts, body) = resp.into_parts();
        let collected = body
            .collect()
            .await
            .map_err(|e| HttpError::Transport(self.redact(&e.to_string())))?
            .to_bytes();

        Ok(ApiResponse {
            status: parts.status,
            body: collected,
        })
    }

    /// Scrub bearer-token-shaped substrings and this client's own token
    /// from text that may end up in an error message.
    pub fn redact(&self, text: &str) -> String {
        static BEARER: OnceLock<Regex> = OnceLock::new();
        let re = BEARER
            .get_or_init(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=\-]+").unwrap());
        let cleaned = re.replace_all(text, "Bearer [REDACTED]");
        if self.token.is_empty() {
            cleaned.into_owned()
        } else {
            cleaned.replace(&self.token, "[REDACTED]")
        }
    }

    /// Body text for an error message: lossy UTF-8, redacted, truncated.
    pub fn error_body(&self, resp: &ApiResponse) -> String {
        let text = String::from_utf8_lossy(&resp.body);
        let mut redacted = self.redact(&text);
        if redacted.len() > 256 {
            redacted.truncate(256);
        }
        redacted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testserver;

    fn client(addr: &str) -> ProviderClient {
        ProviderClient::new(addr, "tok-abc123".to_string())
            .unwrap()
            .with_timeout(Duration::from_secs(2))
    }

    #[test]
    fn url_parsing() {
        assert!(ProviderClient::new("http://ci.internal:8080", String::new()).is_ok());
        assert!(ProviderClient::new("ci.internal:8080/", String::new()).is_ok());
        assert!(ProviderClient::new("https://ci.internal", String::new()).is_err());
        assert!(ProviderClient::new("", String::new()).is_err());
    }

    #[test]
    fn redact_scrubs_bearer_and_token() {
        let c = ProviderClient::new("ci:80", "tok-abc123".to_string()).unwrap();

        let msg = "denied for Bearer tok-abc123 (scope ci)";
        let redacted = c.redact(msg);
        assert!(!redacted.contains("tok-abc123"));

        let msg = "raw token tok-abc123 leaked outside a header";
        let redacted = c.redact(msg);
        assert!(!redacted.contains("tok-abc123"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        // Port 1 won't be listening.
        let c = client("127.0.0.1:1");
        let err = c.get("/repos/a/b/actions/jobs").await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
    }

    #[tokio::test]
    async fn rate_limit_retries_then_succeeds() {
        let addr = testserver::serve(vec![
            (429, "{}".to_string()),
            (200, r#"{"ok":true}"#.to_string()),
        ])
        .await;

        let resp = client(&addr).get("/anything").await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn rate_limit_exhausts_retry_budget() {
        let addr = testserver::serve(vec![
            (429, "{}".to_string()),
            (429, "{}".to_string()),
        ])
        .await;

        let err = client(&addr)
            .with_max_attempts(2)
            .get("/anything")
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::RateLimited(2)));
    }

    #[tokio::test]
    async fn non_2xx_is_returned_not_retried() {
        let addr = testserver::serve(vec![(404, r#"{"message":"missing"}"#.to_string())]).await;

        let resp = client(&addr).get("/anything").await.unwrap();
        assert_eq!(resp.status, StatusCode::NOT_FOUND);
    }
}
