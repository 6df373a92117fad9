//! HTTP transport to the translation/TTS backend.
//!
//! # Responsibilities
//! - Build POST requests carrying the credential in a header
//! - Map HTTP status codes onto the client error taxonomy
//! - Describe each request for sanitized audit logging
//!
//! # Status Mapping
//! ```text
//! 2xx        → parsed body (malformed → InvalidResponse)
//! 401, 403   → Unauthenticated
//! 408        → Timeout
//! 429        → RateLimited(Retry-After) or ResourceExhausted
//! 5xx        → ServiceUnavailable
//! other 4xx  → InvalidRequest
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use tokio::time::Instant;
use url::Url;

use crate::client::types::{
    ClientError, ClientResult, Endpoint, SynthesizeRequestBody, TranslateRequestBody,
    TranslateResponseBody,
};
use crate::config::schema::BackendConfig;
use crate::security::sanitizer::RequestRepr;

/// Longest error body echoed into `InvalidRequest`.
const MAX_ERROR_BODY: usize = 200;

/// Raw synthesized audio as returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechPayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Transport to the backend. One call is one attempt; retries, breakers and
/// deadlines live above this trait.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn translate(
        &self,
        api_key: &str,
        request: &TranslateRequestBody<'_>,
    ) -> ClientResult<TranslateResponseBody>;

    async fn synthesize(
        &self,
        api_key: &str,
        request: &SynthesizeRequestBody<'_>,
    ) -> ClientResult<SpeechPayload>;

    /// Representation of the request as it goes on the wire, secrets
    /// included. Callers sanitize before logging.
    fn describe(&self, endpoint: Endpoint, api_key: &str, body: &str) -> RequestRepr;
}

pub struct HttpBackend {
    client: reqwest::Client,
    translate_url: Url,
    synthesize_url: Url,
    api_key_header: String,
}

impl HttpBackend {
    pub fn from_config(config: &BackendConfig) -> Result<Self, url::ParseError> {
        let base = Url::parse(&config.base_url)?;
        let mut builder = reqwest::Client::builder();
        if is_loopback(&base) {
            builder = builder.no_proxy();
        }
        Ok(Self {
            client: builder.build().unwrap_or_else(|_| reqwest::Client::new()),
            translate_url: base.join(&config.translate_path)?,
            synthesize_url: base.join(&config.synthesize_path)?,
            api_key_header: config.api_key_header.clone(),
        })
    }

    fn url(&self, endpoint: Endpoint) -> &Url {
        match endpoint {
            Endpoint::Translate => &self.translate_url,
            Endpoint::Synthesize => &self.synthesize_url,
        }
    }

    async fn post<B: serde::Serialize + Sync>(
        &self,
        endpoint: Endpoint,
        api_key: &str,
        body: &B,
    ) -> ClientResult<reqwest::Response> {
        let started = Instant::now();
        let response = self
            .client
            .post(self.url(endpoint).clone())
            .header(self.api_key_header.as_str(), api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(&e, started.elapsed()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        tracing::debug!(
            endpoint = endpoint.as_str(),
            status = status.as_u16(),
            "Backend returned error status"
        );
        Err(map_status(status, retry_after, &text, started.elapsed()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn translate(
        &self,
        api_key: &str,
        request: &TranslateRequestBody<'_>,
    ) -> ClientResult<TranslateResponseBody> {
        let response = self.post(Endpoint::Translate, api_key, request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    async fn synthesize(
        &self,
        api_key: &str,
        request: &SynthesizeRequestBody<'_>,
    ) -> ClientResult<SpeechPayload> {
        let response = self.post(Endpoint::Synthesize, api_key, request).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ClientError::InvalidResponse("empty audio body".to_string()));
        }
        Ok(SpeechPayload {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    fn describe(&self, endpoint: Endpoint, api_key: &str, body: &str) -> RequestRepr {
        RequestRepr::new("POST", self.url(endpoint).as_str())
            .header(&self.api_key_header, api_key)
            .header("Content-Type", "application/json")
            .body(body)
    }
}

/// Local backends are never reached through a system proxy.
pub(crate) fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn map_transport_error(error: &reqwest::Error, elapsed: Duration) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout(elapsed)
    } else {
        ClientError::Network(error.to_string())
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub fn map_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    elapsed: Duration,
) -> ClientError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Unauthenticated,
        StatusCode::REQUEST_TIMEOUT => ClientError::Timeout(elapsed),
        StatusCode::TOO_MANY_REQUESTS => {
            if retry_after.is_none() && body.contains("RESOURCE_EXHAUSTED") {
                ClientError::ResourceExhausted
            } else {
                ClientError::RateLimited { retry_after }
            }
        }
        s if s.is_server_error() => ClientError::ServiceUnavailable { status: s.as_u16() },
        s => {
            let detail: String = body.chars().take(MAX_ERROR_BODY).collect();
            ClientError::InvalidRequest(format!("status {}: {}", s.as_u16(), detail))
        }
    }
}
