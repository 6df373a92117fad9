//! Request, response and error types for the client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::translation::TranslationOrigin;
use crate::credentials::types::CredentialError;

/// Default maximum input length in characters.
pub const MAX_TEXT_CHARS: usize = 10_000;

const MIN_LANGUAGE_LEN: usize = 2;
const MAX_LANGUAGE_LEN: usize = 10;

/// Client error taxonomy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    // Input
    #[error("text is empty")]
    EmptyText,

    #[error("text exceeds {limit} characters")]
    TextTooLong { limit: usize },

    #[error("invalid language tag '{0}'")]
    InvalidLanguage(String),

    // Authentication
    #[error("backend rejected the credential")]
    Unauthenticated,

    #[error("credential for service '{0}' has expired")]
    KeyExpired(String),

    // Transient
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("service unavailable (status {status})")]
    ServiceUnavailable { status: u16 },

    #[error("network error: {0}")]
    Network(String),

    #[error("backend quota exhausted")]
    ResourceExhausted,

    #[error("rate limited by backend (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    // Local admission
    #[error("rate limit queue is full")]
    QueueFull,

    #[error("request cancelled")]
    Cancelled,

    #[error("circuit open for endpoint '{endpoint}'")]
    CircuitOpen { endpoint: String },

    // Integrity
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request rejected by backend: {0}")]
    InvalidRequest(String),

    #[error("gave up after {attempts} attempts: {last}")]
    MaxRetriesExceeded { attempts: u32, last: Box<ClientError> },

    // Offline
    #[error("translation not available offline")]
    TranslationNotAvailable,

    #[error("speech not available offline")]
    SpeechNotAvailable,

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_)
                | ClientError::ServiceUnavailable { .. }
                | ClientError::Network(_)
                | ClientError::ResourceExhausted
                | ClientError::RateLimited { .. }
        )
    }

    /// Whether the credential was rejected or is unusable.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthenticated
                | ClientError::KeyExpired(_)
                | ClientError::Credential(CredentialError::KeyExpired(_))
        )
    }

    /// Whether this outcome counts against the endpoint's circuit breaker.
    ///
    /// Quota and client errors prove the backend is up and do not count.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout(_)
                | ClientError::ServiceUnavailable { .. }
                | ClientError::Network(_)
                | ClientError::InvalidResponse(_)
        )
    }

    /// Whether a cached result may stand in for this failure.
    pub fn allows_cache_fallback(&self) -> bool {
        self.is_transient()
            || matches!(
                self,
                ClientError::MaxRetriesExceeded { .. } | ClientError::CircuitOpen { .. }
            )
    }

    /// Backend-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Short stable name used in metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::EmptyText => "empty_text",
            ClientError::TextTooLong { .. } => "text_too_long",
            ClientError::InvalidLanguage(_) => "invalid_language",
            ClientError::Unauthenticated => "unauthenticated",
            ClientError::KeyExpired(_) => "key_expired",
            ClientError::Timeout(_) => "timeout",
            ClientError::ServiceUnavailable { .. } => "service_unavailable",
            ClientError::Network(_) => "network",
            ClientError::ResourceExhausted => "resource_exhausted",
            ClientError::RateLimited { .. } => "rate_limited",
            ClientError::QueueFull => "queue_full",
            ClientError::Cancelled => "cancelled",
            ClientError::CircuitOpen { .. } => "circuit_open",
            ClientError::InvalidResponse(_) => "invalid_response",
            ClientError::InvalidRequest(_) => "invalid_request",
            ClientError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            ClientError::TranslationNotAvailable => "translation_not_available",
            ClientError::SpeechNotAvailable => "speech_not_available",
            ClientError::Credential(e) => e.kind(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Logical backend endpoint. Each has its own limiter, breaker and
/// latency history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Translate,
    Synthesize,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Translate => "translate",
            Endpoint::Synthesize => "tts",
        }
    }
}

/// Voice selection for speech synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub name: String,
    pub speaking_rate: f32,
    pub pitch: f32,
}

impl VoiceParams {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Stable identifier used in cache keys.
    pub fn cache_id(&self) -> String {
        format!("{}|{:.2}|{:.2}", self.name, self.speaking_rate, self.pitch)
    }
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            speaking_rate: 1.0,
            pitch: 0.0,
        }
    }
}

/// A completed translation.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub confidence: f32,
    pub origin: TranslationOrigin,
    /// Served from the local cache rather than the backend.
    pub from_cache: bool,
}

/// Synthesized speech.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub from_cache: bool,
}

/// Wire body of a translation request.
#[derive(Debug, Clone, Serialize)]
pub struct TranslateRequestBody<'a> {
    pub text: &'a str,
    pub source_language: &'a str,
    pub target_language: &'a str,
}

/// Wire body of a translation response.
#[derive(Debug, Clone, Deserialize)]
pub struct TranslateResponseBody {
    pub translation: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Wire body of a synthesis request.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesizeRequestBody<'a> {
    pub text: &'a str,
    pub language: &'a str,
    pub voice: &'a VoiceParams,
}

/// Reject empty or oversized input before any network call.
pub fn validate_text(text: &str, limit: usize) -> ClientResult<()> {
    if text.trim().is_empty() {
        return Err(ClientError::EmptyText);
    }
    if text.chars().count() > limit {
        return Err(ClientError::TextTooLong { limit });
    }
    Ok(())
}

/// Accept tags like `en`, `es`, `zh-Hant`, `pt-BR`.
pub fn validate_language(tag: &str) -> ClientResult<()> {
    let valid_len = (MIN_LANGUAGE_LEN..=MAX_LANGUAGE_LEN).contains(&tag.len());
    let valid_chars = tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid_len && valid_chars && !tag.starts_with('-') {
        Ok(())
    } else {
        Err(ClientError::InvalidLanguage(tag.to_string()))
    }
}

/// Confidence for a backend answer that did not carry one, from the
/// source/translation length ratio.
pub fn estimate_confidence(source: &str, translation: &str) -> f32 {
    if translation.trim().is_empty() {
        return 0.0;
    }
    let source_len = source.chars().count().max(1) as f32;
    let ratio = translation.chars().count() as f32 / source_len;
    if (0.5..=2.0).contains(&ratio) {
        0.95
    } else {
        0.75
    }
}
