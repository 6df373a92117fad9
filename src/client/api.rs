//! Resilient client orchestrator.
//!
//! # Data Flow
//! ```text
//! translate(text, from, to) / synthesize(text, lang, voice)
//!     → validate input (fails before any network use)
//!     → feature policy for the current network tier
//!         unavailable → cache hit, or *NotAvailable
//!     → rate limiter (admitted, queued by priority, or QueueFull)
//!     → retry coordinator, per attempt:
//!         → circuit breaker (CircuitOpen fails fast)
//!         → adaptive timeout
//!         → retrieve credential, log sanitized request, call backend
//!     → success: store in cache
//!     → cache-eligible failure: cache hit, else the failure
//!     → auth failure: AuthSignal::ReauthenticationRequired
//! ```
//!
//! # Design Decisions
//! - Every sub-component is injected; nothing is process-global
//! - The credential is fetched per attempt so a rotation between retries
//!   takes effect immediately
//! - One limiter admission covers all retries of a request

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::cache::audio::AudioCache;
use crate::cache::policy::{Feature, FeatureAvailability};
use crate::cache::translation::{CachedTranslation, TranslationCache, TranslationOrigin};
use crate::client::backend::{Backend, SpeechPayload};
use crate::client::types::{
    estimate_confidence, validate_language, validate_text, ClientError, ClientResult, Endpoint,
    SpeechAudio, SynthesizeRequestBody, Translation, TranslateRequestBody, TranslateResponseBody,
    VoiceParams,
};
use crate::config::schema::ClientConfig;
use crate::credentials::audit::AuditSink;
use crate::credentials::rotation::CredentialRotator;
use crate::credentials::types::{CredentialResult, Permission, RotationResult, Secret};
use crate::lifecycle::shutdown::Shutdown;
use crate::network::quality::{NetworkCondition, NetworkQualityMonitor};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retries::{RetryCoordinator, RetryPolicy};
use crate::resilience::timeouts::AdaptiveTimeoutManager;
use crate::security::rate_limit::{Priority, RateLimiter};
use crate::security::sanitizer::sanitize;

/// Published when the backend stops accepting the stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    ReauthenticationRequired { service_id: String },
}

#[derive(Debug)]
struct PerEndpoint<T> {
    translate: T,
    synthesize: T,
}

impl<T> PerEndpoint<T> {
    fn build(f: impl Fn(Endpoint) -> T) -> Self {
        Self {
            translate: f(Endpoint::Translate),
            synthesize: f(Endpoint::Synthesize),
        }
    }

    fn get(&self, endpoint: Endpoint) -> &T {
        match endpoint {
            Endpoint::Translate => &self.translate,
            Endpoint::Synthesize => &self.synthesize,
        }
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        [&self.translate, &self.synthesize].into_iter()
    }
}

pub struct ResilientApiClient {
    backend: Arc<dyn Backend>,
    rotator: Arc<CredentialRotator>,
    service_id: String,
    grace_period: Duration,
    audit: Arc<dyn AuditSink>,
    network: NetworkQualityMonitor,
    limiters: PerEndpoint<RateLimiter>,
    breakers: PerEndpoint<CircuitBreaker>,
    retry: RetryCoordinator,
    timeouts: AdaptiveTimeoutManager,
    translations: TranslationCache,
    audio: AudioCache,
    auth_tx: broadcast::Sender<AuthSignal>,
    max_text_chars: usize,
}

/// Assembles a [`ResilientApiClient`] from configuration and injected parts.
pub struct ClientBuilder {
    config: ClientConfig,
    backend: Arc<dyn Backend>,
    rotator: Arc<CredentialRotator>,
    network: Option<NetworkQualityMonitor>,
    translations: Option<TranslationCache>,
    audio: Option<AudioCache>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ClientBuilder {
    pub fn network(mut self, monitor: NetworkQualityMonitor) -> Self {
        self.network = Some(monitor);
        self
    }

    pub fn translation_cache(mut self, cache: TranslationCache) -> Self {
        self.translations = Some(cache);
        self
    }

    pub fn audio_cache(mut self, cache: AudioCache) -> Self {
        self.audio = Some(cache);
        self
    }

    /// Sink for sanitized requests. Defaults to the credential store's sink.
    pub fn audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn build(self) -> ResilientApiClient {
        let config = self.config;
        let network = self.network.unwrap_or_else(NetworkQualityMonitor::manual);
        let (auth_tx, _) = broadcast::channel(16);

        ResilientApiClient {
            audit: self.audit.unwrap_or_else(|| self.rotator.store().audit_sink()),
            backend: self.backend,
            rotator: self.rotator,
            service_id: config.credentials.service_id.clone(),
            grace_period: Duration::from_secs(config.credentials.grace_period_secs),
            limiters: PerEndpoint::build(|e| RateLimiter::from_config(e.as_str(), &config.rate_limit)),
            breakers: PerEndpoint::build(|e| {
                CircuitBreaker::from_config(e.as_str(), &config.circuit_breaker)
            }),
            retry: RetryCoordinator::new(RetryPolicy::from_config(&config.retries)),
            timeouts: AdaptiveTimeoutManager::new(&config.timeouts, network.clone()),
            translations: self
                .translations
                .unwrap_or_else(|| TranslationCache::new(config.cache.max_translations)),
            audio: self
                .audio
                .unwrap_or_else(|| AudioCache::new(config.cache.max_audio_clips)),
            network,
            auth_tx,
            max_text_chars: config.backend.max_text_chars,
        }
    }
}

impl ResilientApiClient {
    pub fn builder(
        config: ClientConfig,
        backend: Arc<dyn Backend>,
        rotator: Arc<CredentialRotator>,
    ) -> ClientBuilder {
        ClientBuilder {
            config,
            backend,
            rotator,
            network: None,
            translations: None,
            audio: None,
            audit: None,
        }
    }

    pub async fn translate(&self, text: &str, from: &str, to: &str) -> ClientResult<Translation> {
        self.translate_with_priority(text, from, to, Priority::Normal)
            .await
    }

    pub async fn translate_with_priority(
        &self,
        text: &str,
        from: &str,
        to: &str,
        priority: Priority,
    ) -> ClientResult<Translation> {
        validate_text(text, self.max_text_chars)?;
        validate_language(from)?;
        validate_language(to)?;

        let tier = self.network.tier();
        if !FeatureAvailability::is_available(Feature::Translation, tier) {
            tracing::info!(tier = %tier, "Translation unavailable on current network, using cache");
            return self
                .cached_translation(text, from, to)
                .ok_or(ClientError::TranslationNotAvailable);
        }

        let started = Instant::now();
        let body = TranslateRequestBody {
            text,
            source_language: from,
            target_language: to,
        };
        let result = self
            .execute(Endpoint::Translate, priority, || self.attempt_translate(&body))
            .await;

        match result {
            Ok(response) => {
                let confidence = response
                    .confidence
                    .unwrap_or_else(|| estimate_confidence(text, &response.translation));
                self.translations.store(CachedTranslation::new(
                    text,
                    from,
                    to,
                    &response.translation,
                    confidence,
                    TranslationOrigin::Api,
                ));
                metrics::record_request(Endpoint::Translate.as_str(), "ok", started.elapsed());
                Ok(Translation {
                    text: response.translation,
                    source_lang: from.to_string(),
                    target_lang: to.to_string(),
                    confidence,
                    origin: TranslationOrigin::Api,
                    from_cache: false,
                })
            }
            Err(error) => {
                self.on_failure(Endpoint::Translate, &error, started);
                if error.allows_cache_fallback() {
                    if let Some(cached) = self.cached_translation(text, from, to) {
                        tracing::warn!(error = %error, "Backend failed, served translation from cache");
                        return Ok(cached);
                    }
                }
                Err(error)
            }
        }
    }

    pub async fn synthesize(
        &self,
        text: &str,
        lang: &str,
        voice: &VoiceParams,
    ) -> ClientResult<SpeechAudio> {
        validate_text(text, self.max_text_chars)?;
        validate_language(lang)?;

        let tier = self.network.tier();
        if !FeatureAvailability::is_available(Feature::TextToSpeech, tier) {
            tracing::info!(tier = %tier, "Speech synthesis unavailable on current network, using cache");
            return self
                .cached_audio(text, lang, voice)
                .ok_or(ClientError::SpeechNotAvailable);
        }

        let started = Instant::now();
        let body = SynthesizeRequestBody {
            text,
            language: lang,
            voice,
        };
        let result = self
            .execute(Endpoint::Synthesize, Priority::Normal, || {
                self.attempt_synthesize(&body)
            })
            .await;

        match result {
            Ok(payload) => {
                self.audio
                    .store(text, lang, voice, &payload.bytes, &payload.content_type);
                metrics::record_request(Endpoint::Synthesize.as_str(), "ok", started.elapsed());
                Ok(SpeechAudio {
                    bytes: payload.bytes,
                    content_type: payload.content_type,
                    from_cache: false,
                })
            }
            Err(error) => {
                self.on_failure(Endpoint::Synthesize, &error, started);
                if error.allows_cache_fallback() {
                    if let Some(cached) = self.cached_audio(text, lang, voice) {
                        tracing::warn!(error = %error, "Backend failed, served audio from cache");
                        return Ok(cached);
                    }
                }
                Err(error)
            }
        }
    }

    /// Rotate the client's credential with the configured grace period.
    pub fn rotate_credential(&self, new_secret: &[u8]) -> CredentialResult<RotationResult> {
        self.rotator
            .rotate(&self.service_id, new_secret, self.grace_period)
    }

    /// Receiver for authentication signals.
    pub fn auth_signals(&self) -> broadcast::Receiver<AuthSignal> {
        self.auth_tx.subscribe()
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn network(&self) -> &NetworkQualityMonitor {
        &self.network
    }

    pub fn rotator(&self) -> &Arc<CredentialRotator> {
        &self.rotator
    }

    pub fn translation_cache(&self) -> &TranslationCache {
        &self.translations
    }

    pub fn audio_cache(&self) -> &AudioCache {
        &self.audio
    }

    pub fn rate_limiter(&self, endpoint: Endpoint) -> &RateLimiter {
        self.limiters.get(endpoint)
    }

    pub fn circuit_breaker(&self, endpoint: Endpoint) -> &CircuitBreaker {
        self.breakers.get(endpoint)
    }

    pub fn timeouts(&self) -> &AdaptiveTimeoutManager {
        &self.timeouts
    }

    /// Start the network monitor and the tier-change watcher under
    /// `shutdown`.
    pub fn spawn_background(self: &Arc<Self>, shutdown: &Shutdown) {
        let monitor = self.network.clone();
        shutdown.spawn("network-monitor", move |rx| monitor.run(rx));

        let client = Arc::clone(self);
        shutdown.spawn("network-watch", move |rx| async move {
            client.watch_network(rx).await;
        });
    }

    /// Apply tier changes to breakers and release queued requests when
    /// connectivity returns.
    pub async fn watch_network(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut changes = self.network.subscribe();
        loop {
            tokio::select! {
                changed = changes.changed() => {
                    let Some(condition) = changed else {
                        break;
                    };
                    self.apply_network_condition(condition);
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Network watcher received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn apply_network_condition(&self, condition: NetworkCondition) {
        for breaker in self.breakers.iter() {
            breaker.set_network_tier(condition.tier);
        }
        if !condition.is_offline() {
            let released: usize = self.limiters.iter().map(RateLimiter::refresh).sum();
            if released > 0 {
                tracing::info!(released, tier = %condition.tier, "Released queued requests");
            }
        }
    }

    async fn execute<T, F, Fut>(&self, endpoint: Endpoint, priority: Priority, attempt: F) -> ClientResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let breaker = self.breakers.get(endpoint);
        breaker.set_network_tier(self.network.tier());

        let admission = self.limiters.get(endpoint).acquire(priority).await?;
        tracing::debug!(
            endpoint = endpoint.as_str(),
            slot = admission.slot,
            queued = admission.queued,
            "Request admitted"
        );

        let name = endpoint.as_str();
        let timeouts = &self.timeouts;
        let attempt = &attempt;
        self.retry
            .execute_with_retry(name, move |_| async move {
                breaker
                    .call(|| timeouts.with_timeout(name, attempt()))
                    .await
            })
            .await
    }

    async fn attempt_translate(
        &self,
        body: &TranslateRequestBody<'_>,
    ) -> ClientResult<TranslateResponseBody> {
        let secret = self.current_secret(Permission::Translate)?;
        let api_key = secret.expose_str()?;
        self.audit_request(Endpoint::Translate, api_key, body);
        self.backend.translate(api_key, body).await
    }

    async fn attempt_synthesize(&self, body: &SynthesizeRequestBody<'_>) -> ClientResult<SpeechPayload> {
        let secret = self.current_secret(Permission::Synthesize)?;
        let api_key = secret.expose_str()?;
        self.audit_request(Endpoint::Synthesize, api_key, body);
        self.backend.synthesize(api_key, body).await
    }

    fn current_secret(&self, permission: Permission) -> ClientResult<Secret> {
        let store = self.rotator.store();
        let secret = store.retrieve(&self.service_id).map_err(|e| match e {
            crate::credentials::types::CredentialError::KeyExpired(service) => {
                ClientError::KeyExpired(service)
            }
            other => ClientError::Credential(other),
        })?;

        if let Some(credential) = store.credential(&self.service_id) {
            if !credential.allows(permission) {
                return Err(ClientError::InvalidRequest(format!(
                    "credential for '{}' lacks the {:?} permission",
                    self.service_id, permission
                )));
            }
        }
        Ok(secret)
    }

    fn audit_request<B: Serialize>(&self, endpoint: Endpoint, api_key: &str, body: &B) {
        let json = serde_json::to_string(body).unwrap_or_default();
        let sanitized = sanitize(&self.backend.describe(endpoint, api_key, &json));
        tracing::debug!(
            endpoint = endpoint.as_str(),
            method = %sanitized.method,
            url = %sanitized.url,
            "Sending request"
        );
        self.audit.request_event(&sanitized);
    }

    fn on_failure(&self, endpoint: Endpoint, error: &ClientError, started: Instant) {
        metrics::record_request(endpoint.as_str(), error.kind(), started.elapsed());
        tracing::warn!(endpoint = endpoint.as_str(), error = %error, "Request failed");

        if error.is_auth() {
            tracing::warn!(service_id = %self.service_id, "Credential rejected, reauthentication required");
            // Nobody listening is not an error.
            let _ = self.auth_tx.send(AuthSignal::ReauthenticationRequired {
                service_id: self.service_id.clone(),
            });
        }
    }

    fn cached_translation(&self, text: &str, from: &str, to: &str) -> Option<Translation> {
        self.translations.lookup(text, from, to).map(|entry| Translation {
            text: entry.translation,
            source_lang: entry.source_lang,
            target_lang: entry.target_lang,
            confidence: entry.confidence,
            origin: entry.origin,
            from_cache: true,
        })
    }

    fn cached_audio(&self, text: &str, lang: &str, voice: &VoiceParams) -> Option<SpeechAudio> {
        self.audio.lookup(text, lang, voice).map(|entry| SpeechAudio {
            bytes: entry.bytes.to_vec(),
            content_type: entry.content_type,
            from_cache: true,
        })
    }
}

impl std::fmt::Debug for ResilientApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientApiClient")
            .field("service_id", &self.service_id)
            .field("network", &self.network.current())
            .finish()
    }
}
