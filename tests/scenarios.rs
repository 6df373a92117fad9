//! End-to-end scenarios with an in-process backend and paused time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::time::Instant;

use resilient_translator::client::backend::{Backend, SpeechPayload};
use resilient_translator::client::types::{
    SynthesizeRequestBody, TranslateRequestBody, TranslateResponseBody,
};
use resilient_translator::client::{ClientError, ClientResult, Endpoint, ResilientApiClient};
use resilient_translator::config::ClientConfig;
use resilient_translator::credentials::audit::AuditOperation;
use resilient_translator::credentials::types::CredentialMetadata;
use resilient_translator::credentials::{
    CredentialRotator, MemoryAuditSink, SecureCredentialStore,
};
use resilient_translator::network::{NetworkCondition, NetworkQualityMonitor, NetworkTier};
use resilient_translator::security::RequestRepr;

const OLD_KEY: &str = "AIzaSy_old_0a1b2c3d4e5f6g7h8i9j";
const NEW_KEY: &str = "AIzaSy_new_9z8y7x6w5v4u3t2s1r0q";

#[derive(Debug, Clone)]
struct Call {
    text: String,
    api_key: String,
    at: Instant,
}

/// Backend that echoes a fixed dictionary and records every call.
#[derive(Default)]
struct RecordingBackend {
    calls: Mutex<Vec<Call>>,
}

impl RecordingBackend {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn translate(
        &self,
        api_key: &str,
        request: &TranslateRequestBody<'_>,
    ) -> ClientResult<TranslateResponseBody> {
        self.calls.lock().unwrap().push(Call {
            text: request.text.to_string(),
            api_key: api_key.to_string(),
            at: Instant::now(),
        });
        let translation = match request.text {
            "Hello" => "Hola".to_string(),
            other => format!("es:{other}"),
        };
        Ok(TranslateResponseBody {
            translation,
            confidence: None,
        })
    }

    async fn synthesize(
        &self,
        _api_key: &str,
        _request: &SynthesizeRequestBody<'_>,
    ) -> ClientResult<SpeechPayload> {
        Err(ClientError::ServiceUnavailable { status: 503 })
    }

    fn describe(&self, _endpoint: Endpoint, api_key: &str, body: &str) -> RequestRepr {
        RequestRepr::new("POST", "https://backend.local/v1/translate")
            .header("X-Api-Key", api_key)
            .body(body)
    }
}

struct Scenario {
    client: Arc<ResilientApiClient>,
    backend: Arc<RecordingBackend>,
    rotator: Arc<CredentialRotator>,
    audit: Arc<MemoryAuditSink>,
    network: NetworkQualityMonitor,
}

fn scenario(config: ClientConfig) -> Scenario {
    let audit = Arc::new(MemoryAuditSink::new());
    let store = Arc::new(SecureCredentialStore::new(audit.clone()));
    store
        .store(
            OLD_KEY.as_bytes(),
            &config.credentials.service_id,
            CredentialMetadata::default(),
        )
        .unwrap();
    let rotator = Arc::new(CredentialRotator::new(store));
    let backend = Arc::new(RecordingBackend::default());
    let network = NetworkQualityMonitor::manual();
    let client = ResilientApiClient::builder(config, backend.clone(), rotator.clone())
        .network(network.clone())
        .build();
    Scenario {
        client: Arc::new(client),
        backend,
        rotator,
        audit,
        network,
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_over_limit_waits_for_rollover() {
    let s = scenario(ClientConfig::default());
    let start = Instant::now();

    let mut handles = Vec::new();
    for i in 0..65 {
        let client = s.client.clone();
        handles.push(tokio::spawn(async move {
            client.translate(&format!("phrase {i}"), "en", "es").await
        }));
        // Let each request reach the limiter before the next is issued
        tokio::task::yield_now().await;
    }
    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    let calls = s.backend.calls();
    assert_eq!(calls.len(), 65);
    let order: Vec<String> = calls.iter().map(|c| c.text.clone()).collect();
    let expected: Vec<String> = (0..60).map(|i| format!("phrase {i}")).collect();
    assert_eq!(order[..60], expected[..]);

    // Queued requests are all released by the same rollover
    let mut released = order[60..].to_vec();
    released.sort();
    let queued: Vec<String> = (60..65).map(|i| format!("phrase {i}")).collect();
    assert_eq!(released, queued);

    for call in &calls[..60] {
        assert!(call.at - start < Duration::from_secs(1));
    }
    for call in &calls[60..] {
        assert!(call.at - start >= Duration::from_secs(60));
    }
}

#[tokio::test(start_paused = true)]
async fn test_rotation_with_grace_period() {
    let s = scenario(ClientConfig::default());
    let service_id = s.client.service_id().to_string();

    s.client.translate("Hello", "en", "es").await.unwrap();

    let result = s.client.rotate_credential(NEW_KEY.as_bytes()).unwrap();
    assert!(result.success());
    let active = s.rotator.store().retrieve(&service_id).unwrap();
    assert_eq!(active.expose(), NEW_KEY.as_bytes());

    s.client.translate("Goodbye", "en", "es").await.unwrap();
    let keys: Vec<String> = s.backend.calls().into_iter().map(|c| c.api_key).collect();
    assert_eq!(keys, vec![OLD_KEY.to_string(), NEW_KEY.to_string()]);

    // Both keys validate during the grace window
    assert!(s.rotator.accepts(&service_id, NEW_KEY.as_bytes()));
    assert!(s.rotator.accepts(&service_id, OLD_KEY.as_bytes()));
    assert_eq!(s.rotator.pending_wipes(), 1);

    tokio::time::sleep(Duration::from_secs(301)).await;

    assert!(s.rotator.accepts(&service_id, NEW_KEY.as_bytes()));
    assert!(!s.rotator.accepts(&service_id, OLD_KEY.as_bytes()));
    assert_eq!(s.rotator.pending_wipes(), 0);
    assert!(s
        .audit
        .credential_events()
        .iter()
        .any(|record| record.operation == AuditOperation::Wipe && record.service_id == service_id));
}

#[tokio::test(start_paused = true)]
async fn test_offline_serves_cache_without_network_calls() {
    let s = scenario(ClientConfig::default());

    let online = s.client.translate("Hello", "en", "es").await.unwrap();
    assert_eq!(online.text, "Hola");
    assert_eq!(s.backend.calls().len(), 1);

    s.network.report(NetworkCondition::offline());
    assert_eq!(s.network.tier(), NetworkTier::Offline);

    let offline = s.client.translate("Hello", "en", "es").await.unwrap();
    assert_eq!(offline.text, "Hola");
    assert!(offline.from_cache);

    let missing = s.client.translate("Goodbye", "en", "es").await.unwrap_err();
    assert_eq!(missing, ClientError::TranslationNotAvailable);

    let speech = s
        .client
        .synthesize("Hola", "es", &Default::default())
        .await
        .unwrap_err();
    assert_eq!(speech, ClientError::SpeechNotAvailable);

    assert_eq!(s.backend.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_network_slows_breaker_recovery() {
    let s = scenario(ClientConfig::default());
    let breaker = s.client.circuit_breaker(Endpoint::Translate);
    assert_eq!(breaker.recovery_timeout(), Duration::from_secs(10));

    s.network.report(NetworkCondition::assumed(NetworkTier::Poor));
    // Tier is applied to the breaker on the next request
    s.client.translate("Hello", "en", "es").await.unwrap();
    assert_eq!(breaker.recovery_timeout(), Duration::from_secs(20));
}
