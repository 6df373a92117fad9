//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use resilient_translator::client::{HttpBackend, ResilientApiClient};
use resilient_translator::config::ClientConfig;
use resilient_translator::credentials::types::CredentialMetadata;
use resilient_translator::credentials::{
    CredentialRotator, MemoryAuditSink, SecureCredentialStore,
};
use resilient_translator::network::NetworkQualityMonitor;

pub const KEY: &str = "AIzaSyA1b2C3d4E5f6G7h8I9j0KlMnOpQrStUv";

/// Request as seen by the mock backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Response the mock backend writes back.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn translation(text: &str) -> Self {
        let body = serde_json::json!({ "translation": text }).to_string();
        Self::status(200, &body).header("Content-Type", "application/json")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Handle to a running mock backend.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    calls: Arc<AtomicU32>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockBackend {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a programmable mock backend on an ephemeral port. `respond`
/// receives the zero-based call index and the parsed request.
pub async fn start_programmable_backend<F>(respond: F) -> MockBackend
where
    F: Fn(u32, &RecordedRequest) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        calls: Arc::new(AtomicU32::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let respond = Arc::new(respond);

    let handle = backend.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let respond = respond.clone();
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        serve(socket, handle, respond.as_ref()).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    backend
}

async fn serve<F>(mut socket: TcpStream, backend: MockBackend, respond: &F)
where
    F: Fn(u32, &RecordedRequest) -> MockResponse,
{
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    let index = backend.calls.fetch_add(1, Ordering::SeqCst);
    backend.requests.lock().unwrap().push(request.clone());
    let response = respond(index, &request);

    let mut head = format!(
        "HTTP/1.1 {} Mock\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");

    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&response.body).await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let path = lines
        .next()?
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        path,
        headers,
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    })
}

/// Config pointing at `backend` with short delays for tests.
pub fn test_config(backend: &MockBackend) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.backend.base_url = backend.base_url();
    config.retries.max_retries = 3;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 2_000;
    config.network.enabled = false;
    config
}

pub struct TestClient {
    pub client: Arc<ResilientApiClient>,
    pub audit: Arc<MemoryAuditSink>,
    pub network: NetworkQualityMonitor,
}

/// Build a client over HTTP against `config.backend` with [`KEY`] provisioned.
pub fn build_client(config: ClientConfig) -> TestClient {
    let audit = Arc::new(MemoryAuditSink::new());
    let store = Arc::new(SecureCredentialStore::new(audit.clone()));
    store
        .store(
            KEY.as_bytes(),
            &config.credentials.service_id,
            CredentialMetadata::default(),
        )
        .unwrap();
    let rotator = Arc::new(CredentialRotator::new(store));
    let backend = Arc::new(HttpBackend::from_config(&config.backend).unwrap());
    let network = NetworkQualityMonitor::manual();
    let client = ResilientApiClient::builder(config, backend, rotator)
        .network(network.clone())
        .build();
    TestClient {
        client: Arc::new(client),
        audit,
        network,
    }
}
