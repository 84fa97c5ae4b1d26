//! Common E2E Test Infrastructure
//!
//! - Relay server lifecycle
//! - Mock media store that echoes the requested public id
//! - Multipart request helpers

use photo_relay::config::{
    Config, LoggingConfig, MediaStoreConfig, MetricsConfig, RelayConfig, ServerConfig,
};
use photo_relay::server::RelayServer;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Cloud name used by every test environment
pub const CLOUD_NAME: &str = "e2e";

/// Path the relay posts to on the mock store
pub const STORE_UPLOAD_PATH: &str = "/e2e/image/upload";

/// Replies with a URL built from the request's `public_id`; fails ids
/// starting with `bad`
pub struct EchoStore {
    pub delay: Duration,
}

impl Respond for EchoStore {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = String::from_utf8_lossy(&request.body);
        let public_id = body
            .split('&')
            .find_map(|pair| pair.strip_prefix("public_id="))
            .unwrap_or("unknown")
            .to_string();

        let template = if public_id.starts_with("bad") {
            ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "message": "Internal storage failure" }
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "secure_url": format!("https://res.example.com/{}/wedding-photos/{}.jpg", CLOUD_NAME, public_id),
                "public_id": format!("wedding-photos/{}", public_id)
            }))
        };
        template.set_delay(self.delay)
    }
}

/// E2E Test Environment
///
/// Owns the mock store and a running relay server. The server stops when
/// the environment is dropped.
pub struct RelayTestEnv {
    pub server_addr: SocketAddr,
    pub store: MockServer,
    pub client: reqwest::Client,
    shutdown: CancellationToken,
}

impl RelayTestEnv {
    /// Single-file relay with an echoing store
    pub async fn new() -> Self {
        Self::start(RelayConfig::default(), Duration::ZERO, 120).await
    }

    /// Multi-file relay with an echoing store
    pub async fn multi_file() -> Self {
        let relay = RelayConfig {
            multi_file: true,
            ..RelayConfig::default()
        };
        Self::start(relay, Duration::ZERO, 120).await
    }

    /// Start a relay whose store answers after `store_delay`
    pub async fn start(relay: RelayConfig, store_delay: Duration, request_timeout_seconds: u64) -> Self {
        let store = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STORE_UPLOAD_PATH))
            .respond_with(EchoStore { delay: store_delay })
            .mount(&store)
            .await;

        let config = Self::config(&store.uri(), relay, request_timeout_seconds);
        let server = RelayServer::new(config).await.expect("Failed to create server");
        let server_addr = server.local_addr();

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        tokio::spawn(async move {
            let _ = server.serve_with_shutdown(signal).await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build client");

        Self {
            server_addr,
            store,
            client,
            shutdown,
        }
    }

    pub fn config(store_uri: &str, relay: RelayConfig, request_timeout_seconds: u64) -> Config {
        Config {
            server: ServerConfig {
                address: "127.0.0.1:0".to_string(),
                request_timeout_seconds,
            },
            relay,
            media_store: MediaStoreConfig {
                api_base: store_uri.to_string(),
                cloud_name: CLOUD_NAME.to_string(),
                api_key: "e2e-key".to_string(),
                api_secret: "e2e-secret".to_string(),
                timeout_seconds: 10,
            },
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.server_addr)
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload", self.base_url())
    }

    /// POST a multipart form of (filename, mime, bytes) parts named `file`
    pub async fn post_files(&self, files: &[(&str, &str, &[u8])]) -> reqwest::Response {
        let mut form = reqwest::multipart::Form::new();
        for (name, mime, data) in files {
            let part = reqwest::multipart::Part::bytes(data.to_vec())
                .file_name(name.to_string())
                .mime_str(mime)
                .expect("valid mime");
            form = form.part("file", part);
        }
        self.client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await
            .expect("Request failed")
    }

    /// Number of calls the mock store received
    pub async fn store_calls(&self) -> usize {
        self.store
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }
}

impl Drop for RelayTestEnv {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
