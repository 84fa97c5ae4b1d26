//! HTTP media store client
//!
//! Signed uploads against a Cloudinary-compatible REST API:
//! `POST {api_base}/{cloud_name}/{resource_type}/upload`.
//!
//! # Example
//!
//! ```no_run
//! use photo_relay::store::{HttpMediaStore, HttpMediaStoreConfig, MediaStore, StoreOptions, Transformation};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = HttpMediaStore::new(HttpMediaStoreConfig {
//!     api_base: "https://api.cloudinary.com/v1_1".into(),
//!     cloud_name: "demo".into(),
//!     api_key: "key".into(),
//!     api_secret: "secret".into(),
//!     timeout: std::time::Duration::from_secs(60),
//! })?;
//!
//! let options = StoreOptions {
//!     folder: "wedding-photos".into(),
//!     public_id: "beach_1700000000000".into(),
//!     transformation: Transformation::default(),
//!     resource_type: "image".into(),
//!     invalidate_cache: true,
//!     allow_overwrite: false,
//! };
//! let stored = store.upload("data:image/png;base64,iVBORw0KGgo=", &options).await?;
//! println!("{}", stored.secure_url);
//! # Ok(())
//! # }
//! ```

use super::{MediaStore, StoreError, StoreOptions, StoredAsset};
use crate::config::MediaStoreConfig;
use crate::metrics;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// HTTP media store configuration
#[derive(Debug, Clone)]
pub struct HttpMediaStoreConfig {
    pub api_base: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout: Duration,
}

impl From<&MediaStoreConfig> for HttpMediaStoreConfig {
    fn from(config: &MediaStoreConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            cloud_name: config.cloud_name.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadApiResponse {
    secure_url: Option<String>,
    #[serde(default)]
    public_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ApiErrorMessage {
    message: String,
}

/// Media store reached over HTTP
pub struct HttpMediaStore {
    config: HttpMediaStoreConfig,
    http_client: reqwest::Client,
}

impl HttpMediaStore {
    pub fn new(config: HttpMediaStoreConfig) -> Result<Self, StoreError> {
        if config.cloud_name.trim().is_empty() {
            return Err(StoreError::ConfigError("cloud_name is empty".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::ConfigError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn cloud_name(&self) -> &str {
        &self.config.cloud_name
    }

    /// Upload URL for a resource type
    pub fn upload_url(&self, resource_type: &str) -> String {
        format!(
            "{}/{}/{}/upload",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name,
            resource_type
        )
    }
}

/// Request signature: SHA-256 over the sorted `key=value` pairs joined by
/// `&`, with the API secret appended.
pub fn sign_params(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait::async_trait]
impl MediaStore for HttpMediaStore {
    #[tracing::instrument(
        name = "store.upload",
        skip(self, data_uri),
        fields(
            folder = %options.folder,
            public_id = %options.public_id,
            resource_type = %options.resource_type,
            payload_bytes = data_uri.len(),
            secure_url = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn upload(&self, data_uri: &str, options: &StoreOptions) -> Result<StoredAsset, StoreError> {
        let start_time = Instant::now();
        let timestamp = chrono::Utc::now().timestamp().to_string();

        let mut params: Vec<(&str, String)> = vec![
            ("folder", options.folder.clone()),
            ("invalidate", options.invalidate_cache.to_string()),
            ("overwrite", options.allow_overwrite.to_string()),
            ("public_id", options.public_id.clone()),
            ("timestamp", timestamp),
            ("transformation", options.transformation.to_param()),
        ];
        let signature = sign_params(&params, &self.config.api_secret);
        params.push(("api_key", self.config.api_key.clone()));
        params.push(("signature", signature));
        params.push(("signature_algorithm", "sha256".to_string()));
        params.push(("file", data_uri.to_string()));

        let response = self
            .http_client
            .post(self.upload_url(&options.resource_type))
            .form(&params)
            .send()
            .await
            .map_err(|e| StoreError::RequestError(e.to_string()))?;

        let status = response.status();
        let span = tracing::Span::current();
        span.record("http.status_code", status.as_u16());

        let body = response
            .text()
            .await
            .map_err(|e| StoreError::RequestError(e.to_string()))?;

        metrics::record_store_duration(start_time.elapsed().as_secs_f64());

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| body.chars().take(200).collect());
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: UploadApiResponse = serde_json::from_str(&body)
            .map_err(|e| StoreError::ResponseError(format!("invalid upload response: {}", e)))?;
        let secure_url = parsed
            .secure_url
            .ok_or_else(|| StoreError::ResponseError("response has no secure_url".into()))?;

        span.record("secure_url", secure_url.as_str());
        tracing::info!(
            secure_url = %secure_url,
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Media store upload completed"
        );

        Ok(StoredAsset {
            secure_url,
            public_id: parsed.public_id,
        })
    }
}
