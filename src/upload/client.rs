//! Transfer client
//!
//! Posts assets to the relay endpoint as `multipart/form-data` and turns the
//! relay's JSON reply into a URL or a typed [`UploadError`].
//!
//! # Example
//!
//! ```no_run
//! use photo_relay::upload::client::{TransferClient, TransferClientConfig};
//! use photo_relay::upload::{NormalizedAsset, Transfer};
//!
//! # async fn example(asset: NormalizedAsset) -> Result<(), Box<dyn std::error::Error>> {
//! let client = TransferClient::new(TransferClientConfig::new("http://127.0.0.1:8080/upload"))?;
//! let url = client.send(&asset).await?;
//! println!("stored at {}", url);
//! # Ok(())
//! # }
//! ```

use super::{NormalizedAsset, Transfer, UploadError};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Multipart field carrying file data
pub const FILE_FIELD: &str = "file";

/// Error surfaced at the client boundary
pub type TransferError = UploadError;

/// Transfer client configuration
#[derive(Debug, Clone)]
pub struct TransferClientConfig {
    pub relay_url: String,
    /// Whole-request timeout, including the relay's store call
    pub timeout: Duration,
}

impl TransferClientConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Loose view over every reply shape the relay produces
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayReply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    urls: Option<Vec<String>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// HTTP client for the relay endpoint
#[derive(Debug, Clone)]
pub struct TransferClient {
    config: TransferClientConfig,
    http_client: reqwest::Client,
}

impl TransferClient {
    pub fn new(config: TransferClientConfig) -> Result<Self, UploadError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn relay_url(&self) -> &str {
        &self.config.relay_url
    }

    fn part(asset: &NormalizedAsset) -> Result<Part, UploadError> {
        Part::bytes(asset.encoded_bytes.to_vec())
            .file_name(asset.name.clone())
            .mime_str(&asset.mime_type)
            .map_err(|e| UploadError::Encoding(format!("{}: {}", asset.name, e)))
    }

    async fn post(&self, form: Form) -> Result<RelayReply, UploadError> {
        let response = self
            .http_client
            .post(&self.config.relay_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(describe_transport_error(&e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(describe_transport_error(&e)))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<RelayReply>(&body) {
                Ok(reply) => match (reply.error, reply.details) {
                    (Some(error), Some(details)) => format!("{}: {}", error, details),
                    (Some(error), None) => error,
                    (None, Some(details)) => details,
                    (None, None) => format!("HTTP {}", status.as_u16()),
                },
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(if status.is_client_error() {
                UploadError::Rejected(message)
            } else {
                UploadError::Store(message)
            });
        }

        let reply: RelayReply = serde_json::from_str(&body)
            .map_err(|e| UploadError::ResponseContract(format!("invalid JSON body: {}", e)))?;

        if reply.success != Some(true) {
            return Err(UploadError::ResponseContract(
                "reply does not report success".into(),
            ));
        }

        Ok(reply)
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

#[async_trait::async_trait]
impl Transfer for TransferClient {
    #[tracing::instrument(
        name = "upload.transfer",
        skip(self, asset),
        fields(file = %asset.name, bytes = asset.byte_length),
        err
    )]
    async fn send(&self, asset: &NormalizedAsset) -> Result<String, UploadError> {
        let form = Form::new().part(FILE_FIELD, Self::part(asset)?);
        let reply = self.post(form).await?;

        let url = reply
            .url
            .ok_or_else(|| UploadError::ResponseContract("missing `url` field".into()))?;
        tracing::info!(url = %url, "File stored");
        Ok(url)
    }

    #[tracing::instrument(
        name = "upload.transfer_batch",
        skip(self, assets),
        fields(files = assets.len()),
        err
    )]
    async fn send_batch(&self, assets: &[NormalizedAsset]) -> Result<Vec<String>, UploadError> {
        let mut form = Form::new();
        for asset in assets {
            form = form.part(FILE_FIELD, Self::part(asset)?);
        }
        let reply = self.post(form).await?;

        let urls = reply
            .urls
            .ok_or_else(|| UploadError::ResponseContract("missing `urls` field".into()))?;
        if urls.len() != assets.len() {
            return Err(UploadError::ResponseContract(format!(
                "expected {} URLs, relay returned {}",
                assets.len(),
                urls.len()
            )));
        }
        tracing::info!(files = urls.len(), "Batch stored");
        Ok(urls)
    }
}
