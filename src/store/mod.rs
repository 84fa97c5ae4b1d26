//! Media store module
//!
//! The media store is the hosted service that persists images and issues
//! their public URLs. The relay talks to it through [`MediaStore`];
//! [`http::HttpMediaStore`] implements it against a Cloudinary-compatible
//! REST upload API.
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | Upload | `store.upload` | folder, public_id, resource_type, payload_bytes, secure_url, http.status_code |

use serde::Serialize;
use thiserror::Error;

pub mod http;

pub use http::{HttpMediaStore, HttpMediaStoreConfig};

/// Media store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Media store rejected upload (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Response error: {0}")]
    ResponseError(String),
}

/// Server-side transformation applied by the media store on ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transformation {
    pub quality: String,
    pub format: String,
    pub max_width: u32,
    pub max_height: u32,
    pub crop_mode: String,
}

impl Transformation {
    /// Automatic quality and format, bounded to the given box without upscaling
    pub fn limit(max_width: u32, max_height: u32) -> Self {
        Self {
            quality: "auto".into(),
            format: "auto".into(),
            max_width,
            max_height,
            crop_mode: "limit".into(),
        }
    }

    /// Chained transformation string, e.g. `q_auto,f_auto/w_1920,h_1080,c_limit`
    pub fn to_param(&self) -> String {
        format!(
            "q_{},f_{}/w_{},h_{},c_{}",
            self.quality, self.format, self.max_width, self.max_height, self.crop_mode
        )
    }
}

impl Default for Transformation {
    fn default() -> Self {
        Self::limit(1920, 1080)
    }
}

/// Options for one store upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreOptions {
    pub folder: String,
    pub public_id: String,
    pub transformation: Transformation,
    pub resource_type: String,
    pub invalidate_cache: bool,
    pub allow_overwrite: bool,
}

/// A stored asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub secure_url: String,
    pub public_id: Option<String>,
}

/// Remote object store accepting data-URI encoded images
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, data_uri: &str, options: &StoreOptions) -> Result<StoredAsset, StoreError>;
}
