//! Relay endpoint
//!
//! Server side of an upload: parse the multipart body, re-validate every
//! file (this check is authoritative, the client's is only an
//! optimization), encode accepted bytes as a data URI and store them in the
//! media store. Every outcome becomes a JSON response carrying the elapsed
//! processing time.
//!
//! # Consistency
//!
//! A multi-file request is all-or-nothing: one invalid file rejects the
//! whole request with 400, one store failure fails it with 500.

use crate::config::RelayConfig;
use crate::metrics;
use crate::store::{MediaStore, StoreError, StoreOptions, Transformation};
use crate::upload::batch::partition;
use crate::upload::validate::{bytes_to_mb, FileValidator, RejectReason};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

pub mod form;
pub mod response;

use form::ReceivedFile;
use response::{
    ErrorResponse, MultiUploadMetadata, MultiUploadResponse, SingleUploadMetadata,
    SingleUploadResponse,
};

/// Relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("No file uploaded")]
    NoFile,

    #[error("No files uploaded")]
    NoFiles,

    #[error("Malformed upload request: {0}")]
    MalformedRequest(String),

    #[error("Invalid file {file_name}: {reason}")]
    InvalidFile {
        file_name: String,
        reason: RejectReason,
    },

    #[error("Failed to encode {file_name}: {message}")]
    Encoding { file_name: String, message: String },

    #[error("Failed to upload {file_name}: {source}")]
    Store {
        file_name: String,
        #[source]
        source: StoreError,
    },

    #[error("Request body exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Failed to read request body: {0}")]
    Body(String),

    #[error("Upload timed out after {0:?}")]
    TimedOut(Duration),
}

impl RelayError {
    /// 4xx for client faults, 5xx for store and transport faults
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::NoFile
            | RelayError::NoFiles
            | RelayError::MalformedRequest(_)
            | RelayError::InvalidFile { .. }
            | RelayError::Body(_) => StatusCode::BAD_REQUEST,
            RelayError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Encoding { .. } | RelayError::Store { .. } | RelayError::TimedOut(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short `error` field of the response body
    pub fn label(&self) -> String {
        match self {
            RelayError::NoFile | RelayError::NoFiles => self.to_string(),
            RelayError::MalformedRequest(_) | RelayError::Body(_) => "Malformed upload request".to_string(),
            RelayError::TooLarge { .. } => "Upload too large".to_string(),
            RelayError::InvalidFile { .. } => "Invalid file".to_string(),
            RelayError::Encoding { .. } | RelayError::Store { .. } => "Upload failed".to_string(),
            RelayError::TimedOut(_) => "Upload timed out".to_string(),
        }
    }

    fn metric_type(&self) -> &'static str {
        match self {
            RelayError::NoFile | RelayError::NoFiles => "no_file",
            RelayError::MalformedRequest(_) | RelayError::Body(_) => "malformed_request",
            RelayError::TooLarge { .. } => "too_large",
            RelayError::InvalidFile { .. } => "invalid_file",
            RelayError::Encoding { .. } => "encoding",
            RelayError::Store { .. } => "store",
            RelayError::TimedOut(_) => "timeout",
        }
    }
}

/// A response ready to be written: status plus JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RelayResponse {
    fn json<T: Serialize>(status: StatusCode, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self { status, body },
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response body");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: r#"{"error":"Upload failed","details":"response serialization failed","processingTimeMs":0}"#.to_string(),
                }
            }
        }
    }

    fn error(err: &RelayError, elapsed: Duration) -> Self {
        Self::json(
            err.status(),
            &ErrorResponse {
                error: err.label(),
                details: err.to_string(),
                processing_time_ms: elapsed.as_millis() as u64,
            },
        )
    }
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Storage identifier: sanitized stem, millisecond timestamp and the first
/// eight hex digits of `nonce`. Browsers name many picked photos
/// `image.jpg`, so the stem and timestamp alone collide.
pub fn public_id(file_name: &str, timestamp_millis: i64, nonce: Uuid) -> String {
    let sanitized = sanitize_filename(file_name);
    let stem = sanitized.split('.').next().unwrap_or_default();
    let nonce = nonce.simple().to_string();
    format!("{}_{}_{}", stem, timestamp_millis, &nonce[..8])
}

/// Encode bytes as `data:<mime>;base64,<payload>`
pub fn encode_data_uri(mime_type: &str, data: &[u8]) -> Result<String, String> {
    if data.is_empty() {
        return Err("Empty file buffer".to_string());
    }
    if mime_type.is_empty() || mime_type.contains([';', ',']) {
        return Err(format!("Unusable mime type '{}'", mime_type));
    }
    Ok(format!("data:{};base64,{}", mime_type, STANDARD.encode(data)))
}

struct StoredFile {
    url: String,
    store_time: Duration,
}

/// Upload relay
pub struct RelayService {
    store: Arc<dyn MediaStore>,
    config: RelayConfig,
    validator: FileValidator,
    request_timeout: Duration,
}

impl RelayService {
    pub fn new(store: Arc<dyn MediaStore>, config: RelayConfig, request_timeout: Duration) -> Self {
        let validator = FileValidator::new(config.max_file_size);
        Self {
            store,
            config,
            validator,
            request_timeout,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn mode(&self) -> &'static str {
        if self.config.multi_file {
            "multi"
        } else {
            "single"
        }
    }

    /// Handle one upload request whose body is already in memory
    pub async fn handle(&self, content_type: Option<&str>, body: Bytes) -> RelayResponse {
        self.handle_body(content_type, Full::new(body)).await
    }

    /// Handle one upload request. Always produces a response.
    ///
    /// Reading the body counts against the request timeout, and reading
    /// stops with 413 once it passes `max_request_bytes`.
    #[tracing::instrument(
        name = "relay.upload",
        skip(self, body),
        fields(
            request_id = %Uuid::new_v4(),
            mode = self.mode(),
            body_bytes = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        )
    )]
    pub async fn handle_body<B>(&self, content_type: Option<&str>, body: B) -> RelayResponse
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        tracing::info!("Upload request started");

        let work = async {
            let body = self.read_body(body).await?;
            tracing::Span::current().record("body_bytes", body.len());
            self.process(content_type, body, started).await
        };

        let outcome = match tokio::time::timeout(self.request_timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RelayError::TimedOut(self.request_timeout)),
        };

        let elapsed = started.elapsed();
        let response = match outcome {
            Ok(response) => {
                tracing::info!(duration_ms = elapsed.as_millis() as u64, "Upload completed successfully");
                response
            }
            Err(e) => {
                metrics::record_error(e.metric_type());
                if e.status().is_server_error() {
                    tracing::error!(error = %e, duration_ms = elapsed.as_millis() as u64, "Upload failed");
                } else {
                    tracing::warn!(error = %e, duration_ms = elapsed.as_millis() as u64, "Upload rejected");
                }
                RelayResponse::error(&e, elapsed)
            }
        };

        tracing::Span::current().record("http.status_code", response.status.as_u16());
        metrics::record_request(self.mode(), response.status.as_u16(), elapsed.as_secs_f64());
        response
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes, RelayError>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let limit = self.config.max_request_bytes();
        let limited = Limited::new(body, usize::try_from(limit).unwrap_or(usize::MAX));
        match limited.collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => Err(RelayError::TooLarge { limit }),
            Err(e) => Err(RelayError::Body(e.to_string())),
        }
    }

    async fn process(&self, content_type: Option<&str>, body: Bytes, started: Instant) -> Result<RelayResponse, RelayError> {
        let multi = self.config.multi_file;
        let content_type = content_type
            .filter(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
            .ok_or_else(|| RelayError::MalformedRequest("expected multipart/form-data".into()))?;

        let mut files = form::parse_files(content_type, body)
            .await
            .map_err(|e| RelayError::MalformedRequest(e.to_string()))?;

        if files.is_empty() {
            return Err(if multi { RelayError::NoFiles } else { RelayError::NoFile });
        }

        if !multi && files.len() > 1 {
            tracing::warn!(ignored = files.len() - 1, "Single-file relay received several files, using the first");
            files.truncate(1);
        }

        for file in &files {
            tracing::info!(
                file = %file.name,
                size_mb = bytes_to_mb(file.size()),
                mime_type = %file.mime_type,
                "File received"
            );
            if let Err(reason) = self.validator.check(&file.mime_type, file.size()) {
                metrics::record_rejection(reason.code());
                return Err(RelayError::InvalidFile {
                    file_name: file.name.clone(),
                    reason,
                });
            }
        }

        if multi {
            self.store_many(&files, started).await
        } else {
            let file = &files[0];
            let stored = self.store_file(file).await?;
            Ok(RelayResponse::json(
                StatusCode::OK,
                &SingleUploadResponse {
                    success: true,
                    url: stored.url,
                    metadata: SingleUploadMetadata {
                        file_name: file.name.clone(),
                        file_size_mb: bytes_to_mb(file.size()),
                        processing_time_ms: started.elapsed().as_millis() as u64,
                        cloudinary_time_ms: stored.store_time.as_millis() as u64,
                    },
                },
            ))
        }
    }

    async fn store_many(&self, files: &[ReceivedFile], started: Instant) -> Result<RelayResponse, RelayError> {
        let mut urls = Vec::with_capacity(files.len());

        for chunk in partition(files, self.config.batch_size) {
            let settled = futures::future::join_all(chunk.iter().map(|f| self.store_file(f))).await;
            let mut first_error = None;
            for outcome in settled {
                match outcome {
                    Ok(stored) => urls.push(stored.url),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                if !urls.is_empty() {
                    tracing::warn!(orphaned = ?urls, "Request failed after some files were stored");
                }
                return Err(e);
            }
        }

        let total_bytes: u64 = files.iter().map(ReceivedFile::size).sum();
        Ok(RelayResponse::json(
            StatusCode::OK,
            &MultiUploadResponse {
                success: true,
                urls,
                metadata: MultiUploadMetadata {
                    total_files: files.len(),
                    total_size_mb: bytes_to_mb(total_bytes),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                },
            },
        ))
    }

    fn store_options(&self, file_name: &str) -> StoreOptions {
        StoreOptions {
            folder: self.config.folder.clone(),
            public_id: public_id(file_name, chrono::Utc::now().timestamp_millis(), Uuid::new_v4()),
            transformation: Transformation::limit(self.config.max_width, self.config.max_height),
            resource_type: "image".to_string(),
            invalidate_cache: true,
            allow_overwrite: false,
        }
    }

    async fn store_file(&self, file: &ReceivedFile) -> Result<StoredFile, RelayError> {
        let data_uri = encode_data_uri(&file.mime_type, &file.data).map_err(|message| RelayError::Encoding {
            file_name: file.name.clone(),
            message,
        })?;

        let options = self.store_options(&file.name);
        tracing::debug!(
            file = %file.name,
            public_id = %options.public_id,
            data_uri_len = data_uri.len(),
            "Starting media store upload"
        );

        let store_started = Instant::now();
        let stored = self
            .store
            .upload(&data_uri, &options)
            .await
            .map_err(|source| RelayError::Store {
                file_name: file.name.clone(),
                source,
            })?;
        let store_time = store_started.elapsed();

        metrics::record_file_stored(file.size());
        tracing::info!(
            file = %file.name,
            url = %stored.secure_url,
            store_ms = store_time.as_millis() as u64,
            "File stored"
        );

        Ok(StoredFile {
            url: stored.secure_url,
            store_time,
        })
    }
}
