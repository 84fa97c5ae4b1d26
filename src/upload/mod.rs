//! Upload pipeline
//!
//! Client-side orchestration of a photo upload: validation, best-effort
//! normalization, batched transfer to the relay and session bookkeeping.

use bytes::Bytes;
use thiserror::Error;

pub mod batch;
pub mod client;
pub mod normalize;
pub mod session;
pub mod validate;

use validate::RejectReason;

/// A user-selected file before validation
#[derive(Debug, Clone, PartialEq)]
pub struct UploadCandidate {
    pub name: String,
    /// Reported size in bytes. Validation is driven by this value.
    pub byte_length: u64,
    pub mime_type: String,
    pub raw_bytes: Bytes,
}

impl UploadCandidate {
    /// Create a candidate whose reported length matches its bytes
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, raw_bytes: impl Into<Bytes>) -> Self {
        let raw_bytes = raw_bytes.into();
        Self {
            name: name.into(),
            byte_length: raw_bytes.len() as u64,
            mime_type: mime_type.into(),
            raw_bytes,
        }
    }
}

/// An accepted candidate ready for transfer
///
/// After successful normalization the payload is JPEG. When normalization
/// falls back, this carries the original bytes and mime type unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAsset {
    pub name: String,
    pub mime_type: String,
    pub byte_length: u64,
    pub encoded_bytes: Bytes,
}

impl NormalizedAsset {
    /// Wrap a candidate without touching its bytes
    pub fn passthrough(candidate: &UploadCandidate) -> Self {
        Self {
            name: candidate.name.clone(),
            mime_type: candidate.mime_type.clone(),
            byte_length: candidate.raw_bytes.len() as u64,
            encoded_bytes: candidate.raw_bytes.clone(),
        }
    }
}

/// Upload errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    #[error("{0}")]
    Validation(RejectReason),

    #[error("Relay rejected the file: {0}")]
    Rejected(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Unexpected relay response: {0}")]
    ResponseContract(String),

    #[error("Skipped: the session stopped before this file was sent")]
    Skipped,
}

impl UploadError {
    /// Short stable label, used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Validation(_) | UploadError::Rejected(_) => "validation",
            UploadError::Encoding(_) => "encoding",
            UploadError::Transport(_) => "transport",
            UploadError::Store(_) => "store",
            UploadError::ResponseContract(_) => "response_contract",
            UploadError::Skipped => "skipped",
        }
    }
}

/// Outcome of one accepted file
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    /// Position of the file among the accepted candidates
    pub index: usize,
    pub source_name: String,
    pub outcome: Result<String, UploadError>,
}

impl UploadResult {
    pub fn new(index: usize, source_name: impl Into<String>, outcome: Result<String, UploadError>) -> Self {
        Self {
            index,
            source_name: source_name.into(),
            outcome,
        }
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    pub fn error(&self) -> Option<&UploadError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Err(UploadError::Skipped))
    }
}

/// One outbound call to the relay
///
/// `send` carries a single asset; `send_batch` carries a whole chunk and
/// must return one URL per asset, in order.
#[async_trait::async_trait]
pub trait Transfer: Send + Sync {
    async fn send(&self, asset: &NormalizedAsset) -> Result<String, UploadError>;

    async fn send_batch(&self, assets: &[NormalizedAsset]) -> Result<Vec<String>, UploadError>;
}
