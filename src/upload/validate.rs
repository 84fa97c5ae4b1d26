//! File validation
//!
//! Rules are applied in a fixed order and the first failing rule wins:
//! image mime type, size ceiling, non-empty.

use super::UploadCandidate;
use thiserror::Error;

/// Largest accepted file: 50 MiB
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Convert bytes to megabytes rounded to two decimals
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round() / 100.0
}

/// Why a file was refused before transfer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("Invalid file type: {mime_type}. Only images are allowed.")]
    InvalidType { mime_type: String },

    #[error("File too large: {:.2}MB. Maximum size is {}MB.", bytes_to_mb(*.size), bytes_to_mb(*.max))]
    TooLarge { size: u64, max: u64 },

    #[error("Empty file provided")]
    Empty,

    #[error("No file uploaded")]
    NoFileProvided,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InvalidType { .. } => "invalid_type",
            RejectReason::TooLarge { .. } => "too_large",
            RejectReason::Empty => "empty",
            RejectReason::NoFileProvided => "no_file",
        }
    }
}

/// Verdict for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationVerdict {
    pub candidate: UploadCandidate,
    pub accepted: bool,
    pub reason: Option<RejectReason>,
}

/// Validator with a configurable size ceiling
#[derive(Debug, Clone, Copy)]
pub struct FileValidator {
    max_file_size: u64,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self::new(MAX_FILE_SIZE)
    }
}

impl FileValidator {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Check raw metadata against the rules
    pub fn check(&self, mime_type: &str, byte_length: u64) -> Result<(), RejectReason> {
        if !mime_type.starts_with("image/") {
            return Err(RejectReason::InvalidType {
                mime_type: mime_type.to_string(),
            });
        }

        if byte_length > self.max_file_size {
            return Err(RejectReason::TooLarge {
                size: byte_length,
                max: self.max_file_size,
            });
        }

        if byte_length == 0 {
            return Err(RejectReason::Empty);
        }

        Ok(())
    }

    pub fn validate(&self, candidate: UploadCandidate) -> ValidationVerdict {
        let reason = self
            .check(&candidate.mime_type, candidate.byte_length)
            .err();
        ValidationVerdict {
            accepted: reason.is_none(),
            reason,
            candidate,
        }
    }
}

/// Validate a candidate against the default rules
pub fn validate(candidate: UploadCandidate) -> ValidationVerdict {
    FileValidator::default().validate(candidate)
}
