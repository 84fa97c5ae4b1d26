//! JSON bodies returned by the relay

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleUploadMetadata {
    pub file_name: String,
    #[serde(rename = "fileSizeMB")]
    pub file_size_mb: f64,
    pub processing_time_ms: u64,
    pub cloudinary_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleUploadResponse {
    pub success: bool,
    pub url: String,
    pub metadata: SingleUploadMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiUploadMetadata {
    pub total_files: usize,
    #[serde(rename = "totalSizeMB")]
    pub total_size_mb: f64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiUploadResponse {
    pub success: bool,
    pub urls: Vec<String>,
    pub metadata: MultiUploadMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
    pub processing_time_ms: u64,
}
