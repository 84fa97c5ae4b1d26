//! Multipart form parsing
//!
//! Collects every part named `file` that carries a filename. Text fields
//! and other names are ignored.

use bytes::Bytes;
use std::convert::Infallible;

/// Multipart field carrying file data
pub const FILE_FIELD: &str = "file";

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// One file received from the client
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl ReceivedFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Parse a buffered `multipart/form-data` body
pub async fn parse_files(content_type: &str, body: Bytes) -> Result<Vec<ReceivedFile>, multer::Error> {
    let boundary = multer::parse_boundary(content_type)?;
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let mime_type = field
            .content_type()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string());
        let data = field.bytes().await?;

        files.push(ReceivedFile {
            name,
            mime_type,
            data,
        });
    }

    Ok(files)
}
