//! Multipart intake for the transcribe endpoint.
//!
//! The extension is checked from the part headers before any payload byte is
//! read, and the payload is rejected as soon as its running length passes the
//! configured limit instead of after it has been fully buffered.

use std::time::Instant;

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use sha2::{Digest, Sha256};

use crate::error::GateError;
use crate::guards::RequestValidator;

/// Name of the multipart field carrying the media file.
pub const FILE_FIELD: &str = "file";

/// Per-request upload state; lives only for the duration of the request.
#[derive(Debug)]
pub struct RequestContext {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub extension: String,
    pub started: Instant,
}

impl RequestContext {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn sha256_hex(&self) -> String {
        format!("{:x}", Sha256::digest(&self.bytes))
    }

    /// Facts kept for the request log once the payload has been handed off.
    pub fn summary(&self, with_digest: bool) -> UploadSummary {
        UploadSummary {
            extension: self.extension.clone(),
            size: self.size(),
            sha256: with_digest.then(|| self.sha256_hex()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadSummary {
    pub extension: String,
    pub size: usize,
    pub sha256: Option<String>,
}

pub async fn read_upload(
    multipart: &mut Multipart,
    validator: &RequestValidator,
    started: Instant,
) -> Result<RequestContext, GateError> {
    let limit = validator.max_bytes();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or("upload")
            .to_string();
        let extension = validator.check_extension(&filename)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, limit))? {
            validator.check_size(bytes.len() + chunk.len())?;
            bytes.extend_from_slice(&chunk);
        }
        tracing::debug!(%filename, size = bytes.len(), "upload received");
        return Ok(RequestContext {
            bytes,
            filename,
            extension,
            started,
        });
    }
    Err(GateError::BadRequest(vec![format!(
        "{}: Field required",
        FILE_FIELD
    )]))
}

fn multipart_error(err: MultipartError, limit: usize) -> GateError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GateError::PayloadTooLarge { limit }
    } else {
        GateError::BadRequest(vec![err.body_text()])
    }
}
