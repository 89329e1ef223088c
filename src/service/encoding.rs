//! Turning an [`ImageHandle`] into the multipart `file` part.
//!
//! Strategies are tried in order and the first success wins:
//!
//! 1. [`InlineBase64Encoder`] reads the still, base64-encodes it into a data
//!    URI and decodes that back into an in-memory blob.
//! 2. [`FileReferenceEncoder`] hands the file itself to the request body and
//!    lets it stream from disk.
//!
//! Both produce a part with the same field name, file name and MIME type, so
//! the backend cannot tell which one ran.

use std::future::Future;
use std::pin::Pin;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::multipart::Part;
use thiserror::Error;

use crate::camera::ImageHandle;
use crate::common::{FaceAuthError, Result};

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("cannot read {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("image is {size} bytes, inline limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("data URI round-trip failed: {0}")]
    DataUri(String),

    #[error("invalid MIME type {0:?}")]
    Mime(String),
}

pub type EncodeFut<'a> = Pin<Box<dyn Future<Output = std::result::Result<Part, EncodeError>> + Send + 'a>>;

pub trait ImageEncoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode<'a>(&'a self, image: &'a ImageHandle) -> EncodeFut<'a>;
}

/// Default order: inline blob first, file reference as fallback.
pub fn default_encoders(max_inline_bytes: u64) -> Vec<Box<dyn ImageEncoder>> {
    vec![
        Box::new(InlineBase64Encoder::new(max_inline_bytes)),
        Box::new(FileReferenceEncoder),
    ]
}

/// Runs the strategies in order. Fails with `EncodingFailed` only when every
/// strategy failed; no network I/O happens in that case.
pub async fn encode_image(encoders: &[Box<dyn ImageEncoder>], image: &ImageHandle) -> Result<Part> {
    let mut failures = Vec::with_capacity(encoders.len());

    for encoder in encoders {
        match encoder.encode(image).await {
            Ok(part) => {
                if !failures.is_empty() {
                    tracing::info!("Image {} encoded with fallback strategy {}", image.id(), encoder.name());
                }
                return Ok(part);
            }
            Err(e) => {
                tracing::warn!("Encoding strategy {} failed for image {}: {}", encoder.name(), image.id(), e);
                failures.push(format!("{}: {}", encoder.name(), e));
            }
        }
    }

    if failures.is_empty() {
        return Err(FaceAuthError::EncodingFailed("no encoding strategies configured".into()));
    }
    Err(FaceAuthError::EncodingFailed(failures.join("; ")))
}

fn finish_part(part: Part, image: &ImageHandle) -> std::result::Result<Part, EncodeError> {
    part.file_name(image.upload_name())
        .mime_str(image.mime())
        .map_err(|_| EncodeError::Mime(image.mime().to_string()))
}

fn read_error(image: &ImageHandle, source: std::io::Error) -> EncodeError {
    EncodeError::Read { path: image.path().display().to_string(), source }
}

#[derive(Debug, Clone)]
pub struct InlineBase64Encoder {
    max_inline_bytes: u64,
}

impl InlineBase64Encoder {
    pub fn new(max_inline_bytes: u64) -> Self {
        Self { max_inline_bytes }
    }
}

impl ImageEncoder for InlineBase64Encoder {
    fn name(&self) -> &'static str {
        "inline-base64"
    }

    fn encode<'a>(&'a self, image: &'a ImageHandle) -> EncodeFut<'a> {
        Box::pin(async move {
            let size = tokio::fs::metadata(image.path())
                .await
                .map_err(|e| read_error(image, e))?
                .len();
            if size > self.max_inline_bytes {
                return Err(EncodeError::TooLarge { size, limit: self.max_inline_bytes });
            }

            let bytes = tokio::fs::read(image.path()).await.map_err(|e| read_error(image, e))?;
            let data_uri = format!("data:{};base64,{}", image.mime(), STANDARD.encode(&bytes));
            let blob = decode_data_uri(&data_uri)?;

            finish_part(Part::bytes(blob), image)
        })
    }
}

/// Splits a `data:<mime>;base64,<payload>` URI back into bytes.
fn decode_data_uri(uri: &str) -> std::result::Result<Vec<u8>, EncodeError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| EncodeError::DataUri("missing data: scheme".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| EncodeError::DataUri("missing payload separator".into()))?;
    if !header.ends_with(";base64") {
        return Err(EncodeError::DataUri(format!("unsupported encoding in {:?}", header)));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| EncodeError::DataUri(e.to_string()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileReferenceEncoder;

impl ImageEncoder for FileReferenceEncoder {
    fn name(&self) -> &'static str {
        "file-reference"
    }

    fn encode<'a>(&'a self, image: &'a ImageHandle) -> EncodeFut<'a> {
        Box::pin(async move {
            let file = tokio::fs::File::open(image.path())
                .await
                .map_err(|e| read_error(image, e))?;
            let length = file.metadata().await.map_err(|e| read_error(image, e))?.len();
            tracing::debug!("Streaming {} ({} bytes) by reference", image.uri(), length);

            finish_part(Part::stream_with_length(file, length), image)
        })
    }
}
