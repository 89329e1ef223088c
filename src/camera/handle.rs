use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::{FaceAuthError, Result};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// What happens to the backing file once the handle is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// File belongs to someone else (or dev mode keeps captures).
    Keep,
    /// Spooled capture, removed when the handle goes away.
    Delete,
}

/// A captured still plus its MIME type.
///
/// Deliberately not `Clone`: recognition calls take the handle by value, so a
/// still can only ever back one backend request.
pub struct ImageHandle {
    id: u64,
    path: PathBuf,
    mime: String,
    release: Release,
}

impl ImageHandle {
    pub(crate) fn spooled(path: PathBuf, mime: impl Into<String>, release: Release) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            path,
            mime: mime.into(),
            release,
        }
    }

    /// Wraps an existing image file. The file is never deleted.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mime = mime_for_path(&path).ok_or_else(|| {
            FaceAuthError::CaptureFailed(format!("Unsupported image type: {}", path.display()))
        })?;
        Ok(Self::spooled(path, mime, Release::Keep))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// `file://` reference to the still.
    pub fn uri(&self) -> String {
        format!("file://{}", self.path.display())
    }

    /// Upload name presented to the backend, derived from the MIME type only.
    pub fn upload_name(&self) -> String {
        format!("photo.{}", extension_for_mime(&self.mime))
    }

    /// Releases the still now instead of at drop.
    pub fn discard(self) {}
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("mime", &self.mime)
            .finish()
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        if self.release == Release::Delete {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to release capture {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    match image::ImageFormat::from_path(path).ok()? {
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        _ => "jpg",
    }
}
