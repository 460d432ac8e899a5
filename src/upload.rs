use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rand::{Rng, distr::Alphanumeric};

use crate::error::{AppError, AppResult};

/// Maximum accepted upload size: 20 MB.
pub const MAX_FILE_SIZE: usize = 20 * 1024 * 1024;

/// UploadKind
///
/// The declared upload category. Each kind maps to a MIME allow-list and a
/// subdirectory under the upload root. Link/redirect resources carry no
/// file, so they have no kind here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Pdf,
    Video,
    Image,
}

impl UploadKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pdf" => Some(Self::Pdf),
            "video" => Some(Self::Video),
            "image" => Some(Self::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Video => "video",
            Self::Image => "image",
        }
    }

    /// The declared MIME types accepted for this kind. Declared only: the
    /// content itself is not sniffed.
    pub fn allowed_mime_types(&self) -> &'static [&'static str] {
        match self {
            Self::Pdf => &["application/pdf"],
            Self::Video => &["video/mp4", "video/webm", "video/ogg"],
            Self::Image => &["image/jpeg", "image/png", "image/webp", "image/gif"],
        }
    }
}

/// Rejects a declared content type outside the kind's allow-list.
pub fn validate_mime(kind: UploadKind, content_type: &str) -> AppResult<()> {
    if !kind.allowed_mime_types().contains(&content_type) {
        return Err(AppError::validation(format!(
            "Invalid file format for {}",
            kind.as_str()
        )));
    }
    Ok(())
}

/// Rejects payloads over [`MAX_FILE_SIZE`].
pub fn validate_size(size: usize) -> AppResult<()> {
    if size > MAX_FILE_SIZE {
        return Err(AppError::validation(format!(
            "File too large. Maximum size is {}MB",
            MAX_FILE_SIZE / (1024 * 1024)
        )));
    }
    Ok(())
}

/// unique_filename
///
/// Builds a collision-resistant on-disk name from the client's filename:
/// the stem with anything outside `[A-Za-z0-9-_]` replaced by underscores,
/// a millisecond timestamp, a 6-character random suffix, and the original
/// extension. Path separators and traversal components cannot survive the
/// sanitization.
pub fn unique_filename(original: &str) -> String {
    let path = Path::new(original);

    let stem = path
        .file_stem()
        .and_then(OsStr::to_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("file");
    let sanitized: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let extension = path
        .extension()
        .and_then(OsStr::to_str)
        .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin");

    let timestamp = chrono::Utc::now().timestamp_millis();
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    format!("{sanitized}_{timestamp}_{random}.{extension}")
}

// 1. StorageService Contract

/// StorageService
///
/// The abstract contract for persisting uploaded files. Lets the handlers
/// swap the real local-disk implementation for the in-memory mock during
/// testing without touching the calling code.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Provisions the upload directory layout (one subdirectory per kind).
    /// Called once at startup; a no-op for the mock.
    async fn ensure_layout(&self);

    /// Persists `bytes` under the kind's subdirectory and returns the
    /// public-relative URL path (`/uploads/{kind}/{filename}`).
    async fn store(&self, kind: UploadKind, filename: &str, bytes: &[u8]) -> AppResult<String>;
}

/// StorageState
///
/// The concrete type used to share the storage service across the
/// application state.
pub type StorageState = Arc<dyn StorageService>;

// 2. The Real Implementation (Local Disk)

/// LocalDiskStorage
///
/// Writes uploads under a configured root directory, one subdirectory per
/// [`UploadKind`]. The root is expected to be served statically at
/// `/uploads`, which is what the returned paths assume.
#[derive(Clone)]
pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StorageService for LocalDiskStorage {
    /// Creates the root and per-kind subdirectories. Failures are logged
    /// rather than fatal; the store call re-creates directories on demand.
    async fn ensure_layout(&self) {
        for kind in [UploadKind::Pdf, UploadKind::Video, UploadKind::Image] {
            let dir = self.root.join(kind.as_str());
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to provision upload dir");
            }
        }
    }

    async fn store(&self, kind: UploadKind, filename: &str, bytes: &[u8]) -> AppResult<String> {
        // Filenames come from unique_filename(), but a hostile caller must
        // still not be able to climb out of the upload root.
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return Err(AppError::validation("Invalid file name"));
        }

        let dir = self.root.join(kind.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Storage(format!("create upload dir: {e}")))?;

        let target = dir.join(filename);
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| AppError::Storage(format!("write upload: {e}")))?;

        Ok(format!("/uploads/{}/{}", kind.as_str(), filename))
    }
}

// 3. The Mock Implementation (For Tests)

/// MockStorageService
///
/// Accepts every store call without touching the filesystem, returning the
/// same public path the real implementation would. `new_failing()` makes
/// every operation fail, for exercising the error path.
#[derive(Clone)]
pub struct MockStorageService {
    pub should_fail: bool,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self { should_fail: false }
    }

    pub fn new_failing() -> Self {
        Self { should_fail: true }
    }
}

impl Default for MockStorageService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_layout(&self) {
        // No-op in mock environment.
    }

    async fn store(&self, kind: UploadKind, filename: &str, _bytes: &[u8]) -> AppResult<String> {
        if self.should_fail {
            return Err(AppError::Storage(
                "mock storage failure: simulation requested".to_string(),
            ));
        }
        Ok(format!("/uploads/{}/{}", kind.as_str(), filename))
    }
}
