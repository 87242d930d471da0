use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use snafu::ensure;

use super::document::BoxFuture;
use super::error::{InvalidBlobPathSnafu, StorageResult, UnavailableSnafu};

/// Object storage for user-uploaded images.
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` at `path` and returns a public URL.
    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
        content_type: &'a str,
    ) -> BoxFuture<'a, StorageResult<String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

pub const MEMORY_BLOB_URL_PREFIX: &str = "memory://blobs/";

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, StoredBlob>>,
    offline: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn object(&self, path: &str) -> Option<StoredBlob> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn upload<'a>(
        &'a self,
        path: &'a str,
        bytes: Vec<u8>,
        content_type: &'a str,
    ) -> BoxFuture<'a, StorageResult<String>> {
        Box::pin(async move {
            ensure!(
                !self.offline.load(Ordering::SeqCst),
                UnavailableSnafu {
                    stage: "memory-blob-upload",
                }
            );
            validate_blob_path(path)?;

            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(
                    path.to_string(),
                    StoredBlob {
                        bytes,
                        content_type: content_type.to_string(),
                    },
                );
            tracing::debug!(path, content_type, "blob stored");
            Ok(format!("{MEMORY_BLOB_URL_PREFIX}{path}"))
        })
    }
}

pub fn validate_blob_path(path: &str) -> StorageResult<()> {
    ensure!(
        !path.trim().is_empty(),
        InvalidBlobPathSnafu {
            stage: "validate-blob-path",
            path: path.to_string(),
            details: "path is empty",
        }
    );
    ensure!(
        !path.starts_with('/') && !path.split('/').any(|part| part.is_empty() || part == ".."),
        InvalidBlobPathSnafu {
            stage: "validate-blob-path",
            path: path.to_string(),
            details: "path must be relative without empty or parent segments",
        }
    );
    Ok(())
}
