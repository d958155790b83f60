//! Blob storage for uploaded inputs and produced outputs.
//!
//! Stored bytes are addressed by an [`ArtifactRef`], a relative name inside
//! one storage root. [`LocalStorage`] is the directory-backed implementation
//! used by the server; names it hands out are unique per call, so no two jobs
//! ever share a path.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use subforged_common::paths::{resolve_within_root, sanitize_file_name};
use subforged_common::{Error, Result};
use uuid::Uuid;

/// Reference to stored bytes: a name relative to a storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable file storage consumed by the orchestration core.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Persist `bytes` under a fresh name derived from `name_hint`.
    async fn put(&self, name_hint: &str, bytes: Bytes) -> Result<ArtifactRef>;

    /// Reserve a fresh, unused name derived from `name_hint` without writing.
    fn allocate(&self, name_hint: &str) -> ArtifactRef;

    /// Remove stored bytes. Deleting a missing reference is not an error.
    async fn delete(&self, reference: &ArtifactRef) -> Result<()>;

    async fn exists(&self, reference: &ArtifactRef) -> bool;

    /// Absolute path for `reference`, guaranteed to lie inside the root.
    fn resolve(&self, reference: &ArtifactRef) -> Result<PathBuf>;
}

/// Directory-backed [`BlobStorage`].
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Open (creating if needed) a storage root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn unique_name(name_hint: &str) -> String {
        let token = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            &token[..8],
            sanitize_file_name(name_hint)
        )
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn put(&self, name_hint: &str, bytes: Bytes) -> Result<ArtifactRef> {
        let reference = self.allocate(name_hint);
        let path = self.resolve(&reference)?;
        let partial = path.with_extension("part");

        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(Error::storage_write)?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(Error::storage_write(e));
        }

        tracing::debug!(
            reference = %reference,
            bytes = bytes.len(),
            "Stored blob in {:?}",
            self.root
        );
        Ok(reference)
    }

    fn allocate(&self, name_hint: &str) -> ArtifactRef {
        ArtifactRef::new(Self::unique_name(name_hint))
    }

    async fn delete(&self, reference: &ArtifactRef) -> Result<()> {
        let path = self.resolve(reference)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, reference: &ArtifactRef) -> bool {
        match self.resolve(reference) {
            Ok(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    fn resolve(&self, reference: &ArtifactRef) -> Result<PathBuf> {
        resolve_within_root(&self.root, reference.as_str())
    }
}
