//! Content-addressed artifact cache.
//!
//! Every revision owns one directory:
//!
//! ```text
//! <root>/.cache/<rev[0:2]>/<rev[2:4]>/<rev>/
//!     descriptor.json            Descriptor of the first path seen with this content
//!     content.txt                extracted plain text
//!     segments.json              EmbeddedSegments (title + body chunks)
//!     documents-<pathkey>.json   realized Documents for one path
//! ```
//!
//! Artifacts are write-once. Each is written to a uniquely named temporary
//! file in the same directory and renamed into place, so a crash or a
//! cancelled producer can never leave a truncated file that a later run
//! would mistake for finished work.
//!
//! Realized documents depend on the path as well as the content, so they get
//! one file per path (`pathkey` is a short digest of the rooted path).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::IndexError;
use crate::models::{Descriptor, Document, EmbeddedSegments};

const DESCRIPTOR_FILE: &str = "descriptor.json";
const CONTENT_FILE: &str = "content.txt";
const SEGMENTS_FILE: &str = "segments.json";

/// Root of the revision cache.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `revision`, fanned out over two 2-character levels.
    ///
    /// `revision` is joined verbatim; check untrusted values with
    /// [`is_revision`] first.
    pub fn dir_for(&self, revision: &str) -> PathBuf {
        let level1 = revision.get(0..2).unwrap_or("__");
        let level2 = revision.get(2..4).unwrap_or("__");
        self.root.join(level1).join(level2).join(revision)
    }

    /// Handle on the artifacts of one revision.
    pub fn revision(&self, revision: &str) -> RevisionCache {
        RevisionCache {
            dir: self.dir_for(revision),
        }
    }
}

/// The artifact directory of a single revision.
#[derive(Debug, Clone)]
pub struct RevisionCache {
    dir: PathBuf,
}

impl RevisionCache {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.dir.join(DESCRIPTOR_FILE)
    }

    pub fn content_path(&self) -> PathBuf {
        self.dir.join(CONTENT_FILE)
    }

    pub fn segments_path(&self) -> PathBuf {
        self.dir.join(SEGMENTS_FILE)
    }

    pub fn documents_path(&self, path: &str) -> PathBuf {
        self.dir.join(format!("documents-{}.json", path_key(path)))
    }

    /// Write the descriptor unless one is already present.
    pub async fn ensure_descriptor(&self, descriptor: &Descriptor) -> Result<bool, IndexError> {
        let path = self.descriptor_path();
        if exists(&path).await? {
            return Ok(false);
        }
        write_json(&path, descriptor).await?;
        Ok(true)
    }

    /// Produce and store the extracted text unless already present.
    ///
    /// Returns `true` when the producer ran.
    pub async fn ensure_content<F, Fut>(&self, produce: F) -> Result<bool, IndexError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, IndexError>>,
    {
        let path = self.content_path();
        if exists(&path).await? {
            return Ok(false);
        }
        let text = produce().await?;
        write_atomic(&path, text.as_bytes()).await?;
        Ok(true)
    }

    /// Produce and store the embedded segments unless already present.
    pub async fn ensure_segments<F, Fut>(&self, produce: F) -> Result<bool, IndexError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EmbeddedSegments, IndexError>>,
    {
        let path = self.segments_path();
        if exists(&path).await? {
            return Ok(false);
        }
        let segments = produce().await?;
        write_json(&path, &segments).await?;
        Ok(true)
    }

    /// Realize and store the documents of `path` unless already present.
    ///
    /// The producer is expected to have upserted every document it returns;
    /// the stored list is the completion marker for that work.
    pub async fn ensure_documents<F, Fut>(&self, path: &str, produce: F) -> Result<bool, IndexError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Document>, IndexError>>,
    {
        let file = self.documents_path(path);
        if exists(&file).await? {
            return Ok(false);
        }
        let documents = produce().await?;
        write_json(&file, &documents).await?;
        Ok(true)
    }

    pub async fn read_descriptor(&self) -> Result<Descriptor, IndexError> {
        read_json(&self.descriptor_path()).await
    }

    pub async fn read_content(&self) -> Result<String, IndexError> {
        let path = self.content_path();
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| IndexError::io(path, e))
    }

    pub async fn read_segments(&self) -> Result<EmbeddedSegments, IndexError> {
        read_json(&self.segments_path()).await
    }

    /// Realized documents for `path`, or `None` when they were never written.
    pub async fn read_documents(&self, path: &str) -> Result<Option<Vec<Document>>, IndexError> {
        let file = self.documents_path(path);
        if !exists(&file).await? {
            return Ok(None);
        }
        read_json(&file).await.map(Some)
    }

    /// Ids of the realized documents for `path`, without materializing the
    /// documents themselves.
    pub async fn read_document_ids(&self, path: &str) -> Result<Option<Vec<String>>, IndexError> {
        let file = self.documents_path(path);
        if !exists(&file).await? {
            return Ok(None);
        }
        let refs: Vec<DocumentRef> = read_json(&file).await?;
        Ok(Some(refs.into_iter().map(|r| r.id).collect()))
    }

    /// Drop the completion marker for `path` so the next run upserts again.
    ///
    /// Returns `true` if a marker was removed.
    pub async fn remove_documents(&self, path: &str) -> Result<bool, IndexError> {
        let file = self.documents_path(path);
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(IndexError::io(file, e)),
        }
    }
}

/// Only the id of a stored document; the other fields are skipped.
#[derive(Deserialize)]
struct DocumentRef {
    #[serde(default)]
    id: String,
}

/// True for a lowercase or uppercase 64-character hex SHA-256 digest.
pub fn is_revision(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Short stable key for a rooted path, used in realized-documents file names.
pub fn path_key(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    hex::encode(&digest[..8])
}

async fn exists(path: &Path) -> Result<bool, IndexError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(IndexError::io(path, e)),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, IndexError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| IndexError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| IndexError::json(path, e))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let data = serde_json::to_vec_pretty(value).map_err(|e| IndexError::json(path, e))?;
    write_atomic(path, &data).await
}

/// Write to a temporary sibling, then rename over the final name.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), IndexError> {
    let dir = path
        .parent()
        .ok_or_else(|| IndexError::io(path, std::io::Error::other("artifact has no parent")))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| IndexError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(IndexError::io(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(IndexError::io(path, e));
    }
    Ok(())
}
