//! Filesystem scanner.
//!
//! Walks the scan root, skips the cache directory and excluded paths, and
//! keeps files whose extension is on the allowlist. Each eligible file is
//! loaded into a [`ScannedFile`]: its raw bytes plus the [`Descriptor`]
//! carrying the content revision.
//!
//! Walking and loading are separate steps so that a failure on one file
//! (permission denied, a file vanishing mid-walk) is reported for that file
//! while the walk keeps going.

use anyhow::Result;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::{FileError, IndexError};
use crate::models::Descriptor;

/// A file read from disk, ready for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub descriptor: Descriptor,
    pub data: Vec<u8>,
}

pub struct Scanner {
    root: PathBuf,
    cache_dir: String,
    extensions: Vec<String>,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl Scanner {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());

        Ok(Self {
            root: config.root.clone(),
            cache_dir: config.cache_dir.clone(),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List eligible files under the root in a deterministic order.
    ///
    /// Walk errors are returned alongside the paths instead of aborting.
    pub fn walk(&self) -> (Vec<PathBuf>, Vec<FileError>) {
        let mut files = Vec::new();
        let mut errors = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && e.file_name() == self.cache_dir.as_str()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    errors.push(FileError::new(path, IndexError::Walk(e)));
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let rel = path.strip_prefix(&self.root).unwrap_or(path);
            if self.exclude.is_match(rel) {
                continue;
            }
            if !self.is_supported(path) {
                continue;
            }

            files.push(path.to_path_buf());
        }

        (files, errors)
    }

    fn is_supported(&self, path: &Path) -> bool {
        match path.extension() {
            Some(ext) => {
                let ext = format!(".{}", ext.to_string_lossy().to_ascii_lowercase());
                self.extensions.contains(&ext)
            }
            None => false,
        }
    }

    /// Read a file and build its descriptor.
    pub async fn load(&self, path: &Path) -> Result<ScannedFile, IndexError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| IndexError::io(path, e))?;
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| IndexError::io(path, e))?;

        let time: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let title = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let descriptor = Descriptor {
            name,
            path: rooted_path(&self.root, path),
            title,
            revision: revision_of(&data),
            size: meta.len(),
            time,
        };

        Ok(ScannedFile { descriptor, data })
    }
}

/// Content revision: lowercase hex SHA-256 of the bytes.
pub fn revision_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `root/docs/a.md` → `/docs/a.md`, always with forward slashes.
pub fn rooted_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    format!("/{}", parts.join("/"))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
