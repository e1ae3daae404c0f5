//! Engine error types.
//!
//! Per-file failures never abort a run. They are collected as [`FileError`]s
//! into a [`FileErrors`] aggregate on the run report, so callers can inspect
//! each cause. Failures that invalidate the whole run (listing or deleting
//! from the index provider, cancellation) surface as [`SyncError`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single file could not be indexed.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error on {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON error in {}: {}", .path.display(), .source)]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("extraction failed: {0:#}")]
    Extraction(anyhow::Error),

    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("upsert of {source_ref} failed: {error:#}")]
    Upsert {
        source_ref: String,
        error: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl IndexError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        IndexError::Json {
            path: path.into(),
            source,
        }
    }
}

/// A per-file failure tagged with the file it happened on.
#[derive(Error, Debug)]
#[error("{}: {}", .path.display(), .error)]
pub struct FileError {
    pub path: PathBuf,
    #[source]
    pub error: IndexError,
}

impl FileError {
    pub fn new(path: impl Into<PathBuf>, error: IndexError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// Every per-file failure of one run.
#[derive(Debug, Default)]
pub struct FileErrors(Vec<FileError>);

impl FileErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: FileError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileError> {
        self.0.iter()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate itself.
    pub fn into_result(self) -> Result<(), FileErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} file(s) failed", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for FileErrors {}

impl IntoIterator for FileErrors {
    type Item = FileError;
    type IntoIter = std::vec::IntoIter<FileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<FileError> for FileErrors {
    fn extend<T: IntoIterator<Item = FileError>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

/// A failure that ends the run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("scan root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),

    #[error("listing index documents failed: {0:#}")]
    List(anyhow::Error),

    #[error("deleting {count} stale documents failed: {error:#}")]
    Delete { count: usize, error: anyhow::Error },

    #[error("run cancelled before reconciliation")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_errors_display_lists_each_cause() {
        let mut errors = FileErrors::new();
        errors.push(FileError::new(
            "/tmp/a.md",
            IndexError::Extraction(anyhow::anyhow!("bad pdf")),
        ));
        errors.push(FileError::new("/tmp/b.md", IndexError::Cancelled));

        let text = errors.to_string();
        assert!(text.starts_with("2 file(s) failed"));
        assert!(text.contains("/tmp/a.md: extraction failed: bad pdf"));
        assert!(text.contains("/tmp/b.md: operation cancelled"));
    }

    #[test]
    fn test_into_result() {
        assert!(FileErrors::new().into_result().is_ok());

        let mut errors = FileErrors::new();
        errors.push(FileError::new("x", IndexError::Cancelled));
        let err = errors.into_result().unwrap_err();
        assert_eq!(err.len(), 1);
    }
}
