//! Core data models used throughout the indexer.
//!
//! These types are the on-disk cache artifacts and the documents that flow
//! into an [`IndexProvider`](crate::index::IndexProvider). All of them are
//! serialized as JSON inside the revision cache directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metadata key holding the file name of the source file.
pub const META_FILENAME: &str = "filename";
/// Metadata key holding the rooted path (`/docs/a.md`) of the source file.
pub const META_FILEPATH: &str = "filepath";
/// Metadata key holding the zero-based segment index.
pub const META_INDEX: &str = "index";
/// Metadata key holding the content revision the document was built from.
pub const META_REVISION: &str = "revision";

/// Identity of one file version, written once per revision as `descriptor.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// File name including extension (`notes.md`).
    pub name: String,
    /// Path relative to the scan root, rooted at `/` with forward slashes.
    pub path: String,
    /// File name without extension.
    pub title: String,
    /// Lowercase hex SHA-256 of the raw file bytes.
    pub revision: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub time: DateTime<Utc>,
}

/// One embedded text segment. Index 0 of a sequence is always the title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// The `segments.json` artifact: every segment of a revision plus the model
/// that produced the vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedSegments {
    pub model: String,
    pub segments: Vec<Segment>,
}

/// A searchable unit stored in an index provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: String,
    pub title: String,
    /// `<path>#<ordinal>`, 1-based, stable per segment within a file.
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Build the document for segment `index` of the file described by `descriptor`.
    pub fn from_segment(descriptor: &Descriptor, index: usize, segment: &Segment) -> Self {
        let source = format!("{}#{}", descriptor.path, index + 1);

        let mut metadata = BTreeMap::new();
        metadata.insert(META_FILENAME.to_string(), descriptor.name.clone());
        metadata.insert(META_FILEPATH.to_string(), descriptor.path.clone());
        metadata.insert(META_INDEX.to_string(), index.to_string());
        metadata.insert(META_REVISION.to_string(), descriptor.revision.clone());

        Self {
            id: document_id(&source, &descriptor.revision),
            title: descriptor.title.clone(),
            source,
            content: segment.text.clone(),
            embedding: segment.embedding.clone(),
            metadata,
        }
    }

    /// The `filepath` metadata entry, if present and non-empty.
    pub fn filepath(&self) -> Option<&str> {
        self.metadata
            .get(META_FILEPATH)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// The `revision` metadata entry, if present and non-empty.
    pub fn revision(&self) -> Option<&str> {
        self.metadata
            .get(META_REVISION)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Deterministic document id: a UUID v5 over `source@revision`.
///
/// Re-upserting the same segment of the same revision always targets the
/// same id, so an interrupted upsert pass never leaves duplicates behind.
pub fn document_id(source: &str, revision: &str) -> String {
    let name = format!("{}@{}", source, revision);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> Descriptor {
        Descriptor {
            name: "guide.md".to_string(),
            path: "/docs/guide.md".to_string(),
            title: "guide".to_string(),
            revision: "ab".repeat(32),
            size: 12,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_from_segment_source_and_metadata() {
        let seg = Segment {
            text: "body".to_string(),
            embedding: vec![0.5, 0.25],
        };
        let doc = Document::from_segment(&descriptor(), 2, &seg);
        assert_eq!(doc.source, "/docs/guide.md#3");
        assert_eq!(doc.title, "guide");
        assert_eq!(doc.metadata[META_INDEX], "2");
        assert_eq!(doc.metadata[META_FILENAME], "guide.md");
        assert_eq!(doc.filepath(), Some("/docs/guide.md"));
        assert_eq!(doc.revision(), Some("ab".repeat(32).as_str()));
    }

    #[test]
    fn test_document_id_is_stable_and_revision_scoped() {
        let a = document_id("/a.txt#1", "r1");
        assert_eq!(a, document_id("/a.txt#1", "r1"));
        assert_ne!(a, document_id("/a.txt#1", "r2"));
        assert_ne!(a, document_id("/b.txt#1", "r1"));
    }

    #[test]
    fn test_missing_metadata_is_none() {
        let doc = Document {
            id: "x".to_string(),
            title: String::new(),
            source: String::new(),
            content: String::new(),
            embedding: Vec::new(),
            metadata: BTreeMap::from([(META_FILEPATH.to_string(), String::new())]),
        };
        assert_eq!(doc.filepath(), None);
        assert_eq!(doc.revision(), None);
    }
}
