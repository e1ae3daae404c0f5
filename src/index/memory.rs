//! In-memory [`IndexProvider`] (`memory` backend).
//!
//! Documents live in a `BTreeMap` keyed by id, which gives the total, stable
//! order pagination needs. The cursor is the base64-encoded id of the last
//! document on the previous page. Query embeds the query text and ranks by
//! brute-force cosine similarity over all stored vectors.
//!
//! Contents are lost when the process exits; the synchronizer re-upserts
//! from its completion markers on the next run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{IndexProvider, ListOptions, Page, QueryResult};
use crate::config::IndexConfig;
use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::models::Document;

pub struct MemoryIndex {
    documents: RwLock<BTreeMap<String, Document>>,
    embedder: Arc<dyn Embedder>,
}

/// Factory registered as `memory` in the [`ProviderRegistry`](super::ProviderRegistry).
pub fn create(_config: &IndexConfig, embedder: Arc<dyn Embedder>) -> Result<Arc<dyn IndexProvider>> {
    Ok(Arc::new(MemoryIndex::new(embedder)))
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            embedder,
        }
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Drop every document.
    pub async fn clear(&self) {
        self.documents.write().await.clear();
    }
}

fn encode_cursor(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .context("invalid pagination cursor")?;
    String::from_utf8(bytes).context("invalid pagination cursor")
}

#[async_trait]
impl IndexProvider for MemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, document: &Document) -> Result<()> {
        let mut docs = self.documents.write().await;
        docs.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn list(&self, options: &ListOptions) -> Result<Page> {
        let limit = options.limit.max(1);
        let start = if options.cursor.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(decode_cursor(&options.cursor)?)
        };

        let docs = self.documents.read().await;
        let mut range = docs.range((start, Bound::Unbounded));
        let items: Vec<Document> = range.by_ref().take(limit).map(|(_, d)| d.clone()).collect();

        let cursor = match (items.last(), range.next()) {
            (Some(last), Some(_)) => encode_cursor(&last.id),
            _ => String::new(),
        };

        Ok(Page { items, cursor })
    }

    async fn query(&self, query: &str, limit: usize) -> Result<Vec<QueryResult>> {
        let vector = embed_query(self.embedder.as_ref(), query).await?;

        let docs = self.documents.read().await;
        let mut scored: Vec<(f32, &Document)> = docs
            .values()
            .filter(|d| !d.embedding.is_empty())
            .map(|d| (cosine_similarity(&vector, &d.embedding), d))
            .collect();

        // Ties fall back to id order, which the map already provides.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, d)| QueryResult::from_document(d, score))
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut docs = self.documents.write().await;
        for id in ids {
            docs.remove(id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedding;

    /// Maps a few words onto fixed axes.
    struct AxisEmbedder;

    fn axis(text: &str) -> Vec<f32> {
        match text {
            "cats" => vec![1.0, 0.0, 0.0],
            "dogs" => vec![0.0, 1.0, 0.0],
            _ => vec![0.0, 0.0, 1.0],
        }
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }

        async fn embed(&self, texts: &[String]) -> Result<Embedding> {
            Ok(Embedding {
                model: "axis".to_string(),
                vectors: texts.iter().map(|t| axis(t)).collect(),
            })
        }
    }

    fn doc(id: &str, content: &str) -> Document {
        Document {
            id: id.to_string(),
            title: id.to_string(),
            source: format!("/{}#1", id),
            content: content.to_string(),
            embedding: axis(content),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_pagination_covers_every_document_once() {
        let index = MemoryIndex::new(Arc::new(AxisEmbedder));
        for i in 0..25 {
            index.upsert(&doc(&format!("doc-{:02}", i), "x")).await.unwrap();
        }

        let mut pages = 0;
        let mut seen = Vec::new();
        let mut cursor = String::new();
        loop {
            let page = index
                .list(&ListOptions {
                    limit: 10,
                    cursor: cursor.clone(),
                })
                .await
                .unwrap();
            pages += 1;
            seen.extend(page.items.into_iter().map(|d| d.id));
            cursor = page.cursor;
            if cursor.is_empty() {
                break;
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 25);
        let expected: Vec<String> = (0..25).map(|i| format!("doc-{:02}", i)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_exact_page_multiple_ends_with_empty_cursor() {
        let index = MemoryIndex::new(Arc::new(AxisEmbedder));
        for i in 0..10 {
            index.upsert(&doc(&format!("d{}", i), "x")).await.unwrap();
        }
        let page = index
            .list(&ListOptions {
                limit: 10,
                cursor: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 10);
        assert!(page.cursor.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_ignores_unknown() {
        let index = MemoryIndex::new(Arc::new(AxisEmbedder));
        index.upsert(&doc("a", "cats")).await.unwrap();
        index.upsert(&doc("a", "dogs")).await.unwrap();
        assert_eq!(index.len().await, 1);

        index
            .delete(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let index = MemoryIndex::new(Arc::new(AxisEmbedder));
        index.upsert(&doc("a", "cats")).await.unwrap();
        index.upsert(&doc("b", "dogs")).await.unwrap();
        index.upsert(&doc("c", "other")).await.unwrap();

        let results = index.query("dogs", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "b");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_bad_cursor_is_error() {
        let index = MemoryIndex::new(Arc::new(AxisEmbedder));
        let err = index
            .list(&ListOptions {
                limit: 10,
                cursor: "%%%".to_string(),
            })
            .await;
        assert!(err.is_err());
    }
}
