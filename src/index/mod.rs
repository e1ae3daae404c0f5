//! Index provider abstraction.
//!
//! An [`IndexProvider`] is the downstream search store the synchronizer keeps
//! in step with the filesystem. Backends are selected by name through the
//! [`ProviderRegistry`]:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             ProviderRegistry             │
//! │  ┌─────────┐ ┌──────────────────────────┐│
//! │  │ memory  │ │ custom (register)        ││
//! │  └─────────┘ └──────────────────────────┘│
//! └──────────────┬───────────────────────────┘
//!                ▼
//!      Synchronizer (upsert / list / delete)
//!      Query server (query)
//! ```
//!
//! # Pagination
//!
//! [`list`](IndexProvider::list) returns pages in a total, stable order.
//! The cursor is opaque to callers; an empty cursor means there are no
//! further pages.
//!
//! # Usage
//!
//! ```rust
//! use context_index::index::ProviderRegistry;
//!
//! let registry = ProviderRegistry::with_builtins();
//! assert!(registry.contains("memory"));
//! ```

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::IndexConfig;
use crate::embedding::Embedder;
use crate::models::Document;

pub use memory::MemoryIndex;

/// One page request.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: usize,
    /// Cursor returned by the previous page; empty for the first page.
    pub cursor: String,
}

/// One page of documents.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Document>,
    /// Cursor for the next page; empty when this was the last.
    pub cursor: String,
}

/// A ranked query hit.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub id: String,
    pub title: String,
    pub source: String,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub score: f32,
}

impl QueryResult {
    pub fn from_document(document: &Document, score: f32) -> Self {
        Self {
            id: document.id.clone(),
            title: document.title.clone(),
            source: document.source.clone(),
            content: document.content.clone(),
            metadata: document.metadata.clone(),
            score,
        }
    }
}

/// A searchable document store.
///
/// Implementations must be safe to share across the worker pool and the
/// query server.
#[async_trait]
pub trait IndexProvider: Send + Sync {
    /// Backend name as registered in the [`ProviderRegistry`].
    fn name(&self) -> &str;

    /// Insert or replace the document with the same id.
    async fn upsert(&self, document: &Document) -> Result<()>;

    /// Return the next page of documents.
    async fn list(&self, options: &ListOptions) -> Result<Page>;

    /// Return at most `limit` documents ranked by relevance to `query`.
    async fn query(&self, query: &str, limit: usize) -> Result<Vec<QueryResult>>;

    /// Remove documents by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;
}

/// Builds a provider from the `[index]` config section.
pub type ProviderFactory = fn(&IndexConfig, Arc<dyn Embedder>) -> Result<Arc<dyn IndexProvider>>;

/// Name → factory table of index backends.
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with every backend compiled into the crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("memory", memory::create);
        registry
    }

    /// Register a backend, replacing any previous factory of the same name.
    pub fn register(&mut self, name: &str, factory: ProviderFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered backend names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Construct the backend named by `config.backend`.
    pub fn create(
        &self,
        config: &IndexConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn IndexProvider>> {
        match self.factories.get(&config.backend) {
            Some(factory) => factory(config, embedder),
            None => bail!(
                "Unknown index backend: '{}'. Registered: {}",
                config.backend,
                self.names().join(", ")
            ),
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedding;

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        fn model_name(&self) -> &str {
            "null"
        }

        async fn embed(&self, texts: &[String]) -> Result<Embedding> {
            Ok(Embedding {
                model: "null".to_string(),
                vectors: texts.iter().map(|_| vec![0.0]).collect(),
            })
        }
    }

    fn custom(config: &IndexConfig, embedder: Arc<dyn Embedder>) -> Result<Arc<dyn IndexProvider>> {
        memory::create(config, embedder)
    }

    #[test]
    fn test_builtins() {
        let registry = ProviderRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["memory"]);
        assert_eq!(registry.len(), 1);
        assert!(ProviderRegistry::new().is_empty());
    }

    #[test]
    fn test_create_known_backend() {
        let registry = ProviderRegistry::default();
        let provider = registry
            .create(&IndexConfig::default(), Arc::new(NullEmbedder))
            .unwrap();
        assert_eq!(provider.name(), "memory");
    }

    #[test]
    fn test_unknown_backend_lists_registered() {
        let registry = ProviderRegistry::with_builtins();
        let config = IndexConfig {
            backend: "qdrant".to_string(),
            ..Default::default()
        };
        let err = match registry.create(&config, Arc::new(NullEmbedder)) {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        let msg = err.to_string();
        assert!(msg.contains("qdrant"));
        assert!(msg.contains("memory"));
    }

    #[test]
    fn test_register_custom_backend() {
        let mut registry = ProviderRegistry::new();
        registry.register("custom", custom);
        assert!(registry.contains("custom"));
        assert!(!registry.contains("memory"));
    }
}
