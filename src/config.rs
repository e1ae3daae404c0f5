//! TOML configuration.
//!
//! Every component receives the slice of [`Config`] it needs at construction
//! time. Secrets are never stored in the file; the `*_env` fields name the
//! environment variable to read them from.
//!
//! ```toml
//! [scan]
//! root = "./docs"
//!
//! [segmentation]
//! segment_length = 3000
//! segment_overlap = 1500
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [index]
//! backend = "memory"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub scan: ScanConfig,
    #[serde(default)]
    pub segmentation: SegmentationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    pub root: PathBuf,
    /// Cache directory name, created inside `root` and never scanned.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Number of files processed concurrently. 1 keeps the sequential order.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_cache_dir() -> String {
    ".cache".to_string()
}

fn default_extensions() -> Vec<String> {
    [
        ".csv", ".md", ".rst", ".tsv", ".txt", ".pdf", ".docx", ".pptx", ".xlsx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_workers() -> usize {
    1
}

impl ScanConfig {
    pub fn cache_path(&self) -> PathBuf {
        self.root.join(&self.cache_dir)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmentationConfig {
    #[serde(default = "default_segment_length")]
    pub segment_length: usize,
    #[serde(default = "default_segment_overlap")]
    pub segment_overlap: usize,
}

fn default_segment_length() -> usize {
    3000
}
fn default_segment_overlap() -> usize {
    1500
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            segment_length: default_segment_length(),
            segment_overlap: default_segment_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL of an OpenAI-compatible API (the `/embeddings` path is appended).
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Embedding requests in flight per document.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_concurrency() -> usize {
    1
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            url: default_embedding_url(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// `local` (in-process) or `http` (remote extraction service).
    #[serde(default = "default_extraction_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_extraction_provider() -> String {
    "local".to_string()
}
fn default_extraction_timeout_secs() -> u64 {
    120
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_extraction_provider(),
            url: None,
            token_env: None,
            timeout_secs: default_extraction_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Registered backend name, see [`ProviderRegistry`](crate::index::ProviderRegistry).
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Page size used while listing documents during reconciliation.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_page_size() -> usize {
    10
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}
fn default_query_limit() -> usize {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            query_limit: default_query_limit(),
        }
    }
}

/// Read, parse, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segmentation;
        if seg.segment_length == 0 {
            bail!("segmentation.segment_length must be > 0");
        }
        if seg.segment_overlap >= seg.segment_length {
            bail!(
                "segmentation.segment_overlap ({}) must be smaller than segment_length ({})",
                seg.segment_overlap,
                seg.segment_length
            );
        }

        if self.scan.cache_dir.is_empty() || self.scan.cache_dir.contains(['/', '\\']) {
            bail!("scan.cache_dir must be a single directory name");
        }
        if self.scan.workers == 0 {
            bail!("scan.workers must be >= 1");
        }
        if self.scan.extensions.iter().any(|e| !e.starts_with('.')) {
            bail!("scan.extensions entries must start with '.'");
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }
        if self.embedding.concurrency == 0 {
            bail!("embedding.concurrency must be >= 1");
        }
        match self.embedding.provider.as_str() {
            "openai" => {}
            other => bail!("Unknown embedding provider: '{}'. Must be openai.", other),
        }

        match self.extraction.provider.as_str() {
            "local" => {}
            "http" => {
                if self.extraction.url.is_none() {
                    bail!("extraction.url must be set when provider is 'http'");
                }
            }
            other => bail!(
                "Unknown extraction provider: '{}'. Must be local or http.",
                other
            ),
        }

        if self.index.page_size == 0 {
            bail!("index.page_size must be >= 1");
        }
        if self.schedule.interval_secs == 0 {
            bail!("schedule.interval_secs must be >= 1");
        }

        Ok(())
    }

    /// Override the scan root (used by the `--root` CLI flag).
    pub fn with_root(mut self, root: PathBuf) -> Self {
        self.scan.root = root;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[scan]\nroot = \"/data\"\n").unwrap();
        assert_eq!(cfg.scan.cache_dir, ".cache");
        assert_eq!(cfg.scan.workers, 1);
        assert!(cfg.scan.extensions.contains(&".pdf".to_string()));
        assert_eq!(cfg.segmentation.segment_length, 3000);
        assert_eq!(cfg.segmentation.segment_overlap, 1500);
        assert_eq!(cfg.index.backend, "memory");
        assert_eq!(cfg.index.page_size, 10);
        assert_eq!(cfg.schedule.interval_secs, 300);
        assert_eq!(cfg.scan.cache_path(), PathBuf::from("/data/.cache"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_length() {
        let err = parse_config(
            "[scan]\nroot = \"/data\"\n[segmentation]\nsegment_length = 100\nsegment_overlap = 100\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("segment_overlap"));

        assert!(parse_config(
            "[scan]\nroot = \"/data\"\n[segmentation]\nsegment_length = 100\nsegment_overlap = 0\n",
        )
        .is_ok());
    }

    #[test]
    fn test_http_extraction_requires_url() {
        let err = parse_config("[scan]\nroot = \"/data\"\n[extraction]\nprovider = \"http\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("extraction.url"));
    }

    #[test]
    fn test_unknown_embedding_provider_rejected() {
        let err = parse_config("[scan]\nroot = \"/data\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_cache_dir_must_be_a_name() {
        let err =
            parse_config("[scan]\nroot = \"/data\"\ncache_dir = \"a/b\"\n").unwrap_err();
        assert!(err.to_string().contains("cache_dir"));
    }

    #[test]
    fn test_index_section() {
        let cfg =
            parse_config("[scan]\nroot = \"/data\"\n[index]\nbackend = \"memory\"\npage_size = 50\n")
                .unwrap();
        assert_eq!(cfg.index.backend, "memory");
        assert_eq!(cfg.index.page_size, 50);
    }
}
