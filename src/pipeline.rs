//! Segmentation and embedding pipeline.
//!
//! Turns the extracted text of one revision into an [`EmbeddedSegments`]
//! artifact: the title becomes segment 0, followed by the overlapping body
//! windows from [`segment_text`]. Inputs are sent to the [`Embedder`] in
//! batches of `batch_size`; up to `concurrency` batches are in flight at
//! once and the results are reassembled in input order.
//!
//! Any failure (an embedder error, a vector count that does not match the
//! batch, or cancellation) fails the whole document. Nothing partial is
//! returned, so the caller never persists an incomplete artifact.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::chunk::segment_text;
use crate::config::{EmbeddingConfig, SegmentationConfig};
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::models::{EmbeddedSegments, Segment};

#[derive(Clone)]
pub struct SegmentPipeline {
    embedder: Arc<dyn Embedder>,
    segment_length: usize,
    segment_overlap: usize,
    batch_size: usize,
    concurrency: usize,
}

impl SegmentPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        segmentation: &SegmentationConfig,
        embedding: &EmbeddingConfig,
    ) -> Self {
        Self {
            embedder,
            segment_length: segmentation.segment_length,
            segment_overlap: segmentation.segment_overlap,
            batch_size: embedding.batch_size.max(1),
            concurrency: embedding.concurrency.max(1),
        }
    }

    /// Ordered embedding inputs: the title, then every body window.
    pub fn inputs(&self, title: &str, text: &str) -> Vec<String> {
        let mut inputs = vec![title.to_string()];
        inputs.extend(segment_text(text, self.segment_length, self.segment_overlap));
        inputs
    }

    /// Segment and embed one document.
    pub async fn run(
        &self,
        title: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<EmbeddedSegments, IndexError> {
        let inputs = self.inputs(title, text);

        let batches: Vec<Vec<String>> = inputs
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();

        let results: Vec<(String, Vec<Vec<f32>>)> = stream::iter(batches)
            .map(|batch| self.embed_batch(batch, cancel))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let mut model = String::new();
        let mut vectors = Vec::with_capacity(inputs.len());
        for (batch_model, batch_vectors) in results {
            if model.is_empty() {
                model = batch_model;
            }
            vectors.extend(batch_vectors);
        }
        if model.is_empty() {
            model = self.embedder.model_name().to_string();
        }

        let segments = inputs
            .into_iter()
            .zip(vectors)
            .map(|(text, embedding)| Segment { text, embedding })
            .collect();

        Ok(EmbeddedSegments { model, segments })
    }

    async fn embed_batch(
        &self,
        batch: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<Vec<f32>>), IndexError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IndexError::Cancelled),
            r = self.embedder.embed(&batch) => r.map_err(IndexError::Embedding)?,
        };

        if result.vectors.len() != batch.len() {
            return Err(IndexError::Embedding(anyhow::anyhow!(
                "embedder returned {} vectors for {} inputs",
                result.vectors.len(),
                batch.len()
            )));
        }

        Ok((result.model, result.vectors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::Embedding;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Encodes each input's length and first byte, with a delay that makes
    /// later batches finish first.
    struct SlowEmbedder {
        calls: AtomicUsize,
        short: bool,
    }

    #[async_trait]
    impl Embedder for SlowEmbedder {
        fn model_name(&self) -> &str {
            "configured"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Embedding> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30u64.saturating_sub(n as u64 * 10))).await;
            let mut vectors: Vec<Vec<f32>> = texts
                .iter()
                .map(|t| vec![t.len() as f32, t.as_bytes()[0] as f32])
                .collect();
            if self.short {
                vectors.pop();
            }
            Ok(Embedding {
                model: "reported".to_string(),
                vectors,
            })
        }
    }

    fn pipeline(embedder: Arc<dyn Embedder>, batch_size: usize, concurrency: usize) -> SegmentPipeline {
        let seg = SegmentationConfig {
            segment_length: 4,
            segment_overlap: 1,
        };
        let emb = EmbeddingConfig {
            batch_size,
            concurrency,
            ..Default::default()
        };
        SegmentPipeline::new(embedder, &seg, &emb)
    }

    #[tokio::test]
    async fn test_title_first_and_order_preserved() {
        let embedder = Arc::new(SlowEmbedder {
            calls: AtomicUsize::new(0),
            short: false,
        });
        let p = pipeline(embedder.clone(), 2, 3);
        let out = p
            .run("t", "0123456789", &CancellationToken::new())
            .await
            .unwrap();

        let texts: Vec<&str> = out.segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["t", "0123", "3456", "6789"]);
        for s in &out.segments {
            assert_eq!(s.embedding[0], s.text.len() as f32);
            assert_eq!(s.embedding[1], s.text.as_bytes()[0] as f32);
        }
        assert_eq!(out.model, "reported");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_text_yields_title_only() {
        let embedder = Arc::new(SlowEmbedder {
            calls: AtomicUsize::new(0),
            short: false,
        });
        let out = pipeline(embedder, 16, 1)
            .run("empty", "   ", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.segments.len(), 1);
        assert_eq!(out.segments[0].text, "empty");
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_document() {
        let embedder = Arc::new(SlowEmbedder {
            calls: AtomicUsize::new(0),
            short: true,
        });
        let err = pipeline(embedder, 16, 1)
            .run("t", "hello", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_embedding() {
        let embedder = Arc::new(SlowEmbedder {
            calls: AtomicUsize::new(0),
            short: false,
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline(embedder, 16, 1)
            .run("t", "hello", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
    }
}
