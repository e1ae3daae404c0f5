//! Incremental indexing and synchronization engine.
//!
//! One run has two strictly ordered phases.
//!
//! # Upsert phase
//!
//! Every eligible file is pushed through the cache pipeline by a bounded
//! worker pool (`scan.workers`):
//!
//! ```text
//! load bytes ─► descriptor.json ─► content.txt ─► segments.json ─► documents-<pathkey>.json
//!   (revision)      (once)          (extractor)     (embedder)        (upsert, then marker)
//! ```
//!
//! Each step is skipped when its artifact already exists, so an unchanged
//! tree costs no extraction, embedding, or index mutation. Only a file whose
//! whole pipeline succeeded enters the path→revision mapping.
//!
//! # Reconciliation phase
//!
//! Runs only after every file finished and the run was not cancelled. All
//! indexed documents are listed page by page and compared against the
//! mapping; a document whose path is gone or whose revision differs
//! (ASCII case-insensitive) is stale. Stale documents are removed in one
//! batched delete, and their completion markers are dropped so the same
//! (path, revision) is upserted again if it ever comes back.
//!
//! Finally, any current (path, revision) whose marker records a document id
//! the listing did not contain (a wiped or restarted backend) is repaired by
//! re-upserting the missing documents from the marker.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{is_revision, CacheStore};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{FileError, FileErrors, IndexError, SyncError};
use crate::extract::Extractor;
use crate::index::{IndexProvider, ListOptions};
use crate::models::Document;
use crate::pipeline::SegmentPipeline;
use crate::scanner::Scanner;

/// Outcome of one run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Eligible files found by the walk.
    pub files_scanned: usize,
    /// Files whose pipeline completed and entered the path→revision mapping.
    pub files_indexed: usize,
    /// Extractor invocations (cache misses on `content.txt`).
    pub extracted: usize,
    /// Embedding pipeline runs (cache misses on `segments.json`).
    pub embedded: usize,
    pub upserted: usize,
    pub deleted: usize,
    /// Documents re-upserted from completion markers.
    pub repaired: usize,
    pub errors: FileErrors,
}

impl SyncReport {
    /// True when no file failed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What the upsert phase did for one file.
#[derive(Debug)]
struct FileOutcome {
    path: String,
    revision: String,
    extracted: bool,
    embedded: bool,
    upserted: usize,
}

/// What reconciliation did.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub listed: usize,
    pub deleted: usize,
    pub repaired: usize,
    pub errors: FileErrors,
}

pub struct Synchronizer {
    scanner: Scanner,
    cache: CacheStore,
    extractor: Arc<dyn Extractor>,
    pipeline: SegmentPipeline,
    index: Arc<dyn IndexProvider>,
    workers: usize,
    page_size: usize,
}

impl Synchronizer {
    pub fn new(
        config: &Config,
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn IndexProvider>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            scanner: Scanner::new(&config.scan)?,
            cache: CacheStore::new(config.scan.cache_path()),
            extractor,
            pipeline: SegmentPipeline::new(embedder, &config.segmentation, &config.embedding),
            index,
            workers: config.scan.workers.max(1),
            page_size: config.index.page_size.max(1),
        })
    }

    /// Execute one full run: upsert phase, then reconciliation.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let root = self.scanner.root();
        if !root.is_dir() {
            return Err(SyncError::MissingRoot(root.to_path_buf()));
        }

        let (paths, walk_errors) = self.scanner.walk();
        info!(root = %root.display(), files = paths.len(), "sync started");

        let mut report = SyncReport {
            files_scanned: paths.len(),
            ..Default::default()
        };
        for err in walk_errors {
            warn!(path = %err.path.display(), error = %err.error, "walk error");
            report.errors.push(err);
        }

        let results: Vec<(PathBuf, Result<FileOutcome, IndexError>)> = stream::iter(paths)
            .map(|path| async move {
                let result = self.process_file(&path, cancel).await;
                (path, result)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut revisions: HashMap<String, String> = HashMap::with_capacity(results.len());
        for (path, result) in results {
            match result {
                Ok(outcome) => {
                    debug!(
                        path = %outcome.path,
                        revision = %outcome.revision,
                        extracted = outcome.extracted,
                        embedded = outcome.embedded,
                        upserted = outcome.upserted,
                        "file indexed"
                    );
                    report.files_indexed += 1;
                    report.extracted += usize::from(outcome.extracted);
                    report.embedded += usize::from(outcome.embedded);
                    report.upserted += outcome.upserted;
                    revisions.insert(outcome.path, outcome.revision);
                }
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "file failed");
                    report.errors.push(FileError::new(path, error));
                }
            }
        }

        if cancel.is_cancelled() {
            info!("sync cancelled, skipping reconciliation");
            return Err(SyncError::Cancelled);
        }

        let outcome = self.reconcile(&revisions, cancel).await?;
        report.deleted = outcome.deleted;
        report.repaired = outcome.repaired;
        report.errors.extend(outcome.errors);

        info!(
            scanned = report.files_scanned,
            indexed = report.files_indexed,
            extracted = report.extracted,
            embedded = report.embedded,
            upserted = report.upserted,
            deleted = report.deleted,
            repaired = report.repaired,
            failed = report.errors.len(),
            "sync finished"
        );

        Ok(report)
    }

    /// Run forever on `interval`, starting immediately, until `cancel` fires.
    ///
    /// Fatal run errors are logged and the loop continues with the next tick.
    pub async fn run_every(&self, interval: Duration, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run(cancel).await {
                Ok(report) if !report.is_clean() => {
                    warn!(failed = report.errors.len(), "sync finished with failures");
                }
                Ok(_) => {}
                Err(SyncError::Cancelled) => break,
                Err(e) => error!(error = %e, "sync failed"),
            }
        }
    }

    /// Upsert phase for a single file.
    async fn process_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome, IndexError> {
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let file = self.scanner.load(path).await?;
        let descriptor = &file.descriptor;
        let rev = self.cache.revision(&descriptor.revision);

        rev.ensure_descriptor(descriptor).await?;

        let extracted = rev
            .ensure_content(|| async {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(IndexError::Cancelled),
                    r = self.extractor.extract(&descriptor.name, &file.data) => {
                        r.map_err(IndexError::Extraction)
                    }
                }
            })
            .await?;

        let embedded = rev
            .ensure_segments(|| async {
                let text = rev.read_content().await?;
                self.pipeline.run(&descriptor.title, &text, cancel).await
            })
            .await?;

        let upserted = AtomicUsize::new(0);
        rev.ensure_documents(&descriptor.path, || async {
            let embedded = rev.read_segments().await?;
            let documents: Vec<Document> = embedded
                .segments
                .iter()
                .enumerate()
                .map(|(i, segment)| Document::from_segment(descriptor, i, segment))
                .collect();

            for document in &documents {
                self.upsert(document, cancel).await?;
                upserted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(documents)
        })
        .await?;

        Ok(FileOutcome {
            path: descriptor.path.clone(),
            revision: descriptor.revision.clone(),
            extracted,
            embedded,
            upserted: upserted.into_inner(),
        })
    }

    async fn upsert(&self, document: &Document, cancel: &CancellationToken) -> Result<(), IndexError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(IndexError::Cancelled),
            r = self.index.upsert(document) => r.map_err(|error| IndexError::Upsert {
                source_ref: document.source.clone(),
                error,
            }),
        }
    }

    /// Diff the index against `revisions` (rooted path → revision), delete
    /// stale documents, and repair current files the index lost.
    pub async fn reconcile(
        &self,
        revisions: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, SyncError> {
        let mut outcome = ReconcileOutcome::default();
        let mut stale_ids = Vec::new();
        let mut stale_pairs: BTreeSet<(String, String)> = BTreeSet::new();
        let mut live: HashMap<(String, String), HashSet<String>> = HashMap::new();

        let mut cursor = String::new();
        loop {
            let options = ListOptions {
                limit: self.page_size,
                cursor: cursor.clone(),
            };
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                r = self.index.list(&options) => r.map_err(SyncError::List)?,
            };

            outcome.listed += page.items.len();
            for document in &page.items {
                let (Some(path), Some(revision)) = (document.filepath(), document.revision())
                else {
                    continue;
                };

                match revisions.get(path) {
                    Some(current) if current.eq_ignore_ascii_case(revision) => {
                        live.entry((path.to_string(), revision.to_ascii_lowercase()))
                            .or_default()
                            .insert(document.id.clone());
                    }
                    _ => {
                        stale_ids.push(document.id.clone());
                        // Only well-formed revisions may address a cache directory.
                        if is_revision(revision) {
                            stale_pairs.insert((path.to_string(), revision.to_ascii_lowercase()));
                        }
                    }
                }
            }

            if page.cursor.is_empty() {
                break;
            }
            cursor = page.cursor;
        }

        if !stale_ids.is_empty() {
            let count = stale_ids.len();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                r = self.index.delete(&stale_ids) => {
                    r.map_err(|error| SyncError::Delete { count, error })?
                }
            }
            info!(count, "deleted stale documents");
            outcome.deleted = count;
        }

        for (path, revision) in &stale_pairs {
            if let Err(e) = self.cache.revision(revision).remove_documents(path).await {
                warn!(path = %path, revision = %revision, error = %e, "failed to drop completion marker");
            }
        }

        let none = HashSet::new();
        for (path, revision) in revisions {
            let key = (path.clone(), revision.to_ascii_lowercase());
            let present = live.get(&key).unwrap_or(&none);
            match self.repair(path, revision, present, cancel).await {
                Ok(n) => outcome.repaired += n,
                Err(IndexError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => {
                    warn!(path = %path, error = %e, "repair failed");
                    outcome.errors.push(FileError::new(path, e));
                }
            }
        }

        debug!(listed = outcome.listed, stale = outcome.deleted, "reconciled index");
        if outcome.repaired > 0 {
            info!(count = outcome.repaired, "re-upserted documents missing from index");
        }

        Ok(outcome)
    }

    /// Re-upsert every marker document of `(path, revision)` whose id is not
    /// in `present`.
    ///
    /// Only the marker's ids are read unless something is missing.
    async fn repair(
        &self,
        path: &str,
        revision: &str,
        present: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<usize, IndexError> {
        if !is_revision(revision) {
            return Ok(0);
        }
        let rev = self.cache.revision(revision);
        let Some(ids) = rev.read_document_ids(path).await? else {
            return Ok(0);
        };
        let missing = ids.iter().filter(|id| !present.contains(*id)).count();
        if missing == 0 {
            return Ok(0);
        }

        debug!(path, missing, expected = ids.len(), "repairing documents");
        let Some(documents) = rev.read_documents(path).await? else {
            return Ok(0);
        };
        let mut repaired = 0;
        for document in documents.iter().filter(|d| !present.contains(&d.id)) {
            self.upsert(document, cancel).await?;
            repaired += 1;
        }
        Ok(repaired)
    }
}
