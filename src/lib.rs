//! # Context Index
//!
//! Incremental indexing of a filesystem tree into a searchable document store.
//!
//! Files are discovered, their text extracted, chunked, and embedded, and a
//! downstream index is kept exactly in step with the tree: new and changed
//! files are upserted, and documents for changed or removed files are
//! deleted. Expensive work is memoized in a content-addressed cache next to
//! the data, so an unchanged tree costs nothing to re-sync.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────────────────┐   ┌────────────────┐
//! │ Scanner │──▶│       Cache Store        │──▶│ IndexProvider  │
//! │  walk + │   │ descriptor → content →   │   │ upsert / list  │
//! │ sha256  │   │ segments → documents     │   │ query / delete │
//! └─────────┘   └──────────┬───────────────┘   └───────┬────────┘
//!                          │                           │
//!               ┌──────────┴──────────┐         ┌──────┴──────┐
//!               │ Extractor  Embedder │         │ /query /mcp │
//!               └─────────────────────┘         └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ctx-index --config ./ctx-index.toml sync     # one run
//! ctx-index --config ./ctx-index.toml serve    # periodic runs + query server
//! ctx-index backends                           # list index backends
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Descriptors, segments, documents |
//! | [`error`] | Per-file and run-fatal error types |
//! | [`scanner`] | Directory walk and content revisions |
//! | [`cache`] | Content-addressed artifact cache |
//! | [`chunk`] | Overlapping text windows |
//! | [`extract`] | Text extraction collaborators |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`pipeline`] | Segmentation and batched embedding |
//! | [`index`] | Index provider trait, registry, in-memory backend |
//! | [`sync`] | Upsert phase and reconciliation |
//! | [`mcp`] | MCP query tool |
//! | [`server`] | Query HTTP server |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod mcp;
pub mod models;
pub mod pipeline;
pub mod scanner;
pub mod server;
pub mod sync;
