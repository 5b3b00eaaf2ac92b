//! Mirror Core Library
//!
//! A local mirror of arXiv: paper metadata harvested over OAI-PMH, PDF and
//! source artifacts downloaded on demand, a citation graph extracted from
//! source bibliographies, and optional embedding vectors for semantic search.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - SQLite connection, pragmas and migrations
//! - [`store`] - Durable store for papers, citations, embeddings and the sync checkpoint
//! - [`cache`] - Bounded LRU front cache for paper reads
//! - [`harvest`] - Resumable OAI-PMH metadata sync
//! - [`download`] - Rate-limited artifact download pipeline
//! - [`citations`] - Citation extraction and graph queries
//! - [`embeddings`] - Vector encoding and cosine ranking
//! - [`mirror`] - The [`Mirror`] facade tying everything together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod citations;
pub mod db;
pub mod download;
pub mod embeddings;
pub mod error;
pub mod harvest;
pub mod mirror;
pub mod paper;
pub mod store;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use cache::{CacheCapacity, CacheStats, DEFAULT_CACHE_ITEMS, FrontCache};
pub use citations::{CitationGraph, GraphEdge, GraphNode, RebuildReport, Relation};
pub use db::{Database, DbOptions};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_INTERVAL, DownloadOptions,
    DownloadProgress, DownloadReport, DownloadTarget, MAX_CONCURRENCY,
};
pub use embeddings::{Embedding, EmbeddingGenerator, SemanticHit, TextExtractor};
pub use error::{ErrorKind, MirrorError, RunProgress};
pub use harvest::{DEFAULT_BATCH_SIZE, MetadataSource, SyncFilter, SyncOptions, SyncReport};
pub use mirror::{
    BatchFetchReport, EmbedReport, FetchOptions, Mirror, MirrorOptions, MirrorStats,
    VerifyReport,
};
pub use paper::{ArtifactKind, IdStyle, Paper, PaperId};
pub use store::{CategoryCount, SearchHit, Store, StoreError, SyncCheckpoint};
