//! The public operation surface of the mirror.
//!
//! [`Mirror`] owns the store, the front cache, the HTTP client, and one
//! engine per concern, and exposes every operation callers use.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheCapacity, CacheStats, FrontCache};
use crate::citations::{CitationEngine, CitationGraph, RebuildReport};
use crate::db::{DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS, Database, DbOptions};
use crate::download::{
    ArtifactUrls, CONNECT_TIMEOUT_SECS, DEFAULT_ARTIFACT_BASE_URL, DEFAULT_RATE_LIMIT_INTERVAL,
    DownloadOptions, DownloadPipeline, DownloadReport, DownloadTarget, HttpClient, MirrorLayout,
    READ_TIMEOUT_SECS, RateLimiter, RetryPolicy, default_user_agent,
};
use crate::embeddings::{
    DEFAULT_SEMANTIC_LIMIT, Embedding, EmbeddingGenerator, SemanticHit, encode_vector,
    rank_by_similarity, validate_vector,
};
use crate::error::MirrorError;
use crate::harvest::{
    DEFAULT_OAI_BASE_URL, MetadataSource, OaiClient, SyncEngine, SyncFilter, SyncOptions,
    SyncReport, call_with_retry,
};
use crate::paper::{ArtifactKind, Paper, PaperId};
use crate::store::{CategoryCount, SearchHit, Store};

/// Largest allowed database pool.
pub const MAX_DB_CONNECTIONS: u32 = 20;

/// Default number of keyword search results.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// Settings for [`Mirror::open`].
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Cache root holding `index.db`, `pdf/` and `src/`.
    pub root: PathBuf,
    pub oai_base_url: String,
    pub artifact_base_url: String,
    pub cache_capacity: CacheCapacity,
    /// Pool size, `1..=20`.
    pub db_max_connections: u32,
    pub busy_timeout_ms: u32,
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Spacing of single-record metadata requests.
    pub request_interval: Duration,
}

impl MirrorOptions {
    /// Defaults for a mirror rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            oai_base_url: DEFAULT_OAI_BASE_URL.to_string(),
            artifact_base_url: DEFAULT_ARTIFACT_BASE_URL.to_string(),
            cache_capacity: CacheCapacity::default(),
            db_max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            user_agent: default_user_agent(),
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            request_interval: DEFAULT_RATE_LIMIT_INTERVAL,
        }
    }

    /// Checks ranges and URLs.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Validation`] for the first bad field.
    pub fn validate(&self) -> Result<(), MirrorError> {
        if !(1..=MAX_DB_CONNECTIONS).contains(&self.db_max_connections) {
            return Err(MirrorError::validation(
                "db_max_connections",
                format!(
                    "{} (must be between 1 and {MAX_DB_CONNECTIONS})",
                    self.db_max_connections
                ),
            ));
        }
        for (field, value) in [
            ("oai_base_url", &self.oai_base_url),
            ("artifact_base_url", &self.artifact_base_url),
        ] {
            let parsed = url::Url::parse(value)
                .map_err(|e| MirrorError::validation(field, format!("'{value}': {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(MirrorError::validation(
                    field,
                    format!("'{value}' is not an http(s) URL"),
                ));
            }
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(MirrorError::validation("timeout", "must be at least 1 second"));
        }
        if let CacheCapacity::Bytes(0) = self.cache_capacity {
            return Err(MirrorError::validation("cache_bytes", "must be positive"));
        }
        Ok(())
    }
}

/// Which artifacts [`Mirror::fetch_and_download`] should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub pdf: bool,
    pub source: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            pdf: false,
            source: true,
        }
    }
}

/// Outcome of [`Mirror::fetch_metadata_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchFetchReport {
    pub requested: u64,
    pub fetched: u64,
    /// IDs the repository does not know.
    pub not_found: Vec<PaperId>,
    pub failed: u64,
    pub interrupted: bool,
}

/// Outcome of [`Mirror::verify_artifacts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Flagged artifacts examined.
    pub checked: u64,
    /// Flags cleared because the file was missing or empty.
    pub cleared: u64,
}

/// Outcome of [`Mirror::embed_missing`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbedReport {
    pub embedded: u64,
    pub failed: u64,
}

/// Mirror-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub papers: u64,
    pub pdfs_downloaded: u64,
    pub sources_downloaded: u64,
    pub citation_edges: u64,
    pub embeddings: u64,
    pub categories: u64,
    /// Time of the last committed harvest batch.
    pub last_sync: Option<DateTime<Utc>>,
    /// A harvest can be resumed.
    pub sync_pending: bool,
    pub records_committed: u64,
    pub cache: CacheStats,
}

/// A local arXiv mirror.
///
/// # Example
///
/// ```no_run
/// use std::sync::atomic::AtomicBool;
/// use mirror_core::{Mirror, MirrorOptions, SyncFilter, SyncOptions};
///
/// # async fn example() -> Result<(), mirror_core::MirrorError> {
/// let mirror = Mirror::open(MirrorOptions::new("./mirror")).await?;
/// let filter = SyncFilter { set: Some("cs".to_string()), ..SyncFilter::default() };
/// let report = mirror
///     .sync_metadata(filter, &SyncOptions::default(), &AtomicBool::new(false))
///     .await?;
/// println!("committed {} papers", report.committed);
/// mirror.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Mirror {
    layout: MirrorLayout,
    store: Store,
    source: Arc<dyn MetadataSource>,
    sync: SyncEngine,
    downloads: DownloadPipeline,
    citations: CitationEngine,
    request_interval: Duration,
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("root", &self.layout.root())
            .field("request_interval", &self.request_interval)
            .finish_non_exhaustive()
    }
}

impl Mirror {
    /// Opens (creating if needed) the mirror under `options.root` and runs
    /// pending migrations.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Validation`] for bad options.
    /// - [`MirrorError::PermanentWrite`] if the root cannot be created.
    /// - [`MirrorError::Database`] if the index cannot be opened or migrated.
    #[instrument(skip(options), fields(root = %options.root.display()))]
    pub async fn open(options: MirrorOptions) -> Result<Self, MirrorError> {
        options.validate()?;
        tokio::fs::create_dir_all(&options.root)
            .await
            .map_err(|e| MirrorError::permanent_write(&options.root, e))?;

        let layout = MirrorLayout::new(&options.root);
        let db = Database::with_options(
            &layout.db_path(),
            DbOptions {
                max_connections: options.db_max_connections,
                busy_timeout_ms: options.busy_timeout_ms,
            },
        )
        .await?;
        let store = Store::new(db, FrontCache::new(options.cache_capacity));
        let http = HttpClient::with_settings(
            &options.user_agent,
            options.connect_timeout_secs,
            options.read_timeout_secs,
        );
        let source: Arc<dyn MetadataSource> =
            Arc::new(OaiClient::new(http.clone(), options.oai_base_url.clone()));

        info!(oai = %options.oai_base_url, artifacts = %options.artifact_base_url, "mirror opened");
        Ok(Self {
            sync: SyncEngine::new(store.clone(), Arc::clone(&source)),
            downloads: DownloadPipeline::new(
                store.clone(),
                http,
                layout.clone(),
                ArtifactUrls::new(options.artifact_base_url),
            ),
            citations: CitationEngine::new(store.clone()),
            layout,
            store,
            source,
            request_interval: options.request_interval,
        })
    }

    /// Replaces the metadata source, e.g. with a local fixture.
    #[must_use]
    pub fn with_metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.sync = SyncEngine::new(self.store.clone(), Arc::clone(&source));
        self.source = source;
        self
    }

    /// Closes the database pool.
    pub async fn close(self) {
        self.store.db().clone().close().await;
    }

    #[must_use]
    pub fn layout(&self) -> &MirrorLayout {
        &self.layout
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    // --- sync ---

    /// Harvests metadata. See [`SyncEngine::sync_metadata`].
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::sync_metadata`].
    pub async fn sync_metadata(
        &self,
        filter: SyncFilter,
        options: &SyncOptions,
        interrupted: &AtomicBool,
    ) -> Result<SyncReport, MirrorError> {
        self.sync.sync_metadata(filter, options, interrupted).await
    }

    // --- downloads ---

    /// Downloads missing artifacts. See [`DownloadPipeline::run`].
    ///
    /// # Errors
    ///
    /// See [`DownloadPipeline::run`].
    pub async fn download(
        &self,
        target: DownloadTarget,
        options: DownloadOptions,
        interrupted: Arc<AtomicBool>,
    ) -> Result<DownloadReport, MirrorError> {
        self.downloads.run(target, options, interrupted).await
    }

    /// Ensures `id` has metadata, downloads the requested artifacts, and
    /// returns the refreshed paper.
    ///
    /// A failed artifact download is logged; check the returned flags.
    ///
    /// # Errors
    ///
    /// Metadata errors from [`Self::fetch_metadata`], and run errors from
    /// [`DownloadPipeline::run`].
    #[instrument(skip(self, interrupted), fields(paper_id = %id))]
    pub async fn fetch_and_download(
        &self,
        id: &PaperId,
        options: FetchOptions,
        interrupted: Arc<AtomicBool>,
    ) -> Result<Paper, MirrorError> {
        if self.store.get_paper(id).await?.is_none() {
            self.fetch_metadata(id).await?;
        }
        if !options.pdf && !options.source {
            return Ok((*self.get_paper(id).await?).clone());
        }

        let download = DownloadOptions {
            download_pdf: options.pdf,
            download_source: options.source,
            rate_limit_interval: self.request_interval,
            ..DownloadOptions::default()
        };
        let report = self
            .downloads
            .run(DownloadTarget::Ids(vec![id.clone()]), download, interrupted)
            .await?;
        if report.failed > 0 {
            warn!(failed = report.failed, "some artifacts could not be downloaded");
        }

        self.store
            .load_paper(id)
            .await?
            .ok_or_else(|| MirrorError::paper_not_found(id.as_str()))
    }

    // --- metadata fetch ---

    /// Fetches one record with `GetRecord` and upserts it.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::NotFound`] if the repository has no such record or
    ///   it is deleted.
    /// - [`MirrorError::Protocol`] / [`MirrorError::TransientNetwork`] for
    ///   remote failures.
    #[instrument(skip(self), fields(paper_id = %id))]
    pub async fn fetch_metadata(&self, id: &PaperId) -> Result<Paper, MirrorError> {
        let limiter = RateLimiter::new(Duration::ZERO);
        self.fetch_one(id, &limiter, &AtomicBool::new(false)).await
    }

    async fn fetch_one(
        &self,
        id: &PaperId,
        limiter: &RateLimiter,
        interrupted: &AtomicBool,
    ) -> Result<Paper, MirrorError> {
        let policy = RetryPolicy::default();
        let record =
            call_with_retry(&policy, limiter, interrupted, || self.source.get_record(id)).await?;
        if record.deleted {
            return Err(MirrorError::NotFound {
                what: "record",
                id: id.to_string(),
            });
        }
        let paper = record.to_paper()?;
        self.store.upsert_paper(&paper).await?;
        debug!(title = %paper.title, "metadata fetched");
        self.store
            .load_paper(&paper.id)
            .await?
            .ok_or_else(|| MirrorError::paper_not_found(paper.id.as_str()))
    }

    /// Fetches several records, spaced by the courtesy interval.
    ///
    /// Per-ID failures are counted; unknown IDs are listed.
    ///
    /// # Errors
    ///
    /// Returns a store error only if the store itself fails.
    #[instrument(skip(self, ids, interrupted), fields(count = ids.len()))]
    pub async fn fetch_metadata_batch(
        &self,
        ids: &[PaperId],
        interrupted: &AtomicBool,
    ) -> Result<BatchFetchReport, MirrorError> {
        let limiter = RateLimiter::new(self.request_interval);
        let mut report = BatchFetchReport {
            requested: ids.len() as u64,
            ..BatchFetchReport::default()
        };

        for id in ids {
            if interrupted.load(Ordering::SeqCst) {
                report.interrupted = true;
                break;
            }
            match self.fetch_one(id, &limiter, interrupted).await {
                Ok(_) => report.fetched += 1,
                Err(MirrorError::Cancelled) => {
                    report.interrupted = true;
                    break;
                }
                Err(MirrorError::NotFound { .. }) => report.not_found.push(id.clone()),
                Err(error @ (MirrorError::Store(_) | MirrorError::Database(_))) => {
                    return Err(error);
                }
                Err(error) => {
                    warn!(paper_id = %id, error = %error, "metadata fetch failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    // --- reads ---

    /// Returns a paper, from the front cache when possible.
    ///
    /// # Errors
    ///
    /// [`MirrorError::NotFound`] if the paper has no metadata row.
    pub async fn get_paper(&self, id: &PaperId) -> Result<Arc<Paper>, MirrorError> {
        self.store
            .get_paper(id)
            .await?
            .ok_or_else(|| MirrorError::paper_not_found(id.as_str()))
    }

    /// Returns the papers that exist, in request order.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn get_papers(&self, ids: &[PaperId]) -> Result<Vec<Arc<Paper>>, MirrorError> {
        Ok(self.store.get_papers(ids).await?)
    }

    /// Citation neighbourhood of `id`.
    ///
    /// # Errors
    ///
    /// See [`CitationEngine::graph`].
    pub async fn citation_graph(&self, id: &PaperId) -> Result<CitationGraph, MirrorError> {
        self.citations.graph(id).await
    }

    /// Papers `id` cites, in bibliography order.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn references(&self, id: &PaperId) -> Result<Vec<PaperId>, MirrorError> {
        Ok(self.store.references(id).await?)
    }

    /// Papers citing `id`, ascending by ID.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn cited_by(
        &self,
        id: &PaperId,
        limit: Option<u32>,
    ) -> Result<Vec<PaperId>, MirrorError> {
        Ok(self.store.citers(id, limit).await?)
    }

    /// Global in-degree of `id`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn cited_by_count(&self, id: &PaperId) -> Result<u64, MirrorError> {
        Ok(self.store.cited_by_count(id).await?)
    }

    /// Categories with paper counts, by name.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn list_categories(&self) -> Result<Vec<CategoryCount>, MirrorError> {
        Ok(self.store.list_categories().await?)
    }

    /// Mirror-wide counters.
    ///
    /// # Errors
    ///
    /// Returns a store error if a query fails.
    pub async fn stats(&self) -> Result<MirrorStats, MirrorError> {
        let counts = self.store.counts().await?;
        let checkpoint = self.store.load_checkpoint().await?;
        Ok(MirrorStats {
            papers: counts.papers,
            pdfs_downloaded: counts.pdfs_downloaded,
            sources_downloaded: counts.sources_downloaded,
            citation_edges: counts.citation_edges,
            embeddings: counts.embeddings,
            categories: counts.categories,
            last_sync: checkpoint.committed_at,
            sync_pending: checkpoint.is_pending(),
            records_committed: checkpoint.records_committed,
            cache: self.store.cache().stats(),
        })
    }

    // --- search ---

    /// Keyword search over titles and abstracts, best first.
    ///
    /// # Errors
    ///
    /// [`MirrorError::Validation`] for an empty or unparseable query.
    pub async fn search(
        &self,
        query: &str,
        category: Option<&str>,
        limit: u32,
    ) -> Result<Vec<SearchHit>, MirrorError> {
        Ok(self.store.search(query, category, limit).await?)
    }

    // --- embeddings ---

    /// Stores (or replaces) the embedding of an existing paper.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Validation`] for an empty or non-finite vector.
    /// - [`MirrorError::NotFound`] if the paper has no metadata row.
    pub async fn store_embedding(
        &self,
        id: &PaperId,
        model: &str,
        vector: &[f32],
    ) -> Result<(), MirrorError> {
        let dimensions = validate_vector(vector)?;
        if self.store.get_paper(id).await?.is_none() {
            return Err(MirrorError::paper_not_found(id.as_str()));
        }
        self.store
            .upsert_embedding(id, model, &encode_vector(vector), dimensions)
            .await?;
        Ok(())
    }

    /// Returns the decoded embedding of `id`, if stored.
    ///
    /// # Errors
    ///
    /// [`MirrorError::Validation`] if the stored blob is corrupt.
    pub async fn get_embedding(&self, id: &PaperId) -> Result<Option<Embedding>, MirrorError> {
        self.store
            .get_embedding(id)
            .await?
            .map(Embedding::try_from)
            .transpose()
    }

    /// Number of stored embeddings.
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails.
    pub async fn count_embeddings(&self) -> Result<u64, MirrorError> {
        Ok(self.store.count_embeddings().await?)
    }

    /// Papers most similar to `query`, best first. Only positive cosine
    /// scores are returned; `limit` of `None` means 20.
    ///
    /// # Errors
    ///
    /// [`MirrorError::Validation`] for a bad query vector, or when no stored
    /// vector has the query's dimensionality.
    #[instrument(skip(self, query), fields(dimensions = query.len()))]
    pub async fn search_semantic(
        &self,
        query: &[f32],
        limit: Option<usize>,
    ) -> Result<Vec<SemanticHit>, MirrorError> {
        let dimensions = validate_vector(query)?;
        let limit = limit.unwrap_or(DEFAULT_SEMANTIC_LIMIT);

        let stored = self.store.all_embeddings().await?;
        let total = stored.len();
        let mut ids = Vec::with_capacity(total);
        let mut vectors = Vec::with_capacity(total);
        for embedding in stored {
            if embedding.dimensions != dimensions {
                continue;
            }
            match Embedding::try_from(embedding) {
                Ok(decoded) => {
                    ids.push(decoded.paper_id);
                    vectors.push(decoded.vector);
                }
                Err(error) => warn!(error = %error, "skipping corrupt embedding"),
            }
        }
        if total > 0 && vectors.is_empty() {
            return Err(MirrorError::validation(
                "query vector",
                format!("no stored embeddings have {dimensions} dimensions"),
            ));
        }
        if total > vectors.len() {
            debug!(skipped = total - vectors.len(), "embeddings skipped");
        }

        let ranked = rank_by_similarity(query, &vectors, limit);
        let hit_ids: Vec<PaperId> = ranked.iter().map(|(i, _)| ids[*i].clone()).collect();
        let papers = self.store.get_papers(&hit_ids).await?;
        let mut hits = Vec::with_capacity(ranked.len());
        for (index, score) in ranked {
            if let Some(paper) = papers.iter().find(|p| p.id == ids[index]) {
                hits.push(SemanticHit {
                    paper: (**paper).clone(),
                    score,
                });
            }
        }
        Ok(hits)
    }

    /// Embeds `"{title}. {abstract}"` for up to `limit` papers that have no
    /// vector yet.
    ///
    /// # Errors
    ///
    /// Returns a store error if reading or writing fails; generator failures
    /// are counted.
    #[instrument(skip(self, generator), fields(model = generator.model()))]
    pub async fn embed_missing(
        &self,
        generator: &dyn EmbeddingGenerator,
        limit: u64,
    ) -> Result<EmbedReport, MirrorError> {
        let mut report = EmbedReport::default();
        for paper in self.store.papers_missing_embedding(limit).await? {
            let vector = match generator.embed(&paper.embedding_text()).await {
                Ok(vector) => vector,
                Err(error) => {
                    warn!(paper_id = %paper.id, error = %error, "embedding failed");
                    report.failed += 1;
                    continue;
                }
            };
            match validate_vector(&vector) {
                Ok(dimensions) => {
                    self.store
                        .upsert_embedding(
                            &paper.id,
                            generator.model(),
                            &encode_vector(&vector),
                            dimensions,
                        )
                        .await?;
                    report.embedded += 1;
                }
                Err(error) => {
                    warn!(paper_id = %paper.id, error = %error, "generator returned a bad vector");
                    report.failed += 1;
                }
            }
        }
        info!(embedded = report.embedded, failed = report.failed, "embeddings generated");
        Ok(report)
    }

    /// Embeds `query` with `generator`, then runs [`Self::search_semantic`].
    ///
    /// # Errors
    ///
    /// [`MirrorError::Validation`] if the generator fails or returns a bad
    /// vector, plus the errors of [`Self::search_semantic`].
    pub async fn search_semantic_text(
        &self,
        generator: &dyn EmbeddingGenerator,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SemanticHit>, MirrorError> {
        if query.trim().is_empty() {
            return Err(MirrorError::validation("query", "empty query"));
        }
        let vector = generator
            .embed(query)
            .await
            .map_err(|e| MirrorError::validation("query", format!("embedding failed: {e:#}")))?;
        self.search_semantic(&vector, limit).await
    }

    // --- index maintenance ---

    /// Rebuilds the outgoing citation edges of one paper.
    ///
    /// # Errors
    ///
    /// See [`CitationEngine::update_citations`].
    pub async fn update_citations(&self, id: &PaperId) -> Result<usize, MirrorError> {
        self.citations.update_citations(id).await
    }

    /// Rebuilds edges for every paper with a source. With `clean`, all
    /// edges are dropped first so papers whose source vanished lose theirs.
    ///
    /// # Errors
    ///
    /// Returns a store error if listing or clearing fails.
    pub async fn rebuild_citations(
        &self,
        clean: bool,
        interrupted: &AtomicBool,
    ) -> Result<RebuildReport, MirrorError> {
        if clean {
            let removed = self.store.clear_citations().await?;
            info!(removed, "cleared citation edges");
        }
        self.citations.rebuild_all(interrupted).await
    }

    /// Repopulates the full-text index. Returns the number of papers indexed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the rebuild fails.
    pub async fn rebuild_fts(&self) -> Result<u64, MirrorError> {
        Ok(self.store.rebuild_fts().await?)
    }

    // --- repair ---

    /// Clears every artifact flag whose file is missing or empty.
    ///
    /// # Errors
    ///
    /// Returns a store error if reading or clearing fails.
    #[instrument(skip(self))]
    pub async fn verify_artifacts(&self) -> Result<VerifyReport, MirrorError> {
        let mut report = VerifyReport::default();
        for paper in self.store.papers_with_artifacts().await? {
            for kind in [ArtifactKind::Pdf, ArtifactKind::Source] {
                let Some(path) = paper.artifact_path(kind) else {
                    continue;
                };
                report.checked += 1;
                let intact = tokio::fs::metadata(path)
                    .await
                    .is_ok_and(|meta| meta.is_file() && meta.len() > 0);
                if !intact {
                    warn!(paper_id = %paper.id, %kind, path = %path.display(), "artifact missing; clearing flag");
                    self.store.clear_artifact(&paper.id, kind).await?;
                    report.cleared += 1;
                }
            }
        }
        info!(checked = report.checked, cleared = report.cleared, "artifacts verified");
        Ok(report)
    }
}
