//! Bounded-concurrency artifact download pipeline.
//!
//! A fixed pool of `concurrency` workers drains a bounded channel of
//! `(paper, artifact)` work items. Every remote request, across all workers,
//! passes through one [`RateLimiter`] for the run.
//!
//! Per artifact:
//!
//! 1. stream the body to `<final>.part`, flush and `sync_all`
//! 2. reject empty bodies, rename into place
//! 3. set flag and path together in one transaction (which also drops the
//!    cached paper)
//!
//! Network and HTTP failures are logged, counted and skipped. A local write
//! failure stops the pool from taking more work and the run returns
//! [`MirrorError::RunAborted`] carrying what was committed.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, instrument, warn};

use super::client::HttpClient;
use super::error::DownloadError;
use super::layout::{ArtifactUrls, MirrorLayout};
use super::rate_limiter::{DEFAULT_RATE_LIMIT_INTERVAL, RateLimiter};
use super::retry::{
    DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy, classify_error, retry_after_delay,
};
use super::wait_for_interrupt;
use crate::error::{MirrorError, RunProgress};
use crate::paper::{ArtifactKind, Paper, PaperId};
use crate::store::Store;

/// Minimum allowed concurrency.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency. arXiv asks for a single connection.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Which papers to download artifacts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// Explicit papers. IDs without a metadata row are counted as missing.
    Ids(Vec<PaperId>),
    /// Every paper tagged with the category, or with any category of the
    /// archive when given a bare archive name such as `cs`.
    Category(String),
}

/// Progress event emitted after each downloaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub paper_id: PaperId,
    pub kind: ArtifactKind,
    /// Artifacts downloaded so far in this run.
    pub downloaded: u64,
    /// Artifacts queued in this run.
    pub total: u64,
}

/// Callback receiving [`DownloadProgress`] events from worker tasks.
pub type DownloadProgressFn = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

/// Run options.
#[derive(Clone)]
pub struct DownloadOptions {
    /// Worker count, `1..=100`.
    pub concurrency: usize,
    /// Minimum spacing of remote requests across all workers.
    pub rate_limit_interval: Duration,
    pub download_pdf: bool,
    pub download_source: bool,
    /// Attempts per artifact, including the first.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub retry_base_delay: Duration,
    pub progress: Option<DownloadProgressFn>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit_interval: DEFAULT_RATE_LIMIT_INTERVAL,
            download_pdf: true,
            download_source: true,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_secs(1),
            progress: None,
        }
    }
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("concurrency", &self.concurrency)
            .field("rate_limit_interval", &self.rate_limit_interval)
            .field("download_pdf", &self.download_pdf)
            .field("download_source", &self.download_source)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl DownloadOptions {
    /// Checks ranges and that at least one artifact kind is selected.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorError::Validation`] describing the first bad option.
    pub fn validate(&self) -> Result<(), MirrorError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(MirrorError::validation(
                "concurrency",
                format!(
                    "{} (must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY})",
                    self.concurrency
                ),
            ));
        }
        if !self.download_pdf && !self.download_source {
            return Err(MirrorError::validation(
                "artifact kinds",
                "neither pdf nor source selected",
            ));
        }
        Ok(())
    }

    fn kinds(&self) -> Vec<ArtifactKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.download_pdf {
            kinds.push(ArtifactKind::Pdf);
        }
        if self.download_source {
            kinds.push(ArtifactKind::Source);
        }
        kinds
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_base_delay,
            Duration::from_secs(32),
            2.0,
        )
    }
}

/// Outcome of a completed (or interrupted) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    /// Artifacts queued for download.
    pub queued: u64,
    pub downloaded: u64,
    pub failed: u64,
    /// Retry attempts made across all artifacts.
    pub retried: u64,
    /// Requested IDs with no metadata row.
    pub missing: u64,
    /// Requested artifacts already flagged as downloaded.
    pub already_present: u64,
    pub bytes: u64,
    pub interrupted: bool,
}

impl DownloadReport {
    /// Committed/failed counts, as carried by an aborted run.
    #[must_use]
    pub fn progress(&self) -> RunProgress {
        RunProgress {
            committed: self.downloaded,
            failed: self.failed,
        }
    }
}

/// Thread-safe counters updated by worker tasks.
#[derive(Debug, Default)]
struct DownloadStats {
    downloaded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    bytes: AtomicU64,
    interrupted: AtomicBool,
}

impl DownloadStats {
    fn record_downloaded(&self, bytes: u64) -> u64 {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
        self.downloaded.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct WorkItem {
    id: PaperId,
    kind: ArtifactKind,
}

enum ItemOutcome {
    Downloaded(u64),
    Failed,
    Cancelled,
    Fatal(MirrorError),
}

struct WorkerContext {
    store: Store,
    client: HttpClient,
    layout: MirrorLayout,
    urls: ArtifactUrls,
    limiter: RateLimiter,
    policy: RetryPolicy,
    stats: DownloadStats,
    progress: Option<DownloadProgressFn>,
    total: u64,
    interrupted: Arc<AtomicBool>,
    /// Raised on a fatal error so idle workers stop taking work.
    stop: AtomicBool,
    fatal: std::sync::Mutex<Option<MirrorError>>,
}

impl WorkerContext {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.interrupted.load(Ordering::SeqCst)
    }

    fn record_fatal(&self, error: MirrorError) {
        self.stop.store(true, Ordering::SeqCst);
        let mut slot = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(error);
        }
    }
}

/// Downloads PDFs and source archives into the mirror layout.
#[derive(Debug, Clone)]
pub struct DownloadPipeline {
    store: Store,
    client: HttpClient,
    layout: MirrorLayout,
    urls: ArtifactUrls,
}

impl DownloadPipeline {
    /// Creates a pipeline writing under `layout` and fetching from `urls`.
    #[must_use]
    pub fn new(store: Store, client: HttpClient, layout: MirrorLayout, urls: ArtifactUrls) -> Self {
        Self {
            store,
            client,
            layout,
            urls,
        }
    }

    /// Downloads every missing artifact of `target`.
    ///
    /// Returns early (with `interrupted` set) once `interrupted` is raised;
    /// in-flight transfers are dropped and their `.part` files removed.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Validation`] for out-of-range options.
    /// - [`MirrorError::RunAborted`] wrapping [`MirrorError::PermanentWrite`]
    ///   (or a store failure) when a write cannot be completed.
    /// - [`MirrorError::Store`] if the work queue cannot be built.
    #[instrument(skip(self, options, interrupted), fields(concurrency = options.concurrency))]
    pub async fn run(
        &self,
        target: DownloadTarget,
        options: DownloadOptions,
        interrupted: Arc<AtomicBool>,
    ) -> Result<DownloadReport, MirrorError> {
        options.validate()?;
        let kinds = options.kinds();

        let (papers, missing) = self.resolve_target(&target).await?;
        let mut already_present = 0u64;
        let mut queue = Vec::new();
        for paper in &papers {
            for &kind in &kinds {
                if paper.is_downloaded(kind) {
                    already_present += 1;
                } else {
                    queue.push(WorkItem {
                        id: paper.id.clone(),
                        kind,
                    });
                }
            }
        }

        let total = queue.len() as u64;
        info!(
            queued = total,
            missing, already_present, "starting artifact downloads"
        );

        let context = Arc::new(WorkerContext {
            store: self.store.clone(),
            client: self.client.clone(),
            layout: self.layout.clone(),
            urls: self.urls.clone(),
            limiter: RateLimiter::new(options.rate_limit_interval),
            policy: options.retry_policy(),
            stats: DownloadStats::default(),
            progress: options.progress.clone(),
            total,
            interrupted: Arc::clone(&interrupted),
            stop: AtomicBool::new(false),
            fatal: std::sync::Mutex::new(None),
        });

        let (sender, receiver) = mpsc::channel::<WorkItem>(options.concurrency * 2);
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(options.concurrency);
        for worker in 0..options.concurrency {
            let context = Arc::clone(&context);
            let receiver = Arc::clone(&receiver);
            handles.push(tokio::spawn(async move {
                worker_loop(worker, &context, &receiver).await;
            }));
        }
        drop(receiver);

        for item in queue {
            if context.should_stop() {
                break;
            }
            // Fails only once every worker has exited.
            if sender.send(item).await.is_err() {
                break;
            }
        }
        drop(sender);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "download worker panicked");
            }
        }

        if interrupted.load(Ordering::SeqCst) {
            context.stats.set_interrupted();
        }
        let stats = &context.stats;
        let report = DownloadReport {
            queued: total,
            downloaded: stats.downloaded.load(Ordering::SeqCst),
            failed: stats.failed.load(Ordering::SeqCst),
            retried: stats.retried.load(Ordering::SeqCst),
            missing,
            already_present,
            bytes: stats.bytes.load(Ordering::SeqCst),
            interrupted: stats.interrupted.load(Ordering::SeqCst),
        };

        let fatal = context
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = fatal {
            warn!(
                downloaded = report.downloaded,
                failed = report.failed,
                "download run aborted"
            );
            return Err(error.aborted_after(report.progress()));
        }

        info!(
            downloaded = report.downloaded,
            failed = report.failed,
            retried = report.retried,
            interrupted = report.interrupted,
            "artifact downloads complete"
        );
        Ok(report)
    }

    async fn resolve_target(&self, target: &DownloadTarget) -> Result<(Vec<Paper>, u64), MirrorError> {
        match target {
            DownloadTarget::Ids(ids) => {
                let mut seen = HashSet::new();
                let unique: Vec<PaperId> = ids
                    .iter()
                    .filter(|id| seen.insert((*id).clone()))
                    .cloned()
                    .collect();
                let found = self.store.get_papers(&unique).await?;
                let missing = (unique.len() - found.len()) as u64;
                if missing > 0 {
                    let present: HashSet<&PaperId> = found.iter().map(|p| &p.id).collect();
                    for id in unique.iter().filter(|id| !present.contains(id)) {
                        warn!(paper_id = %id, "no metadata for requested paper; skipping");
                    }
                }
                Ok((found.iter().map(|p| (**p).clone()).collect(), missing))
            }
            DownloadTarget::Category(category) => {
                let papers = self.store.papers_pending_in_category(category).await?;
                Ok((papers, 0))
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    context: &WorkerContext,
    receiver: &Mutex<mpsc::Receiver<WorkItem>>,
) {
    loop {
        if context.should_stop() {
            break;
        }
        let item = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                () = wait_for_interrupt(&context.interrupted) => None,
                item = receiver.recv() => item,
            }
        };
        let Some(item) = item else {
            break;
        };

        debug!(worker, paper_id = %item.id, kind = %item.kind, "worker picked up artifact");
        match process_item(context, &item).await {
            ItemOutcome::Downloaded(bytes) => {
                let downloaded = context.stats.record_downloaded(bytes);
                if let Some(progress) = &context.progress {
                    progress(&DownloadProgress {
                        paper_id: item.id.clone(),
                        kind: item.kind,
                        downloaded,
                        total: context.total,
                    });
                }
            }
            ItemOutcome::Failed => context.stats.record_failed(),
            ItemOutcome::Cancelled => {
                context.stats.set_interrupted();
                break;
            }
            ItemOutcome::Fatal(error) => {
                context.stats.record_failed();
                context.record_fatal(error);
                break;
            }
        }
    }
}

#[instrument(skip(context, item), fields(paper_id = %item.id, kind = %item.kind))]
async fn process_item(context: &WorkerContext, item: &WorkItem) -> ItemOutcome {
    let final_path = context.layout.artifact_path(&item.id, item.kind);
    let url = context.urls.artifact_url(&item.id, item.kind);

    let bytes = match fetch_with_retry(context, &url, &final_path).await {
        Ok(bytes) => bytes,
        Err(DownloadError::Cancelled { .. }) => return ItemOutcome::Cancelled,
        Err(DownloadError::Io { path, source }) => {
            warn!(path = %path.display(), error = %source, "artifact write failed");
            return ItemOutcome::Fatal(MirrorError::permanent_write(path, source));
        }
        Err(error) => {
            warn!(url = %url, error = %error, "artifact download failed; skipping");
            return ItemOutcome::Failed;
        }
    };

    let stored_path = final_path.to_string_lossy();
    match context
        .store
        .mark_artifact_downloaded(&item.id, item.kind, &stored_path)
        .await
    {
        Ok(true) => ItemOutcome::Downloaded(bytes),
        Ok(false) => {
            warn!("paper row vanished before artifact could be recorded");
            ItemOutcome::Failed
        }
        Err(error) => ItemOutcome::Fatal(MirrorError::Store(error)),
    }
}

/// Fetches with the run's retry policy, gated by the shared limiter.
async fn fetch_with_retry(
    context: &WorkerContext,
    url: &str,
    final_path: &Path,
) -> Result<u64, DownloadError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        tokio::select! {
            biased;
            () = wait_for_interrupt(&context.interrupted) => {
                return Err(DownloadError::cancelled(url));
            }
            () = context.limiter.acquire() => {}
        }

        let error = match context
            .client
            .fetch_to_path(url, final_path, &context.interrupted)
            .await
        {
            Ok(bytes) => return Ok(bytes),
            Err(error) => error,
        };

        let server_delay = retry_after_delay(&error);
        if let Some(delay) = server_delay {
            context.limiter.record_rate_limit(delay).await;
        }

        match context.policy.should_retry(classify_error(&error), attempt) {
            RetryDecision::Retry {
                delay: backoff,
                attempt: next_attempt,
            } => {
                let delay = server_delay.unwrap_or(backoff);
                info!(
                    url,
                    attempt = next_attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying artifact"
                );
                context.stats.record_retry();
                tokio::select! {
                    biased;
                    () = wait_for_interrupt(&context.interrupted) => {
                        return Err(DownloadError::cancelled(url));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(url, %reason, attempts = attempt, "not retrying");
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = DownloadOptions::default();
        assert_eq!(options.concurrency, 1);
        assert_eq!(options.rate_limit_interval, Duration::from_secs(3));
        assert_eq!(options.kinds(), [ArtifactKind::Pdf, ArtifactKind::Source]);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_concurrency() {
        for concurrency in [0, 101] {
            let options = DownloadOptions {
                concurrency,
                ..DownloadOptions::default()
            };
            let err = options.validate().unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        }
        let options = DownloadOptions {
            concurrency: 100,
            ..DownloadOptions::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_a_kind() {
        let options = DownloadOptions {
            download_pdf: false,
            download_source: false,
            ..DownloadOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_report_progress() {
        let report = DownloadReport {
            downloaded: 4,
            failed: 1,
            ..DownloadReport::default()
        };
        assert_eq!(
            report.progress(),
            RunProgress {
                committed: 4,
                failed: 1
            }
        );
    }

    #[test]
    fn test_stats_counts() {
        let stats = DownloadStats::default();
        assert_eq!(stats.record_downloaded(10), 1);
        assert_eq!(stats.record_downloaded(5), 2);
        stats.record_failed();
        stats.record_retry();
        assert_eq!(stats.bytes.load(Ordering::SeqCst), 15);
        assert_eq!(stats.failed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.retried.load(Ordering::SeqCst), 1);
    }
}
