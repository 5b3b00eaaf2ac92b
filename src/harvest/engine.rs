//! Checkpointed `ListRecords` harvest loop.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::oai::{ListRecordsPage, ListRecordsRequest, MetadataSource, OaiError, SyncFilter};
use crate::download::{
    DEFAULT_MAX_RETRIES, DEFAULT_RATE_LIMIT_INTERVAL, DownloadError, FailureType, RateLimiter,
    RetryDecision, RetryPolicy, classify_error, retry_after_delay, wait_for_interrupt,
};
use crate::error::{MirrorError, RunProgress};
use crate::paper::Paper;
use crate::store::{Store, SyncCheckpoint};

/// Records per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Callback receiving `(fetched, complete_list_size)` after each page.
pub type SyncProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Harvest options.
#[derive(Clone)]
pub struct SyncOptions {
    /// Records per transaction, at least 1.
    pub batch_size: usize,
    /// Discard a pending resumption token instead of refusing a new filter.
    pub restart: bool,
    /// Attempts per page, including the first.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Minimum spacing between page requests.
    pub request_interval: Duration,
    pub progress: Option<SyncProgressFn>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            restart: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_secs(1),
            request_interval: DEFAULT_RATE_LIMIT_INTERVAL,
            progress: None,
        }
    }
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("batch_size", &self.batch_size)
            .field("restart", &self.restart)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("request_interval", &self.request_interval)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl SyncOptions {
    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_base_delay,
            Duration::from_secs(32),
            2.0,
        )
    }
}

/// Outcome of a harvest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records received, including deleted and skipped ones.
    pub fetched: u64,
    /// Papers committed to the store.
    pub committed: u64,
    /// Records that could not be converted.
    pub skipped: u64,
    /// Records flagged deleted upstream.
    pub deleted: u64,
    pub pages: u64,
    /// `completeListSize` from the last page that reported it.
    pub complete_list_size: Option<u64>,
    /// The final page was reached and its checkpoint cleared.
    pub complete: bool,
    /// Resumed from a stored resumption token.
    pub resumed: bool,
    pub interrupted: bool,
}

impl SyncReport {
    fn progress(&self) -> RunProgress {
        RunProgress {
            committed: self.committed,
            failed: self.skipped,
        }
    }
}

/// Drives `ListRecords` paging and commits batches with their checkpoint.
#[derive(Clone)]
pub struct SyncEngine {
    store: Store,
    source: Arc<dyn MetadataSource>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine").finish_non_exhaustive()
    }
}

/// In-flight state of one run.
struct Harvest<'a> {
    store: &'a Store,
    filter: SyncFilter,
    batch_size: usize,
    pending: Vec<Paper>,
    report: SyncReport,
    cursor: Option<u64>,
}

impl Harvest<'_> {
    /// Commits pending papers with a checkpoint pointing at `token`.
    async fn commit(&mut self, token: &str) -> Result<(), MirrorError> {
        let checkpoint = SyncCheckpoint {
            resumption_token: token.to_string(),
            filter: self.filter.clone(),
            cursor: self.cursor,
            complete_list_size: self.report.complete_list_size,
            ..SyncCheckpoint::default()
        };
        self.store.commit_batch(&self.pending, &checkpoint).await?;
        let count = self.pending.len() as u64;
        self.report.committed += count;
        self.pending.clear();
        debug!(count, pending_token = !token.is_empty(), "harvest batch committed");
        Ok(())
    }

    /// Best-effort commit before leaving the loop early.
    async fn flush(&mut self, token: &str) -> Result<(), MirrorError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.commit(token).await
    }
}

impl SyncEngine {
    /// Creates an engine writing into `store`.
    #[must_use]
    pub fn new(store: Store, source: Arc<dyn MetadataSource>) -> Self {
        Self { store, source }
    }

    /// Harvests records matching `filter`, resuming a pending run with the
    /// same filter.
    ///
    /// Returns with `interrupted` set once `interrupted` is raised; whatever
    /// was received so far is committed first.
    ///
    /// # Errors
    ///
    /// - [`MirrorError::Validation`] for a zero batch size or `from > until`.
    /// - [`MirrorError::Precondition`] when a harvest with another filter is
    ///   pending and `restart` is not set.
    /// - [`MirrorError::RunAborted`] wrapping [`MirrorError::Protocol`],
    ///   [`MirrorError::TransientNetwork`] or a store failure. The stored
    ///   checkpoint is left at the last committed batch.
    #[instrument(skip(self, options, interrupted), fields(filter = %filter))]
    pub async fn sync_metadata(
        &self,
        filter: SyncFilter,
        options: &SyncOptions,
        interrupted: &AtomicBool,
    ) -> Result<SyncReport, MirrorError> {
        if options.batch_size == 0 {
            return Err(MirrorError::validation("batch size", "must be at least 1"));
        }
        if let (Some(from), Some(until)) = (filter.from, filter.until) {
            if from > until {
                return Err(MirrorError::validation(
                    "date range",
                    format!("from {from} is after until {until}"),
                ));
            }
        }

        let checkpoint = self.store.load_checkpoint().await?;
        let mut resumed = false;
        let mut request = if checkpoint.is_pending() {
            if options.restart {
                info!(previous = %checkpoint.filter, "discarding pending harvest");
                self.store.reset_checkpoint().await?;
                ListRecordsRequest::Initial(filter.clone())
            } else if checkpoint.filter == filter {
                info!(
                    cursor = checkpoint.cursor,
                    complete_list_size = checkpoint.complete_list_size,
                    "resuming harvest from checkpoint"
                );
                resumed = true;
                ListRecordsRequest::Resume(checkpoint.resumption_token.clone())
            } else {
                return Err(MirrorError::precondition(format!(
                    "a harvest with {} is pending; resume it or pass restart",
                    checkpoint.filter
                )));
            }
        } else {
            ListRecordsRequest::Initial(filter.clone())
        };

        let limiter = RateLimiter::new(options.request_interval);
        let policy = options.retry_policy();
        let mut harvest = Harvest {
            store: &self.store,
            filter,
            batch_size: options.batch_size,
            pending: Vec::with_capacity(options.batch_size.min(DEFAULT_BATCH_SIZE)),
            report: SyncReport {
                resumed,
                complete_list_size: checkpoint.complete_list_size.filter(|_| resumed),
                ..SyncReport::default()
            },
            cursor: None,
        };

        loop {
            let fetched = call_with_retry(&policy, &limiter, interrupted, || {
                self.source.list_records(&request)
            })
            .await;

            let page = match fetched {
                Ok(page) => page,
                Err(MirrorError::Cancelled) => {
                    harvest.report.interrupted = true;
                    harvest.flush(request.token()).await?;
                    info!(committed = harvest.report.committed, "harvest interrupted");
                    return Ok(harvest.report);
                }
                Err(error) => {
                    warn!(error = %error, "harvest page failed");
                    if let Err(flush_error) = harvest.flush(request.token()).await {
                        warn!(error = %flush_error, "could not commit pending records");
                    }
                    return Err(error.aborted_after(harvest.report.progress()));
                }
            };

            let next_token = self
                .process_page(&mut harvest, &request, page)
                .await
                .map_err(|e| e.aborted_after(harvest.report.progress()))?;

            if let Some(progress) = &options.progress {
                let fetched = harvest.cursor.unwrap_or(harvest.report.fetched);
                progress(fetched, harvest.report.complete_list_size);
            }

            match next_token {
                Some(token) => {
                    request = ListRecordsRequest::Resume(token);
                    if interrupted.load(Ordering::SeqCst) {
                        harvest.report.interrupted = true;
                        harvest.flush(request.token()).await?;
                        return Ok(harvest.report);
                    }
                }
                None => {
                    harvest.report.complete = true;
                    break;
                }
            }
        }

        let report = harvest.report;
        info!(
            fetched = report.fetched,
            committed = report.committed,
            skipped = report.skipped,
            deleted = report.deleted,
            pages = report.pages,
            "harvest complete"
        );
        Ok(report)
    }

    /// Converts and stages one page, committing full batches. Returns the
    /// next token, or `None` after the final commit of the last page.
    async fn process_page(
        &self,
        harvest: &mut Harvest<'_>,
        request: &ListRecordsRequest,
        page: ListRecordsPage,
    ) -> Result<Option<String>, MirrorError> {
        harvest.report.pages += 1;
        if page.complete_list_size.is_some() {
            harvest.report.complete_list_size = page.complete_list_size;
        }
        let next_token = page.next_token().map(str::to_string);
        let page_cursor = page.cursor;
        let page_len = page.records.len() as u64;
        // Checkpoints written mid-page still describe the page being read.
        harvest.cursor = page_cursor;

        let last = page.records.len().saturating_sub(1);
        for (index, record) in page.records.into_iter().enumerate() {
            harvest.report.fetched += 1;
            if record.deleted {
                harvest.report.deleted += 1;
                continue;
            }
            match record.to_paper() {
                Ok(paper) => harvest.pending.push(paper),
                Err(error) => {
                    warn!(identifier = %record.identifier, error = %error, "skipping record");
                    harvest.report.skipped += 1;
                }
            }
            if index < last && harvest.pending.len() >= harvest.batch_size {
                harvest.commit(request.token()).await?;
            }
        }

        harvest.cursor = page_cursor.map(|c| c + page_len);
        match next_token {
            Some(token) => {
                if harvest.pending.len() >= harvest.batch_size || harvest.pending.is_empty() {
                    harvest.commit(&token).await?;
                }
                Ok(Some(token))
            }
            None => {
                harvest.commit("").await?;
                Ok(None)
            }
        }
    }
}

/// Runs `call` under `policy`, gated by `limiter` and cancelled by
/// `interrupted`.
///
/// Transport errors are retried according to [`classify_error`]; OAI errors
/// are never retried.
pub(crate) async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    interrupted: &AtomicBool,
    mut call: F,
) -> Result<T, MirrorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OaiError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        tokio::select! {
            biased;
            () = wait_for_interrupt(interrupted) => return Err(MirrorError::Cancelled),
            () = limiter.acquire() => {}
        }

        let result = tokio::select! {
            biased;
            () = wait_for_interrupt(interrupted) => return Err(MirrorError::Cancelled),
            result = call() => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(OaiError::Transport(error)) => error,
            Err(other) => return Err(oai_error_to_mirror(other)),
        };

        let failure = classify_error(&error);
        let server_delay = retry_after_delay(&error);
        if let Some(delay) = server_delay {
            limiter.record_rate_limit(delay).await;
        }

        match policy.should_retry(failure, attempt) {
            RetryDecision::Retry {
                delay: backoff,
                attempt: next_attempt,
            } => {
                let delay = server_delay.unwrap_or(backoff);
                info!(
                    attempt = next_attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retrying metadata request"
                );
                tokio::select! {
                    biased;
                    () = wait_for_interrupt(interrupted) => return Err(MirrorError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, attempts = attempt, "giving up on metadata request");
                return Err(transport_error_to_mirror(error, failure, attempt));
            }
        }
    }
}

fn transport_error_to_mirror(error: DownloadError, failure: FailureType, attempts: u32) -> MirrorError {
    match (&error, failure) {
        (DownloadError::Cancelled { .. }, _) => MirrorError::Cancelled,
        (DownloadError::HttpStatus { url, status, .. }, FailureType::Permanent) => {
            MirrorError::protocol(url.clone(), format!("unexpected HTTP status {status}"))
        }
        _ => MirrorError::TransientNetwork {
            attempts,
            source: error,
        },
    }
}

fn oai_error_to_mirror(error: OaiError) -> MirrorError {
    match error {
        OaiError::Transport(error) => MirrorError::TransientNetwork {
            attempts: 1,
            source: error,
        },
        OaiError::Malformed { url, message } => MirrorError::protocol(url, message),
        OaiError::Remote { url, code, message } => {
            MirrorError::protocol(url, format!("{code}: {message}"))
        }
        OaiError::IdDoesNotExist { identifier } => MirrorError::NotFound {
            what: "record",
            id: identifier,
        },
    }
}
