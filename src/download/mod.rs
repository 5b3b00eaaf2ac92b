//! Artifact download pipeline and the HTTP plumbing shared with harvesting.
//!
//! - [`HttpClient`] streams bodies to `.part` files and fetches OAI-PMH pages
//! - [`RateLimiter`] spaces every remote request of a run
//! - [`RetryPolicy`] and [`classify_error`] decide what is worth retrying
//! - [`DownloadPipeline`] drives a fixed worker pool over the missing artifacts
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use mirror_core::download::{
//!     ArtifactUrls, DownloadOptions, DownloadPipeline, DownloadTarget, HttpClient, MirrorLayout,
//! };
//! # async fn example(store: mirror_core::store::Store) -> Result<(), mirror_core::MirrorError> {
//! let pipeline = DownloadPipeline::new(
//!     store,
//!     HttpClient::new(),
//!     MirrorLayout::new("./mirror"),
//!     ArtifactUrls::default(),
//! );
//! let report = pipeline
//!     .run(
//!         DownloadTarget::Category("cs.LG".to_string()),
//!         DownloadOptions::default(),
//!         Arc::new(AtomicBool::new(false)),
//!     )
//!     .await?;
//! println!("downloaded {} artifacts", report.downloaded);
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod layout;
mod pipeline;
pub mod rate_limiter;
mod retry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use client::{
    CONNECT_TIMEOUT_SECS, HttpClient, READ_TIMEOUT_SECS, default_user_agent, part_path_for,
};
pub use error::DownloadError;
pub use layout::{ArtifactUrls, DEFAULT_ARTIFACT_BASE_URL, INDEX_DB_FILE, MirrorLayout};
pub use pipeline::{
    DEFAULT_CONCURRENCY, DownloadOptions, DownloadPipeline, DownloadProgress, DownloadProgressFn,
    DownloadReport, DownloadTarget, MAX_CONCURRENCY, MIN_CONCURRENCY,
};
pub use rate_limiter::{DEFAULT_RATE_LIMIT_INTERVAL, RateLimiter, parse_retry_after};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    retry_after_delay,
};

/// How often long waits re-check the interrupt flag.
pub(crate) const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Resolves once `flag` is raised. Meant for the first arm of a biased `select!`.
pub(crate) async fn wait_for_interrupt(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(INTERRUPT_POLL_INTERVAL).await;
    }
}
