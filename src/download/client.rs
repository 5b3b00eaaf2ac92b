//! HTTP client wrapper for OAI requests and artifact transfers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::error::DownloadError;
use super::wait_for_interrupt;

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout; generous for large source archives.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Project URL carried in the default User-Agent.
const PROJECT_UA_URL: &str = "https://github.com/arxiv-mirror/arxiv-mirror";

/// Default User-Agent identifying the mirror to arXiv.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("arxiv-mirror/{version} (bulk-mirror; +{PROJECT_UA_URL})")
}

/// Shared HTTP client. Cheap to clone; connections are pooled.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::atomic::AtomicBool;
/// use mirror_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let interrupted = AtomicBool::new(false);
/// let bytes = client
///     .fetch_to_path(
///         "https://arxiv.org/e-print/2401.00001",
///         Path::new("./src/2401/2401.00001.tar.gz"),
///         &interrupted,
///     )
///     .await?;
/// println!("wrote {bytes} bytes");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with the default timeouts and User-Agent.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialised. This should never
    /// happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(&default_user_agent(), CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit User-Agent and timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialised.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn with_settings(user_agent: &str, connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self { client }
    }

    /// GETs `url` with `query` appended and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for an unparseable base URL,
    /// [`DownloadError::HttpStatus`] (carrying `Retry-After`) for non-2xx
    /// responses, and [`DownloadError::Network`]/[`DownloadError::Timeout`]
    /// for transport failures.
    #[instrument(level = "debug", skip(self, query), fields(url = %url))]
    pub async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, DownloadError> {
        let mut parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        if !query.is_empty() {
            parsed.query_pairs_mut().extend_pairs(query);
        }
        let full_url = parsed.to_string();

        let response = self.send(&full_url).await?;
        let body = response
            .text()
            .await
            .map_err(|e| DownloadError::network(&full_url, e))?;
        debug!(bytes = body.len(), "received text response");
        Ok(body)
    }

    /// Streams `url` into `final_path`, atomically.
    ///
    /// The body goes to `<final_path>.part`, is flushed and synced, checked
    /// to be non-empty, and only then renamed into place. On any failure or
    /// cancellation the `.part` file is removed and `final_path` is left
    /// untouched. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] for local write failures,
    /// [`DownloadError::EmptyBody`] for a zero-byte response,
    /// [`DownloadError::Cancelled`] when `interrupted` is raised mid-transfer,
    /// and the same errors as [`get_text`](Self::get_text) otherwise.
    #[instrument(skip(self, interrupted), fields(url = %url, path = %final_path.display()))]
    pub async fn fetch_to_path(
        &self,
        url: &str,
        final_path: &Path,
        interrupted: &AtomicBool,
    ) -> Result<u64, DownloadError> {
        if interrupted.load(Ordering::SeqCst) {
            return Err(DownloadError::cancelled(url));
        }
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let part_path = part_path_for(final_path);
        let result = tokio::select! {
            biased;
            () = wait_for_interrupt(interrupted) => Err(DownloadError::cancelled(url)),
            result = self.transfer(url, &part_path) => result,
        };

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(error) => {
                debug!(path = %part_path.display(), "removing partial file");
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(error);
            }
        };

        if let Err(e) = tokio::fs::rename(&part_path, final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(DownloadError::io(final_path, e));
        }
        debug!(bytes, "artifact in place");
        Ok(bytes)
    }

    async fn transfer(&self, url: &str, part_path: &Path) -> Result<u64, DownloadError> {
        let response = self.send(url).await?;

        let file = File::create(part_path)
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(part_path, e))?;
            bytes_written += chunk.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;

        if bytes_written == 0 {
            return Err(DownloadError::empty_body(url));
        }
        Ok(bytes_written)
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }
        Ok(response)
    }
}

/// `<final>.part`, the in-progress sibling of an artifact path.
#[must_use]
pub fn part_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
