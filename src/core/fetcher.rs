//! Concurrent tile fetching
//!
//! Downloads every requested URL into the staging directory with at most
//! `max_workers` transfers in flight. Bodies are streamed through a fixed-size
//! buffer, never held in memory whole. The fetch is all-or-nothing: the first
//! failure cancels the remaining transfers and removes every staged file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use reqwest::{Client, ClientBuilder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

use crate::core::config::{validate_base_url, Config};
use crate::core::error::{Error, Result};

/// Progress callback: (tiles finished, tiles requested)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Execute an operation, retrying connection and timeout failures with
/// exponential backoff. Any other error is returned immediately.
async fn retry_on_network_error<F, Fut, T>(
    max_retries: u32,
    base_delay: Duration,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(Error::Network(msg)) if attempt < max_retries => {
                attempt += 1;
                let delay = base_delay * (1 << (attempt - 1));
                log::warn!("Network error (attempt {attempt}): {msg}. Retrying in {delay:?}...");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bounded-concurrency downloader for tile files
pub struct Fetcher {
    client: Client,
    config: Config,
    progress: Option<ProgressCallback>,
}

impl Fetcher {
    pub fn new(config: Config) -> Result<Self> {
        let client = ClientBuilder::new()
            .tcp_keepalive(Duration::from_secs(60))
            .pool_max_idle_per_host(config.max_workers)
            .connect_timeout(config.connect_timeout)
            .user_agent(format!("ahn-dl/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                Error::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            config,
            progress: None,
        })
    }

    /// Report (finished, total) after every completed tile.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Download every URL into the staging directory.
    ///
    /// Returns a map from URL to staged file. The map has no order; callers
    /// must order tiles themselves before merging.
    pub async fn fetch(&self, urls: &[String]) -> Result<HashMap<String, PathBuf>> {
        for url in urls {
            validate_base_url(url)?;
        }
        if urls.is_empty() {
            return Ok(HashMap::new());
        }
        tokio::fs::create_dir_all(&self.config.staging_dir).await?;

        let total = urls.len() as u64;
        let finished = Arc::new(AtomicU64::new(0));
        let staged: Arc<Mutex<HashMap<String, PathBuf>>> =
            Arc::new(Mutex::new(HashMap::with_capacity(urls.len())));

        log::info!(
            "Fetching {} tile(s) with up to {} concurrent transfers",
            total,
            self.config.max_workers
        );

        let mut transfers = stream::iter(urls)
            .map(|url| {
                let finished = Arc::clone(&finished);
                let staged = Arc::clone(&staged);
                async move {
                    let path = retry_on_network_error(
                        self.config.max_retries,
                        self.config.base_retry_delay,
                        || self.transfer(url),
                    )
                    .await
                    .map_err(|e| match e {
                        Error::Network(reason) => Error::TransferFailure {
                            url: url.clone(),
                            reason,
                        },
                        other => other,
                    })?;

                    staged.lock().insert(url.clone(), path);
                    let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(ref progress) = self.progress {
                        progress(done, total);
                    }
                    Ok::<(), Error>(())
                }
            })
            .buffer_unordered(self.config.max_workers);

        let mut failure = None;
        while let Some(result) = transfers.next().await {
            if let Err(e) = result {
                failure = Some(e);
                break;
            }
        }
        // Dropping the stream cancels in-flight transfers; their partial
        // files are removed as their temp paths drop.
        drop(transfers);

        let staged = std::mem::take(&mut *staged.lock());
        if let Some(e) = failure {
            log::error!("Fetch aborted: {e}");
            remove_staged(staged.values());
            return Err(e);
        }

        log::info!("Fetched {} tile(s)", staged.len());
        Ok(staged)
    }

    /// One attempt at one URL, into a fresh staging file.
    async fn transfer(&self, url: &str) -> Result<PathBuf> {
        let file_name = url.rsplit('/').next().unwrap_or("tile");
        let (file, temp_path) = tempfile::Builder::new()
            .prefix("ahn-")
            .suffix(&format!("-{file_name}"))
            .tempfile_in(&self.config.staging_dir)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let read_timeout = self.config.read_timeout;
        let response = tokio::time::timeout(read_timeout, self.client.get(url).send())
            .await
            .map_err(|_| {
                Error::Network(format!("no response from {url} within {read_timeout:?}"))
            })??;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TransferFailure {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let mut reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut buffer = vec![0u8; self.config.chunk_size];
        let mut received = 0u64;

        loop {
            let bytes_read = tokio::time::timeout(read_timeout, reader.read(&mut buffer))
                .await
                .map_err(|_| {
                    Error::Network(format!("read from {url} stalled after {received} bytes"))
                })?
                .map_err(|e| Error::Network(format!("Stream read error: {e}")))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(&buffer[..bytes_read]).await?;
            received += bytes_read as u64;
        }
        file.flush().await?;

        let path = temp_path.keep().map_err(|e| Error::Io(e.error))?;
        log::debug!("Staged {url} ({received} bytes) at {}", path.display());
        Ok(path)
    }
}

/// Delete staged files, logging failures.
pub fn remove_staged<'a, I>(paths: I)
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    for path in paths {
        remove_file_logged(path);
    }
}

pub(crate) fn remove_file_logged(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove staged file {}: {e}", path.display());
        }
    }
}
