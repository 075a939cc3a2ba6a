//! Fetch-and-Persist for the Danbooru Downloader
//!
//! This module provides functionality for:
//! 1. Skipping destinations that already exist (no network I/O)
//! 2. Streaming files to a `.part` sibling, renamed into place on success
//! 3. Cooperative pause and cancellation checked around every chunk
//! 4. Retrying transient failures with exponential backoff

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::engine::control::TransferControl;
use crate::engine::events::Outcome;
use crate::engine::retry::{calculate_backoff, is_transient_status};

/// Error types for a single transfer attempt
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(StatusCode),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl TransferError {
    /// Local disk failures are not retried; network-side ones are.
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Io(_) => false,
            TransferError::Request(_) | TransferError::Stream(_) => true,
            TransferError::Status(status) => is_transient_status(*status),
        }
    }
}

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

pub type ByteStream = Pin<Box<dyn Stream<Item = TransferResult<Bytes>> + Send>>;

/// An opened remote resource
pub struct RemoteBody {
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

/// Source of file bytes for a URL.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open `url`. Non-success statuses are reported as [`TransferError::Status`].
    async fn open(&self, url: &str) -> TransferResult<RemoteBody>;
}

/// Transport backed by a shared `reqwest` client
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// `timeout` bounds connecting and every individual read, headers and body alike.
    pub fn new(user_agent: &str, timeout: Duration) -> TransferResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str) -> TransferResult<RemoteBody> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status(status));
        }

        let content_length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransferError::from))
            .boxed();

        Ok(RemoteBody { content_length, stream })
    }
}

/// Fetcher configuration
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Total attempts per file, including the first one
    pub max_attempts: usize,
    pub retry_backoff: Duration,
    /// Longest wait for a response or for the next body chunk before the attempt fails
    pub idle_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(500),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of one [`Fetcher::fetch`] call
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Done(PathBuf),
    Skipped(PathBuf),
    Failed(String),
    /// Stopped by the run token. Not a completion and not an error.
    Cancelled,
}

impl FetchOutcome {
    /// The reportable outcome, `None` for cancellation.
    pub fn into_outcome(self) -> Option<Outcome> {
        match self {
            FetchOutcome::Done(path) => Some(Outcome::Done(path)),
            FetchOutcome::Skipped(path) => Some(Outcome::Skipped(path)),
            FetchOutcome::Failed(message) => Some(Outcome::Failed(message)),
            FetchOutcome::Cancelled => None,
        }
    }
}

enum AttemptEnd {
    Completed,
    Cancelled,
}

/// Temporary sibling a transfer streams into before the final rename.
pub fn partial_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    destination.with_file_name(format!("{}.{}.part", name, Uuid::new_v4().simple()))
}

/// URL to file transfer with skip, pause, cancel and retry semantics
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    control: TransferControl,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, control: TransferControl, config: FetcherConfig) -> Self {
        Self { transport, control, config }
    }

    pub fn control(&self) -> &TransferControl {
        &self.control
    }

    /// Transfer `url` to `destination`, producing exactly one outcome.
    ///
    /// `on_progress` receives `received / total` after each chunk when the
    /// content length is known.
    #[instrument(skip(self, token, on_progress), fields(destination = %destination.display()))]
    pub async fn fetch<F>(
        &self,
        url: &str,
        destination: &Path,
        token: &CancellationToken,
        mut on_progress: F,
    ) -> FetchOutcome
    where
        F: FnMut(f64) + Send,
    {
        if token.is_cancelled() {
            return FetchOutcome::Cancelled;
        }

        if fs::try_exists(destination).await.unwrap_or(false) {
            debug!("File already exists: {}", destination.display());
            return FetchOutcome::Skipped(destination.to_path_buf());
        }

        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let partial = partial_path(destination);

            let result = self
                .attempt(url, destination, &partial, token, &mut on_progress)
                .await;

            match result {
                Ok(AttemptEnd::Completed) => return FetchOutcome::Done(destination.to_path_buf()),
                Ok(AttemptEnd::Cancelled) => {
                    remove_partial(&partial).await;
                    debug!("Transfer cancelled: {}", url);
                    return FetchOutcome::Cancelled;
                }
                Err(e) => {
                    remove_partial(&partial).await;

                    if !e.is_retryable() || attempts >= max_attempts {
                        warn!("Download failed after {} attempt(s): {} - {}", attempts, url, e);
                        return FetchOutcome::Failed(e.to_string());
                    }

                    let backoff = calculate_backoff(attempts, self.config.retry_backoff);
                    warn!(
                        "Attempt {}/{} for {} failed: {}. Backing off for {}ms",
                        attempts,
                        max_attempts,
                        url,
                        e,
                        backoff.as_millis()
                    );

                    tokio::select! {
                        _ = token.cancelled() => return FetchOutcome::Cancelled,
                        _ = sleep(backoff) => {}
                    }
                }
            }
        }
    }

    async fn attempt<F>(
        &self,
        url: &str,
        destination: &Path,
        partial: &Path,
        token: &CancellationToken,
        on_progress: &mut F,
    ) -> TransferResult<AttemptEnd>
    where
        F: FnMut(f64) + Send,
    {
        let idle = self.config.idle_timeout;
        let body = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(AttemptEnd::Cancelled),
            body = timeout(idle, self.transport.open(url)) => match body {
                Ok(body) => body?,
                Err(_) => return Err(stalled(idle)),
            },
        };

        let total = body.content_length.filter(|&n| n > 0);
        let mut stream = body.stream;
        let mut file = File::create(partial).await?;
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(AttemptEnd::Cancelled),
                next = timeout(idle, stream.next()) => next.map_err(|_| stalled(idle))?,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;

            if !self.control.wait_if_paused(token).await {
                return Ok(AttemptEnd::Cancelled);
            }

            file.write_all(&chunk).await?;
            file.flush().await?;
            received += chunk.len() as u64;

            if let Some(total) = total {
                on_progress((received as f64 / total as f64).min(1.0));
            }
        }

        if let Some(total) = total {
            if received < total {
                return Err(TransferError::Stream(format!(
                    "body ended after {} of {} bytes",
                    received, total
                )));
            }
        }

        file.sync_all().await?;
        drop(file);
        fs::rename(partial, destination).await?;

        debug!("Wrote {} bytes to {}", received, destination.display());
        Ok(AttemptEnd::Completed)
    }
}

fn stalled(idle: Duration) -> TransferError {
    TransferError::Stream(format!("no data received for {}s", idle.as_secs_f64()))
}

async fn remove_partial(partial: &Path) {
    if let Err(e) = fs::remove_file(partial).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove partial file {}: {}", partial.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn fetcher(transport: MemoryTransport, control: TransferControl) -> Fetcher {
        Fetcher::new(
            Arc::new(transport),
            control,
            FetcherConfig {
                max_attempts: 5,
                retry_backoff: Duration::from_millis(1),
                ..FetcherConfig::default()
            },
        )
    }

    fn part_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with(".part"))
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_writes_file_and_reports_progress() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("1.png");
        let transport = MemoryTransport::new().with_body("mem://1", vec![7u8; 1000], 100);
        let fetcher = fetcher(transport, TransferControl::new());
        let token = CancellationToken::new();

        let mut fractions = Vec::new();
        let outcome = fetcher.fetch("mem://1", &dest, &token, |f| fractions.push(f)).await;

        assert_eq!(outcome, FetchOutcome::Done(dest.clone()));
        assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 1000]);
        assert_eq!(fractions.len(), 10);
        assert!((fractions[0] - 0.1).abs() < f64::EPSILON);
        assert_eq!(*fractions.last().unwrap(), 1.0);
        assert!(part_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_second_fetch_is_skipped_and_keeps_contents() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("5.jpg");
        let transport = MemoryTransport::new().with_body("mem://5", b"first".to_vec(), 2);
        let transport = Arc::new(transport);
        let fetcher = Fetcher::new(transport.clone(), TransferControl::new(), FetcherConfig::default());
        let token = CancellationToken::new();

        let first = fetcher.fetch("mem://5", &dest, &token, |_| {}).await;
        assert_eq!(first, FetchOutcome::Done(dest.clone()));

        transport.set_body("mem://5", b"second".to_vec(), 2);
        let second = fetcher.fetch("mem://5", &dest, &token, |_| {}).await;

        assert_eq!(second, FetchOutcome::Skipped(dest.clone()));
        assert_eq!(std::fs::read(&dest).unwrap(), b"first");
        assert_eq!(transport.open_count("mem://5"), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("2.jpg");
        let transport = MemoryTransport::new()
            .with_body("mem://2", b"payload".to_vec(), 3)
            .with_failures("mem://2", 2, StatusCode::BAD_GATEWAY);
        let transport = Arc::new(transport);
        let fetcher = Fetcher::new(
            transport.clone(),
            TransferControl::new(),
            FetcherConfig {
                max_attempts: 5,
                retry_backoff: Duration::from_millis(1),
                ..FetcherConfig::default()
            },
        );

        let outcome = fetcher.fetch("mem://2", &dest, &CancellationToken::new(), |_| {}).await;

        assert_eq!(outcome, FetchOutcome::Done(dest.clone()));
        assert_eq!(transport.open_count("mem://2"), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_reports_failure() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("3.jpg");
        let transport = MemoryTransport::new()
            .with_body("mem://3", b"never".to_vec(), 3)
            .with_failures("mem://3", 10, StatusCode::SERVICE_UNAVAILABLE);
        let transport = Arc::new(transport);
        let fetcher = Fetcher::new(
            transport.clone(),
            TransferControl::new(),
            FetcherConfig {
                max_attempts: 5,
                retry_backoff: Duration::from_millis(1),
                ..FetcherConfig::default()
            },
        );

        let outcome = fetcher.fetch("mem://3", &dest, &CancellationToken::new(), |_| {}).await;

        assert!(matches!(outcome, FetchOutcome::Failed(ref m) if m.contains("503")));
        assert_eq!(transport.open_count("mem://3"), 5);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("4.jpg");
        let transport = Arc::new(MemoryTransport::new().with_failures("mem://4", 1, StatusCode::NOT_FOUND));
        let fetcher = Fetcher::new(transport.clone(), TransferControl::new(), FetcherConfig::default());

        let outcome = fetcher.fetch("mem://4", &dest, &CancellationToken::new(), |_| {}).await;

        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        assert_eq!(transport.open_count("mem://4"), 1);
    }

    #[tokio::test]
    async fn test_cancel_mid_transfer_removes_partial_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("6.jpg");
        let transport = MemoryTransport::new()
            .with_body("mem://6", vec![1u8; 400], 100)
            .with_stall_after("mem://6", 1);
        let control = TransferControl::new();
        let fetcher = Arc::new(fetcher(transport, control.clone()));
        let token = control.begin_run();

        let chunks = Arc::new(AtomicUsize::new(0));
        let handle = {
            let fetcher = fetcher.clone();
            let dest = dest.clone();
            let token = token.clone();
            let chunks = chunks.clone();
            tokio::spawn(async move {
                fetcher
                    .fetch("mem://6", &dest, &token, move |_| {
                        chunks.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
            })
        };

        while chunks.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(part_files(dir.path()).len(), 1);

        control.cancel();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(!dest.exists());
        assert!(part_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_pause_halts_growth_until_resumed() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("8.bin");
        let transport = MemoryTransport::new()
            .with_body("mem://8", vec![9u8; 800], 100)
            .with_chunk_delay(Duration::from_millis(10));
        let control = TransferControl::new();
        let fetcher = Arc::new(fetcher(transport, control.clone()));
        let token = control.begin_run();

        let chunks = Arc::new(AtomicUsize::new(0));
        let handle = {
            let fetcher = fetcher.clone();
            let dest = dest.clone();
            let token = token.clone();
            let chunks = chunks.clone();
            tokio::spawn(async move {
                fetcher
                    .fetch("mem://8", &dest, &token, move |_| {
                        chunks.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
            })
        };

        while chunks.load(Ordering::SeqCst) < 2 {
            sleep(Duration::from_millis(2)).await;
        }
        control.pause();
        sleep(Duration::from_millis(50)).await;

        let partial = part_files(dir.path()).pop().expect("partial file while paused");
        let size_at_pause = std::fs::metadata(&partial).unwrap().len();
        let chunks_at_pause = chunks.load(Ordering::SeqCst);
        assert!(size_at_pause < 800);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(std::fs::metadata(&partial).unwrap().len(), size_at_pause);
        assert_eq!(chunks.load(Ordering::SeqCst), chunks_at_pause);
        assert!(!handle.is_finished());

        control.resume();
        let outcome = handle.await.unwrap();

        assert_eq!(outcome, FetchOutcome::Done(dest.clone()));
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 800);
    }

    fn http_fetcher() -> Fetcher {
        let transport = HttpTransport::new("test-agent/1.0", Duration::from_secs(5)).unwrap();
        Fetcher::new(
            Arc::new(transport),
            TransferControl::new(),
            FetcherConfig {
                max_attempts: 5,
                retry_backoff: Duration::from_millis(1),
                ..FetcherConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_http_transport_streams_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data/77.png")
            .match_header("user-agent", "test-agent/1.0")
            .with_status(200)
            .with_body(vec![3u8; 4096])
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("77.png");
        let url = format!("{}/data/77.png", server.url());

        let mut last = 0.0;
        let outcome = http_fetcher()
            .fetch(&url, &dest, &CancellationToken::new(), |f| last = f)
            .await;

        mock.assert_async().await;
        assert_eq!(outcome, FetchOutcome::Done(dest.clone()));
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
        assert_eq!(last, 1.0);
    }

    #[tokio::test]
    async fn test_http_5xx_exhausts_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data/1.jpg")
            .with_status(503)
            .expect(5)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("1.jpg");
        let url = format!("{}/data/1.jpg", server.url());

        let outcome = http_fetcher().fetch(&url, &dest, &CancellationToken::new(), |_| {}).await;

        mock.assert_async().await;
        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        assert!(!dest.exists());
        assert!(part_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_http_404_fails_immediately() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/data/2.jpg")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let url = format!("{}/data/2.jpg", server.url());

        let outcome = http_fetcher()
            .fetch(&url, &dir.path().join("2.jpg"), &CancellationToken::new(), |_| {})
            .await;

        mock.assert_async().await;
        assert!(matches!(outcome, FetchOutcome::Failed(ref m) if m.contains("404")));
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_network() {
        let dir = tempdir().unwrap();
        let transport = Arc::new(MemoryTransport::new());
        let fetcher = Fetcher::new(transport.clone(), TransferControl::new(), FetcherConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        let outcome = fetcher.fetch("mem://9", &dir.path().join("9.jpg"), &token, |_| {}).await;

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(transport.open_count("mem://9"), 0);
    }

    #[tokio::test]
    async fn test_stalled_body_fails_after_idle_timeout() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("10.jpg");
        let transport = MemoryTransport::new()
            .with_body("mem://10", vec![5u8; 300], 100)
            .with_stall_after("mem://10", 1);
        let transport = Arc::new(transport);
        let fetcher = Fetcher::new(
            transport.clone(),
            TransferControl::new(),
            FetcherConfig {
                max_attempts: 3,
                retry_backoff: Duration::from_millis(1),
                idle_timeout: Duration::from_millis(50),
            },
        );

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            fetcher.fetch("mem://10", &dest, &CancellationToken::new(), |_| {}),
        )
        .await
        .expect("stalled transfer must not hang");

        assert!(matches!(outcome, FetchOutcome::Failed(ref m) if m.contains("no data")));
        assert_eq!(transport.open_count("mem://10"), 3);
        assert!(!dest.exists());
        assert!(part_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_http_body_stalling_after_headers_times_out() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = [0u8; 1024];
                    let _ = socket.read(&mut request).await;
                    let head = "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nContent-Type: image/jpeg\r\n\r\n";
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&[1u8; 10]).await;
                    let _ = socket.flush().await;
                    sleep(Duration::from_secs(60)).await;
                });
            }
        });

        let transport = HttpTransport::new("test-agent/1.0", Duration::from_secs(1)).unwrap();
        let fetcher = Fetcher::new(
            Arc::new(transport),
            TransferControl::new(),
            FetcherConfig {
                max_attempts: 1,
                retry_backoff: Duration::from_millis(1),
                idle_timeout: Duration::from_secs(60),
            },
        );

        let dir = tempdir().unwrap();
        let dest = dir.path().join("11.jpg");
        let url = format!("http://{}/data/11.jpg", addr);

        let outcome = tokio::time::timeout(
            Duration::from_secs(8),
            fetcher.fetch(&url, &dest, &CancellationToken::new(), |_| {}),
        )
        .await
        .expect("read timeout must end the transfer");

        assert!(matches!(outcome, FetchOutcome::Failed(_)));
        assert!(!dest.exists());
        assert!(part_files(dir.path()).is_empty());
    }
}
