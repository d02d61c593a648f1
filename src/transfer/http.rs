//! [`Transfer`] that streams a node's download URL over HTTP.

use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::TransferError;
use super::{
    temp_path, Transfer, TransferEvent, TransferOutcome, TransferProgress, TransferRequest,
    TransferState, EVENT_BUFFER,
};
use crate::retry::{retry_with_backoff, RetryAction, RetryConfig};

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub struct HttpTransfer {
    client: Client,
    retry: RetryConfig,
    progress_interval: Duration,
}

impl HttpTransfer {
    pub fn new(client: Client, retry: RetryConfig) -> Self {
        Self {
            client,
            retry,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Minimum time between two progress snapshots.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

impl Transfer for HttpTransfer {
    fn start(
        &self,
        request: TransferRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TransferEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let job = Job {
            client: self.client.clone(),
            retry: self.retry.clone(),
            reporter: Reporter::new(tx, request.node.size, &self.retry, self.progress_interval),
            request,
        };
        tokio::spawn(job.run(cancel));
        rx
    }
}

/// Tracks progress of one transfer and publishes snapshots.
struct Reporter {
    tx: mpsc::Sender<TransferEvent>,
    started: Instant,
    started_at: DateTime<Utc>,
    total_bytes: AtomicU64,
    transferred: AtomicU64,
    num_retry: AtomicU32,
    max_retries: u32,
    interval: Duration,
    last_emit: Mutex<Instant>,
}

impl Reporter {
    fn new(
        tx: mpsc::Sender<TransferEvent>,
        total_bytes: u64,
        retry: &RetryConfig,
        interval: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            tx,
            started: now,
            started_at: Utc::now(),
            total_bytes: AtomicU64::new(total_bytes),
            transferred: AtomicU64::new(0),
            num_retry: AtomicU32::new(0),
            max_retries: retry.max_retries,
            interval,
            last_emit: Mutex::new(now),
        }
    }

    fn snapshot(&self, state: TransferState) -> TransferProgress {
        let transferred = self.transferred.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        let mean_speed = if elapsed > 0.0 {
            (transferred as f64 / elapsed) as u64
        } else {
            0
        };
        TransferProgress {
            transferred_bytes: transferred,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            num_retry: self.num_retry.load(Ordering::Relaxed),
            max_retries: self.max_retries,
            mean_speed,
            started_at: self.started_at,
            state,
        }
    }

    /// Publish a snapshot, dropping it if the consumer is behind.
    fn emit(&self, state: TransferState) {
        if let Ok(mut last) = self.last_emit.lock() {
            *last = Instant::now();
        }
        let _ = self.tx.try_send(TransferEvent::Progress(self.snapshot(state)));
    }

    fn begin_attempt(&self, attempt: u32) {
        self.num_retry.store(attempt, Ordering::Relaxed);
        self.transferred.store(0, Ordering::Relaxed);
        let state = if attempt == 0 {
            TransferState::Active
        } else {
            TransferState::Retrying
        };
        self.emit(state);
    }

    fn observe_length(&self, length: u64) {
        let _ = self
            .total_bytes
            .compare_exchange(0, length, Ordering::Relaxed, Ordering::Relaxed);
    }

    fn advance(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
        let due = self
            .last_emit
            .lock()
            .map(|last| last.elapsed() >= self.interval)
            .unwrap_or(true);
        if due {
            self.emit(TransferState::Active);
        }
    }
}

struct Job {
    client: Client,
    retry: RetryConfig,
    reporter: Reporter,
    request: TransferRequest,
}

enum Interrupted {
    Cancelled,
    Failed(TransferError),
}

impl Job {
    async fn run(self, cancel: CancellationToken) {
        let destination = &self.request.destination;
        let part_path = temp_path(destination, &self.request.node.handle);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            r = self.download(&part_path) => r.map_err(Interrupted::Failed),
        };

        let (state, outcome) = match result {
            Ok(()) => {
                tracing::debug!(path = %destination.display(), "Transfer complete");
                (TransferState::Completed, TransferOutcome::Completed)
            }
            Err(Interrupted::Cancelled) => {
                tracing::debug!(path = %destination.display(), "Transfer cancelled");
                (TransferState::Cancelled, TransferOutcome::Cancelled)
            }
            Err(Interrupted::Failed(e)) => {
                tracing::warn!(path = %destination.display(), error = %e, "Transfer failed");
                (TransferState::Failed, TransferOutcome::Failed(e.to_string()))
            }
        };

        if outcome != TransferOutcome::Completed {
            remove_if_present(&part_path).await;
        }

        let progress = self.reporter.snapshot(state);
        let _ = self
            .reporter
            .tx
            .send(TransferEvent::Finished { progress, outcome })
            .await;
    }

    async fn download(&self, part_path: &Path) -> Result<(), TransferError> {
        let node = &self.request.node;
        let destination = self.request.destination.as_path();
        let url = node
            .download_url
            .as_deref()
            .ok_or_else(|| TransferError::MissingUrl(node.handle.clone()))?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let client = &self.client;
        let reporter = &self.reporter;
        retry_with_backoff(
            &self.retry,
            |e: &TransferError| RetryAction::when(e.is_retryable()),
            |attempt| async move {
                reporter.begin_attempt(attempt);
                // Every attempt starts from an empty temp file.
                remove_if_present(part_path).await;
                attempt_download(client, url, part_path, destination, node.size, reporter).await
            },
        )
        .await?;

        reporter.emit(TransferState::Completing);
        fs::rename(part_path, destination).await?;
        Ok(())
    }
}

async fn attempt_download(
    client: &Client,
    url: &str,
    part_path: &Path,
    destination: &Path,
    expected_size: u64,
    reporter: &Reporter,
) -> Result<(), TransferError> {
    let path_str = destination.display().to_string();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TransferError::Http {
            source: e,
            path: path_str.clone(),
            bytes_written: 0,
        })?;

    if !response.status().is_success() {
        return Err(TransferError::HttpStatus {
            status: response.status().as_u16(),
            path: path_str,
        });
    }

    if let Some(length) = response.content_length() {
        reporter.observe_length(length);
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part_path)
        .await?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransferError::Http {
            source: e,
            path: path_str.clone(),
            bytes_written,
        })?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
        reporter.advance(chunk.len() as u64);
    }
    file.flush().await?;
    drop(file);

    if expected_size > 0 && bytes_written != expected_size {
        return Err(TransferError::SizeMismatch {
            path: path_str,
            expected: expected_size,
            actual: bytes_written,
        });
    }

    Ok(())
}

async fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    use axum::body::{Body, Bytes};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tempfile::TempDir;

    use crate::test_support::{drain_events, file_node, serve};
    use crate::transfer::is_temp_artifact;

    fn request(base: &str, dir: &TempDir, path: &str, size: u64) -> TransferRequest {
        let mut node = file_node("h1", None, "a.txt", size);
        node.download_url = Some(format!("{base}{path}"));
        TransferRequest {
            node,
            destination: dir.path().join("root").join("a.txt"),
        }
    }

    fn transfer(max_retries: u32) -> HttpTransfer {
        HttpTransfer::new(Client::new(), RetryConfig::immediate(max_retries))
            .with_progress_interval(Duration::ZERO)
    }

    fn no_temp_files(dir: &Path) -> bool {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .all(|e| !is_temp_artifact(&e.file_name().to_string_lossy()))
            })
            .unwrap_or(true)
    }

    fn finished(events: &[TransferEvent]) -> (&TransferProgress, &TransferOutcome) {
        match events.last() {
            Some(TransferEvent::Finished { progress, outcome }) => (progress, outcome),
            other => panic!("expected a terminal event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_completes() {
        let base = serve(Router::new().route("/a", get(|| async { "hello" }))).await;
        let dir = TempDir::new().unwrap();
        let req = request(&base, &dir, "/a", 5);
        let destination = req.destination.clone();

        let events = drain_events(transfer(0).start(req, CancellationToken::new())).await;

        let (progress, outcome) = finished(&events);
        assert_eq!(*outcome, TransferOutcome::Completed);
        assert_eq!(progress.state, TransferState::Completed);
        assert_eq!(progress.transferred_bytes, 5);
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "hello");
        assert!(no_temp_files(destination.parent().unwrap()));
        assert!(events[..events.len() - 1]
            .iter()
            .all(|e| matches!(e, TransferEvent::Progress(_))));
    }

    #[tokio::test]
    async fn test_not_found_fails_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/a",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::NOT_FOUND
                }
            }),
        );
        let base = serve(router).await;
        let dir = TempDir::new().unwrap();
        let req = request(&base, &dir, "/a", 5);
        let destination = req.destination.clone();

        let events = drain_events(transfer(3).start(req, CancellationToken::new())).await;

        let (progress, outcome) = finished(&events);
        assert!(matches!(outcome, TransferOutcome::Failed(msg) if msg.contains("404")));
        assert_eq!(progress.state, TransferState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!destination.exists());
        assert!(no_temp_files(destination.parent().unwrap()));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_and_reported() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            "/a",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy")
                    } else {
                        (StatusCode::OK, "hello")
                    }
                }
            }),
        );
        let base = serve(router).await;
        let dir = TempDir::new().unwrap();

        let events =
            drain_events(transfer(2).start(request(&base, &dir, "/a", 5), CancellationToken::new()))
                .await;

        let (progress, outcome) = finished(&events);
        assert_eq!(*outcome, TransferOutcome::Completed);
        assert_eq!(progress.num_retry, 1);
        assert_eq!(progress.max_retries, 2);
        assert!(events.iter().any(|e| matches!(
            e,
            TransferEvent::Progress(p) if p.state == TransferState::Retrying
        )));
    }

    #[tokio::test]
    async fn test_truncated_body_fails_after_retries() {
        let base = serve(Router::new().route("/a", get(|| async { "abc" }))).await;
        let dir = TempDir::new().unwrap();
        let req = request(&base, &dir, "/a", 10);
        let destination = req.destination.clone();

        let events = drain_events(transfer(1).start(req, CancellationToken::new())).await;

        let (progress, outcome) = finished(&events);
        assert!(matches!(outcome, TransferOutcome::Failed(msg) if msg.contains("Size mismatch")));
        assert_eq!(progress.num_retry, 1);
        assert!(!destination.exists());
        assert!(no_temp_files(destination.parent().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_url_fails() {
        let dir = TempDir::new().unwrap();
        let req = TransferRequest {
            node: file_node("h1", None, "a.txt", 1),
            destination: dir.path().join("a.txt"),
        };

        let events = drain_events(transfer(3).start(req, CancellationToken::new())).await;

        let (_, outcome) = finished(&events);
        assert!(matches!(outcome, TransferOutcome::Failed(msg) if msg.contains("No download URL")));
    }

    #[tokio::test]
    async fn test_cancel_removes_temp_file() {
        let router = Router::new().route(
            "/slow",
            get(|| async {
                let first = futures_util::stream::once(async {
                    Ok::<_, std::io::Error>(Bytes::from_static(b"partial"))
                });
                Body::from_stream(first.chain(futures_util::stream::pending()))
            }),
        );
        let base = serve(router).await;
        let dir = TempDir::new().unwrap();
        let req = request(&base, &dir, "/slow", 100);
        let destination = req.destination.clone();
        let cancel = CancellationToken::new();

        let mut rx = transfer(0).start(req, cancel.clone());
        // Wait until bytes are flowing before cancelling.
        loop {
            match rx.recv().await {
                Some(TransferEvent::Progress(p)) if p.transferred_bytes > 0 => break,
                Some(TransferEvent::Progress(_)) => continue,
                other => panic!("unexpected event {other:?}"),
            }
        }
        cancel.cancel();
        let events = drain_events(rx).await;

        let (progress, outcome) = finished(&events);
        assert_eq!(*outcome, TransferOutcome::Cancelled);
        assert_eq!(progress.state, TransferState::Cancelled);
        assert!(!destination.exists());
        assert!(no_temp_files(destination.parent().unwrap()));
    }
}
