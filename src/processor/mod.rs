//! The download worker.
//!
//! A single task claims links from the store, resolves them into files and
//! downloads those files one at a time. After a restart it first repairs
//! whatever the previous run left behind (see [`recovery`]).

pub mod monitor;
pub mod paths;
pub mod recovery;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::resolver::{self, RemoteAccess, RemoteNode};
use crate::store::{Link, LinkStatus, NewFile, Store};
use crate::transfer::{Transfer, TransferOutcome, TransferRequest};

/// What the processor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorStatus {
    Idle,
    Reaping,
    Scanning,
    Indexing,
    Downloading,
}

impl ProcessorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reaping => "reaping",
            Self::Scanning => "scanning",
            Self::Indexing => "indexing",
            Self::Downloading => "downloading",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Root directory downloads are written under.
    pub destination: PathBuf,
    pub worker_id: String,
    /// Sleep when there is nothing to do.
    pub idle_delay: Duration,
    /// Sleep after a failed iteration.
    pub error_backoff: Duration,
    /// How long a link with failed files waits before it is retried.
    pub incomplete_retry_delay: Duration,
}

struct Shared {
    worker_id: String,
    status: Mutex<ProcessorStatus>,
    current_link: Mutex<Option<i64>>,
    current_file: Mutex<Option<i64>>,
    stop: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable view of a running processor, used by the API.
#[derive(Clone)]
pub struct ProcessorHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("worker_id", &self.shared.worker_id)
            .field("status", &self.status())
            .field("current_link_id", &self.current_link_id())
            .finish()
    }
}

impl ProcessorHandle {
    pub fn new(worker_id: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                worker_id: worker_id.to_string(),
                status: Mutex::new(ProcessorStatus::Idle),
                current_link: Mutex::new(None),
                current_file: Mutex::new(None),
                stop: CancellationToken::new(),
            }),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.shared.worker_id
    }

    pub fn status(&self) -> ProcessorStatus {
        *lock(&self.shared.status)
    }

    /// The link whose files are being resolved or downloaded.
    pub fn current_link_id(&self) -> Option<i64> {
        *lock(&self.shared.current_link)
    }

    pub fn current_file_id(&self) -> Option<i64> {
        *lock(&self.shared.current_file)
    }

    /// Cancel the active transfer and stop after the current iteration.
    pub fn stop(&self) {
        self.shared.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.is_cancelled()
    }

    pub(crate) fn set_current_link(&self, link_id: Option<i64>) {
        *lock(&self.shared.current_link) = link_id;
    }

    fn set_current_file(&self, file_id: Option<i64>) {
        *lock(&self.shared.current_file) = file_id;
    }

    /// Token for one transfer; cancelled by [`stop`](Self::stop) too.
    fn transfer_token(&self) -> CancellationToken {
        self.shared.stop.child_token()
    }

    /// Set the status until the returned guard drops. The guard holds its
    /// own reference to the shared state.
    fn enter(&self, status: ProcessorStatus) -> StatusGuard {
        let previous = std::mem::replace(&mut *lock(&self.shared.status), status);
        StatusGuard {
            shared: Arc::clone(&self.shared),
            previous,
        }
    }
}

/// Restores the previous status when dropped.
struct StatusGuard {
    shared: Arc<Shared>,
    previous: ProcessorStatus,
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        *lock(&self.shared.status) = self.previous;
    }
}

/// A file waiting for its transfer.
#[derive(Debug, Clone)]
struct PendingFile {
    file_id: i64,
    link_id: i64,
    path: PathBuf,
    node: RemoteNode,
}

pub struct DownloadProcessor {
    store: Arc<dyn Store>,
    progress_store: Arc<dyn Store>,
    remote: Arc<dyn RemoteAccess>,
    transfer: Arc<dyn Transfer>,
    settings: ProcessorSettings,
    handle: ProcessorHandle,
    pending: VecDeque<PendingFile>,
    /// Links skipped until the given instant.
    deferred: HashMap<i64, Instant>,
}

impl DownloadProcessor {
    /// Build a processor. `store` is used by the worker loop; a second
    /// session is opened for the progress writer.
    pub async fn new(
        store: Arc<dyn Store>,
        remote: Arc<dyn RemoteAccess>,
        transfer: Arc<dyn Transfer>,
        settings: ProcessorSettings,
    ) -> anyhow::Result<Self> {
        let progress_store = store
            .session()
            .await
            .context("Failed to open progress store session")?;
        let handle = ProcessorHandle::new(&settings.worker_id);
        Ok(Self {
            store,
            progress_store,
            remote,
            transfer,
            settings,
            handle,
            pending: VecDeque::new(),
            deferred: HashMap::new(),
        })
    }

    pub fn handle(&self) -> ProcessorHandle {
        self.handle.clone()
    }

    /// Recover, then process work until stopped.
    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!(
            worker_id = %self.settings.worker_id,
            destination = %self.settings.destination.display(),
            "Download processor starting"
        );
        self.recover().await?;

        let stop = self.handle.shared.stop.clone();
        while !stop.is_cancelled() {
            let delay = match self.step().await {
                Ok(true) => continue,
                Ok(false) => self.settings.idle_delay,
                Err(e) => {
                    tracing::error!("Processor iteration failed: {e:#}");
                    self.settings.error_backoff
                }
            };
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Download processor stopped");
        Ok(())
    }

    /// Remove stale temp files and reconcile the store with the disk.
    pub(crate) async fn recover(&mut self) -> anyhow::Result<()> {
        {
            let _status = self.handle.enter(ProcessorStatus::Reaping);
            let removed = recovery::reap_temp_files(&self.settings.destination)
                .await
                .context("Failed to remove stale transfer files")?;
            if removed > 0 {
                tracing::info!("Removed {} stale transfer file(s)", removed);
            }
        }

        let _status = self.handle.enter(ProcessorStatus::Scanning);
        let report = recovery::reconcile(self.store.as_ref(), &self.settings.worker_id)
            .await
            .context("Failed to reconcile store with disk")?;
        tracing::info!(
            files_reset = report.files_reset,
            links_demoted = report.links_demoted,
            claims_released = report.claims_released,
            "Startup reconciliation complete"
        );
        Ok(())
    }

    /// One unit of work. Returns whether anything was done.
    pub(crate) async fn step(&mut self) -> anyhow::Result<bool> {
        if let Some(pending) = self.pending.pop_front() {
            let downloaded = self.download(&pending).await;
            if self.pending.is_empty() && !self.handle.is_stopped() {
                self.finish_link(pending.link_id).await?;
            }
            downloaded?;
            return Ok(true);
        }

        let now = Instant::now();
        self.deferred.retain(|_, until| *until > now);

        let candidates = self.store.claimable_links(&self.settings.worker_id).await?;
        let Some(link) = candidates
            .into_iter()
            .find(|link| !self.deferred.contains_key(&link.id))
        else {
            return Ok(false);
        };

        if !self.claim(link.id).await? {
            tracing::debug!(link_id = link.id, "Link claimed by another worker");
            return Ok(true);
        }

        if let Err(e) = self.index_link(&link).await {
            // Never leave a partial file list queued.
            self.pending.retain(|p| p.link_id != link.id);
            self.handle.set_current_link(None);
            return Err(e);
        }
        Ok(true)
    }

    /// Claim a link and make it current. The link is current before the
    /// claim is written, so the API never sees it claimed but deletable.
    async fn claim(&mut self, link_id: i64) -> anyhow::Result<bool> {
        self.handle.set_current_link(Some(link_id));
        match self.store.claim_link(link_id, &self.settings.worker_id).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.handle.set_current_link(None);
                Ok(false)
            }
            Err(e) => {
                self.handle.set_current_link(None);
                Err(e.into())
            }
        }
    }

    /// Resolve a claimed link and queue its unfinished files.
    async fn index_link(&mut self, link: &Link) -> anyhow::Result<()> {
        let _status = self.handle.enter(ProcessorStatus::Indexing);
        tracing::info!(link_id = link.id, url = %link.url, "Resolving link");

        let resolution = match resolver::resolve(self.remote.as_ref(), &link.url).await {
            Ok(resolution) => resolution,
            Err(e) if e.is_retryable() => {
                return Err(e).with_context(|| format!("Failed to resolve link {}", link.id));
            }
            Err(e) => {
                tracing::warn!(link_id = link.id, error = %e, "Link cannot be resolved");
                self.store
                    .update_link_status(
                        link.id,
                        &self.settings.worker_id,
                        LinkStatus::Error,
                        Some(&e.to_string()),
                    )
                    .await?;
                self.handle.set_current_link(None);
                return Ok(());
            }
        };

        let root = paths::link_root(&self.settings.destination, link.category.as_deref());
        let mut allocator = paths::PathAllocator::new(root);
        for known in self.store.list_files(Some(link.id)).await? {
            allocator.reserve(&known.handle, known.path);
        }

        let mut discovered = 0usize;
        let mut queued = 0usize;
        for item in resolution {
            discovered += 1;
            let path = allocator.allocate(&item);
            tracing::debug!(
                remote = %item.relative_path().display(),
                local = %path.display(),
                "Discovered file"
            );
            let file = self
                .store
                .create_file(&NewFile {
                    link_id: link.id,
                    path,
                    handle: item.node.handle.clone(),
                    total_bytes: item.node.size,
                })
                .await?;
            if file.is_finished {
                continue;
            }
            self.pending.push_back(PendingFile {
                file_id: file.id,
                link_id: link.id,
                path: file.path,
                node: item.node,
            });
            queued += 1;
        }

        tracing::info!(link_id = link.id, discovered, queued, "Indexed link");
        if queued == 0 {
            self.finish_link(link.id).await?;
        }
        Ok(())
    }

    /// Download one queued file and wait for its terminal event.
    async fn download(&mut self, pending: &PendingFile) -> anyhow::Result<()> {
        let _status = self.handle.enter(ProcessorStatus::Downloading);

        let Some(file) = self.store.get_file(pending.file_id).await? else {
            tracing::debug!(file_id = pending.file_id, "File record gone, skipping");
            return Ok(());
        };
        if file.is_finished {
            return Ok(());
        }

        self.store.set_file_processing(file.id, true).await?;
        self.handle.set_current_file(Some(file.id));
        tracing::info!(
            file_id = file.id,
            path = %pending.path.display(),
            size = pending.node.size,
            "Downloading"
        );

        let cancel = self.handle.transfer_token();
        let events = self.transfer.start(
            TransferRequest {
                node: pending.node.clone(),
                destination: pending.path.clone(),
            },
            cancel.clone(),
        );
        let outcome = monitor::spawn_progress_writer(
            self.progress_store.clone(),
            file.id,
            events,
            cancel,
        )
        .await
        .unwrap_or_else(|e| TransferOutcome::Failed(format!("progress writer failed: {e}")));

        self.handle.set_current_file(None);
        self.store.set_file_processing(file.id, false).await?;

        match outcome {
            TransferOutcome::Completed => {
                tracing::info!(file_id = file.id, "Downloaded {}", pending.path.display());
            }
            TransferOutcome::Failed(msg) => {
                tracing::warn!(file_id = file.id, "Download failed: {}", msg);
            }
            TransferOutcome::Cancelled => {
                tracing::info!(file_id = file.id, "Download cancelled");
            }
        }
        Ok(())
    }

    /// Close out a link once its queue has drained.
    async fn finish_link(&mut self, link_id: i64) -> anyhow::Result<()> {
        self.handle.set_current_link(None);
        let worker_id = &self.settings.worker_id;
        let unfinished = self.store.count_unfinished_files(link_id).await?;

        if unfinished == 0 {
            self.store
                .update_link_status(link_id, worker_id, LinkStatus::Done, None)
                .await?;
            tracing::info!(link_id, "Link complete");
        } else {
            let message = format!("{unfinished} file(s) incomplete");
            self.store
                .update_link_status(link_id, worker_id, LinkStatus::Processing, Some(&message))
                .await?;
            let delay = self.settings.incomplete_retry_delay;
            self.deferred.insert(link_id, Instant::now() + delay);
            tracing::warn!(
                link_id,
                unfinished,
                "Link has incomplete files, retrying in {}s",
                delay.as_secs()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    use crate::store::SqliteStore;
    use crate::test_support::{file_node, folder_node, FakeBehavior, FakeRemote, FakeTransfer};

    const FOLDER_LINK: &str = "https://mega.nz/#F!root!key";
    const FILE_LINK: &str = "https://mega.nz/#!file!key";
    const WORKER: &str = "worker-test";

    struct Harness {
        dir: TempDir,
        store: Arc<dyn Store>,
        remote: Arc<FakeRemote>,
        transfer: FakeTransfer,
        processor: DownloadProcessor,
    }

    impl Harness {
        fn destination(&self) -> PathBuf {
            self.dir.path().join("downloads")
        }

        async fn link(&self, id: i64) -> Link {
            self.store.get_link(id).await.unwrap().unwrap()
        }

        /// Step until the processor reports no work.
        async fn drain(&mut self) {
            for _ in 0..100 {
                if !self.processor.step().await.unwrap() {
                    return;
                }
            }
            panic!("processor did not go idle");
        }
    }

    fn sample_folder() -> FakeRemote {
        FakeRemote::new().with_folder(
            FOLDER_LINK,
            vec![
                folder_node("r", None, "root"),
                folder_node("s", Some("r"), "sub"),
                file_node("b", Some("s"), "b.txt", 5),
                file_node("a", Some("r"), "a.txt", 5),
            ],
        )
    }

    async fn harness_with(remote: FakeRemote, incomplete_retry_delay: Duration) -> Harness {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn Store> =
            Arc::new(SqliteStore::open(&dir.path().join("megadl.db")).await.unwrap());
        let remote = Arc::new(remote);
        let transfer = FakeTransfer::new();
        let settings = ProcessorSettings {
            destination: dir.path().join("downloads"),
            worker_id: WORKER.to_string(),
            idle_delay: Duration::from_millis(10),
            error_backoff: Duration::from_millis(10),
            incomplete_retry_delay,
        };
        let processor = DownloadProcessor::new(
            store.session().await.unwrap(),
            remote.clone(),
            Arc::new(transfer.clone()),
            settings,
        )
        .await
        .unwrap();
        Harness {
            dir,
            store,
            remote,
            transfer,
            processor,
        }
    }

    async fn harness(remote: FakeRemote) -> Harness {
        harness_with(remote, Duration::from_secs(60)).await
    }

    fn relative(h: &Harness, path: &Path) -> String {
        path.strip_prefix(h.destination())
            .unwrap()
            .to_string_lossy()
            .into_owned()
    }

    #[tokio::test]
    async fn test_folder_link_downloads_in_discovery_order() {
        let mut h = harness(sample_folder()).await;
        let link = h.store.add_link(FOLDER_LINK, None).await.unwrap();

        h.drain().await;

        assert_eq!(h.transfer.started(), vec!["a", "b"]);
        let files = h.store.list_files(Some(link.id)).await.unwrap();
        let paths: Vec<String> = files.iter().map(|f| relative(&h, &f.path)).collect();
        assert_eq!(paths, vec!["root/a.txt", "root/sub/b.txt"]);
        assert!(files.iter().all(|f| f.is_finished && !f.is_processing));
        assert!(h.destination().join("root/sub/b.txt").exists());
        assert_eq!(h.link(link.id).await.status, LinkStatus::Done);
        assert_eq!(h.processor.handle().current_link_id(), None);
    }

    #[tokio::test]
    async fn test_single_file_link_with_category() {
        let remote = FakeRemote::new().with_file(FILE_LINK, file_node("f", None, "movie.mkv", 3));
        let mut h = harness(remote).await;
        let link = h.store.add_link(FILE_LINK, Some("movies")).await.unwrap();

        h.drain().await;

        assert!(h.destination().join("movies/movie.mkv").exists());
        assert_eq!(h.link(link.id).await.status, LinkStatus::Done);
    }

    #[tokio::test]
    async fn test_failed_file_keeps_link_from_done() {
        let mut h = harness(sample_folder()).await;
        h.transfer.set("b", FakeBehavior::Fail("connection reset".into()));
        let link = h.store.add_link(FOLDER_LINK, None).await.unwrap();

        h.drain().await;

        let link = h.link(link.id).await;
        assert_eq!(link.status, LinkStatus::Processing);
        assert_eq!(link.message.as_deref(), Some("1 file(s) incomplete"));
        let files = h.store.list_files(Some(link.id)).await.unwrap();
        assert!(files[0].is_finished);
        assert!(!files[1].is_finished);
        assert_eq!(files[1].state, Some(8));
        // Deferred: the next step finds nothing to do.
        assert!(!h.processor.step().await.unwrap());
    }

    #[tokio::test]
    async fn test_resolving_twice_creates_no_duplicates() {
        let mut h = harness_with(sample_folder(), Duration::ZERO).await;
        h.transfer.set("b", FakeBehavior::Fail("nope".into()));
        let link = h.store.add_link(FOLDER_LINK, None).await.unwrap();

        // claim + index, a, b (fails, link deferred for zero time)
        for _ in 0..3 {
            assert!(h.processor.step().await.unwrap());
        }
        // re-claim + index again, then retry b
        for _ in 0..2 {
            assert!(h.processor.step().await.unwrap());
        }

        assert_eq!(h.store.list_files(Some(link.id)).await.unwrap().len(), 2);
        assert_eq!(h.transfer.started(), vec!["a", "b", "b"]);
    }

    #[tokio::test]
    async fn test_unusable_and_clashing_names_get_their_own_paths() {
        let remote = FakeRemote::new().with_folder(
            FOLDER_LINK,
            vec![
                folder_node("r", None, "root"),
                file_node("q", Some("r"), "???", 5),
                file_node("c1", Some("r"), "a:b.txt", 5),
                file_node("c2", Some("r"), "ab.txt", 5),
                folder_node("s", Some("r"), "sub"),
                file_node("b", Some("s"), "b.txt", 5),
            ],
        );
        let mut h = harness(remote).await;
        let link = h.store.add_link(FOLDER_LINK, None).await.unwrap();

        h.drain().await;

        let files = h.store.list_files(Some(link.id)).await.unwrap();
        let paths: Vec<String> = files.iter().map(|f| relative(&h, &f.path)).collect();
        assert_eq!(
            paths,
            vec!["root/q", "root/ab.txt", "root/ab_c2.txt", "root/sub/b.txt"]
        );
        assert!(files.iter().all(|f| f.is_finished));
        assert!(h.destination().join("root").is_dir());
        assert_eq!(h.link(link.id).await.status, LinkStatus::Done);
    }

    #[tokio::test]
    async fn test_unavailable_link_marked_error() {
        let mut h = harness(FakeRemote::new().with_unavailable(FOLDER_LINK)).await;
        let link = h.store.add_link(FOLDER_LINK, None).await.unwrap();

        h.drain().await;

        let link = h.link(link.id).await;
        assert_eq!(link.status, LinkStatus::Error);
        assert!(link.message.unwrap().contains("removed"));
        assert!(h.store.list_files(Some(link.id)).await.unwrap().is_empty());
        assert!(h.transfer.started().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_retried_on_next_iteration() {
        let mut h = harness(sample_folder().with_transient_failure(FOLDER_LINK)).await;
        let link = h.store.add_link(FOLDER_LINK, None).await.unwrap();

        assert!(h.processor.step().await.is_err());
        let stored = h.link(link.id).await;
        assert_eq!(stored.status, LinkStatus::Processing);
        assert_eq!(stored.worker_id, WORKER);
        assert_eq!(h.processor.handle().current_link_id(), None);

        h.remote.clear_failure(FOLDER_LINK);
        h.drain().await;

        assert_eq!(h.link(link.id).await.status, LinkStatus::Done);
    }

    #[tokio::test]
    async fn test_empty_folder_done_immediately() {
        let remote = FakeRemote::new().with_folder(FOLDER_LINK, vec![folder_node("r", None, "root")]);
        let mut h = harness(remote).await;
        let link = h.store.add_link(FOLDER_LINK, None).await.unwrap();

        assert!(h.processor.step().await.unwrap());

        assert_eq!(h.link(link.id).await.status, LinkStatus::Done);
        let handle = h.processor.handle();
        assert_eq!(handle.status(), ProcessorStatus::Idle);
        assert_eq!(handle.current_link_id(), None);
    }

    #[tokio::test]
    async fn test_recovery_requeues_deleted_downloads() {
        let mut h = harness(sample_folder()).await;
        let link = h.store.add_link(FOLDER_LINK, None).await.unwrap();
        h.drain().await;
        assert_eq!(h.link(link.id).await.status, LinkStatus::Done);

        std::fs::remove_file(h.destination().join("root/a.txt")).unwrap();
        std::fs::write(h.destination().join("root/.getxfer.a.mega"), b"partial").unwrap();
        h.processor.recover().await.unwrap();

        assert_eq!(h.link(link.id).await.status, LinkStatus::Idle);
        assert!(!h.destination().join("root/.getxfer.a.mega").exists());
        let files = h.store.list_files(Some(link.id)).await.unwrap();
        assert!(!files[0].is_finished);
        assert!(files[1].is_finished);

        h.drain().await;

        assert_eq!(h.transfer.started(), vec!["a", "b", "a"]);
        assert_eq!(h.link(link.id).await.status, LinkStatus::Done);
    }

    #[tokio::test]
    async fn test_stop_cancels_active_transfer() {
        let Harness {
            dir: _dir,
            store,
            transfer,
            processor,
            ..
        } = harness(sample_folder()).await;
        transfer.set("a", FakeBehavior::Hang);
        let link = store.add_link(FOLDER_LINK, None).await.unwrap();
        let handle = processor.handle();
        let task = tokio::spawn(processor.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.current_file_id().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.current_link_id(), Some(link.id));
        assert_eq!(handle.status(), ProcessorStatus::Downloading);

        handle.stop();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(transfer.started(), vec!["a"]);
        let files = store.list_files(Some(link.id)).await.unwrap();
        assert!(files.iter().all(|f| !f.is_finished && !f.is_processing));
        let link = store.get_link(link.id).await.unwrap().unwrap();
        assert_ne!(link.status, LinkStatus::Done);
        assert_eq!(handle.status(), ProcessorStatus::Idle);
    }

    #[tokio::test]
    async fn test_status_guard_restores_previous() {
        let handle = ProcessorHandle::new("w");
        {
            let _outer = handle.enter(ProcessorStatus::Indexing);
            {
                let _inner = handle.enter(ProcessorStatus::Downloading);
                assert_eq!(handle.status(), ProcessorStatus::Downloading);
            }
            assert_eq!(handle.status(), ProcessorStatus::Indexing);
        }
        assert_eq!(handle.status(), ProcessorStatus::Idle);
    }

    #[tokio::test]
    async fn test_status_guard_outlives_handle_clone() {
        let handle = ProcessorHandle::new("w");
        let guard = handle.clone().enter(ProcessorStatus::Scanning);
        assert_eq!(handle.status(), ProcessorStatus::Scanning);
        drop(guard);
        assert_eq!(handle.status(), ProcessorStatus::Idle);
    }

    #[tokio::test]
    async fn test_claim_sets_current_link_only_when_won() {
        let mut h = harness(FakeRemote::new()).await;
        let ours = h.store.add_link(FOLDER_LINK, None).await.unwrap();
        let theirs = h.store.add_link(FILE_LINK, None).await.unwrap();
        h.store
            .update_link_status(theirs.id, "other", LinkStatus::Processing, None)
            .await
            .unwrap();

        assert!(!h.processor.claim(theirs.id).await.unwrap());
        assert_eq!(h.processor.handle().current_link_id(), None);

        assert!(h.processor.claim(ours.id).await.unwrap());
        assert_eq!(h.processor.handle().current_link_id(), Some(ours.id));
        assert_eq!(h.link(ours.id).await.worker_id, WORKER);
    }
}
