//! In-memory doubles shared by unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::resolver::remote::FolderLogin;
use crate::resolver::{NodeKind, NodeTree, RemoteAccess, RemoteNode, ResolveError};
use crate::store::SqliteStore;
use crate::transfer::{
    Transfer, TransferEvent, TransferOutcome, TransferProgress, TransferRequest, TransferState,
};

pub fn file_node(handle: &str, parent: Option<&str>, name: &str, size: u64) -> RemoteNode {
    RemoteNode {
        handle: handle.to_string(),
        parent: parent.map(str::to_string),
        name: name.to_string(),
        kind: NodeKind::File,
        size,
        download_url: None,
    }
}

pub fn folder_node(handle: &str, parent: Option<&str>, name: &str) -> RemoteNode {
    RemoteNode {
        handle: handle.to_string(),
        parent: parent.map(str::to_string),
        name: name.to_string(),
        kind: NodeKind::Folder,
        size: 0,
        download_url: None,
    }
}

pub async fn open_store(dir: &Path) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open(&dir.join("megadl.db")).await.unwrap())
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub async fn drain_events(mut rx: mpsc::Receiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Unavailable,
    Transient,
}

/// Remote with canned links.
#[derive(Default)]
pub struct FakeRemote {
    files: HashMap<String, RemoteNode>,
    folders: HashMap<String, Vec<RemoteNode>>,
    failures: Mutex<HashMap<String, Failure>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, link: &str, node: RemoteNode) -> Self {
        self.files.insert(link.to_string(), node);
        self
    }

    pub fn with_folder(mut self, link: &str, nodes: Vec<RemoteNode>) -> Self {
        self.folders.insert(link.to_string(), nodes);
        self
    }

    pub fn with_unavailable(self, link: &str) -> Self {
        self.set_failure(link, Failure::Unavailable);
        self
    }

    pub fn with_transient_failure(self, link: &str) -> Self {
        self.set_failure(link, Failure::Transient);
        self
    }

    pub fn clear_failure(&self, link: &str) {
        self.failures.lock().unwrap().remove(link);
    }

    fn set_failure(&self, link: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .insert(link.to_string(), failure);
    }

    fn check(&self, link: &str) -> Result<(), ResolveError> {
        match self.failures.lock().unwrap().get(link) {
            None => Ok(()),
            Some(Failure::Unavailable) => Err(ResolveError::Unavailable(format!("{link} removed"))),
            Some(Failure::Transient) => Err(ResolveError::Transient("gateway busy".to_string())),
        }
    }
}

#[async_trait]
impl RemoteAccess for FakeRemote {
    async fn public_node(&self, link: &str) -> Result<RemoteNode, ResolveError> {
        self.check(link)?;
        self.files
            .get(link)
            .cloned()
            .ok_or_else(|| ResolveError::Unavailable(link.to_string()))
    }

    async fn login_to_folder(&self, link: &str) -> Result<FolderLogin, ResolveError> {
        self.check(link)?;
        if self.folders.contains_key(link) {
            Ok(FolderLogin {
                session: link.to_string(),
            })
        } else {
            Err(ResolveError::Unavailable(link.to_string()))
        }
    }

    async fn fetch_nodes(&self, login: &FolderLogin) -> Result<NodeTree, ResolveError> {
        let nodes = self
            .folders
            .get(&login.session)
            .cloned()
            .ok_or_else(|| ResolveError::AccessDenied(login.session.clone()))?;
        NodeTree::new(nodes)
    }
}

/// How a [`FakeTransfer`] treats a node.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Write the node's name as file content and succeed.
    Complete,
    Fail(String),
    /// Wait for cancellation.
    Hang,
}

/// Transfer that records which handles it was asked for.
#[derive(Clone, Default)]
pub struct FakeTransfer {
    behaviors: Arc<Mutex<HashMap<String, FakeBehavior>>>,
    started: Arc<Mutex<Vec<String>>>,
}

impl FakeTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handle: &str, behavior: FakeBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(handle.to_string(), behavior);
    }

    /// Handles in the order their transfers started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

fn fake_progress(node: &RemoteNode, transferred: u64, state: TransferState) -> TransferProgress {
    TransferProgress {
        transferred_bytes: transferred,
        total_bytes: node.size,
        num_retry: 0,
        max_retries: 0,
        mean_speed: transferred,
        started_at: Utc::now(),
        state,
    }
}

impl Transfer for FakeTransfer {
    fn start(
        &self,
        request: TransferRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TransferEvent> {
        let (tx, rx) = mpsc::channel(8);
        let node = request.node.clone();
        self.started.lock().unwrap().push(node.handle.clone());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&node.handle)
            .cloned()
            .unwrap_or(FakeBehavior::Complete);

        tokio::spawn(async move {
            let _ = tx
                .send(TransferEvent::Progress(fake_progress(
                    &node,
                    node.size / 2,
                    TransferState::Active,
                )))
                .await;

            let (state, outcome, transferred) = match behavior {
                FakeBehavior::Complete => {
                    if let Some(parent) = request.destination.parent() {
                        tokio::fs::create_dir_all(parent).await.unwrap();
                    }
                    tokio::fs::write(&request.destination, node.name.as_bytes())
                        .await
                        .unwrap();
                    (TransferState::Completed, TransferOutcome::Completed, node.size)
                }
                FakeBehavior::Fail(msg) => (TransferState::Failed, TransferOutcome::Failed(msg), 0),
                FakeBehavior::Hang => {
                    cancel.cancelled().await;
                    (TransferState::Cancelled, TransferOutcome::Cancelled, 0)
                }
            };

            let _ = tx
                .send(TransferEvent::Finished {
                    progress: fake_progress(&node, transferred, state),
                    outcome,
                })
                .await;
        });
        rx
    }
}
