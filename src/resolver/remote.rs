//! Remote node model and the capability used to list it.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::error::ResolveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// A file or folder in remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteNode {
    /// Stable identifier, unique within one link.
    pub handle: String,
    #[serde(default)]
    pub parent: Option<String>,
    pub name: String,
    pub kind: NodeKind,
    /// Declared size in bytes; zero for folders.
    #[serde(default)]
    pub size: u64,
    /// Where the content can be fetched from, for file nodes.
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Opaque session obtained by logging in to a folder link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderLogin {
    pub session: String,
}

/// Remote storage operations needed to resolve a link.
///
/// Each call completes with a result; callers never observe partial
/// responses.
#[async_trait]
pub trait RemoteAccess: Send + Sync {
    /// Look up the node behind a single-file link.
    async fn public_node(&self, link: &str) -> Result<RemoteNode, ResolveError>;

    /// Open a folder link.
    async fn login_to_folder(&self, link: &str) -> Result<FolderLogin, ResolveError>;

    /// Fetch every node under a logged-in folder.
    async fn fetch_nodes(&self, login: &FolderLogin) -> Result<NodeTree, ResolveError>;
}

/// The node listing of a folder, indexed by parent.
#[derive(Debug, Clone)]
pub struct NodeTree {
    nodes: Vec<RemoteNode>,
    root: usize,
    /// Child indices per parent handle, in listing order.
    children: HashMap<String, Vec<usize>>,
}

impl NodeTree {
    /// Build a tree from a flat listing.
    ///
    /// The root is the first folder whose parent is absent from the
    /// listing.
    pub fn new(nodes: Vec<RemoteNode>) -> Result<Self, ResolveError> {
        let handles: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.handle.as_str(), i))
            .collect();
        if handles.len() != nodes.len() {
            return Err(ResolveError::MalformedTree(
                "duplicate node handles".to_string(),
            ));
        }

        let root = nodes
            .iter()
            .position(|n| {
                n.kind == NodeKind::Folder
                    && n.parent
                        .as_deref()
                        .map_or(true, |p| !handles.contains_key(p))
            })
            .ok_or_else(|| ResolveError::MalformedTree("no root folder".to_string()))?;

        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if i == root {
                continue;
            }
            if let Some(parent) = &node.parent {
                children.entry(parent.clone()).or_default().push(i);
            }
        }

        Ok(Self {
            nodes,
            root,
            children,
        })
    }

    pub fn root(&self) -> &RemoteNode {
        &self.nodes[self.root]
    }

    pub(crate) fn root_index(&self) -> usize {
        self.root
    }

    pub(crate) fn node(&self, index: usize) -> &RemoteNode {
        &self.nodes[index]
    }

    /// Children of the node at `index`, split into files and folders, each
    /// in listing order.
    pub(crate) fn children(&self, index: usize) -> (Vec<usize>, Vec<usize>) {
        let handle = &self.nodes[index].handle;
        self.children
            .get(handle)
            .map(|kids| {
                kids.iter()
                    .copied()
                    .partition(|&i| self.nodes[i].kind == NodeKind::File)
            })
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
