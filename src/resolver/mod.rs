//! Turns a canonical link into the ordered list of files it contains.
//!
//! All remote calls happen inside [`resolve`]; the returned [`Resolution`]
//! walks an already-fetched tree, so a failed resolution never yields
//! anything.

pub mod error;
pub mod gateway;
pub mod remote;

use std::path::PathBuf;

pub use error::ResolveError;
pub use gateway::GatewayRemote;
pub use remote::{NodeKind, NodeTree, RemoteAccess, RemoteNode};

/// What a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    File,
    Folder,
}

/// Classify a canonical link.
///
/// Legacy links carry the marker in the fragment (`#!` for files, `#F!`
/// for folders); newer ones use a `/file/` or `/folder/` path segment.
pub fn classify(link: &str) -> Result<LinkKind, ResolveError> {
    let invalid = || ResolveError::InvalidLink(link.to_string());

    let path = link
        .strip_prefix("https://")
        .and_then(|rest| rest.split_once('/'))
        .map(|(_, path)| path)
        .ok_or_else(invalid)?;

    let (path, fragment) = path.split_once('#').ok_or_else(invalid)?;
    if fragment.is_empty() {
        return Err(invalid());
    }

    if fragment.starts_with('F') || path.starts_with("folder/") {
        Ok(LinkKind::Folder)
    } else if fragment.starts_with('!') || path.starts_with("file/") {
        Ok(LinkKind::File)
    } else {
        Err(invalid())
    }
}

/// A folder on the way from the link root to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    pub handle: String,
    pub name: String,
}

/// A file discovered under a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Enclosing folders, outermost first, starting with the root folder
    /// for folder links. Empty for single-file links.
    pub folders: Vec<FolderRef>,
    pub node: RemoteNode,
}

impl ResolvedFile {
    /// Remote path as named on the remote side, without any cleaning.
    pub fn relative_path(&self) -> PathBuf {
        let mut path: PathBuf = self.folders.iter().map(|f| f.name.as_str()).collect();
        path.push(&self.node.name);
        path
    }
}

/// Resolve a link, performing every remote call up front.
pub async fn resolve(remote: &dyn RemoteAccess, link: &str) -> Result<Resolution, ResolveError> {
    match classify(link)? {
        LinkKind::File => {
            let node = remote.public_node(link).await?;
            if node.kind != NodeKind::File {
                return Err(ResolveError::InvalidLink(format!(
                    "{link} points at a folder"
                )));
            }
            tracing::debug!(handle = %node.handle, name = %node.name, "Resolved file link");
            Ok(Resolution::single(node))
        }
        LinkKind::Folder => {
            let login = remote.login_to_folder(link).await?;
            let tree = remote.fetch_nodes(&login).await?;
            tracing::debug!(
                root = %tree.root().name,
                nodes = tree.node_count(),
                "Fetched folder listing"
            );
            Ok(Resolution::tree(tree))
        }
    }
}

enum Pending {
    File { index: usize, folders: Vec<FolderRef> },
    Folder { index: usize, parent: Vec<FolderRef> },
}

/// Lazy, finite walk over resolved files.
///
/// Folders are visited depth-first. Within a folder, every file is yielded
/// before any subfolder is entered, and listing order is kept.
pub struct Resolution {
    source: Source,
}

enum Source {
    Single(Option<RemoteNode>),
    Tree {
        tree: NodeTree,
        stack: Vec<Pending>,
    },
}

impl Resolution {
    fn single(node: RemoteNode) -> Self {
        Self {
            source: Source::Single(Some(node)),
        }
    }

    fn tree(tree: NodeTree) -> Self {
        let stack = vec![Pending::Folder {
            index: tree.root_index(),
            parent: Vec::new(),
        }];
        Self {
            source: Source::Tree { tree, stack },
        }
    }
}

impl Iterator for Resolution {
    type Item = ResolvedFile;

    fn next(&mut self) -> Option<ResolvedFile> {
        let (tree, stack) = match &mut self.source {
            Source::Single(node) => {
                return node.take().map(|node| ResolvedFile {
                    folders: Vec::new(),
                    node,
                })
            }
            Source::Tree { tree, stack } => (tree, stack),
        };

        while let Some(pending) = stack.pop() {
            match pending {
                Pending::File { index, folders } => {
                    return Some(ResolvedFile {
                        folders,
                        node: tree.node(index).clone(),
                    });
                }
                Pending::Folder { index, mut parent } => {
                    let folder = tree.node(index);
                    parent.push(FolderRef {
                        handle: folder.handle.clone(),
                        name: folder.name.clone(),
                    });
                    let folders = parent;
                    let (files, subfolders) = tree.children(index);
                    // Pushed in reverse so the stack pops them in listing order,
                    // files first.
                    for &sub in subfolders.iter().rev() {
                        stack.push(Pending::Folder {
                            index: sub,
                            parent: folders.clone(),
                        });
                    }
                    for &file in files.iter().rev() {
                        stack.push(Pending::File {
                            index: file,
                            folders: folders.clone(),
                        });
                    }
                }
            }
        }
        None
    }
}
