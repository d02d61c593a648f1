use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::resolver::{FolderRef, ResolvedFile};

/// Strip characters that are unsafe in file names.
///
/// Returns `None` when nothing usable remains, or for `.` and `..`.
pub fn clean_component(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| {
            !c.is_control() && !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Directory a link downloads into: the destination root, plus the
/// category as a sub-path when one is set.
pub fn link_root(destination: &Path, category: Option<&str>) -> PathBuf {
    let mut root = destination.to_path_buf();
    if let Some(category) = category {
        for part in category.split(['/', '\\']) {
            if let Some(part) = clean_component(part) {
                root.push(part);
            }
        }
    }
    root
}

/// Cleaned remote name, or the node handle when nothing of the name
/// survives cleaning.
fn local_name(name: &str, handle: &str) -> String {
    clean_component(name)
        .or_else(|| clean_component(handle))
        .unwrap_or_else(|| "unnamed".to_string())
}

/// `photo.jpg` + `h1` -> `photo_h1.jpg`. A leading dot is not an extension.
fn tag_name(name: &str, tag: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, ext) = name.split_at(dot);
            format!("{stem}_{tag}{ext}")
        }
        _ => format!("{name}_{tag}"),
    }
}

/// Assigns local paths to the files of one link.
///
/// Every file gets its own path, and no file path is ever a directory of
/// another file. Names that clean to nothing fall back to the node handle;
/// a file name that clashes with an earlier file or directory gets the
/// handle appended, as does a folder name that clashes with a file.
/// Handles already stored for the link keep their recorded path.
pub struct PathAllocator {
    root: PathBuf,
    files: HashMap<String, PathBuf>,
    folders: HashMap<String, PathBuf>,
    file_paths: HashSet<PathBuf>,
    dirs: HashSet<PathBuf>,
}

impl PathAllocator {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            files: HashMap::new(),
            folders: HashMap::new(),
            file_paths: HashSet::new(),
            dirs: HashSet::new(),
        }
    }

    /// Pin a file handle to a path recorded earlier.
    pub fn reserve(&mut self, handle: &str, path: PathBuf) {
        for dir in path.ancestors().skip(1) {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            self.dirs.insert(dir.to_path_buf());
        }
        self.file_paths.insert(path.clone());
        self.files.insert(handle.to_string(), path);
    }

    pub fn allocate(&mut self, file: &ResolvedFile) -> PathBuf {
        if let Some(path) = self.files.get(&file.node.handle) {
            return path.clone();
        }
        let mut dir = self.root.clone();
        for folder in &file.folders {
            dir = self.folder_dir(&dir, folder);
        }
        let path = free_path(&dir, &file.node.name, &file.node.handle, |p| {
            self.file_paths.contains(p) || self.dirs.contains(p)
        });
        self.file_paths.insert(path.clone());
        self.files.insert(file.node.handle.clone(), path.clone());
        path
    }

    fn folder_dir(&mut self, parent: &Path, folder: &FolderRef) -> PathBuf {
        if let Some(dir) = self.folders.get(&folder.handle) {
            return dir.clone();
        }
        let dir = free_path(parent, &folder.name, &folder.handle, |p| {
            self.file_paths.contains(p)
        });
        self.dirs.insert(dir.clone());
        self.folders.insert(folder.handle.clone(), dir.clone());
        dir
    }
}

/// First path for `name` in `dir` that `taken` rejects, tagged with
/// `handle` on a clash.
fn free_path(dir: &Path, name: &str, handle: &str, taken: impl Fn(&Path) -> bool) -> PathBuf {
    let name = local_name(name, handle);
    let path = dir.join(&name);
    if !taken(&path) {
        return path;
    }
    let tag = clean_component(handle).unwrap_or_else(|| "dup".to_string());
    let mut path = dir.join(tag_name(&name, &tag));
    let mut n = 2;
    while taken(&path) {
        path = dir.join(tag_name(&name, &format!("{tag}-{n}")));
        n += 1;
    }
    path
}
