//! An in-memory filesystem backend with full symlink support, useful on
//! its own and as the reference backend for exercising overlays and the
//! resolver hermetically.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::{
    path, resolve, DirEntry, FileType, FsError, Metadata, PathError, ReadDir, Result, VirtualFile,
};

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;
const LINK_MODE: u32 = 0o777;

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Vec<u8>,
        mode: u32,
    },
    Directory {
        children: BTreeMap<String, Node>,
        mode: u32,
    },
    Symlink {
        target: PathBuf,
        mode: u32,
    },
}

impl Default for Node {
    fn default() -> Self {
        Node::Directory {
            children: BTreeMap::new(),
            mode: DIR_MODE,
        }
    }
}

impl Node {
    fn metadata(&self) -> Metadata {
        match self {
            Node::File { data, mode } => Metadata {
                ft: FileType::new_file(),
                mode: *mode,
                len: data.len() as u64,
                ..Default::default()
            },
            Node::Directory { mode, .. } => Metadata {
                ft: FileType::new_dir(),
                mode: *mode,
                ..Default::default()
            },
            Node::Symlink { target, mode } => Metadata {
                ft: FileType::new_symlink(),
                mode: *mode,
                len: target.as_os_str().len() as u64,
                ..Default::default()
            },
        }
    }

    fn set_mode(&mut self, new_mode: u32) {
        match self {
            Node::File { mode, .. } | Node::Directory { mode, .. } | Node::Symlink { mode, .. } => {
                *mode = new_mode
            }
        }
    }
}

/// Walk the tree literally, without following any symlink.
fn lookup<'n>(root: &'n Node, vpath: &Path) -> Result<&'n Node, FsError> {
    let mut node = root;

    for component in vpath.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        let name = name.to_str().ok_or(FsError::InvalidInput)?;
        match node {
            Node::Directory { children, .. } => {
                node = children.get(name).ok_or(FsError::EntryNotFound)?;
            }
            _ => return Err(FsError::BaseNotDirectory),
        }
    }

    Ok(node)
}

fn lookup_mut<'n>(root: &'n mut Node, vpath: &Path) -> Result<&'n mut Node, FsError> {
    let mut node = root;

    for component in vpath.components() {
        let Component::Normal(name) = component else {
            continue;
        };
        let name = name.to_str().ok_or(FsError::InvalidInput)?;
        match node {
            Node::Directory { children, .. } => {
                node = children.get_mut(name).ok_or(FsError::EntryNotFound)?;
            }
            _ => return Err(FsError::BaseNotDirectory),
        }
    }

    Ok(node)
}

fn parent_and_name(vpath: &Path) -> Result<(&Path, &str), FsError> {
    let name = vpath
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or(FsError::InvalidInput)?;
    let parent = match vpath.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((parent, name))
}

/// An in-memory [`FileSystem`](crate::FileSystem).
///
/// Cloning is cheap and clones share the same tree. The mutators
/// (`create_dir`, `write`, `symlink`, ...) are plain methods rather than
/// part of the read-only backend contract.
#[derive(Debug, Clone, Default)]
pub struct FileSystem {
    inner: Arc<RwLock<Node>>,
}

impl FileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the directory at `path`; the parent must already exist.
    pub fn create_dir(&self, path: impl AsRef<Path>) -> Result<()> {
        self.insert("create_dir", path.as_ref(), Node::default())
    }

    /// Create the directory at `path` along with any missing parents.
    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let vpath = path.as_ref();
        path::check("create_dir", vpath)?;

        let mut guard = self.inner.write().unwrap();
        let mut node = &mut *guard;

        for component in vpath.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name
                .to_str()
                .ok_or_else(|| PathError::new("create_dir", vpath, FsError::InvalidInput))?;
            match node {
                Node::Directory { children, .. } => {
                    node = children.entry(name.to_owned()).or_default();
                }
                _ => {
                    return Err(PathError::new(
                        "create_dir",
                        vpath,
                        FsError::BaseNotDirectory,
                    ))
                }
            }
        }

        match node {
            Node::Directory { .. } => Ok(()),
            _ => Err(PathError::new(
                "create_dir",
                vpath,
                FsError::BaseNotDirectory,
            )),
        }
    }

    /// Create or replace the file at `path`; the parent must already
    /// exist.
    pub fn write(&self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> Result<()> {
        let vpath = path.as_ref();
        path::check("write", vpath)?;
        let (parent, name) = parent_and_name(vpath)
            .map_err(|e| PathError::new("write", vpath, e))?;

        let mut guard = self.inner.write().unwrap();
        let children = match lookup_mut(&mut guard, parent) {
            Ok(Node::Directory { children, .. }) => children,
            Ok(_) => return Err(PathError::new("write", vpath, FsError::BaseNotDirectory)),
            Err(e) => return Err(PathError::new("write", vpath, e)),
        };

        match children.get_mut(name) {
            Some(Node::File { data, .. }) => {
                *data = contents.into();
            }
            Some(_) => return Err(PathError::new("write", vpath, FsError::NotAFile)),
            None => {
                children.insert(
                    name.to_owned(),
                    Node::File {
                        data: contents.into(),
                        mode: FILE_MODE,
                    },
                );
            }
        }

        Ok(())
    }

    /// Create a symlink at `path` pointing at `target`.
    ///
    /// The target is stored verbatim, absolute or relative, existing or
    /// dangling, exactly as a backend would report it from `readlink`.
    pub fn symlink(&self, path: impl AsRef<Path>, target: impl Into<PathBuf>) -> Result<()> {
        self.insert(
            "symlink",
            path.as_ref(),
            Node::Symlink {
                target: target.into(),
                mode: LINK_MODE,
            },
        )
    }

    /// Change the permission bits of the entry at `path`.
    pub fn set_mode(&self, path: impl AsRef<Path>, mode: u32) -> Result<()> {
        let vpath = path.as_ref();
        path::check("set_mode", vpath)?;

        let mut guard = self.inner.write().unwrap();
        lookup_mut(&mut guard, vpath)
            .map(|node| node.set_mode(mode))
            .map_err(|e| PathError::new("set_mode", vpath, e))
    }

    fn insert(&self, op: &'static str, vpath: &Path, node: Node) -> Result<()> {
        path::check(op, vpath)?;
        let (parent, name) = parent_and_name(vpath).map_err(|e| PathError::new(op, vpath, e))?;

        let mut guard = self.inner.write().unwrap();
        let children = match lookup_mut(&mut guard, parent) {
            Ok(Node::Directory { children, .. }) => children,
            Ok(_) => return Err(PathError::new(op, vpath, FsError::BaseNotDirectory)),
            Err(e) => return Err(PathError::new(op, vpath, e)),
        };

        if children.contains_key(name) {
            return Err(PathError::new(op, vpath, FsError::AlreadyExists));
        }
        children.insert(name.to_owned(), node);

        Ok(())
    }
}

impl crate::FileSystem for FileSystem {
    fn open(&self, vpath: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>> {
        path::check("open", vpath)?;
        let resolved = resolve::canonicalize(self, vpath)?;

        let guard = self.inner.read().unwrap();
        match lookup(&guard, &resolved) {
            Ok(Node::File { data, mode }) => {
                if mode & 0o444 == 0 {
                    return Err(PathError::new("open", vpath, FsError::PermissionDenied));
                }
                Ok(Box::new(File {
                    data: io::Cursor::new(data.clone()),
                }))
            }
            Ok(_) => Err(PathError::new("open", vpath, FsError::NotAFile)),
            Err(e) => Err(PathError::new("open", vpath, e)),
        }
    }

    fn read_file(&self, vpath: &Path) -> Result<Vec<u8>> {
        path::check("read_file", vpath)?;
        let resolved = resolve::canonicalize(self, vpath)?;

        let guard = self.inner.read().unwrap();
        match lookup(&guard, &resolved) {
            Ok(Node::File { data, mode }) => {
                if mode & 0o444 == 0 {
                    return Err(PathError::new("read_file", vpath, FsError::PermissionDenied));
                }
                Ok(data.clone())
            }
            Ok(_) => Err(PathError::new("read_file", vpath, FsError::NotAFile)),
            Err(e) => Err(PathError::new("read_file", vpath, e)),
        }
    }

    fn metadata(&self, vpath: &Path) -> Result<Metadata> {
        path::check("stat", vpath)?;
        let resolved = resolve::canonicalize(self, vpath)?;

        let guard = self.inner.read().unwrap();
        lookup(&guard, &resolved)
            .map(Node::metadata)
            .map_err(|e| PathError::new("stat", vpath, e))
    }

    fn symlink_metadata(&self, vpath: &Path) -> Result<Metadata> {
        path::check("lstat", vpath)?;

        let guard = self.inner.read().unwrap();
        lookup(&guard, vpath)
            .map(Node::metadata)
            .map_err(|e| PathError::new("lstat", vpath, e))
    }

    fn read_dir(&self, vpath: &Path) -> Result<ReadDir> {
        path::check("read_dir", vpath)?;
        let resolved = resolve::canonicalize(self, vpath)?;

        let guard = self.inner.read().unwrap();
        match lookup(&guard, &resolved) {
            Ok(Node::Directory { children, mode }) => {
                if mode & 0o444 == 0 {
                    return Err(PathError::new("read_dir", vpath, FsError::PermissionDenied));
                }
                let entries = children
                    .iter()
                    .map(|(name, node)| DirEntry {
                        path: path::join_entry(vpath, name.as_ref()),
                        metadata: Ok(node.metadata()),
                    })
                    .collect();
                Ok(ReadDir::new(entries))
            }
            Ok(_) => Err(PathError::new("read_dir", vpath, FsError::BaseNotDirectory)),
            Err(e) => Err(PathError::new("read_dir", vpath, e)),
        }
    }

    fn supports_readlink(&self) -> bool {
        true
    }

    fn readlink(&self, vpath: &Path) -> Result<PathBuf> {
        path::check("readlink", vpath)?;

        let guard = self.inner.read().unwrap();
        match lookup(&guard, vpath) {
            Ok(Node::Symlink { target, .. }) => Ok(target.clone()),
            Ok(_) => Err(PathError::new("readlink", vpath, FsError::InvalidInput)),
            Err(e) => Err(PathError::new("readlink", vpath, e)),
        }
    }
}

/// A read handle over a snapshot of the file contents at open time.
#[derive(Debug)]
pub struct File {
    data: io::Cursor<Vec<u8>>,
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

impl VirtualFile for File {
    fn size(&self) -> u64 {
        self.data.get_ref().len() as u64
    }
}
