use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::{FsError, PathError, Result};

/// Backend-reported metadata for a single entry.
///
/// Combinators only ever look at the file type, the permission bits and
/// (for diagnostics) the length; the rest is carried through verbatim
/// for callers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Metadata {
    /// Type of the entry.
    pub ft: FileType,
    /// Permission bits, `0oXXX` style.
    pub mode: u32,
    /// Access time in nanoseconds since the UNIX epoch.
    pub accessed: u64,
    /// Creation time in nanoseconds since the UNIX epoch.
    pub created: u64,
    /// Modification time in nanoseconds since the UNIX epoch.
    pub modified: u64,
    /// Size of the entry in bytes.
    pub len: u64,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.ft.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.ft.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.ft.is_symlink()
    }

    pub fn file_type(&self) -> FileType {
        self.ft
    }

    pub fn accessed(&self) -> u64 {
        self.accessed
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn modified(&self) -> u64 {
        self.modified
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The type of an entry: exactly one of the flags is set by a
/// well-behaved backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FileType {
    pub dir: bool,
    pub file: bool,
    pub symlink: bool,
    pub char_device: bool,
    pub block_device: bool,
    pub socket: bool,
    pub fifo: bool,
}

impl FileType {
    pub fn new_dir() -> Self {
        FileType {
            dir: true,
            ..Default::default()
        }
    }

    pub fn new_file() -> Self {
        FileType {
            file: true,
            ..Default::default()
        }
    }

    pub fn new_symlink() -> Self {
        FileType {
            symlink: true,
            ..Default::default()
        }
    }

    pub fn is_dir(&self) -> bool {
        self.dir
    }

    pub fn is_file(&self) -> bool {
        self.file
    }

    pub fn is_symlink(&self) -> bool {
        self.symlink
    }

    pub fn is_char_device(&self) -> bool {
        self.char_device
    }

    pub fn is_block_device(&self) -> bool {
        self.block_device
    }

    pub fn is_socket(&self) -> bool {
        self.socket
    }

    pub fn is_fifo(&self) -> bool {
        self.fifo
    }
}

/// One entry of a directory listing.
///
/// The `path` is virtual and relative to the backend the listing was
/// requested from, never a backend-internal path.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: PathBuf,
    pub metadata: Result<Metadata, FsError>,
}

impl DirEntry {
    pub fn path(&self) -> PathBuf {
        self.path.clone()
    }

    pub fn metadata(&self) -> Result<Metadata, FsError> {
        self.metadata
    }

    pub fn file_type(&self) -> Result<FileType, FsError> {
        let metadata = self.metadata?;
        Ok(metadata.file_type())
    }

    pub fn file_name(&self) -> OsString {
        self.path
            .file_name()
            .unwrap_or(self.path.as_os_str())
            .to_owned()
    }
}

/// An in-memory directory listing, iterated in backend order.
#[derive(Debug, Clone, Default)]
pub struct ReadDir {
    data: Vec<DirEntry>,
    index: usize,
}

impl ReadDir {
    pub fn new(data: Vec<DirEntry>) -> Self {
        Self { data, index: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Iterator for ReadDir {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        if let Some(entry) = self.data.get(self.index).cloned() {
            self.index += 1;
            return Some(entry);
        }
        None
    }
}

/// Convenience helpers shared by every [`FileSystem`].
///
/// [`FileSystem`]: crate::FileSystem
pub trait FileSystemExt {
    /// Whether anything lives at `path`.
    fn exists(&self, path: impl AsRef<Path>) -> bool;

    /// Whether `path` is a directory.
    fn is_dir(&self, path: impl AsRef<Path>) -> bool;

    /// Whether `path` is a regular file.
    fn is_file(&self, path: impl AsRef<Path>) -> bool;

    /// The file at `path` as UTF-8 text.
    fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String>;
}

impl<F: crate::FileSystem + ?Sized> FileSystemExt for F {
    fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.metadata(path.as_ref()).is_ok()
    }

    fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        self.metadata(path.as_ref())
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn is_file(&self, path: impl AsRef<Path>) -> bool {
        self.metadata(path.as_ref())
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes)
            .map_err(|_| PathError::new("read_to_string", path, FsError::InvalidData))
    }
}
