//! Combine independent filesystem backends into one logical tree and
//! resolve paths through it the way a kernel filesystem would.
//!
//! The crate is built around three pieces:
//!
//! - the [`FileSystem`] trait, the minimal capability set a backend must
//!   expose (network-backed, in-memory, archive-backed or a real on-disk
//!   tree);
//! - the [`OverlayFileSystem`] combinator, an ordered chain of backends
//!   where a not-found result falls through to the next source;
//! - the resolver ([`canonicalize`] / [`canonicalize_nofollow`]), which
//!   walks a virtual path segment by segment, splicing symlink targets
//!   into the remaining path with a bounded redirect budget.
//!
//! Paths are *virtual*: slash-separated, relative, with the root spelled
//! `.`. See [`is_valid`] for the exact shape. Operations given anything
//! else fail with [`FsError::InvalidInput`] before any backend is
//! touched.

use std::fmt;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

mod filesystems;
pub mod host_fs;
pub mod mem_fs;
pub mod mount_fs;
mod overlay_fs;
mod path;
mod resolve;
mod types;

pub use crate::filesystems::FileSystems;
pub use crate::mount_fs::MountFileSystem;
pub use crate::overlay_fs::OverlayFileSystem;
pub use crate::path::{is_valid, normalize};
pub use crate::resolve::{canonicalize, canonicalize_nofollow};
pub use crate::types::{DirEntry, FileSystemExt, FileType, Metadata, ReadDir};

pub type Result<T, E = PathError> = std::result::Result<T, E>;

/// The minimal operation set a filesystem backend must expose.
///
/// Backends are supplied by the caller and outlive any combinator built
/// on top of them; combinators never close or mutate a source. All
/// operations are synchronous and addressed by virtual paths.
///
/// `symlink_metadata` and `readlink` are optional capabilities. A source
/// without a native lstat inherits the synthesized default below; there
/// is no way to fake `readlink` without backend support, so sources that
/// can read links must override both it and [`supports_readlink`], which
/// is how combinators discover the capability.
///
/// [`supports_readlink`]: FileSystem::supports_readlink
pub trait FileSystem: fmt::Debug {
    /// Opens the entry at `path` for reading.
    fn open(&self, path: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>>;

    /// Metadata for `path`, following a terminal symlink.
    fn metadata(&self, path: &Path) -> Result<Metadata>;

    /// Directory entries at `path`, in whatever order the backend keeps
    /// them.
    fn read_dir(&self, path: &Path) -> Result<ReadDir>;

    /// Full contents of the file at `path`.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let mut file = self.open(path)?;
        let mut contents = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut contents)
            .map_err(|e| PathError::new("read_file", path, e.into()))?;
        Ok(contents)
    }

    /// Metadata for `path` itself, not following a terminal symlink.
    ///
    /// The default implementation synthesizes an lstat by listing the
    /// parent directory: a symlink entry is answered from the directory
    /// entry alone (length and timestamps unknown, reported as zero),
    /// anything else delegates to [`metadata`]. The root can never be a
    /// symlink, so it delegates directly.
    ///
    /// [`metadata`]: FileSystem::metadata
    fn symlink_metadata(&self, path: &Path) -> Result<Metadata> {
        let base = match path.file_name() {
            Some(base) => base,
            None => return self.metadata(path),
        };
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let entries = self
            .read_dir(parent)
            .map_err(|e| PathError::new("lstat", path, e.error))?;

        for entry in entries {
            if entry.file_name() != base {
                continue;
            }
            let metadata = entry
                .metadata
                .map_err(|e| PathError::new("lstat", path, e))?;
            if metadata.is_symlink() {
                // The target was never followed: length and timestamps
                // cannot be known from the directory entry alone.
                return Ok(Metadata {
                    len: 0,
                    accessed: 0,
                    created: 0,
                    modified: 0,
                    ..metadata
                });
            }
            return self
                .metadata(path)
                .map_err(|e| PathError::new("lstat", path, e.error));
        }

        Err(PathError::new("lstat", path, FsError::EntryNotFound))
    }

    /// Whether this source can read symlink targets natively.
    ///
    /// Combinators consult this before calling [`readlink`] so that
    /// sources without the capability are skipped rather than queried.
    ///
    /// [`readlink`]: FileSystem::readlink
    fn supports_readlink(&self) -> bool {
        false
    }

    /// Target of the symlink at `path`, absolute or relative, verbatim.
    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Err(PathError::new("readlink", path, FsError::InvalidInput))
    }
}

/// A readable handle returned by [`FileSystem::open`].
pub trait VirtualFile: fmt::Debug + Read + Seek {
    /// Size of the file in bytes.
    fn size(&self) -> u64;
}

macro_rules! delegate_filesystem {
    ($( $wrapper:ident ),+) => {$(
        impl<T: FileSystem + ?Sized> FileSystem for $wrapper<T> {
            fn open(&self, path: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>> {
                (**self).open(path)
            }

            fn metadata(&self, path: &Path) -> Result<Metadata> {
                (**self).metadata(path)
            }

            fn read_dir(&self, path: &Path) -> Result<ReadDir> {
                (**self).read_dir(path)
            }

            fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
                (**self).read_file(path)
            }

            fn symlink_metadata(&self, path: &Path) -> Result<Metadata> {
                (**self).symlink_metadata(path)
            }

            fn supports_readlink(&self) -> bool {
                (**self).supports_readlink()
            }

            fn readlink(&self, path: &Path) -> Result<PathBuf> {
                (**self).readlink(path)
            }
        }
    )+};
}

delegate_filesystem!(Box, Arc);

impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn open(&self, path: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>> {
        (**self).open(path)
    }

    fn metadata(&self, path: &Path) -> Result<Metadata> {
        (**self).metadata(path)
    }

    fn read_dir(&self, path: &Path) -> Result<ReadDir> {
        (**self).read_dir(path)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        (**self).read_file(path)
    }

    fn symlink_metadata(&self, path: &Path) -> Result<Metadata> {
        (**self).symlink_metadata(path)
    }

    fn supports_readlink(&self) -> bool {
        (**self).supports_readlink()
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        (**self).readlink(path)
    }
}

/// What went wrong, without the path it went wrong at.
///
/// [`EntryNotFound`] is the canonical fallthrough signal across overlay
/// layers; every other kind is authoritative.
///
/// [`EntryNotFound`]: FsError::EntryNotFound
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    /// A directory was required and something else was found.
    #[error("not a directory")]
    BaseNotDirectory,
    /// A file was required and something else was found.
    #[error("not a file")]
    NotAFile,
    /// The entry already exists.
    #[error("entry already exists")]
    AlreadyExists,
    /// The directory still has entries.
    #[error("directory not empty")]
    DirectoryNotEmpty,
    /// No entry at the requested path.
    #[error("entry not found")]
    EntryNotFound,
    /// The caller is not allowed to perform this operation.
    #[error("permission denied")]
    PermissionDenied,
    /// Malformed path, exhausted redirect budget, or an unsupported
    /// operation for the backend.
    #[error("invalid input")]
    InvalidInput,
    /// The backend returned something the contract does not allow.
    #[error("invalid data")]
    InvalidData,
    /// An overlay with no sources was queried.
    #[error("no backends configured")]
    NoBackends,
    /// The on-disk adapter was used with an empty root directory.
    #[error("invalid root directory")]
    EmptyRoot,
    /// Something failed during IO. It may work if tried again.
    #[error("io error")]
    IOError,
    /// Some other unhandled error. If you see this, it's probably a bug.
    #[error("unknown error found")]
    UnknownError,
}

impl From<io::Error> for FsError {
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::AlreadyExists => FsError::AlreadyExists,
            io::ErrorKind::DirectoryNotEmpty => FsError::DirectoryNotEmpty,
            io::ErrorKind::InvalidData => FsError::InvalidData,
            io::ErrorKind::InvalidInput => FsError::InvalidInput,
            io::ErrorKind::IsADirectory => FsError::NotAFile,
            io::ErrorKind::NotADirectory => FsError::BaseNotDirectory,
            io::ErrorKind::NotFound => FsError::EntryNotFound,
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied,
            io::ErrorKind::UnexpectedEof => FsError::IOError,
            io::ErrorKind::Other => FsError::IOError,
            _ => FsError::UnknownError,
        }
    }
}

/// An [`FsError`] annotated with the operation and the virtual path it
/// failed for.
///
/// The path is always the caller-visible virtual one; backends rewrite
/// any native path before reporting.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{} `{}`: {}", .op, .path.display(), .error)]
pub struct PathError {
    pub op: &'static str,
    pub path: PathBuf,
    pub error: FsError,
}

impl PathError {
    pub fn new(op: &'static str, path: impl Into<PathBuf>, error: FsError) -> Self {
        PathError {
            op,
            path: path.into(),
            error,
        }
    }

    /// Whether this is the not-found class of error that overlay layers
    /// fall through on.
    pub fn is_not_found(&self) -> bool {
        self.error == FsError::EntryNotFound
    }
}
