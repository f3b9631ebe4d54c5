//! A backend serving a real directory on the host.
//!
//! Every virtual path is joined under the configured root and the
//! cleaned result is re-checked against the virtual-path predicate, so
//! a caller-supplied path can never escape the root. Errors are
//! rewritten to carry the virtual path: the native root never leaks.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::{path, DirEntry, FsError, Metadata, PathError, ReadDir, Result, VirtualFile};

/// A [`FileSystem`](crate::FileSystem) rooted at a native directory.
///
/// Construction is a zero-cost wrap; an empty root is rejected with
/// [`FsError::EmptyRoot`] at first use.
#[derive(Debug, Clone, Default)]
pub struct FileSystem {
    root: PathBuf,
}

impl FileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSystem { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `vpath` under the root and verify the result stays inside
    /// it: the cleaned form, with one leading separator stripped, must
    /// itself be a well-formed virtual path.
    fn host_path(&self, op: &'static str, vpath: &Path) -> Result<PathBuf> {
        path::check(op, vpath)?;
        if self.root.as_os_str().is_empty() {
            return Err(PathError::new(op, vpath, FsError::EmptyRoot));
        }

        let combined = clean_join(&self.root, vpath);
        let to_check = combined.strip_prefix("/").unwrap_or(combined.as_path());
        if !path::is_valid(to_check) {
            return Err(PathError::new(op, vpath, FsError::InvalidInput));
        }

        Ok(combined)
    }
}

/// Lexically join and clean, keeping the root component of `base`.
fn clean_join(base: &Path, vpath: &Path) -> PathBuf {
    let mut ret = PathBuf::new();

    for component in base.components().chain(vpath.components()) {
        match component {
            Component::Prefix(prefix) => ret.push(prefix.as_os_str()),
            Component::RootDir => ret.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                ret.pop();
            }
            Component::Normal(c) => ret.push(c),
        }
    }

    ret
}

impl crate::FileSystem for FileSystem {
    fn open(&self, vpath: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>> {
        let host = self.host_path("open", vpath)?;
        let file = fs::OpenOptions::new()
            .read(true)
            .open(&host)
            .map_err(|e| PathError::new("open", vpath, e.into()))?;
        Ok(Box::new(File {
            inner: file,
            path: vpath.to_owned(),
        }))
    }

    fn read_file(&self, vpath: &Path) -> Result<Vec<u8>> {
        let host = self.host_path("read_file", vpath)?;
        fs::read(&host).map_err(|e| PathError::new("read_file", vpath, e.into()))
    }

    fn metadata(&self, vpath: &Path) -> Result<Metadata> {
        let host = self.host_path("stat", vpath)?;
        fs::metadata(&host)
            .map(metadata_from)
            .map_err(|e| PathError::new("stat", vpath, e.into()))
    }

    fn symlink_metadata(&self, vpath: &Path) -> Result<Metadata> {
        let host = self.host_path("lstat", vpath)?;
        fs::symlink_metadata(&host)
            .map(metadata_from)
            .map_err(|e| PathError::new("lstat", vpath, e.into()))
    }

    fn read_dir(&self, vpath: &Path) -> Result<ReadDir> {
        let host = self.host_path("read_dir", vpath)?;
        let read_dir = fs::read_dir(&host).map_err(|e| PathError::new("read_dir", vpath, e.into()))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| PathError::new("read_dir", vpath, e.into()))?;
            entries.push(DirEntry {
                path: path::join_entry(vpath, &entry.file_name()),
                // DirEntry::metadata does not traverse symlinks, which
                // is exactly what the synthesized lstat needs.
                metadata: entry
                    .metadata()
                    .map(metadata_from)
                    .map_err(|e| e.into()),
            });
        }

        Ok(ReadDir::new(entries))
    }

    fn supports_readlink(&self) -> bool {
        true
    }

    fn readlink(&self, vpath: &Path) -> Result<PathBuf> {
        let host = self.host_path("readlink", vpath)?;
        fs::read_link(&host).map_err(|e| PathError::new("readlink", vpath, e.into()))
    }
}

fn metadata_from(native: fs::Metadata) -> Metadata {
    let filetype = native.file_type();
    let (char_device, block_device, socket, fifo) = {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            (
                filetype.is_char_device(),
                filetype.is_block_device(),
                filetype.is_socket(),
                filetype.is_fifo(),
            )
        }
        #[cfg(not(unix))]
        {
            (false, false, false, false)
        }
    };

    let mode = {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            native.permissions().mode() & 0o777
        }
        #[cfg(not(unix))]
        {
            if native.is_dir() {
                0o755
            } else {
                0o644
            }
        }
    };

    Metadata {
        ft: crate::FileType {
            dir: filetype.is_dir(),
            file: filetype.is_file(),
            symlink: filetype.is_symlink(),
            char_device,
            block_device,
            socket,
            fifo,
        },
        mode,
        accessed: native
            .accessed()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |time| time.as_nanos() as u64),
        created: native
            .created()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |time| time.as_nanos() as u64),
        modified: native
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |time| time.as_nanos() as u64),
        len: native.len(),
    }
}

/// A thin wrapper around `std::fs::File`, remembering the virtual path
/// it was opened at.
pub struct File {
    inner: fs::File,
    path: PathBuf,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File").field("path", &self.path).finish()
    }
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.inner.read_to_end(buf)
    }
}

impl Seek for File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl VirtualFile for File {
    fn size(&self) -> u64 {
        self.inner.metadata().map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::{FileSystem as _, FileSystemExt};

    const CONTENTS: &str = "my data";

    fn fixture() -> (TempDir, FileSystem) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("testDir")).unwrap();
        std::fs::write(tmp.path().join("testDir/testFile"), CONTENTS).unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("testFile", tmp.path().join("testDir/testSymlink")).unwrap();

        let fs = FileSystem::new(tmp.path());
        (tmp, fs)
    }

    #[test]
    fn opens_and_reads_files() {
        let (_tmp, fs) = fixture();

        let mut handle = fs.open(Path::new("testDir/testFile")).unwrap();
        let mut contents = String::new();
        handle.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, CONTENTS);
        assert_eq!(handle.size(), CONTENTS.len() as u64);

        assert_eq!(fs.read_to_string("testDir/testFile").unwrap(), CONTENTS);
    }

    #[cfg(unix)]
    #[test]
    fn reads_through_symlinks() {
        let (_tmp, fs) = fixture();

        assert_eq!(fs.read_to_string("testDir/testSymlink").unwrap(), CONTENTS);
    }

    #[test]
    fn read_dir_reports_virtual_paths() {
        let (tmp, fs) = fixture();

        for entry in fs.read_dir(Path::new("testDir")).unwrap() {
            assert!(entry.path.starts_with("testDir"));
            assert!(!entry.path.starts_with(tmp.path()));
        }
    }

    #[cfg(unix)]
    #[test]
    fn stat_follows_symlinks_and_lstat_does_not() {
        let (_tmp, fs) = fixture();

        let stat = fs.metadata(Path::new("testDir/testSymlink")).unwrap();
        assert!(stat.is_file());
        assert_eq!(stat.len(), CONTENTS.len() as u64);

        let lstat = fs.symlink_metadata(Path::new("testDir/testSymlink")).unwrap();
        assert!(lstat.is_symlink());
    }

    #[cfg(unix)]
    #[test]
    fn readlink_returns_the_raw_target() {
        let (_tmp, fs) = fixture();

        assert_eq!(
            fs.readlink(Path::new("testDir/testSymlink")).unwrap(),
            PathBuf::from("testFile")
        );

        let err = fs.readlink(Path::new("testDir/testFile")).unwrap_err();
        assert_eq!(err.error, FsError::InvalidInput);
    }

    #[test]
    fn errors_carry_the_virtual_path_only() {
        let (tmp, fs) = fixture();

        let err = fs.metadata(Path::new("missing")).unwrap_err();
        assert_eq!(err.error, FsError::EntryNotFound);
        assert_eq!(err.path, PathBuf::from("missing"));
        assert!(!err.to_string().contains(tmp.path().to_str().unwrap()));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let (_tmp, fs) = fixture();

        for bad in ["../etc/passwd", "/etc/passwd", "a/../.."] {
            let err = fs.open(Path::new(bad)).map(|_| ()).unwrap_err();
            assert_eq!(err.error, FsError::InvalidInput, "{bad}");
        }
    }

    #[test]
    fn an_empty_root_is_a_configuration_error() {
        let fs = FileSystem::new("");

        let err = fs.metadata(Path::new("anything")).unwrap_err();
        assert_eq!(err.error, FsError::EmptyRoot);
        let err = fs.read_dir(Path::new(".")).map(|_| ()).unwrap_err();
        assert_eq!(err.error, FsError::EmptyRoot);
    }

    #[cfg(unix)]
    #[test]
    fn resolves_relative_symlinks_via_the_resolver() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("link-farm")).unwrap();
        std::fs::write(tmp.path().join("target"), "the real thing").unwrap();
        std::os::unix::fs::symlink("../target", tmp.path().join("link-farm/x")).unwrap();

        let fs = FileSystem::new(tmp.path());
        assert_eq!(
            crate::canonicalize(&fs, Path::new("link-farm/x")).unwrap(),
            PathBuf::from("target")
        );
    }
}
