//! A prefix-keyed registry routing sub-trees of the virtual namespace
//! to different backends.
//!
//! Mount points are matched on whole path segments and the longest
//! matching prefix wins, so a mount at `a/b` shadows one at `a` for
//! everything below `a/b` and never matches `a/bc`. Registration is
//! serialized against lookups with a read-write lock; a lookup can
//! never observe a partially-inserted mount point.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::trace;

use crate::{
    path, FileSystem, FsError, Metadata, PathError, ReadDir, Result, VirtualFile,
};

/// A [`FileSystem`] dispatching each operation to the backend mounted
/// at the most specific matching prefix, with the root backend (mounted
/// at `.`) as the fallback.
pub struct MountFileSystem {
    inner: RwLock<MountTable>,
}

struct MountTable {
    points: HashMap<String, Box<dyn FileSystem + Send + Sync>>,
    /// Mount point keys sorted by descending length, so a scan finds
    /// the longest matching prefix first. The root `.` is not listed;
    /// it is the fallback.
    ordered: Vec<String>,
}

impl MountTable {
    fn locate(&self, vpath: &str) -> (&(dyn FileSystem + Send + Sync), PathBuf) {
        for point in &self.ordered {
            if let Some(rest) = match_prefix(vpath, point) {
                return (self.points[point.as_str()].as_ref(), rest);
            }
        }
        (self.points["."].as_ref(), PathBuf::from(vpath))
    }
}

/// The remainder of `vpath` below the mount point, if the mount point
/// is a whole-segment prefix of it.
fn match_prefix(vpath: &str, point: &str) -> Option<PathBuf> {
    let rest = vpath.strip_prefix(point)?;
    if rest.is_empty() {
        return Some(PathBuf::from("."));
    }
    rest.strip_prefix('/').map(PathBuf::from)
}

impl MountFileSystem {
    /// Create a registry over `root`, which serves everything no other
    /// mount point claims.
    pub fn new(root: impl FileSystem + Send + Sync + 'static) -> Self {
        let mut points: HashMap<String, Box<dyn FileSystem + Send + Sync>> = HashMap::new();
        points.insert(".".to_owned(), Box::new(root));

        MountFileSystem {
            inner: RwLock::new(MountTable {
                points,
                ordered: Vec::new(),
            }),
        }
    }

    /// Register `fs` at `dir`.
    ///
    /// `dir` must be a well-formed virtual path naming an existing
    /// directory in the currently-mounted tree, and must not already be
    /// a mount point.
    pub fn mount(
        &self,
        dir: impl AsRef<Path>,
        fs: impl FileSystem + Send + Sync + 'static,
    ) -> Result<()> {
        let dir = dir.as_ref();
        path::check("mount", dir)?;
        let key = match dir.to_str() {
            Some("") => ".".to_owned(),
            Some(s) => s.to_owned(),
            None => return Err(PathError::new("mount", dir, FsError::InvalidInput)),
        };

        let mut table = self.inner.write().unwrap();

        {
            let (target, rest) = table.locate(&key);
            let metadata = target.symlink_metadata(&rest).map_err(|e| PathError {
                op: "mount",
                path: dir.to_owned(),
                error: e.error,
            })?;
            if !metadata.is_dir() {
                return Err(PathError::new("mount", dir, FsError::BaseNotDirectory));
            }
        }

        if table.points.contains_key(&key) {
            return Err(PathError::new("mount", dir, FsError::AlreadyExists));
        }

        trace!(mount = key.as_str(), "registering mount point");
        table.points.insert(key.clone(), Box::new(fs));
        let pos = table.ordered.partition_point(|p| p.len() >= key.len());
        table.ordered.insert(pos, key);

        Ok(())
    }

    /// The registered mount points, most specific first, excluding the
    /// root.
    pub fn mount_points(&self) -> Vec<PathBuf> {
        let table = self.inner.read().unwrap();
        table.ordered.iter().map(PathBuf::from).collect()
    }

    fn route<T>(
        &self,
        op: &'static str,
        vpath: &Path,
        func: impl FnOnce(&(dyn FileSystem + Send + Sync), &Path) -> Result<T>,
    ) -> Result<T> {
        path::check(op, vpath)?;
        let key = match vpath.to_str() {
            Some("") => ".",
            Some(s) => s,
            None => return Err(PathError::new(op, vpath, FsError::InvalidInput)),
        };

        let table = self.inner.read().unwrap();
        let (fs, rest) = table.locate(key);
        // The backend reports errors against its own remainder path;
        // rewrite them to the path the caller asked about.
        func(fs, &rest).map_err(|e| PathError {
            op: e.op,
            path: vpath.to_owned(),
            error: e.error,
        })
    }
}

impl FileSystem for MountFileSystem {
    fn open(&self, vpath: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>> {
        self.route("open", vpath, |fs, rest| fs.open(rest))
    }

    fn metadata(&self, vpath: &Path) -> Result<Metadata> {
        self.route("stat", vpath, |fs, rest| fs.metadata(rest))
    }

    fn read_file(&self, vpath: &Path) -> Result<Vec<u8>> {
        self.route("read_file", vpath, |fs, rest| fs.read_file(rest))
    }

    fn symlink_metadata(&self, vpath: &Path) -> Result<Metadata> {
        self.route("lstat", vpath, |fs, rest| fs.symlink_metadata(rest))
    }

    fn supports_readlink(&self) -> bool {
        let table = self.inner.read().unwrap();
        table.points.values().any(|fs| fs.supports_readlink())
    }

    fn readlink(&self, vpath: &Path) -> Result<PathBuf> {
        self.route("readlink", vpath, |fs, rest| fs.readlink(rest))
    }

    fn read_dir(&self, vpath: &Path) -> Result<ReadDir> {
        let listing = self.route("read_dir", vpath, |fs, rest| fs.read_dir(rest))?;

        // Entry paths come back relative to the selected backend;
        // rebase them onto the path the caller asked about.
        let entries = listing
            .map(|mut entry| {
                if let Some(name) = entry.path.file_name() {
                    entry.path = path::join_entry(vpath, name);
                }
                entry
            })
            .collect();

        Ok(ReadDir::new(entries))
    }
}

impl fmt::Debug for MountFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.inner.read().unwrap();
        f.debug_struct("MountFileSystem")
            .field("mount_points", &table.ordered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{mem_fs, FileSystemExt};

    fn base() -> mem_fs::FileSystem {
        let fs = mem_fs::FileSystem::new();
        fs.create_dir_all("srv/static").unwrap();
        fs.write("srv/index.html", "base index").unwrap();
        fs.write("top.txt", "top").unwrap();
        fs
    }

    fn static_files() -> mem_fs::FileSystem {
        let fs = mem_fs::FileSystem::new();
        fs.write("logo.png", "png bytes").unwrap();
        fs
    }

    #[test]
    fn the_root_backend_serves_unclaimed_paths() {
        let mount = MountFileSystem::new(base());

        assert_eq!(mount.read_to_string("top.txt").unwrap(), "top");
        assert_eq!(mount.read_to_string("srv/index.html").unwrap(), "base index");
    }

    #[test]
    fn mounted_backends_claim_their_subtree() {
        let mount = MountFileSystem::new(base());
        mount.mount("srv/static", static_files()).unwrap();

        assert_eq!(
            mount.read_to_string("srv/static/logo.png").unwrap(),
            "png bytes"
        );
        // Outside the mount the base still answers.
        assert_eq!(mount.read_to_string("srv/index.html").unwrap(), "base index");
        // The mount point itself resolves to the mounted root.
        assert!(mount.metadata(Path::new("srv/static")).unwrap().is_dir());
    }

    #[test]
    fn the_longest_matching_prefix_wins() {
        let base = base();
        base.create_dir_all("a/b").unwrap();

        let outer = mem_fs::FileSystem::new();
        outer.create_dir("b").unwrap();
        outer.write("outer.txt", "outer").unwrap();
        outer.write("b/shadowed.txt", "outer wins?").unwrap();

        let inner = mem_fs::FileSystem::new();
        inner.write("shadowed.txt", "inner wins").unwrap();

        let mount = MountFileSystem::new(base);
        mount.mount("a", outer).unwrap();
        mount.mount("a/b", inner).unwrap();

        assert_eq!(
            mount.read_to_string("a/b/shadowed.txt").unwrap(),
            "inner wins"
        );
        assert_eq!(mount.read_to_string("a/outer.txt").unwrap(), "outer");
        assert_eq!(
            mount.mount_points(),
            vec![PathBuf::from("a/b"), PathBuf::from("a")]
        );
    }

    #[test]
    fn prefixes_match_whole_segments_only() {
        let base = base();
        base.create_dir("a").unwrap();
        base.write("ab.txt", "not shadowed").unwrap();

        let mount = MountFileSystem::new(base);
        mount.mount("a", static_files()).unwrap();

        // `a` must not claim `ab.txt`.
        assert_eq!(mount.read_to_string("ab.txt").unwrap(), "not shadowed");
    }

    #[test]
    fn mounting_requires_an_existing_directory() {
        let mount = MountFileSystem::new(base());

        let err = mount.mount("nowhere", static_files()).unwrap_err();
        assert_eq!(err.error, FsError::EntryNotFound);
        assert_eq!(err.op, "mount");
        assert_eq!(err.path, PathBuf::from("nowhere"));

        let err = mount.mount("top.txt", static_files()).unwrap_err();
        assert_eq!(err.error, FsError::BaseNotDirectory);
    }

    #[test]
    fn duplicate_and_invalid_mounts_are_rejected() {
        let mount = MountFileSystem::new(base());
        mount.mount("srv/static", static_files()).unwrap();

        let err = mount.mount("srv/static", static_files()).unwrap_err();
        assert_eq!(err.error, FsError::AlreadyExists);

        // The root is implicitly mounted at construction.
        let err = mount.mount(".", static_files()).unwrap_err();
        assert_eq!(err.error, FsError::AlreadyExists);

        let err = mount.mount("../outside", static_files()).unwrap_err();
        assert_eq!(err.error, FsError::InvalidInput);
    }

    #[test]
    fn mounting_under_a_mount_checks_the_mounted_tree() {
        let outer = mem_fs::FileSystem::new();
        outer.create_dir("nested").unwrap();

        let mount = MountFileSystem::new(base());
        mount.mount("srv/static", outer).unwrap();

        // `srv/static/nested` only exists inside the mounted backend.
        mount.mount("srv/static/nested", static_files()).unwrap();
        assert_eq!(
            mount.read_to_string("srv/static/nested/logo.png").unwrap(),
            "png bytes"
        );
    }

    #[test]
    fn read_dir_rebases_entry_paths() {
        let mount = MountFileSystem::new(base());
        mount.mount("srv/static", static_files()).unwrap();

        let names: Vec<PathBuf> = mount
            .read_dir(Path::new("srv/static"))
            .unwrap()
            .map(|entry| entry.path())
            .collect();
        assert_eq!(names, vec![PathBuf::from("srv/static/logo.png")]);
    }

    #[test]
    fn errors_carry_the_callers_path() {
        let mount = MountFileSystem::new(base());
        mount.mount("srv/static", static_files()).unwrap();

        let err = mount
            .read_file(Path::new("srv/static/missing.png"))
            .unwrap_err();
        assert_eq!(err.error, FsError::EntryNotFound);
        assert_eq!(err.path, PathBuf::from("srv/static/missing.png"));
    }
}
