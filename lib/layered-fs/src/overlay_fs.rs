use std::fmt::Debug;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::{
    path, resolve, FileSystem, FileSystems, FsError, Metadata, PathError, ReadDir, Result,
    VirtualFile,
};

/// An ordered chain of filesystems presented as a single [`FileSystem`].
///
/// # Precedence
///
/// Sources are queried in insertion order: the first source to answer a
/// query, whether with success or with anything other than a not-found
/// error, is authoritative. A not-found result falls through to the next
/// source; if every source misses, the error from the highest-priority
/// source is returned so the most relevant diagnostic path survives.
///
/// The chain is fixed at construction, so any number of concurrent
/// queries may run against the same overlay without locking.
///
/// # Examples
///
/// [`FileSystems`] is implemented for tuples, arrays and `Vec`s, so
/// heterogeneous chains can be stored in-line:
///
/// ```rust
/// use layered_fs::{mem_fs, OverlayFileSystem};
///
/// let patches = mem_fs::FileSystem::new();
/// let base = mem_fs::FileSystem::new();
/// let fs = OverlayFileSystem::new((patches, base));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct OverlayFileSystem<S> {
    sources: S,
}

impl<S> OverlayFileSystem<S>
where
    S: for<'a> FileSystems<'a> + Send + Sync,
{
    /// Create a new overlay over `sources`, earliest source first.
    pub fn new(sources: S) -> Self {
        OverlayFileSystem { sources }
    }

    pub fn sources(&self) -> &S {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut S {
        &mut self.sources
    }

    pub fn into_inner(self) -> S {
        self.sources
    }

    /// Iterate over the sources in order of precedence.
    pub fn iter(&self) -> impl Iterator<Item = &(dyn FileSystem + Send + Sync)> + '_ {
        self.sources.iter_filesystems().into_iter()
    }

    /// The canonical, symlink-resolved form of `path` across the whole
    /// chain.
    pub fn canonicalize(&self, path: &Path) -> Result<PathBuf> {
        resolve::canonicalize(self, path)
    }

    /// Like [`canonicalize`](Self::canonicalize), but a symlink in the
    /// final component is kept rather than followed.
    pub fn canonicalize_nofollow(&self, path: &Path) -> Result<PathBuf> {
        resolve::canonicalize_nofollow(self, path)
    }

    /// Try `func` against each source in order of precedence.
    ///
    /// The first not-found error is remembered and returned if no source
    /// answers; any other error short-circuits the scan.
    fn for_each<T, F>(&self, op: &'static str, path: &Path, mut func: F) -> Result<T>
    where
        F: FnMut(&(dyn FileSystem + Send + Sync)) -> Result<T>,
    {
        path::check(op, path)?;

        let mut first_miss = None;
        let mut probed = false;

        for fs in self.iter() {
            probed = true;
            match func(fs) {
                Ok(value) => return Ok(value),
                Err(e) if should_continue(&e) => {
                    trace!(op, path = %path.display(), "source miss, falling through");
                    if first_miss.is_none() {
                        first_miss = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if !probed {
            return Err(PathError::new(op, path, FsError::NoBackends));
        }
        Err(first_miss.unwrap_or_else(|| PathError::new(op, path, FsError::EntryNotFound)))
    }
}

impl<S> FileSystem for OverlayFileSystem<S>
where
    S: for<'a> FileSystems<'a> + Send + Sync,
{
    fn open(&self, path: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>> {
        self.for_each("open", path, |fs| fs.open(path))
    }

    fn metadata(&self, path: &Path) -> Result<Metadata> {
        self.for_each("stat", path, |fs| fs.metadata(path))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.for_each("read_file", path, |fs| fs.read_file(path))
    }

    // Every source takes part here: a source without a native lstat
    // still answers through the synthesized default.
    fn symlink_metadata(&self, path: &Path) -> Result<Metadata> {
        self.for_each("lstat", path, |fs| fs.symlink_metadata(path))
    }

    fn supports_readlink(&self) -> bool {
        self.iter().any(|fs| fs.supports_readlink())
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        path::check("readlink", path)?;

        let mut first_miss = None;
        let mut probed = false;
        let mut capable = false;

        // Sources without the capability are skipped outright, not
        // treated as a miss.
        for fs in self.iter() {
            probed = true;
            if !fs.supports_readlink() {
                continue;
            }
            capable = true;
            match fs.readlink(path) {
                Ok(target) => return Ok(target),
                Err(e) if should_continue(&e) => {
                    if first_miss.is_none() {
                        first_miss = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if !probed {
            return Err(PathError::new("readlink", path, FsError::NoBackends));
        }
        match first_miss {
            Some(e) => Err(e),
            None if !capable => Err(PathError::new("readlink", path, FsError::InvalidInput)),
            None => Err(PathError::new("readlink", path, FsError::EntryNotFound)),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<ReadDir> {
        path::check("read_dir", path)?;

        let mut entries = Vec::new();
        let mut had_at_least_one_success = false;
        let mut first_miss = None;
        let mut probed = false;

        for fs in self.iter() {
            probed = true;
            match fs.read_dir(path) {
                Ok(listing) => {
                    entries.extend(listing);
                    had_at_least_one_success = true;
                }
                Err(e) if should_continue(&e) => {
                    if first_miss.is_none() {
                        first_miss = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if !probed {
            return Err(PathError::new("read_dir", path, FsError::NoBackends));
        }
        if !had_at_least_one_success {
            return Err(
                first_miss.unwrap_or_else(|| PathError::new("read_dir", path, FsError::EntryNotFound)),
            );
        }

        // This sort is stable, so entries from sources higher up the
        // chain stay in front and win the dedup.
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);

        Ok(ReadDir::new(entries))
    }
}

impl<S> Debug for OverlayFileSystem<S>
where
    S: for<'a> FileSystems<'a> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        struct Sources<'a, S>(&'a S);

        impl<S> Debug for Sources<'_, S>
        where
            S: for<'b> FileSystems<'b>,
        {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_list()
                    .entries(self.0.iter_filesystems())
                    .finish()
            }
        }

        f.debug_struct("OverlayFileSystem")
            .field("sources", &Sources(&self.sources))
            .finish()
    }
}

/// Is it okay to fall through to the next source after this error?
fn should_continue(e: &PathError) -> bool {
    e.is_not_found()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{mem_fs, FileSystemExt};

    /// A source that must never be reached; invalid paths are rejected
    /// before any backend call.
    #[derive(Debug)]
    struct Unreachable;

    impl FileSystem for Unreachable {
        fn open(&self, path: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>> {
            panic!("backend reached for {}", path.display());
        }

        fn metadata(&self, path: &Path) -> Result<Metadata> {
            panic!("backend reached for {}", path.display());
        }

        fn read_dir(&self, path: &Path) -> Result<ReadDir> {
            panic!("backend reached for {}", path.display());
        }
    }

    /// Misses every query, tagging the error with its own op marker so
    /// tests can tell which source produced it.
    #[derive(Debug)]
    struct Miss(&'static str);

    impl FileSystem for Miss {
        fn open(&self, path: &Path) -> Result<Box<dyn VirtualFile + Send + Sync + 'static>> {
            Err(PathError::new(self.0, path, FsError::EntryNotFound))
        }

        fn metadata(&self, path: &Path) -> Result<Metadata> {
            Err(PathError::new(self.0, path, FsError::EntryNotFound))
        }

        fn read_dir(&self, path: &Path) -> Result<ReadDir> {
            Err(PathError::new(self.0, path, FsError::EntryNotFound))
        }
    }

    fn readme_fs(contents: &str) -> mem_fs::FileSystem {
        let fs = mem_fs::FileSystem::new();
        fs.create_dir("docs").unwrap();
        fs.write("docs/readme.txt", contents).unwrap();
        fs
    }

    #[test]
    fn earlier_sources_win() {
        let a = readme_fs("hello");
        let b = readme_fs("world");

        let overlay = OverlayFileSystem::new((a.clone(), b.clone()));
        assert_eq!(
            overlay.read_to_string("docs/readme.txt").unwrap(),
            "hello"
        );

        let overlay = OverlayFileSystem::new((b, a));
        assert_eq!(
            overlay.read_to_string("docs/readme.txt").unwrap(),
            "world"
        );
    }

    #[test]
    fn a_miss_falls_through_to_later_sources() {
        let empty = mem_fs::FileSystem::new();
        let overlay = OverlayFileSystem::new((empty, readme_fs("hello")));

        assert_eq!(
            overlay.read_to_string("docs/readme.txt").unwrap(),
            "hello"
        );
        assert!(overlay.metadata(Path::new("docs")).unwrap().is_dir());
    }

    #[test]
    fn an_empty_chain_is_a_configuration_error() {
        let overlay = OverlayFileSystem::new(Vec::<mem_fs::FileSystem>::new());
        let path = Path::new("docs/readme.txt");

        for err in [
            overlay.open(path).map(|_| ()).unwrap_err(),
            overlay.metadata(path).map(|_| ()).unwrap_err(),
            overlay.symlink_metadata(path).map(|_| ()).unwrap_err(),
            overlay.read_file(path).map(|_| ()).unwrap_err(),
            overlay.read_dir(path).map(|_| ()).unwrap_err(),
            overlay.readlink(path).map(|_| ()).unwrap_err(),
        ] {
            assert_eq!(err.error, FsError::NoBackends);
        }
    }

    #[test]
    fn the_first_miss_is_the_one_reported() {
        let overlay = OverlayFileSystem::new((Miss("first"), Miss("second")));

        let err = overlay.open(Path::new("anything")).unwrap_err();
        assert_eq!(err.op, "first");
        assert_eq!(err.error, FsError::EntryNotFound);
    }

    #[test]
    fn authoritative_errors_stop_the_scan() {
        let locked = readme_fs("hello");
        locked.set_mode("docs/readme.txt", 0o000).unwrap();

        let overlay = OverlayFileSystem::new((locked, readme_fs("world")));
        let err = overlay.read_file(Path::new("docs/readme.txt")).unwrap_err();
        assert_eq!(err.error, FsError::PermissionDenied);
    }

    #[test]
    fn invalid_paths_never_touch_a_backend() {
        let overlay = OverlayFileSystem::new((Unreachable,));

        for path in ["../escape", "/abs", "a//b", "a/./b"] {
            let err = overlay.open(Path::new(path)).map(|_| ()).unwrap_err();
            assert_eq!(err.error, FsError::InvalidInput);
            let err = overlay.read_dir(Path::new(path)).map(|_| ()).unwrap_err();
            assert_eq!(err.error, FsError::InvalidInput);
            let err = overlay.readlink(Path::new(path)).map(|_| ()).unwrap_err();
            assert_eq!(err.error, FsError::InvalidInput);
        }
    }

    #[test]
    fn readlink_skips_sources_without_the_capability() {
        let links = mem_fs::FileSystem::new();
        links.symlink("latest", "docs/readme.txt").unwrap();

        // `Miss` does not advertise readlink, so it must be skipped, not
        // allowed to abort the scan with its default InvalidInput.
        let overlay = OverlayFileSystem::new((Miss("first"), links));
        assert_eq!(
            overlay.readlink(Path::new("latest")).unwrap(),
            PathBuf::from("docs/readme.txt")
        );
    }

    #[test]
    fn readlink_with_no_capable_source_is_invalid() {
        let overlay = OverlayFileSystem::new((Miss("only"),));
        let err = overlay.readlink(Path::new("latest")).unwrap_err();
        assert_eq!(err.error, FsError::InvalidInput);
    }

    #[test]
    fn read_dir_merges_and_earlier_entries_shadow() {
        let a = readme_fs("hello");
        a.write("docs/a-only.txt", "a").unwrap();
        let b = readme_fs("world");
        b.write("docs/b-only.txt", "b").unwrap();

        let overlay = OverlayFileSystem::new((a, b));
        let names: Vec<PathBuf> = overlay
            .read_dir(Path::new("docs"))
            .unwrap()
            .map(|entry| entry.path())
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("docs/a-only.txt"),
                PathBuf::from("docs/b-only.txt"),
                PathBuf::from("docs/readme.txt"),
            ]
        );

        // The deduplicated readme is the higher-priority one.
        assert_eq!(overlay.read_to_string("docs/readme.txt").unwrap(), "hello");
    }

    #[test]
    fn overlays_nest_and_box() {
        let inner = OverlayFileSystem::new(vec![readme_fs("hello")]);
        let boxed: Box<dyn FileSystem + Send + Sync> = Box::new(inner);

        let outer = OverlayFileSystem::new(vec![boxed]);
        assert_eq!(outer.read_to_string("docs/readme.txt").unwrap(), "hello");

        let _object: Arc<dyn FileSystem + Send + Sync> = Arc::new(outer);
    }
}
