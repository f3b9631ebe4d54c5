//! The virtual path discipline: what a well-formed path looks like and
//! the lexical cleaning used when splicing symlink targets.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::{FsError, PathError, Result};

/// Reports whether `path` is a well-formed virtual path.
///
/// Virtual paths are slash-separated and relative: no leading slash, no
/// empty segments, no `.` or `..` segments. The root is spelled `.` (or
/// the empty path). Anything else, including a non-UTF-8 path, is
/// rejected before a backend ever sees it.
pub fn is_valid(path: &Path) -> bool {
    let Some(s) = path.to_str() else {
        return false;
    };

    if s.is_empty() || s == "." {
        return true;
    }
    if s.starts_with('/') {
        return false;
    }

    s.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Fails with [`FsError::InvalidInput`] unless `path` is a well-formed
/// virtual path.
pub(crate) fn check(op: &'static str, path: &Path) -> Result<()> {
    if is_valid(path) {
        Ok(())
    } else {
        Err(PathError::new(op, path, FsError::InvalidInput))
    }
}

/// Lexically cleans `path`: drops `.` and root components, resolves
/// `..` against preceding segments.
///
/// Leading `..` components that cannot be resolved are kept rather than
/// swallowed, so a cleaned path that escapes its root still fails
/// [`is_valid`] instead of silently rebasing.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => parts.push(component),
            },
            Component::Normal(_) => parts.push(component),
        }
    }

    parts.iter().map(|component| component.as_os_str()).collect()
}

/// The virtual path of a directory entry named `name` inside `base`.
pub(crate) fn join_entry(base: &Path, name: &OsStr) -> PathBuf {
    if base.as_os_str().is_empty() || base == Path::new(".") {
        PathBuf::from(name)
    } else {
        base.join(name)
    }
}
