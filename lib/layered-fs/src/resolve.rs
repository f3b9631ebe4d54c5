//! Segment-by-segment path resolution with kernel-style symlink
//! handling: each intermediate component is lstat'ed, symlink targets
//! are spliced into the remaining path, and a redirect budget bounds
//! cyclic chains.

use std::path::{Path, PathBuf};

use tracing::trace;

use crate::{path, FileSystem, FsError, Metadata, PathError, Result};

/// Directories without any read bit cannot be traversed.
const READ_BITS: u32 = 0o444;

/// Upper bound on symlink redirections in a single resolution, the
/// ELOOP analogue.
const MAX_REDIRECTS: u8 = 255;

/// Resolve `path` against `fs` into its canonical, symlink-free form,
/// following a symlink in the final component.
///
/// This is the stat-style mode: the result names whatever the path
/// ultimately points at. Resolving an already-canonical path returns it
/// unchanged.
pub fn canonicalize(fs: &dyn FileSystem, path: &Path) -> Result<PathBuf> {
    resolve(fs, path, true)
}

/// Resolve `path` against `fs`, keeping a symlink in the final
/// component unresolved.
///
/// This is the lstat-style mode: every intermediate symlink is
/// followed, but the result may itself name a symlink.
pub fn canonicalize_nofollow(fs: &dyn FileSystem, path: &Path) -> Result<PathBuf> {
    resolve(fs, path, false)
}

fn resolve(fs: &dyn FileSystem, requested: &Path, resolve_last: bool) -> Result<PathBuf> {
    path::check("resolve", requested)?;

    let full_path = match requested.to_str() {
        Some("") | Some(".") => ".".to_owned(),
        Some(s) => s.to_owned(),
        // Validity implies UTF-8; this arm is unreachable in practice.
        None => return Err(PathError::new("resolve", requested, FsError::InvalidInput)),
    };

    let mut resolver = Resolver {
        fs,
        full_path,
        cut_at: 0,
        redirects_remaining: MAX_REDIRECTS,
    };
    resolver.walk(resolve_last)?;

    Ok(PathBuf::from(resolver.full_path))
}

/// Transient per-call state: the path being walked, a cursor marking how
/// much of it has been consumed, and the remaining redirect budget.
struct Resolver<'a> {
    fs: &'a dyn FileSystem,
    full_path: String,
    cut_at: usize,
    redirects_remaining: u8,
}

impl Resolver<'_> {
    fn walk(&mut self, resolve_last: bool) -> Result<()> {
        let root = self.fs.symlink_metadata(Path::new("."))?;
        let mut curr = root;

        while !self.done() {
            self.check_traversable(&curr)?;

            let segment = self.split_next();
            if segment.is_empty() || segment == "." {
                continue;
            }

            let prefix = self.consumed().to_owned();
            curr = self.fs.symlink_metadata(Path::new(&prefix))?;

            if self.done() && !resolve_last {
                break;
            }
            if !curr.file_type().is_symlink() {
                continue;
            }

            self.follow_symlink(&prefix, &segment)?;
            curr = root;
        }

        Ok(())
    }

    /// Whether the whole of `full_path` has been consumed.
    fn done(&self) -> bool {
        self.cut_at >= self.full_path.len()
    }

    /// The part of `full_path` walked so far, `.` before the first
    /// segment.
    fn consumed(&self) -> &str {
        if self.cut_at == 0 {
            "."
        } else {
            &self.full_path[..self.cut_at]
        }
    }

    /// The part of `full_path` not walked yet, without a leading slash.
    fn rest(&self) -> &str {
        if self.done() {
            ""
        } else if self.cut_at == 0 {
            &self.full_path
        } else {
            &self.full_path[self.cut_at + 1..]
        }
    }

    /// Advance the cursor past the next segment and return it.
    fn split_next(&mut self) -> String {
        let start = if self.cut_at == 0 { 0 } else { self.cut_at + 1 };
        let rest = &self.full_path[start..];
        let len = rest.find('/').unwrap_or(rest.len());
        let segment = rest[..len].to_owned();
        self.cut_at = start + len;
        segment
    }

    /// The entry at the consumed prefix must be a directory with at
    /// least one read bit for the walk to continue into it.
    fn check_traversable(&self, curr: &Metadata) -> Result<()> {
        if curr.mode & READ_BITS == 0 {
            return Err(PathError::new(
                "resolve",
                self.consumed(),
                FsError::PermissionDenied,
            ));
        }
        if !curr.is_dir() {
            return Err(PathError::new(
                "resolve",
                self.consumed(),
                FsError::BaseNotDirectory,
            ));
        }
        Ok(())
    }

    /// Splice the target of the symlink at `prefix` (whose final segment
    /// is `segment`) into the path and restart the walk from the root.
    fn follow_symlink(&mut self, prefix: &str, segment: &str) -> Result<()> {
        self.redirects_remaining = self.redirects_remaining.saturating_sub(1);
        if self.redirects_remaining == 0 {
            return Err(PathError::new("resolve", prefix, FsError::InvalidInput));
        }

        let target = self.fs.readlink(Path::new(prefix))?;
        let target = target
            .to_str()
            .ok_or_else(|| PathError::new("resolve", prefix, FsError::InvalidData))?
            .to_owned();

        trace!(
            link = prefix,
            target = target.as_str(),
            remaining = self.redirects_remaining as u64,
            "following symlink"
        );

        let spliced = if let Some(absolute) = target.strip_prefix('/') {
            // An absolute target restarts from the root; the target
            // itself becomes the whole remaining walk.
            path::normalize(Path::new(absolute))
        } else {
            // A relative target is resolved against the directory
            // containing the link, followed by whatever was left to
            // walk.
            let dir = &prefix[..prefix.len() - segment.len()];
            let mut joined = PathBuf::from(dir.strip_suffix('/').unwrap_or(dir));
            joined.push(&target);
            let rest = self.rest();
            if !rest.is_empty() {
                joined.push(rest);
            }
            path::normalize(&joined)
        };

        if !path::is_valid(&spliced) {
            // The target walks out of the root.
            return Err(PathError::new("resolve", prefix, FsError::InvalidInput));
        }

        self.full_path = match spliced.to_str() {
            Some("") | None => ".".to_owned(),
            Some(s) => s.to_owned(),
        };
        self.cut_at = 0;

        Ok(())
    }
}
