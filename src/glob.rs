//! GlobEngine: lazy, bounded directory traversal yielding `DirectoryEntry`
//! values. Wraps `ignore::WalkBuilder`, which already implements
//! gitignore-aware, depth-capped, symlink-safe walking as a blocking
//! iterator — the engine runs it on a blocking thread and forwards entries
//! over a bounded channel so the async consumer drives back-pressure.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tokio::sync::mpsc;

use crate::error::FsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub mtime: Option<SystemTime>,
    pub symlink_target: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct GlobOptions {
    pub exclude_patterns: Vec<String>,
    pub include_hidden: bool,
    pub include_ignored: bool,
    pub max_depth: Option<usize>,
    pub only_files: bool,
    pub produce_stats: bool,
}

#[derive(Debug, Default)]
pub struct TraversalStats {
    pub skipped_inaccessible: usize,
}

/// Walk `root` and send every matching entry to `tx`. Runs the blocking
/// `ignore::WalkBuilder` iterator on a `spawn_blocking` task; the caller
/// drains `rx` at its own pace, which is the back-pressure mechanism —
/// the channel is bounded, so the blocking task stalls on `blocking_send`
/// once the consumer falls behind.
pub fn walk(root: PathBuf, opts: GlobOptions) -> mpsc::Receiver<Result<DirectoryEntry, FsError>> {
    let (tx, rx) = mpsc::channel(256);
    tokio::task::spawn_blocking(move || {
        let exclude_set = build_excludes(&opts.exclude_patterns);
        let mut builder = WalkBuilder::new(&root);
        builder
            .hidden(!opts.include_hidden)
            .ignore(!opts.include_ignored)
            .git_ignore(!opts.include_ignored)
            .git_global(!opts.include_ignored)
            .git_exclude(!opts.include_ignored)
            .follow_links(false)
            .sort_by_file_path(|a, b| a.cmp(b));
        if let Some(depth) = opts.max_depth {
            builder.max_depth(Some(depth));
        }

        for result in builder.build() {
            let dent = match result {
                Ok(d) => d,
                Err(_) => {
                    let _ = tx.blocking_send(Err(FsError::new(
                        crate::error::ErrorCode::EUnknown,
                        "inaccessible directory entry",
                    )));
                    continue;
                }
            };
            let path = dent.path();
            if path == root {
                continue;
            }
            let relative = path.strip_prefix(&root).unwrap_or(path).to_path_buf();
            if exclude_set.is_match(&relative) || exclude_set.is_match(path) {
                continue;
            }

            let file_type = dent.file_type();
            let kind = match file_type {
                Some(ft) if ft.is_symlink() => EntryKind::Symlink,
                Some(ft) if ft.is_dir() => EntryKind::Directory,
                Some(ft) if ft.is_file() => EntryKind::File,
                _ => EntryKind::Other,
            };

            if opts.only_files && kind == EntryKind::Directory {
                continue;
            }

            let (size, mtime) = if opts.produce_stats {
                match path.symlink_metadata() {
                    Ok(meta) => (Some(meta.len()), meta.modified().ok()),
                    Err(_) => (None, None),
                }
            } else {
                (None, None)
            };

            let symlink_target = if kind == EntryKind::Symlink {
                std::fs::read_link(path).ok()
            } else {
                None
            };

            let entry = DirectoryEntry {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                relative_path: relative,
                absolute_path: path.to_path_buf(),
                kind,
                size,
                mtime,
                symlink_target,
            };

            if tx.blocking_send(Ok(entry)).is_err() {
                return; // consumer dropped the receiver, stop opening directories
            }
        }
    });
    rx
}

fn build_excludes(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().expect("empty globset"))
}

/// Match a single glob pattern against a path relative to `cwd`, for tools
/// like `find` that filter entries by a user-supplied pattern rather than a
/// whole walk configuration.
pub fn pattern_matches(pattern: &str, relative_path: &Path) -> bool {
    Glob::new(pattern)
        .map(|g| g.compile_matcher().is_match(relative_path))
        .unwrap_or(false)
}
