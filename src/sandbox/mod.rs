//! PathSandbox: maps a requested path to a `ValidatedPath` or a classified error.
//!
//! Every operation in the engine must pass a path through here before touching
//! bytes at it. Validation runs the allow-list check twice — once against the
//! lexically normalized path, once against the OS-canonicalized path — so a
//! symlink pointing outside the sandbox is caught even though the first check
//! only sees the un-resolved string.

pub mod roots;

use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{classify, ErrorCode, FsError};
pub use roots::RootSupervisor;

/// Result of successful path validation. `is_symlink` is true iff the lexical
/// and canonical forms diverge — i.e. some component along the path was a
/// symlink that got resolved away.
#[derive(Debug, Clone)]
pub struct ValidatedPath {
    pub requested_norm: PathBuf,
    pub resolved_real: PathBuf,
    pub is_symlink: bool,
}

pub struct PathSandbox {
    roots: RootSupervisor,
    sensitive_deny: GlobSet,
    sensitive_allow: GlobSet,
}

const DEFAULT_SENSITIVE_PATTERNS: &[&str] = &[
    "**/.env",
    "**/.env.*",
    "**/.npmrc",
    "**/.netrc",
    "**/id_rsa",
    "**/id_ed25519",
    "**/*.pem",
    "**/.aws/credentials",
];

impl PathSandbox {
    pub fn new(roots: RootSupervisor, allow_sensitive: bool, allowlist: &[String]) -> Self {
        let sensitive_deny = if allow_sensitive {
            GlobSetBuilder::new().build().expect("empty globset")
        } else {
            build_globset(DEFAULT_SENSITIVE_PATTERNS.iter().map(|s| s.to_string()))
        };
        let sensitive_allow = build_globset(allowlist.iter().cloned());
        Self {
            roots,
            sensitive_deny,
            sensitive_allow,
        }
    }

    pub fn roots(&self) -> &RootSupervisor {
        &self.roots
    }

    /// Validate a path that is expected to already exist.
    pub async fn validate_existing(&self, requested: &str) -> Result<ValidatedPath, FsError> {
        self.validate(requested, Mode::MustExist).await
    }

    /// As `validate_existing`, additionally requiring the target to be a directory.
    pub async fn validate_existing_directory(
        &self,
        requested: &str,
    ) -> Result<ValidatedPath, FsError> {
        let v = self.validate(requested, Mode::MustExist).await?;
        let meta = tokio::fs::metadata(&v.resolved_real)
            .await
            .map_err(|e| classify(e, Some(&v.resolved_real)))?;
        if !meta.is_dir() {
            return Err(
                FsError::new(ErrorCode::ENotDirectory, "not a directory").with_path(&v.resolved_real)
            );
        }
        Ok(v)
    }

    /// Validate a path for writing: the target need not exist, but its parent
    /// must, and the eventual resolved path must lie inside an allowed root.
    pub async fn validate_for_write(&self, requested: &str) -> Result<ValidatedPath, FsError> {
        self.validate(requested, Mode::ForWrite).await
    }

    async fn validate(&self, requested: &str, mode: Mode) -> Result<ValidatedPath, FsError> {
        reject_empty_or_nul(requested)?;
        reject_reserved_and_drive_relative(requested)?;

        let mut requested_norm = lexical_normalize(requested);

        let snapshot = self.roots.snapshot().await;
        if snapshot.is_empty() {
            return Err(FsError::new(
                ErrorCode::EInvalidInput,
                "Client not initialized",
            ));
        }

        // A relative request (".", "sub/file.txt") is resolved against the
        // first allowed root rather than the process CWD — callers never
        // see a path outside the sandbox even before the allow-list check
        // below runs.
        if requested_norm.is_relative() {
            requested_norm = snapshot[0].join(&requested_norm);
        }

        ensure_inside(&requested_norm, &snapshot).map_err(|_| {
            FsError::new(
                ErrorCode::EAccessDenied,
                format!(
                    "path is outside allowed roots: [{}]",
                    snapshot
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
            .with_path(&requested_norm)
        })?;

        let resolved_real = match mode {
            Mode::MustExist => tokio::fs::canonicalize(&requested_norm)
                .await
                .map_err(|e| classify(e, Some(&requested_norm)))?,
            Mode::ForWrite => {
                let parent = requested_norm.parent().ok_or_else(|| {
                    FsError::invalid_input("path has no parent directory")
                        .with_path(&requested_norm)
                })?;
                let parent_real = tokio::fs::canonicalize(parent)
                    .await
                    .map_err(|e| classify(e, Some(parent)))?;
                let file_name = requested_norm.file_name().ok_or_else(|| {
                    FsError::invalid_input("path has no file name").with_path(&requested_norm)
                })?;
                parent_real.join(file_name)
            }
        };

        ensure_inside(&resolved_real, &snapshot).map_err(|_| {
            FsError::new(
                ErrorCode::EAccessDenied,
                "resolved path escapes allowed roots (symlink?)",
            )
            .with_path(&resolved_real)
        })?;

        if self.sensitive_deny.is_match(&resolved_real) && !self.sensitive_allow.is_match(&resolved_real)
        {
            return Err(FsError::new(
                ErrorCode::EAccessDenied,
                "path matches the sensitive-file deny list",
            )
            .with_path(&resolved_real));
        }

        let is_symlink = requested_norm != resolved_real;
        Ok(ValidatedPath {
            requested_norm,
            resolved_real,
            is_symlink,
        })
    }
}

enum Mode {
    MustExist,
    ForWrite,
}

fn build_globset(patterns: impl Iterator<Item = String>) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = Glob::new(&pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().expect("empty globset"))
}

fn reject_empty_or_nul(requested: &str) -> Result<(), FsError> {
    if requested.trim().is_empty() {
        return Err(FsError::invalid_input("path must not be empty"));
    }
    if requested.contains('\0') {
        return Err(FsError::invalid_input("path must not contain a null byte"));
    }
    Ok(())
}

#[cfg(windows)]
fn reject_reserved_and_drive_relative(requested: &str) -> Result<(), FsError> {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    for component in Path::new(requested).components() {
        if let Component::Normal(os) = component {
            let name = os.to_string_lossy();
            let base = name.split('.').next().unwrap_or(&name);
            let base = base.split(':').next().unwrap_or(base);
            let trimmed = base.trim_end_matches(['.', ' ']);
            if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(trimmed)) {
                return Err(FsError::invalid_input(format!(
                    "reserved device name: {name}"
                )));
            }
        }
    }
    // Drive-relative form: "C:foo" (drive letter, colon, no following separator).
    let bytes = requested.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let rest = &requested[2..];
        if !rest.starts_with('\\') && !rest.starts_with('/') {
            return Err(FsError::invalid_input(
                "drive-relative paths are not allowed",
            ));
        }
    }
    Ok(())
}

#[cfg(not(windows))]
fn reject_reserved_and_drive_relative(_requested: &str) -> Result<(), FsError> {
    Ok(())
}

/// Collapse separators and resolve `.`/`..` against the string only, never
/// touching the filesystem.
fn lexical_normalize(requested: &str) -> PathBuf {
    let path = Path::new(requested);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    // Can't climb above root; keep the component so validation
                    // against the allow-list below rejects it explicitly.
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn ensure_inside(path: &Path, roots: &[PathBuf]) -> Result<(), ()> {
    for root in roots {
        if path == root || path.starts_with(root) {
            return Ok(());
        }
    }
    Err(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::RwLock;

    async fn sandbox_with_root(root: PathBuf) -> PathSandbox {
        let supervisor = RootSupervisor::new_for_test(Arc::new(RwLock::new(vec![root])));
        PathSandbox::new(supervisor, false, &[])
    }

    #[tokio::test]
    async fn rejects_null_byte() {
        let dir = tempdir().unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let err = sb.validate_existing("foo\0bar").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::EInvalidInput);
    }

    #[tokio::test]
    async fn rejects_path_outside_root() {
        let dir = tempdir().unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let err = sb.validate_existing("/etc/passwd").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::EAccessDenied);
    }

    #[tokio::test]
    async fn accepts_file_inside_root() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "hi").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let v = sb
            .validate_existing(file.to_str().unwrap())
            .await
            .unwrap();
        assert!(!v.is_symlink);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escaping_root_is_rejected() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let secret = outside.path().join("secret.txt");
        tokio::fs::write(&secret, "nope").await.unwrap();
        let link = dir.path().join("link");
        tokio::fs::symlink(outside.path(), &link).await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let target = link.join("secret.txt");
        let err = sb
            .validate_existing(target.to_str().unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::EAccessDenied);
    }

    #[tokio::test]
    async fn validate_for_write_allows_nonexistent_target() {
        let dir = tempdir().unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let target = dir.path().join("new.txt");
        let v = sb
            .validate_for_write(target.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(v.resolved_real.file_name().unwrap(), "new.txt");
    }
}
