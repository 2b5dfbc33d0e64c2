//! `calculate_hash`: SHA-256 of a file, or a deterministic composite hash of
//! a directory's relative-path-sorted entries and their content hashes.
//! Symlinks are excluded from the directory hash, matching the "never
//! follow" traversal invariant.

use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{classify, FsError};
use crate::glob::{self, EntryKind, GlobOptions};
use crate::sandbox::PathSandbox;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CalculateHashArgs {
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateHashResponse {
    pub path: String,
    pub sha256_hex: String,
    pub is_directory: bool,
    pub entries_hashed: usize,
}

pub async fn calculate_hash(
    sandbox: &PathSandbox,
    args: CalculateHashArgs,
) -> Result<CalculateHashResponse, FsError> {
    let validated = sandbox.validate_existing(&args.path).await?;
    let meta = tokio::fs::metadata(&validated.resolved_real)
        .await
        .map_err(|e| classify(e, Some(&validated.resolved_real)))?;

    if meta.is_file() {
        let hash = hash_file(&validated.resolved_real).await?;
        return Ok(CalculateHashResponse {
            path: validated.resolved_real.display().to_string(),
            sha256_hex: hash,
            is_directory: false,
            entries_hashed: 1,
        });
    }

    let opts = GlobOptions {
        exclude_patterns: vec![],
        include_hidden: true,
        include_ignored: true,
        max_depth: None,
        only_files: false,
        produce_stats: false,
    };
    let mut rx = glob::walk(validated.resolved_real.clone(), opts);
    let mut entries = Vec::new();
    while let Some(item) = rx.recv().await {
        let Ok(entry) = item else { continue };
        if entry.kind == EntryKind::Symlink {
            continue;
        }
        entries.push(entry);
    }
    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut composite = Sha256::new();
    for entry in &entries {
        let rel = entry.relative_path.to_string_lossy();
        composite.update(rel.as_bytes());
        composite.update(b"\0");
        match entry.kind {
            EntryKind::File => {
                let content_hash = hash_file(&entry.absolute_path).await?;
                composite.update(content_hash.as_bytes());
            }
            EntryKind::Directory => {
                composite.update(b"<dir>");
            }
            EntryKind::Other => {
                composite.update(b"<other>");
            }
            EntryKind::Symlink => unreachable!("symlinks filtered above"),
        }
        composite.update(b"\n");
    }

    Ok(CalculateHashResponse {
        path: validated.resolved_real.display().to_string(),
        sha256_hex: hex::encode(composite.finalize()),
        is_directory: true,
        entries_hashed: entries.len(),
    })
}

async fn hash_file(path: &std::path::Path) -> Result<String, FsError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| classify(e, Some(path)))?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::roots::RootSupervisor;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio::sync::RwLock;

    async fn sandbox_with_root(root: PathBuf) -> PathSandbox {
        let supervisor = RootSupervisor::new_for_test(Arc::new(RwLock::new(vec![root])));
        PathSandbox::new(supervisor, false, &[])
    }

    #[tokio::test]
    async fn file_hash_is_deterministic() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.txt");
        tokio::fs::write(&file, "hello").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let first = calculate_hash(
            &sb,
            CalculateHashArgs {
                path: file.to_str().unwrap().to_string(),
            },
        )
        .await
        .unwrap();
        let second = calculate_hash(
            &sb,
            CalculateHashArgs {
                path: file.to_str().unwrap().to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(first.sha256_hex, second.sha256_hex);
    }

    #[tokio::test]
    async fn directory_hash_is_order_independent_of_traversal() {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        tokio::fs::write(dir.path().join("sub/b.txt"), "b").await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "a").await.unwrap();
        let sb = sandbox_with_root(dir.path().canonicalize().unwrap()).await;
        let resp = calculate_hash(
            &sb,
            CalculateHashArgs {
                path: dir.path().to_str().unwrap().to_string(),
            },
        )
        .await
        .unwrap();
        assert!(resp.is_directory);
        assert_eq!(resp.entries_hashed, 3); // sub, sub/b.txt, a.txt
    }
}
